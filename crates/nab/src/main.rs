use std::{path::Path, sync::Arc};

use anyhow::Context;
use tracing::{error, info};

use nab_core::{
    config::{self, Config},
    provider::ProviderRegistry,
    store::SubscriptionStore,
};
use nab_twitter::TwitterProvider;
use nab_vk::VkProvider;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // `.env` first so LOG_FILE can come from it.
    config::load_dotenv_if_present(Path::new(".env"));
    nab_core::logging::init("nab", config::log_file_from_env().as_deref())
        .context("failed to initialize logging")?;

    let cfg = match Config::load() {
        Ok(cfg) => Arc::new(cfg),
        Err(e) => {
            error!(error = %e, "configuration invalid, exiting");
            return Err(e.into());
        }
    };
    info!(
        interval_secs = cfg.poll_interval.as_secs(),
        fetch_limit = cfg.fetch_limit,
        "configuration loaded"
    );

    let providers = ProviderRegistry::new()
        .with(Arc::new(VkProvider::new(
            cfg.vk_access_token.clone(),
            cfg.vk_api_version.clone(),
            cfg.http_timeout,
        )?))
        .with(Arc::new(TwitterProvider::new(
            cfg.twitter_bearer_token.clone(),
            cfg.http_timeout,
        )?));

    let store = Arc::new(SubscriptionStore::open(cfg.sources_file.clone()));

    nab_telegram::router::run(cfg, store, providers)
        .await
        .context("telegram bot failed")
}
