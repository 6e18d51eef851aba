use std::sync::Arc;

use teloxide::{dispatching::Dispatcher, dptree, prelude::*, types::BotCommand};
use tracing::{info, warn};

use nab_core::{
    config::Config,
    messaging::{
        port::MessagingPort,
        throttled::{ThrottleConfig, ThrottledMessenger},
    },
    poller::{PollSettings, Poller},
    provider::ProviderRegistry,
    store::SubscriptionStore,
    subscriptions::Subscriptions,
};

use crate::handlers;
use crate::TelegramMessenger;

#[derive(Clone)]
pub struct AppState {
    pub service: Subscriptions,
    pub messenger: Arc<dyn MessagingPort>,
    /// Posts shown by the "show latest posts" button.
    pub preview_limit: usize,
    /// Username from `get_me`; commands addressed to other bots are skipped.
    pub bot_username: Option<String>,
}

fn bot_commands() -> Vec<BotCommand> {
    vec![
        BotCommand::new("start", "Subscribe this chat to news"),
        BotCommand::new("help", "Show help"),
        BotCommand::new("add_vk_source", "Watch a VK group"),
        BotCommand::new("add_twitter_source", "Watch a Twitter account"),
        BotCommand::new("list_sources", "Show watched sources"),
        BotCommand::new("remove_source", "Stop watching a source"),
        BotCommand::new("stop", "Unsubscribe this chat"),
    ]
}

/// Start the poll loop and serve Telegram updates until the dispatcher exits.
pub async fn run(
    cfg: Arc<Config>,
    store: Arc<SubscriptionStore>,
    providers: ProviderRegistry,
) -> anyhow::Result<()> {
    let bot = Bot::new(cfg.telegram_bot_token.clone());

    let bot_username = match bot.get_me().await {
        Ok(me) => {
            info!(username = ?me.user.username, "bot started");
            me.user.username.clone()
        }
        Err(e) => {
            warn!(error = %e, "get_me failed, continuing");
            None
        }
    };
    if let Err(e) = bot.set_my_commands(bot_commands()).await {
        warn!(error = %e, "failed to register bot commands");
    }
    info!(
        sources_file = %store.path().display(),
        targets = store.list_targets().len(),
        providers = ?providers.platforms(),
        "state loaded"
    );

    // Fan-out bursts are throttled here; 429 RetryAfter is still retried in the adapter.
    let raw_messenger: Arc<dyn MessagingPort> = Arc::new(
        TelegramMessenger::new(bot.clone()).with_message_limit(cfg.telegram_message_limit),
    );
    let messenger: Arc<dyn MessagingPort> = Arc::new(ThrottledMessenger::new(
        raw_messenger,
        ThrottleConfig::default(),
    ));

    let poller = Poller::new(
        store.clone(),
        providers.clone(),
        messenger.clone(),
        PollSettings::from_config(&cfg),
    );
    let poll_task = poller.spawn();

    let state = Arc::new(AppState {
        service: Subscriptions::new(store, providers, cfg.fetch_timeout),
        messenger,
        preview_limit: cfg.preview_limit,
        bot_username,
    });

    let handler = dptree::entry()
        .branch(Update::filter_callback_query().endpoint(handlers::handle_callback))
        .branch(Update::filter_message().endpoint(handlers::handle_message));

    Dispatcher::builder(bot, handler)
        .dependencies(dptree::deps![state])
        .build()
        .dispatch()
        .await;

    poll_task.abort();
    info!("bot stopped");
    Ok(())
}
