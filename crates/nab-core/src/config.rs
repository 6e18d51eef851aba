use std::{
    env, fs,
    path::{Path, PathBuf},
    time::Duration,
};

use crate::{errors::Error, Result};

const REQUIRED_VARS: [&str; 3] = [
    "TELEGRAM_BOT_TOKEN",
    "VK_ACCESS_TOKEN",
    "TWITTER_BEARER_TOKEN",
];

/// Shortest interval that still leaves room for a one-second fetch timeout.
const MIN_POLL_INTERVAL: Duration = Duration::from_secs(2);

/// Typed configuration for the bot.
#[derive(Clone, Debug)]
pub struct Config {
    // Credentials
    pub telegram_bot_token: String,
    pub vk_access_token: String,
    pub twitter_bearer_token: String,

    // State
    pub sources_file: PathBuf,

    // Polling
    pub poll_interval: Duration,
    pub fetch_timeout: Duration,
    pub fetch_limit: usize,
    pub preview_limit: usize,

    // Providers
    pub vk_api_version: String,
    pub http_timeout: Duration,

    // Telegram limits
    pub telegram_message_limit: usize,
}

impl Config {
    pub fn load() -> Result<Self> {
        load_dotenv_if_present(Path::new(".env"));
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Build a config from an arbitrary key lookup (the environment in production).
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let get = |key: &str| lookup(key).and_then(non_empty);

        let missing: Vec<&str> = REQUIRED_VARS
            .iter()
            .copied()
            .filter(|key| get(*key).is_none())
            .collect();
        if !missing.is_empty() {
            return Err(Error::Config(format!(
                "missing required environment variables: {}",
                missing.join(", ")
            )));
        }

        let telegram_bot_token = get("TELEGRAM_BOT_TOKEN").unwrap_or_default();
        let vk_access_token = get("VK_ACCESS_TOKEN").unwrap_or_default();
        let twitter_bearer_token = get("TWITTER_BEARER_TOKEN").unwrap_or_default();

        let sources_file = PathBuf::from(
            get("SOURCES_FILE").unwrap_or_else(|| "sources.json".to_string()),
        );

        let poll_interval = Duration::from_secs(parse_u64(get("POLL_INTERVAL_SECS")).unwrap_or(600));
        if poll_interval < MIN_POLL_INTERVAL {
            return Err(Error::Config(format!(
                "POLL_INTERVAL_SECS must be at least {}",
                MIN_POLL_INTERVAL.as_secs()
            )));
        }

        // A fetch must finish well inside one interval or the loop stalls.
        let fetch_timeout = Duration::from_secs(parse_u64(get("FETCH_TIMEOUT_SECS")).unwrap_or(30))
            .min(poll_interval / 2)
            .max(Duration::from_secs(1));

        let fetch_limit = parse_usize(get("FETCH_LIMIT")).unwrap_or(10).clamp(1, 100);
        let preview_limit = parse_usize(get("PREVIEW_LIMIT")).unwrap_or(5).clamp(1, 20);

        let vk_api_version = get("VK_API_VERSION").unwrap_or_else(|| "5.199".to_string());
        let http_timeout = Duration::from_secs(parse_u64(get("HTTP_TIMEOUT_SECS")).unwrap_or(15));

        let telegram_message_limit = parse_usize(get("TELEGRAM_MESSAGE_LIMIT"))
            .unwrap_or(4096)
            .max(200);

        Ok(Self {
            telegram_bot_token,
            vk_access_token,
            twitter_bearer_token,
            sources_file,
            poll_interval,
            fetch_timeout,
            fetch_limit,
            preview_limit,
            vk_api_version,
            http_timeout,
            telegram_message_limit,
        })
    }
}

/// Log file path: `LOG_FILE`, defaulting to `bot.log`; an empty value disables file logging.
pub fn log_file_from_env() -> Option<PathBuf> {
    match env::var("LOG_FILE") {
        Ok(v) if v.trim().is_empty() => None,
        Ok(v) => Some(PathBuf::from(v.trim())),
        Err(_) => Some(PathBuf::from("bot.log")),
    }
}

pub fn load_dotenv_if_present(path: &Path) {
    let Ok(contents) = fs::read_to_string(path) else {
        return;
    };

    for (key, val) in parse_dotenv(&contents) {
        if env::var_os(&key).is_some() {
            continue; // do not override existing env
        }
        env::set_var(key, val);
    }
}

fn parse_dotenv(contents: &str) -> Vec<(String, String)> {
    let mut out = Vec::new();
    for raw in contents.lines() {
        let line = raw.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        let line = line.strip_prefix("export ").unwrap_or(line);

        let Some((k, v)) = line.split_once('=') else {
            continue;
        };

        let key = k.trim();
        if key.is_empty() {
            continue;
        }

        let mut val = v.trim().to_string();
        // Strip optional surrounding quotes.
        if val.len() >= 2
            && ((val.starts_with('"') && val.ends_with('"'))
                || (val.starts_with('\'') && val.ends_with('\'')))
        {
            val = val[1..val.len() - 1].to_string();
        }

        out.push((key.to_string(), val));
    }
    out
}

fn parse_u64(v: Option<String>) -> Option<u64> {
    v.and_then(|s| s.trim().parse::<u64>().ok())
}

fn parse_usize(v: Option<String>) -> Option<usize> {
    v.and_then(|s| s.trim().parse::<usize>().ok())
}

fn non_empty(s: String) -> Option<String> {
    if s.trim().is_empty() {
        None
    } else {
        Some(s)
    }
}
