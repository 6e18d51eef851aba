use std::time::Duration;

/// Core error type for the aggregator.
///
/// Adapter crates map their specific errors into this type so the poller and
/// the command layer can tell fatal failures (config) from per-source or
/// per-target ones that only get logged.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("config error: {0}")]
    Config(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("provider error: {0}")]
    Provider(String),

    #[error("provider call timed out after {0:?}")]
    Timeout(Duration),

    #[error("delivery error: {0}")]
    Delivery(String),

    #[error("persistence error: {0}")]
    Persistence(String),

    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),

    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),
}

impl Error {
    /// Transient failures are retried naturally by the next poll cycle.
    pub fn is_transient(&self) -> bool {
        matches!(self, Error::Provider(_) | Error::Timeout(_) | Error::Delivery(_))
    }
}

pub type Result<T> = std::result::Result<T, Error>;
