//! Core of the news aggregator bot: subscription state, cursor-based
//! deduplication, delivery fan-out and the poll loop.
//!
//! Framework-agnostic. Telegram and the social platform APIs live behind ports
//! (`MessagingPort`, `SourceProvider`) implemented in adapter crates.

pub mod config;
pub mod dedup;
pub mod delivery;
pub mod domain;
pub mod errors;
pub mod formatting;
pub mod logging;
pub mod messaging;
pub mod poller;
pub mod provider;
pub mod store;
pub mod subscriptions;

#[cfg(test)]
mod test_support;

pub use errors::{Error, Result};
