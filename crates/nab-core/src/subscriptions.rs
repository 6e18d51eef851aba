//! Command-facing operations over the store and the providers.
//!
//! The Telegram layer parses commands and renders replies; everything that
//! touches state or a platform API goes through [`Subscriptions`].

use std::{collections::BTreeMap, sync::Arc, time::Duration};

use tracing::info;

use crate::{
    domain::{ChatId, Platform, Post, Source},
    errors::Error,
    provider::{chronological, ProviderRegistry},
    store::SubscriptionStore,
    Result,
};

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum AddOutcome {
    Added { id: String, name: String },
    AlreadyWatched { id: String },
}

#[derive(Clone)]
pub struct Subscriptions {
    store: Arc<SubscriptionStore>,
    providers: ProviderRegistry,
    fetch_timeout: Duration,
}

impl Subscriptions {
    pub fn new(
        store: Arc<SubscriptionStore>,
        providers: ProviderRegistry,
        fetch_timeout: Duration,
    ) -> Self {
        Self {
            store,
            providers,
            fetch_timeout,
        }
    }

    pub fn store(&self) -> &Arc<SubscriptionStore> {
        &self.store
    }

    /// Resolve `raw_id` on the platform, then start watching it.
    ///
    /// Errors with `NotFound` when the platform does not know the id; nothing
    /// is stored in that case.
    pub async fn add_source(&self, platform: Platform, raw_id: &str) -> Result<AddOutcome> {
        let id = platform.normalize_id(raw_id);
        if id.is_empty() {
            return Err(Error::NotFound(format!("empty {} source id", platform.label())));
        }
        if self.store.find_source(platform, &id).is_some() {
            return Ok(AddOutcome::AlreadyWatched { id });
        }

        let provider = self.providers.get(platform)?;
        let name = tokio::time::timeout(self.fetch_timeout, provider.resolve_display_name(&id))
            .await
            .map_err(|_| Error::Timeout(self.fetch_timeout))??;

        if !self.store.add_source(platform, &id, &name) {
            return Ok(AddOutcome::AlreadyWatched { id });
        }
        info!(%platform, source = %id, name = %name, "source added");
        Ok(AddOutcome::Added { id, name })
    }

    /// Remove by `id` from every platform, or from one with `vk:<id>` /
    /// `twitter:<id>`. Returns the platforms it was removed from.
    pub fn remove_source(&self, arg: &str) -> Vec<Platform> {
        let arg = arg.trim();
        let (platforms, raw_id): (Vec<Platform>, &str) = match arg.split_once(':') {
            Some((prefix, rest)) => match prefix.parse::<Platform>() {
                Ok(p) => (vec![p], rest),
                Err(_) => (Platform::ALL.to_vec(), arg),
            },
            None => (Platform::ALL.to_vec(), arg),
        };

        let removed: Vec<Platform> = platforms
            .into_iter()
            .filter(|&p| self.store.remove_source(p, &p.normalize_id(raw_id)))
            .collect();
        if !removed.is_empty() {
            info!(source = %raw_id, ?removed, "source removed");
        }
        removed
    }

    pub fn list_sources(&self) -> BTreeMap<Platform, Vec<Source>> {
        self.store.all_sources()
    }

    /// `true` if the chat was not subscribed before.
    pub fn subscribe(&self, chat_id: ChatId) -> bool {
        let added = self.store.add_target(chat_id);
        if added {
            info!(chat_id = chat_id.0, "chat subscribed");
        }
        added
    }

    pub fn unsubscribe(&self, chat_id: ChatId) -> bool {
        let removed = self.store.remove_target(chat_id);
        if removed {
            info!(chat_id = chat_id.0, "chat unsubscribed");
        }
        removed
    }

    /// Latest posts of a watched source, oldest first. Leaves the cursor alone.
    pub async fn recent_posts(
        &self,
        platform: Platform,
        id: &str,
        limit: usize,
    ) -> Result<(Source, Vec<Post>)> {
        let source = self
            .store
            .find_source(platform, id)
            .ok_or_else(|| Error::NotFound(format!("{} source {id} is not watched", platform.label())))?;
        let provider = self.providers.get(platform)?;
        let posts = tokio::time::timeout(self.fetch_timeout, provider.fetch_recent(id, limit))
            .await
            .map_err(|_| Error::Timeout(self.fetch_timeout))??;
        Ok((source, chronological(posts, provider.order())))
    }
}
