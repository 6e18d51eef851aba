//! Source providers: one implementation per platform, selected by the
//! `platform` tag stored on each source.

use std::{collections::BTreeMap, sync::Arc};

use async_trait::async_trait;

use crate::{
    domain::{Platform, Post},
    errors::Error,
    Result,
};

/// Order in which a provider returns a fetched batch.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FetchOrder {
    NewestFirst,
    OldestFirst,
}

#[async_trait]
pub trait SourceProvider: Send + Sync {
    fn platform(&self) -> Platform;

    fn order(&self) -> FetchOrder;

    /// Human label for a source. `Error::NotFound` when the account / group
    /// does not exist.
    async fn resolve_display_name(&self, id: &str) -> Result<String>;

    /// Most recent posts of a source, at most `limit`, in `order()`.
    ///
    /// Pinned and sponsored items are excluded. Network, rate-limit and parse
    /// failures come back as `Error::Provider`.
    async fn fetch_recent(&self, id: &str, limit: usize) -> Result<Vec<Post>>;
}

/// Platform -> provider map.
#[derive(Default, Clone)]
pub struct ProviderRegistry {
    providers: BTreeMap<Platform, Arc<dyn SourceProvider>>,
}

impl ProviderRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a provider under its own platform, replacing any previous one.
    pub fn register(&mut self, provider: Arc<dyn SourceProvider>) {
        self.providers.insert(provider.platform(), provider);
    }

    pub fn with(mut self, provider: Arc<dyn SourceProvider>) -> Self {
        self.register(provider);
        self
    }

    pub fn get(&self, platform: Platform) -> Result<Arc<dyn SourceProvider>> {
        self.providers
            .get(&platform)
            .cloned()
            .ok_or_else(|| Error::NotFound(format!("no provider registered for {platform}")))
    }

    pub fn platforms(&self) -> Vec<Platform> {
        self.providers.keys().copied().collect()
    }
}

/// Reorder a batch oldest-first, whatever the provider's native order.
pub fn chronological(mut posts: Vec<Post>, order: FetchOrder) -> Vec<Post> {
    if order == FetchOrder::NewestFirst {
        posts.reverse();
    }
    posts
}
