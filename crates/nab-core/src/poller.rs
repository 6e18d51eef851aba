//! Periodic poll loop.
//!
//! Every `interval` the poller walks all sources in store order, one at a
//! time: fetch recent posts, pick the new ones against the stored cursor,
//! broadcast them to the chats subscribed at cycle start, then store the
//! advanced cursor.
//!
//! Notes:
//! - A fetch that fails, times out or panics counts as "no posts"; the cursor
//!   stays put and the next cycle tries again.
//! - Delivery failures never hold the cursor back (at-least-once, best effort).
//! - Each cycle runs in its own task, so even a panic outside the provider call
//!   only loses that cycle.
//! - The next sleep starts when a cycle ends; cycles never overlap.

use std::{sync::Arc, time::Duration};

use tokio::{task::JoinHandle, time::sleep};
use tracing::{debug, error, info, warn};

use crate::{
    config::Config,
    dedup::select_new,
    delivery::FanOut,
    domain::{ChatId, Post, PostId, Source},
    errors::Error,
    messaging::port::MessagingPort,
    provider::{ProviderRegistry, SourceProvider},
    store::SubscriptionStore,
    Result,
};

#[derive(Clone, Copy, Debug)]
pub struct PollSettings {
    pub interval: Duration,
    pub fetch_timeout: Duration,
    pub fetch_limit: usize,
}

impl PollSettings {
    pub fn from_config(cfg: &Config) -> Self {
        Self {
            interval: cfg.poll_interval,
            fetch_timeout: cfg.fetch_timeout,
            fetch_limit: cfg.fetch_limit,
        }
    }
}

impl Default for PollSettings {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(600),
            fetch_timeout: Duration::from_secs(30),
            fetch_limit: 10,
        }
    }
}

/// What happened to one source during a cycle.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum SourceOutcome {
    /// First check: cursor set, nothing announced.
    Baseline { cursor: Option<PostId> },
    /// Regular check. `posts` may be zero.
    Checked {
        posts: usize,
        failed_deliveries: usize,
        cursor: Option<PostId>,
    },
    FetchFailed,
    NoProvider,
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct CycleReport {
    pub sources: usize,
    pub baselines: usize,
    pub fetch_failures: usize,
    pub posts_announced: usize,
    pub failed_deliveries: usize,
}

impl CycleReport {
    fn record(&mut self, outcome: &SourceOutcome) {
        self.sources += 1;
        match outcome {
            SourceOutcome::Baseline { .. } => self.baselines += 1,
            SourceOutcome::Checked {
                posts,
                failed_deliveries,
                ..
            } => {
                self.posts_announced += posts;
                self.failed_deliveries += failed_deliveries;
            }
            SourceOutcome::FetchFailed | SourceOutcome::NoProvider => self.fetch_failures += 1,
        }
    }
}

#[derive(Clone)]
pub struct Poller {
    inner: Arc<PollerInner>,
}

struct PollerInner {
    store: Arc<SubscriptionStore>,
    providers: ProviderRegistry,
    fanout: FanOut,
    settings: PollSettings,
}

impl Poller {
    pub fn new(
        store: Arc<SubscriptionStore>,
        providers: ProviderRegistry,
        messenger: Arc<dyn MessagingPort>,
        settings: PollSettings,
    ) -> Self {
        Self {
            inner: Arc::new(PollerInner {
                store,
                providers,
                fanout: FanOut::new(messenger),
                settings,
            }),
        }
    }

    /// Start the perpetual loop on the runtime.
    pub fn spawn(self) -> JoinHandle<()> {
        tokio::spawn(async move { self.run_forever().await })
    }

    pub async fn run_forever(self) {
        info!(
            interval_secs = self.inner.settings.interval.as_secs(),
            "[POLL] poller started"
        );
        loop {
            sleep(self.inner.settings.interval).await;
            self.run_guarded_cycle().await;
        }
    }

    /// Run one cycle in its own task. `None` if the cycle panicked.
    pub async fn run_guarded_cycle(&self) -> Option<CycleReport> {
        let poller = self.clone();
        match tokio::spawn(async move { poller.run_cycle().await }).await {
            Ok(report) => Some(report),
            Err(e) => {
                error!(error = %e, "[POLL] poll cycle aborted");
                None
            }
        }
    }

    pub async fn run_cycle(&self) -> CycleReport {
        let store = &self.inner.store;
        // Chats subscribing mid-cycle start receiving from the next cycle.
        let targets = store.list_targets();
        if targets.is_empty() {
            info!("[POLL] no chats registered to receive messages");
        }

        let mut report = CycleReport::default();
        for (_, sources) in store.all_sources() {
            for source in sources {
                let outcome = self.poll_source(&source, &targets).await;
                debug!(platform = %source.platform, source = %source.id, ?outcome, "[POLL] source checked");
                report.record(&outcome);
            }
        }

        info!(
            sources = report.sources,
            baselines = report.baselines,
            fetch_failures = report.fetch_failures,
            posts = report.posts_announced,
            failed_deliveries = report.failed_deliveries,
            "[POLL] cycle finished"
        );
        report
    }

    async fn poll_source(&self, source: &Source, targets: &[ChatId]) -> SourceOutcome {
        let provider = match self.inner.providers.get(source.platform) {
            Ok(p) => p,
            Err(e) => {
                warn!(source = %source.id, error = %e, "[POLL] skipping source");
                return SourceOutcome::NoProvider;
            }
        };

        let batch = match self.fetch(provider, source).await {
            Ok(batch) => batch,
            Err(e) if e.is_transient() => {
                warn!(
                    platform = %source.platform,
                    source = %source.id,
                    error = %e,
                    "[POLL] fetch failed, keeping cursor"
                );
                return SourceOutcome::FetchFailed;
            }
            Err(e) => {
                error!(
                    platform = %source.platform,
                    source = %source.id,
                    error = %e,
                    "[POLL] source unreadable, keeping cursor"
                );
                return SourceOutcome::FetchFailed;
            }
        };

        let selection = select_new(source.cursor, batch);
        let changed = selection.cursor_changed(source.cursor);

        if source.cursor.is_none() {
            if let (true, Some(cursor)) = (changed, selection.cursor) {
                self.inner
                    .store
                    .update_cursor(source.platform, &source.id, cursor);
                info!(platform = %source.platform, source = %source.id, %cursor, "[POLL] baseline set");
            }
            return SourceOutcome::Baseline {
                cursor: selection.cursor,
            };
        }

        let mut failed_deliveries = 0usize;
        for post in &selection.new_posts {
            let report = self.inner.fanout.deliver_post(source, post, targets).await;
            failed_deliveries += report.failed.len();
        }

        if let (true, Some(cursor)) = (changed, selection.cursor) {
            if !self
                .inner
                .store
                .update_cursor(source.platform, &source.id, cursor)
            {
                debug!(source = %source.id, "[POLL] source removed during cycle, cursor dropped");
            }
        }

        if !selection.new_posts.is_empty() {
            info!(
                platform = %source.platform,
                source = %source.id,
                posts = selection.new_posts.len(),
                "[POLL] new posts announced"
            );
        }

        SourceOutcome::Checked {
            posts: selection.new_posts.len(),
            failed_deliveries,
            cursor: selection.cursor,
        }
    }

    /// Provider call bounded by the fetch timeout and isolated in its own task.
    async fn fetch(&self, provider: Arc<dyn SourceProvider>, source: &Source) -> Result<Vec<Post>> {
        let PollSettings {
            fetch_timeout,
            fetch_limit,
            ..
        } = self.inner.settings;
        let id = source.id.clone();

        let task = tokio::spawn(async move {
            tokio::time::timeout(fetch_timeout, provider.fetch_recent(&id, fetch_limit)).await
        });

        match task.await {
            Ok(Ok(result)) => result,
            Ok(Err(_elapsed)) => Err(Error::Timeout(fetch_timeout)),
            Err(join) => Err(Error::Provider(format!("provider task failed: {join}"))),
        }
    }
}
