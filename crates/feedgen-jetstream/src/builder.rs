//! Fluent builder API for creating subscribers.
//!
//! # Example
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use std::time::Duration;
//! use feedgen_core::{FeedConfig, FeedRegistry};
//! use feedgen_jetstream::SubscriberBuilder;
//! use feedgen_storage::InMemoryStorage;
//!
//! # fn example() -> Result<(), feedgen_core::FeedError> {
//! let store = Arc::new(InMemoryStorage::new());
//! let registry = FeedRegistry::new(&[FeedConfig::new("at://did:plc:me/app.bsky.feed.generator/ai")
//!     .keyword("llm")])?;
//!
//! let subscriber = SubscriberBuilder::new()
//!     .firehose_url("wss://jetstream1.us-east.bsky.network/subscribe")
//!     .registry(Arc::new(registry))
//!     .posts(store.clone())
//!     .checkpoints(store)
//!     .reconnect_delay(Duration::from_secs(5))
//!     .build()?;
//! # Ok(())
//! # }
//! ```

use std::sync::Arc;
use std::time::Duration;

use feedgen_core::checkpoint::CheckpointStore;
use feedgen_core::error::FeedError;
use feedgen_core::rules::FeedRegistry;
use feedgen_core::store::PostStore;

use crate::source::{EventSource, JetstreamSource};
use crate::subscriber::{Subscriber, SubscriberConfig};

/// Fluent builder for [`Subscriber`].
#[derive(Default)]
pub struct SubscriberBuilder {
    config: SubscriberConfig,
    source: Option<Arc<dyn EventSource>>,
    registry: Option<Arc<FeedRegistry>>,
    posts: Option<Arc<dyn PostStore>>,
    checkpoints: Option<Arc<dyn CheckpointStore>>,
}

impl SubscriberBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Read from a Jetstream WebSocket endpoint.
    pub fn firehose_url(self, url: impl Into<String>) -> Self {
        self.source(Arc::new(JetstreamSource::new(url)))
    }

    /// Read from a custom event source.
    pub fn source(mut self, source: Arc<dyn EventSource>) -> Self {
        self.source = Some(source);
        self
    }

    pub fn registry(mut self, registry: Arc<FeedRegistry>) -> Self {
        self.registry = Some(registry);
        self
    }

    pub fn posts(mut self, posts: Arc<dyn PostStore>) -> Self {
        self.posts = Some(posts);
        self
    }

    pub fn checkpoints(mut self, checkpoints: Arc<dyn CheckpointStore>) -> Self {
        self.checkpoints = Some(checkpoints);
        self
    }

    /// Set the checkpoint row name (default `"jetstream"`).
    pub fn stream_id(mut self, id: impl Into<String>) -> Self {
        self.config.stream_id = id.into();
        self
    }

    /// Set the fixed wait between reconnect attempts.
    pub fn reconnect_delay(mut self, delay: Duration) -> Self {
        self.config.reconnect_delay = delay;
        self
    }

    /// Set the minimum time between checkpoint commits.
    pub fn checkpoint_interval(mut self, interval: Duration) -> Self {
        self.config.checkpoint_interval = interval;
        self
    }

    /// Set how often throughput stats are logged.
    pub fn stats_interval(mut self, interval: Duration) -> Self {
        self.config.stats_interval = interval;
        self
    }

    /// Build the `SubscriberConfig` without wiring collaborators.
    pub fn build_config(self) -> SubscriberConfig {
        self.config
    }

    /// Build the subscriber. Fails if a collaborator is missing or the
    /// stats interval is zero.
    pub fn build(self) -> Result<Subscriber, FeedError> {
        let missing = |what: &str| FeedError::Config(format!("subscriber needs {what}"));

        if self.config.stats_interval.is_zero() {
            return Err(FeedError::Config("stats interval must be non-zero".into()));
        }
        let source = self.source.ok_or_else(|| missing("an event source"))?;
        let registry = self.registry.ok_or_else(|| missing("a feed registry"))?;
        let posts = self.posts.ok_or_else(|| missing("a post store"))?;
        let checkpoints = self.checkpoints.ok_or_else(|| missing("a checkpoint store"))?;

        Ok(Subscriber::new(
            source,
            registry,
            posts,
            checkpoints,
            self.config,
        ))
    }
}
