//! The stream subscriber: resumable Jetstream ingestion.
//!
//! # State machine
//! `Disconnected → Connecting → Streaming → (Disconnected on error | Cancelled on shutdown)`
//!
//! Each session loads the checkpoint, opens one connection positioned at it,
//! and drives frames one at a time through the feed registry into the post
//! store. When the connection ends or fails the subscriber waits a fixed
//! delay and reconnects, until cancelled.

use std::sync::Arc;
use std::time::Duration;

use futures::StreamExt;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use feedgen_core::checkpoint::{CheckpointManager, CheckpointStore};
use feedgen_core::error::FeedError;
use feedgen_core::rules::FeedRegistry;
use feedgen_core::store::PostStore;
use feedgen_core::types::IncomingPost;

use crate::event::{CommitOp, EventKind, StreamEvent};
use crate::source::{ConnectRequest, EventSource, FrameStream};

/// Characters of post text included in the "post matched" log line.
const PREVIEW_CHARS: usize = 100;

/// Shortest stats interval; `tokio::time::interval_at` rejects zero.
const MIN_STATS_INTERVAL: Duration = Duration::from_millis(1);

/// Subscriber settings.
#[derive(Debug, Clone)]
pub struct SubscriberConfig {
    /// Checkpoint row name.
    pub stream_id: String,
    /// Fixed wait between a lost connection and the next attempt.
    pub reconnect_delay: Duration,
    /// Minimum wall-clock time between checkpoint commits.
    pub checkpoint_interval: Duration,
    /// How often cumulative stats are logged while streaming.
    pub stats_interval: Duration,
}

impl Default for SubscriberConfig {
    fn default() -> Self {
        Self {
            stream_id: "jetstream".into(),
            reconnect_delay: Duration::from_secs(5),
            checkpoint_interval: Duration::from_secs(5),
            stats_interval: Duration::from_secs(30),
        }
    }
}

/// Current phase of the subscriber.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubscriberState {
    Disconnected,
    Connecting,
    Streaming,
    Cancelled,
}

/// Cumulative counters since the subscriber was created.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SubscriberStats {
    /// Successful connections.
    pub connections: u64,
    pub events_received: u64,
    pub commits_received: u64,
    pub posts_matched: u64,
    pub posts_deleted: u64,
    pub decode_errors: u64,
    pub store_errors: u64,
}

/// Resumable Jetstream subscriber.
pub struct Subscriber {
    source: Arc<dyn EventSource>,
    registry: Arc<FeedRegistry>,
    posts: Arc<dyn PostStore>,
    checkpoint: CheckpointManager,
    config: SubscriberConfig,
    state: SubscriberState,
    stats: SubscriberStats,
}

impl Subscriber {
    /// A zero `stats_interval` is raised to one millisecond.
    pub fn new(
        source: Arc<dyn EventSource>,
        registry: Arc<FeedRegistry>,
        posts: Arc<dyn PostStore>,
        checkpoints: Arc<dyn CheckpointStore>,
        mut config: SubscriberConfig,
    ) -> Self {
        config.stats_interval = config.stats_interval.max(MIN_STATS_INTERVAL);
        let checkpoint = CheckpointManager::new(
            checkpoints,
            config.stream_id.clone(),
            config.checkpoint_interval,
        );
        Self {
            source,
            registry,
            posts,
            checkpoint,
            config,
            state: SubscriberState::Disconnected,
            stats: SubscriberStats::default(),
        }
    }

    pub fn state(&self) -> SubscriberState {
        self.state
    }

    pub fn stats(&self) -> &SubscriberStats {
        &self.stats
    }

    pub fn config(&self) -> &SubscriberConfig {
        &self.config
    }

    /// Highest stream position seen so far.
    pub fn position(&self) -> Option<u64> {
        self.checkpoint.latest()
    }

    /// Run sessions until `cancel` fires, then flush the checkpoint.
    ///
    /// Returns the final counters.
    pub async fn run(&mut self, cancel: CancellationToken) -> SubscriberStats {
        while !cancel.is_cancelled() {
            match self.session(&cancel).await {
                Ok(()) => info!("jetstream session ended"),
                Err(e) => warn!(error = %e, "jetstream session failed"),
            }
            if cancel.is_cancelled() {
                break;
            }

            self.state = SubscriberState::Disconnected;
            info!(
                delay_ms = self.config.reconnect_delay.as_millis() as u64,
                "reconnecting to jetstream"
            );
            tokio::select! {
                biased;
                _ = cancel.cancelled() => break,
                _ = tokio::time::sleep(self.config.reconnect_delay) => {}
            }
        }

        self.state = SubscriberState::Cancelled;
        match self.checkpoint.flush().await {
            Ok(true) => info!(position = ?self.checkpoint.committed(), "shutdown checkpoint saved"),
            Ok(false) => {}
            Err(e) => error!(error = %e, "shutdown checkpoint failed"),
        }
        self.log_stats();
        self.stats.clone()
    }

    /// One connection: connect, stream until the connection ends.
    async fn session(&mut self, cancel: &CancellationToken) -> Result<(), FeedError> {
        self.state = SubscriberState::Connecting;

        match self.checkpoint.load().await {
            Ok(Some(cp)) => debug!(position = cp.position, "checkpoint loaded"),
            Ok(None) => {}
            Err(e) => warn!(error = %e, "checkpoint load failed; using last known position"),
        }
        let request = ConnectRequest::posts(self.checkpoint.latest());
        match request.cursor {
            Some(cursor) => info!(cursor, "resuming jetstream from checkpoint"),
            None => info!("starting jetstream from live edge"),
        }

        // A silent upstream can hold the connect for minutes.
        let frames = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Ok(()),
            frames = self.source.connect(&request) => frames?,
        };
        self.state = SubscriberState::Streaming;
        self.stats.connections += 1;

        self.stream(frames, cancel).await
    }

    async fn stream(
        &mut self,
        mut frames: FrameStream,
        cancel: &CancellationToken,
    ) -> Result<(), FeedError> {
        let mut stats_tick = tokio::time::interval_at(
            Instant::now() + self.config.stats_interval,
            self.config.stats_interval,
        );
        stats_tick.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            let frame = tokio::select! {
                biased;
                _ = cancel.cancelled() => return Ok(()),
                _ = stats_tick.tick() => {
                    self.log_stats();
                    continue;
                }
                frame = frames.next() => frame,
            };

            match frame {
                None => return Ok(()),
                Some(Ok(text)) => self.handle_frame(&text).await,
                Some(Err(FeedError::Decode(reason))) => {
                    self.stats.decode_errors += 1;
                    warn!(%reason, "skipping undecodable frame");
                }
                Some(Err(e)) => return Err(e),
            }
        }
    }

    /// Process one frame. Never fails: bad frames and store errors are
    /// logged and counted.
    async fn handle_frame(&mut self, text: &str) {
        self.stats.events_received += 1;

        let event = match StreamEvent::decode(text) {
            Ok(event) => event,
            Err(e) => {
                self.stats.decode_errors += 1;
                warn!(error = %e, "skipping malformed event");
                return;
            }
        };
        self.checkpoint.observe(event.time_us);

        if let EventKind::Commit(_) = &event.kind {
            self.stats.commits_received += 1;
        }
        if let Some(commit) = event.post_commit() {
            match &commit.op {
                CommitOp::Create { .. } => {
                    if let Some(post) = event.incoming_post() {
                        self.handle_create(post).await;
                    }
                }
                CommitOp::Delete => {
                    if let Some(uri) = event.record_uri() {
                        self.handle_delete(&uri).await;
                    }
                }
                CommitOp::Other(_) => {}
            }
        }

        if let Err(e) = self.checkpoint.maybe_save().await {
            warn!(error = %e, "checkpoint save failed");
        }
    }

    async fn handle_create(&mut self, post: IncomingPost) {
        let feeds: Vec<String> = self
            .registry
            .matching_feeds(&post)
            .map(str::to_string)
            .collect();
        if feeds.is_empty() {
            return;
        }

        self.stats.posts_matched += 1;
        let preview: String = post.text.chars().take(PREVIEW_CHARS).collect();
        info!(
            uri = %post.uri,
            author = %post.author_did,
            ?feeds,
            %preview,
            "post matched"
        );

        let matched = post.into_matched();
        if let Err(e) = self.posts.create(&matched).await {
            self.stats.store_errors += 1;
            error!(uri = %matched.uri, error = %e, "failed to store post");
        }
    }

    async fn handle_delete(&mut self, uri: &str) {
        match self.posts.remove(uri).await {
            Ok(true) => {
                self.stats.posts_deleted += 1;
                debug!(uri, "post deleted");
            }
            Ok(false) => {}
            Err(e) => {
                self.stats.store_errors += 1;
                error!(uri, error = %e, "failed to delete post");
            }
        }
    }

    fn log_stats(&self) {
        let s = &self.stats;
        info!(
            connections = s.connections,
            events_received = s.events_received,
            commits_received = s.commits_received,
            posts_matched = s.posts_matched,
            posts_deleted = s.posts_deleted,
            decode_errors = s.decode_errors,
            store_errors = s.store_errors,
            position = ?self.checkpoint.latest(),
            "jetstream stats"
        );
    }
}
