//! Retention sweeper: trims the post store on a fixed interval.
//!
//! Runs one eviction immediately, then one per interval until cancelled.
//! Cycles never overlap: the next tick is scheduled only after the previous
//! eviction returns.

use std::sync::Arc;
use std::time::Duration;

use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

use crate::error::FeedError;
use crate::store::{PostStore, RetentionPolicy};

/// Shortest accepted sweep interval; `tokio::time::interval` rejects zero.
const MIN_INTERVAL: Duration = Duration::from_millis(1);

/// Background eviction loop over a [`PostStore`].
pub struct RetentionSweeper {
    store: Arc<dyn PostStore>,
    policy: RetentionPolicy,
    interval: Duration,
}

impl RetentionSweeper {
    /// A zero `interval` is raised to one millisecond.
    pub fn new(store: Arc<dyn PostStore>, policy: RetentionPolicy, interval: Duration) -> Self {
        Self {
            store,
            policy,
            interval: interval.max(MIN_INTERVAL),
        }
    }

    /// Run a single eviction pass. Returns the number of rows removed.
    pub async fn run_once(&self) -> Result<u64, FeedError> {
        let deleted = self.store.evict(&self.policy).await?;
        if deleted > 0 {
            info!(
                deleted,
                max_age_secs = self.policy.max_age.as_secs(),
                max_rows = self.policy.max_rows,
                "post cleanup complete"
            );
        }
        Ok(deleted)
    }

    /// Sweep until `cancel` fires. Failures are logged and retried on the
    /// next tick. Returns the number of completed passes.
    pub async fn run(&self, cancel: CancellationToken) -> u64 {
        let mut ticker = tokio::time::interval(self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut passes = 0u64;

        loop {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => break,
                _ = ticker.tick() => {}
            }
            if let Err(e) = self.run_once().await {
                error!(error = %e, "post cleanup failed");
            }
            passes += 1;
        }

        info!(passes, "retention sweeper stopped");
        passes
    }
}
