//! Checkpoint manager: persists the subscriber's stream position.
//!
//! A checkpoint stores the last observed stream position (Jetstream
//! `time_us`). On reconnect or restart the subscriber resumes from it instead
//! of the live edge. Positions only move forward; the sole exception is an
//! explicit operator override through [`CheckpointStore::force_set`].

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::time::Instant;

use crate::error::FeedError;

/// A persisted checkpoint for one stream.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Checkpoint {
    /// Name of the tracked stream (e.g. `"jetstream"`).
    pub stream_id: String,
    /// Last committed stream position.
    pub position: u64,
    /// Unix timestamp (seconds) of when this checkpoint was saved.
    pub updated_at: i64,
}

impl Checkpoint {
    pub fn new(stream_id: impl Into<String>, position: u64) -> Self {
        Self {
            stream_id: stream_id.into(),
            position,
            updated_at: chrono::Utc::now().timestamp(),
        }
    }
}

/// Trait for storing and loading checkpoints.
///
/// Implementations include `MemoryCheckpointStore`, `InMemoryStorage`,
/// `SqliteStorage`, and `PostgresStorage`.
#[async_trait]
pub trait CheckpointStore: Send + Sync {
    /// Load the checkpoint for a stream.
    async fn load(&self, stream_id: &str) -> Result<Option<Checkpoint>, FeedError>;

    /// Upsert a checkpoint unless it would move the position backward.
    /// Returns `false` if the write was ignored for that reason.
    async fn save(&self, checkpoint: &Checkpoint) -> Result<bool, FeedError>;

    /// Operator override: write the checkpoint unconditionally.
    async fn force_set(&self, checkpoint: &Checkpoint) -> Result<(), FeedError>;

    /// Delete a checkpoint (the next session starts from the live edge).
    async fn delete(&self, stream_id: &str) -> Result<(), FeedError>;
}

/// Tracks the latest observed position and commits it on a wall-clock interval.
pub struct CheckpointManager {
    store: Arc<dyn CheckpointStore>,
    stream_id: String,
    /// Minimum time between commits.
    save_interval: Duration,
    /// Highest position seen so far.
    latest: Option<u64>,
    /// Highest position known to be committed.
    committed: Option<u64>,
    last_save: Instant,
}

impl CheckpointManager {
    pub fn new(
        store: Arc<dyn CheckpointStore>,
        stream_id: impl Into<String>,
        save_interval: Duration,
    ) -> Self {
        Self {
            store,
            stream_id: stream_id.into(),
            save_interval,
            latest: None,
            committed: None,
            last_save: Instant::now(),
        }
    }

    pub fn stream_id(&self) -> &str {
        &self.stream_id
    }

    /// Load the saved checkpoint (returns `None` if none exists).
    ///
    /// Seeds the in-memory high-water mark so later commits never go below it.
    pub async fn load(&mut self) -> Result<Option<Checkpoint>, FeedError> {
        let cp = self.store.load(&self.stream_id).await?;
        if let Some(cp) = &cp {
            self.committed = self.committed.max(Some(cp.position));
            self.latest = self.latest.max(Some(cp.position));
        }
        Ok(cp)
    }

    /// Record a position seen on the stream. Lower positions are ignored.
    pub fn observe(&mut self, position: u64) {
        self.latest = self.latest.max(Some(position));
    }

    /// Highest observed position.
    pub fn latest(&self) -> Option<u64> {
        self.latest
    }

    /// Highest committed position.
    pub fn committed(&self) -> Option<u64> {
        self.committed
    }

    /// Commit the latest position if `save_interval` has elapsed since the
    /// last successful commit. Returns `true` if a commit happened.
    ///
    /// Call after every event, matched or not.
    pub async fn maybe_save(&mut self) -> Result<bool, FeedError> {
        if self.last_save.elapsed() < self.save_interval {
            return Ok(false);
        }
        let saved = self.flush().await?;
        self.last_save = Instant::now();
        Ok(saved)
    }

    /// Commit the latest position now if it is ahead of the committed one
    /// (used on shutdown).
    pub async fn flush(&mut self) -> Result<bool, FeedError> {
        let Some(position) = self.latest else {
            return Ok(false);
        };
        if self.committed.is_some_and(|c| c >= position) {
            return Ok(false);
        }
        let accepted = self
            .store
            .save(&Checkpoint::new(self.stream_id.clone(), position))
            .await?;
        if accepted {
            self.committed = Some(position);
        }
        Ok(accepted)
    }
}

// ─── In-memory store (for testing) ────────────────────────────────────────────

use std::collections::HashMap;
use std::sync::Mutex;

/// In-memory checkpoint store for tests and ephemeral runs.
///
/// Keeps every accepted write so tests can assert on the commit history.
#[derive(Default)]
pub struct MemoryCheckpointStore {
    data: Mutex<HashMap<String, Checkpoint>>,
    history: Mutex<Vec<Checkpoint>>,
}

impl MemoryCheckpointStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every checkpoint accepted so far, in write order.
    pub fn history(&self) -> Vec<Checkpoint> {
        self.history.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }
}

#[async_trait]
impl CheckpointStore for MemoryCheckpointStore {
    async fn load(&self, stream_id: &str) -> Result<Option<Checkpoint>, FeedError> {
        Ok(self
            .data
            .lock()
            .map_err(|e| FeedError::Storage(e.to_string()))?
            .get(stream_id)
            .cloned())
    }

    async fn save(&self, checkpoint: &Checkpoint) -> Result<bool, FeedError> {
        let mut data = self.data.lock().map_err(|e| FeedError::Storage(e.to_string()))?;
        if let Some(existing) = data.get(&checkpoint.stream_id) {
            if existing.position > checkpoint.position {
                return Ok(false);
            }
        }
        data.insert(checkpoint.stream_id.clone(), checkpoint.clone());
        drop(data);
        self.history
            .lock()
            .map_err(|e| FeedError::Storage(e.to_string()))?
            .push(checkpoint.clone());
        Ok(true)
    }

    async fn force_set(&self, checkpoint: &Checkpoint) -> Result<(), FeedError> {
        self.data
            .lock()
            .map_err(|e| FeedError::Storage(e.to_string()))?
            .insert(checkpoint.stream_id.clone(), checkpoint.clone());
        self.history
            .lock()
            .map_err(|e| FeedError::Storage(e.to_string()))?
            .push(checkpoint.clone());
        Ok(())
    }

    async fn delete(&self, stream_id: &str) -> Result<(), FeedError> {
        self.data
            .lock()
            .map_err(|e| FeedError::Storage(e.to_string()))?
            .remove(stream_id);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn manager(store: Arc<MemoryCheckpointStore>, interval: Duration) -> CheckpointManager {
        CheckpointManager::new(store, "jetstream", interval)
    }

    #[tokio::test]
    async fn memory_store_roundtrip() {
        let store = Arc::new(MemoryCheckpointStore::new());
        let mut mgr = manager(store.clone(), Duration::ZERO);

        assert!(mgr.load().await.unwrap().is_none());

        mgr.observe(1_000);
        assert!(mgr.flush().await.unwrap());

        let cp = mgr.load().await.unwrap().unwrap();
        assert_eq!(cp.position, 1_000);
        assert_eq!(cp.stream_id, "jetstream");
    }

    #[tokio::test]
    async fn store_rejects_backward_writes() {
        let store = MemoryCheckpointStore::new();
        assert!(store.save(&Checkpoint::new("s", 10)).await.unwrap());
        assert!(!store.save(&Checkpoint::new("s", 9)).await.unwrap());
        assert!(store.save(&Checkpoint::new("s", 10)).await.unwrap());
        assert_eq!(store.load("s").await.unwrap().unwrap().position, 10);

        // Operator override may move backward.
        store.force_set(&Checkpoint::new("s", 3)).await.unwrap();
        assert_eq!(store.load("s").await.unwrap().unwrap().position, 3);

        store.delete("s").await.unwrap();
        assert!(store.load("s").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn observe_never_moves_backward() {
        let store = Arc::new(MemoryCheckpointStore::new());
        let mut mgr = manager(store.clone(), Duration::ZERO);

        for pos in [5, 9, 7, 12, 11, 12, 20] {
            mgr.observe(pos);
            mgr.maybe_save().await.unwrap();
        }
        let positions: Vec<u64> = store.history().iter().map(|c| c.position).collect();
        assert_eq!(positions, vec![5, 9, 12, 20]);
        assert!(positions.windows(2).all(|w| w[0] <= w[1]));
    }

    #[tokio::test]
    async fn interval_gates_saves() {
        let store = Arc::new(MemoryCheckpointStore::new());
        let mut mgr = manager(store.clone(), Duration::from_secs(3600));

        for pos in 1..=50 {
            mgr.observe(pos);
            assert!(!mgr.maybe_save().await.unwrap());
        }
        assert!(store.history().is_empty());

        // Shutdown flush ignores the interval.
        assert!(mgr.flush().await.unwrap());
        assert_eq!(store.load("jetstream").await.unwrap().unwrap().position, 50);
        // Nothing new to commit.
        assert!(!mgr.flush().await.unwrap());
    }

    #[tokio::test]
    async fn load_seeds_high_water_mark() {
        let store = Arc::new(MemoryCheckpointStore::new());
        store.save(&Checkpoint::new("jetstream", 100)).await.unwrap();

        let mut mgr = manager(store.clone(), Duration::ZERO);
        mgr.load().await.unwrap();
        assert_eq!(mgr.committed(), Some(100));

        mgr.observe(40);
        assert!(!mgr.flush().await.unwrap());
        assert_eq!(store.load("jetstream").await.unwrap().unwrap().position, 100);
    }
}
