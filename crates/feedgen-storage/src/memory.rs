//! In-memory storage backend.
//!
//! Stores matched posts and checkpoints in RAM.
//! Useful for testing and ephemeral runs that don't need persistence.

use async_trait::async_trait;
use std::collections::{BTreeSet, HashMap};
use std::sync::{Mutex, MutexGuard};

use feedgen_core::checkpoint::{Checkpoint, CheckpointStore};
use feedgen_core::cursor::PageCursor;
use feedgen_core::error::FeedError;
use feedgen_core::store::{PostStore, RetentionPolicy};
use feedgen_core::types::{from_millis, MatchedPost};

/// Ordered post table: `(indexed_at_millis, uri)` ascending; read in reverse.
#[derive(Default)]
struct PostTable {
    order: BTreeSet<(i64, String)>,
    by_uri: HashMap<String, (i64, String)>,
}

impl PostTable {
    fn remove(&mut self, uri: &str) -> bool {
        match self.by_uri.remove(uri) {
            Some((millis, _)) => {
                self.order.remove(&(millis, uri.to_string()));
                true
            }
            None => false,
        }
    }

    fn post(&self, millis: i64, uri: &str) -> MatchedPost {
        let cid = self.by_uri.get(uri).map(|(_, cid)| cid.clone()).unwrap_or_default();
        MatchedPost {
            uri: uri.to_string(),
            cid,
            indexed_at: from_millis(millis),
        }
    }
}

/// In-memory feed storage.
///
/// All data is lost when the process exits.
#[derive(Default)]
pub struct InMemoryStorage {
    posts: Mutex<PostTable>,
    checkpoints: Mutex<HashMap<String, Checkpoint>>,
}

impl InMemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }

    fn posts(&self) -> Result<MutexGuard<'_, PostTable>, FeedError> {
        self.posts.lock().map_err(|e| FeedError::Storage(e.to_string()))
    }

    fn checkpoints(&self) -> Result<MutexGuard<'_, HashMap<String, Checkpoint>>, FeedError> {
        self.checkpoints
            .lock()
            .map_err(|e| FeedError::Storage(e.to_string()))
    }

    /// Returns `true` if a post with this URI is stored.
    pub fn contains(&self, uri: &str) -> bool {
        self.posts().map(|t| t.by_uri.contains_key(uri)).unwrap_or(false)
    }

    /// All stored post URIs, newest first.
    pub fn uris(&self) -> Vec<String> {
        self.posts()
            .map(|t| t.order.iter().rev().map(|(_, uri)| uri.clone()).collect())
            .unwrap_or_default()
    }
}

#[async_trait]
impl PostStore for InMemoryStorage {
    async fn create(&self, post: &MatchedPost) -> Result<bool, FeedError> {
        let mut table = self.posts()?;
        if table.by_uri.contains_key(&post.uri) {
            return Ok(false);
        }
        let millis = post.indexed_at_millis();
        table.order.insert((millis, post.uri.clone()));
        table
            .by_uri
            .insert(post.uri.clone(), (millis, post.cid.clone()));
        Ok(true)
    }

    async fn remove(&self, uri: &str) -> Result<bool, FeedError> {
        Ok(self.posts()?.remove(uri))
    }

    async fn query_page(
        &self,
        limit: usize,
        after: Option<&PageCursor>,
    ) -> Result<Vec<MatchedPost>, FeedError> {
        let table = self.posts()?;
        let keys: Vec<(i64, String)> = match after {
            Some(c) => table
                .order
                .range(..(c.indexed_at_millis, c.uri.clone()))
                .rev()
                .take(limit)
                .cloned()
                .collect(),
            None => table.order.iter().rev().take(limit).cloned().collect(),
        };
        Ok(keys.iter().map(|(m, uri)| table.post(*m, uri)).collect())
    }

    async fn evict(&self, policy: &RetentionPolicy) -> Result<u64, FeedError> {
        let cutoff = policy.cutoff_millis(chrono::Utc::now().timestamp_millis());
        let mut table = self.posts()?;

        let mut doomed: Vec<String> = table
            .order
            .iter()
            .take_while(|(millis, _)| *millis < cutoff)
            .map(|(_, uri)| uri.clone())
            .collect();
        let survivors = table.order.len() - doomed.len();
        if survivors > policy.max_rows {
            doomed.extend(
                table
                    .order
                    .iter()
                    .skip(doomed.len())
                    .take(survivors - policy.max_rows)
                    .map(|(_, uri)| uri.clone()),
            );
        }

        for uri in &doomed {
            table.remove(uri);
        }
        Ok(doomed.len() as u64)
    }

    async fn count(&self) -> Result<u64, FeedError> {
        Ok(self.posts()?.by_uri.len() as u64)
    }
}

#[async_trait]
impl CheckpointStore for InMemoryStorage {
    async fn load(&self, stream_id: &str) -> Result<Option<Checkpoint>, FeedError> {
        Ok(self.checkpoints()?.get(stream_id).cloned())
    }

    async fn save(&self, checkpoint: &Checkpoint) -> Result<bool, FeedError> {
        let mut checkpoints = self.checkpoints()?;
        if checkpoints
            .get(&checkpoint.stream_id)
            .is_some_and(|existing| existing.position > checkpoint.position)
        {
            return Ok(false);
        }
        checkpoints.insert(checkpoint.stream_id.clone(), checkpoint.clone());
        Ok(true)
    }

    async fn force_set(&self, checkpoint: &Checkpoint) -> Result<(), FeedError> {
        self.checkpoints()?
            .insert(checkpoint.stream_id.clone(), checkpoint.clone());
        Ok(())
    }

    async fn delete(&self, stream_id: &str) -> Result<(), FeedError> {
        self.checkpoints()?.remove(stream_id);
        Ok(())
    }
}
