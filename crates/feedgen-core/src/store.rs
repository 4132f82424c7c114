//! Post store: the durable, ordered record of matched posts.
//!
//! Posts are ordered by `(indexed_at DESC, uri DESC)`. Reads use keyset
//! pagination over that order; retention trims by age and by row count.
//! Backends live in `feedgen-storage`.

use std::time::Duration;

use async_trait::async_trait;

use crate::cursor::PageCursor;
use crate::error::FeedError;
use crate::types::MatchedPost;

/// Retention bounds applied by [`PostStore::evict`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetentionPolicy {
    /// Posts indexed longer ago than this are removed.
    pub max_age: Duration,
    /// At most this many of the newest posts are kept.
    pub max_rows: usize,
}

impl Default for RetentionPolicy {
    fn default() -> Self {
        Self {
            max_age: Duration::from_secs(7 * 24 * 60 * 60),
            max_rows: 500,
        }
    }
}

impl RetentionPolicy {
    /// The oldest `indexed_at` (unix millis) that survives the age pass at `now_millis`.
    pub fn cutoff_millis(&self, now_millis: i64) -> i64 {
        let age = i64::try_from(self.max_age.as_millis()).unwrap_or(i64::MAX);
        now_millis.saturating_sub(age)
    }
}

/// A page of posts plus the cursor for the next one.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PostPage {
    pub posts: Vec<MatchedPost>,
    /// `None` once fewer than `limit` posts came back.
    pub next_cursor: Option<PageCursor>,
}

impl PostPage {
    /// Wrap a query result, setting the next cursor only on a full page.
    pub fn from_query(posts: Vec<MatchedPost>, limit: usize) -> Self {
        let next_cursor = if limit > 0 && posts.len() == limit {
            posts.last().map(PageCursor::after)
        } else {
            None
        };
        Self { posts, next_cursor }
    }
}

/// Storage contract for matched posts.
///
/// Implementations never retry internally; callers own retry policy.
#[async_trait]
pub trait PostStore: Send + Sync {
    /// Insert a post. Re-inserting an existing `uri` is a no-op.
    /// Returns `true` if a row was inserted.
    async fn create(&self, post: &MatchedPost) -> Result<bool, FeedError>;

    /// Delete a post by URI. Missing URIs are a no-op.
    /// Returns `true` if a row was removed.
    async fn remove(&self, uri: &str) -> Result<bool, FeedError>;

    /// Up to `limit` posts strictly after `after` (or from the newest when
    /// `None`), ordered by `(indexed_at DESC, uri DESC)`.
    async fn query_page(
        &self,
        limit: usize,
        after: Option<&PageCursor>,
    ) -> Result<Vec<MatchedPost>, FeedError>;

    /// Remove posts older than `policy.max_age`, then everything beyond the
    /// newest `policy.max_rows`, as one atomic operation.
    /// Returns the total number of rows removed.
    async fn evict(&self, policy: &RetentionPolicy) -> Result<u64, FeedError>;

    /// Number of stored posts.
    async fn count(&self) -> Result<u64, FeedError>;

    /// Fetch one page given an opaque cursor string (`""` = newest first).
    async fn page(&self, limit: usize, cursor: &str) -> Result<PostPage, FeedError> {
        let after = PageCursor::parse_optional(Some(cursor))?;
        let posts = self.query_page(limit, after.as_ref()).await?;
        Ok(PostPage::from_query(posts, limit))
    }
}
