//! Feed read service: the contract the read API is built on.

use std::sync::Arc;

use tracing::debug;

use crate::error::FeedError;
use crate::rules::FeedRegistry;
use crate::store::PostStore;
use crate::types::FeedPage;

/// Largest page a reader may request.
pub const MAX_PAGE_LIMIT: usize = 100;
/// Page size used when the reader does not ask for one.
pub const DEFAULT_PAGE_LIMIT: usize = 50;

/// Serves paginated feeds from the post store.
///
/// Cheap to clone; shares the registry and the store.
#[derive(Clone)]
pub struct FeedService {
    registry: Arc<FeedRegistry>,
    posts: Arc<dyn PostStore>,
}

impl FeedService {
    pub fn new(registry: Arc<FeedRegistry>, posts: Arc<dyn PostStore>) -> Self {
        Self { registry, posts }
    }

    /// URIs of every served feed, sorted.
    pub fn list_feeds(&self) -> Vec<String> {
        self.registry.feed_ids()
    }

    /// One page of `feed_id`, newest first.
    ///
    /// All feeds read the shared post table; the feed ID only gates access.
    pub async fn get_page(
        &self,
        feed_id: &str,
        limit: usize,
        cursor: Option<&str>,
    ) -> Result<FeedPage, FeedError> {
        if !(1..=MAX_PAGE_LIMIT).contains(&limit) {
            return Err(FeedError::InvalidLimit {
                got: limit,
                max: MAX_PAGE_LIMIT,
            });
        }
        if !self.registry.contains(feed_id) {
            return Err(FeedError::UnknownFeed(feed_id.to_string()));
        }

        let page = self.posts.page(limit, cursor.unwrap_or_default()).await?;
        debug!(
            feed = feed_id,
            limit,
            returned = page.posts.len(),
            more = page.next_cursor.is_some(),
            "feed page served"
        );

        Ok(FeedPage {
            entries: page.posts.into_iter().map(|p| p.uri).collect(),
            next_cursor: page.next_cursor.map(|c| c.encode()),
        })
    }
}
