//! feedgen-core: foundation for the keyword feed generator.
//!
//! # Architecture
//!
//! ```text
//! Subscriber (feedgen-jetstream)
//!      ├── CheckpointManager  (resumable stream position)
//!      ├── FeedRegistry       (compiled keyword/language rules)
//!      └── PostStore          (idempotent create / remove)
//!
//! RetentionSweeper ── PostStore::evict  (TTL + row cap)
//! FeedService      ── PostStore::page   (keyset pagination)
//! ```

pub mod checkpoint;
pub mod cursor;
pub mod error;
pub mod feed;
pub mod retention;
pub mod rules;
pub mod store;
pub mod types;

pub use checkpoint::{Checkpoint, CheckpointManager, CheckpointStore, MemoryCheckpointStore};
pub use cursor::PageCursor;
pub use error::FeedError;
pub use feed::{FeedService, DEFAULT_PAGE_LIMIT, MAX_PAGE_LIMIT};
pub use retention::RetentionSweeper;
pub use rules::{FeedConfig, FeedRegistry, RuleSet};
pub use store::{PostPage, PostStore, RetentionPolicy};
pub use types::{FeedPage, IncomingPost, MatchedPost};
