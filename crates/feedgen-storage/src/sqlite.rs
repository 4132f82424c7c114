//! SQLite storage backend for feedgen.
//!
//! Persists matched posts and stream checkpoints to a single SQLite file.
//! Uses `sqlx` with WAL mode for concurrent read performance.
//!
//! # Usage
//! ```rust,no_run
//! use feedgen_storage::sqlite::SqliteStorage;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! // File-backed (persistent)
//! let store = SqliteStorage::open("./feedgen.db").await?;
//!
//! // In-memory (tests / ephemeral)
//! let store = SqliteStorage::in_memory().await?;
//! # Ok(())
//! # }
//! ```

use async_trait::async_trait;
use sqlx::sqlite::{SqlitePoolOptions, SqliteRow};
use sqlx::{Row, SqlitePool};
use tracing::debug;

use feedgen_core::checkpoint::{Checkpoint, CheckpointStore};
use feedgen_core::cursor::PageCursor;
use feedgen_core::error::FeedError;
use feedgen_core::store::{PostStore, RetentionPolicy};
use feedgen_core::types::{from_millis, MatchedPost};

fn storage_err(e: sqlx::Error) -> FeedError {
    FeedError::Storage(e.to_string())
}

/// SQLite-backed storage for posts and checkpoints.
#[derive(Clone)]
pub struct SqliteStorage {
    pool: SqlitePool,
}

impl SqliteStorage {
    /// Open (or create) a SQLite database at `path`.
    ///
    /// The path may be a plain file path (`"./feedgen.db"`) or a full
    /// SQLite URL (`"sqlite:./feedgen.db?mode=rwc"`).
    pub async fn open(path: &str) -> Result<Self, FeedError> {
        let url = if path.starts_with("sqlite:") {
            if path.contains('?') {
                path.to_string()
            } else {
                format!("{path}?mode=rwc")
            }
        } else {
            format!("sqlite:{path}?mode=rwc")
        };

        let pool = SqlitePool::connect(&url).await.map_err(storage_err)?;

        let storage = Self { pool };
        storage.init_schema().await?;
        Ok(storage)
    }

    /// Open an in-memory SQLite database.
    ///
    /// Pinned to one connection: every pooled connection to `:memory:` would
    /// otherwise see its own empty database.
    pub async fn in_memory() -> Result<Self, FeedError> {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await
            .map_err(storage_err)?;

        let storage = Self { pool };
        storage.init_schema().await?;
        Ok(storage)
    }

    /// Create tables and enable WAL mode.
    async fn init_schema(&self) -> Result<(), FeedError> {
        sqlx::query("PRAGMA journal_mode=WAL;")
            .execute(&self.pool)
            .await
            .map_err(storage_err)?;

        sqlx::query(
            "CREATE TABLE IF NOT EXISTS posts (
                uri        TEXT    PRIMARY KEY,
                cid        TEXT    NOT NULL,
                indexed_at INTEGER NOT NULL
            );",
        )
        .execute(&self.pool)
        .await
        .map_err(storage_err)?;

        // Serves both the feed order and the keyset predicate.
        sqlx::query(
            "CREATE INDEX IF NOT EXISTS idx_posts_order ON posts (indexed_at DESC, uri DESC);",
        )
        .execute(&self.pool)
        .await
        .map_err(storage_err)?;

        sqlx::query(
            "CREATE TABLE IF NOT EXISTS cursors (
                service      TEXT    PRIMARY KEY,
                cursor_value INTEGER NOT NULL,
                updated_at   INTEGER NOT NULL
            );",
        )
        .execute(&self.pool)
        .await
        .map_err(storage_err)?;

        Ok(())
    }
}

fn post_from_row(row: &SqliteRow) -> Result<MatchedPost, FeedError> {
    Ok(MatchedPost {
        uri: row.try_get("uri").map_err(storage_err)?,
        cid: row.try_get("cid").map_err(storage_err)?,
        indexed_at: from_millis(row.try_get("indexed_at").map_err(storage_err)?),
    })
}

fn position_to_i64(position: u64) -> Result<i64, FeedError> {
    i64::try_from(position)
        .map_err(|_| FeedError::Storage(format!("checkpoint position {position} out of range")))
}

// ─── PostStore impl ──────────────────────────────────────────────────────────

#[async_trait]
impl PostStore for SqliteStorage {
    async fn create(&self, post: &MatchedPost) -> Result<bool, FeedError> {
        let result = sqlx::query(
            "INSERT OR IGNORE INTO posts (uri, cid, indexed_at) VALUES (?, ?, ?)",
        )
        .bind(&post.uri)
        .bind(&post.cid)
        .bind(post.indexed_at_millis())
        .execute(&self.pool)
        .await
        .map_err(storage_err)?;

        let inserted = result.rows_affected() > 0;
        if inserted {
            debug!(uri = %post.uri, "post stored");
        }
        Ok(inserted)
    }

    async fn remove(&self, uri: &str) -> Result<bool, FeedError> {
        let result = sqlx::query("DELETE FROM posts WHERE uri = ?")
            .bind(uri)
            .execute(&self.pool)
            .await
            .map_err(storage_err)?;
        Ok(result.rows_affected() > 0)
    }

    async fn query_page(
        &self,
        limit: usize,
        after: Option<&PageCursor>,
    ) -> Result<Vec<MatchedPost>, FeedError> {
        let limit = limit as i64;
        let rows = match after {
            Some(c) => {
                sqlx::query(
                    "SELECT uri, cid, indexed_at FROM posts
                     WHERE indexed_at < ? OR (indexed_at = ? AND uri < ?)
                     ORDER BY indexed_at DESC, uri DESC
                     LIMIT ?",
                )
                .bind(c.indexed_at_millis)
                .bind(c.indexed_at_millis)
                .bind(&c.uri)
                .bind(limit)
                .fetch_all(&self.pool)
                .await
            }
            None => {
                sqlx::query(
                    "SELECT uri, cid, indexed_at FROM posts
                     ORDER BY indexed_at DESC, uri DESC
                     LIMIT ?",
                )
                .bind(limit)
                .fetch_all(&self.pool)
                .await
            }
        }
        .map_err(storage_err)?;

        rows.iter().map(post_from_row).collect()
    }

    async fn evict(&self, policy: &RetentionPolicy) -> Result<u64, FeedError> {
        let cutoff = policy.cutoff_millis(chrono::Utc::now().timestamp_millis());
        let mut tx = self.pool.begin().await.map_err(storage_err)?;

        let by_age = sqlx::query("DELETE FROM posts WHERE indexed_at < ?")
            .bind(cutoff)
            .execute(&mut *tx)
            .await
            .map_err(storage_err)?
            .rows_affected();

        let by_count = sqlx::query(
            "DELETE FROM posts WHERE uri IN (
                SELECT uri FROM posts
                ORDER BY indexed_at DESC, uri DESC
                LIMIT -1 OFFSET ?
            )",
        )
        .bind(policy.max_rows as i64)
        .execute(&mut *tx)
        .await
        .map_err(storage_err)?
        .rows_affected();

        tx.commit().await.map_err(storage_err)?;

        debug!(by_age, by_count, "posts evicted");
        Ok(by_age + by_count)
    }

    async fn count(&self) -> Result<u64, FeedError> {
        let row = sqlx::query("SELECT COUNT(*) AS cnt FROM posts")
            .fetch_one(&self.pool)
            .await
            .map_err(storage_err)?;

        let cnt: i64 = row.try_get("cnt").map_err(storage_err)?;
        Ok(cnt as u64)
    }
}

// ─── CheckpointStore impl ────────────────────────────────────────────────────

#[async_trait]
impl CheckpointStore for SqliteStorage {
    async fn load(&self, stream_id: &str) -> Result<Option<Checkpoint>, FeedError> {
        let row = sqlx::query(
            "SELECT service, cursor_value, updated_at FROM cursors WHERE service = ?",
        )
        .bind(stream_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(storage_err)?;

        row.map(|r| {
            Ok(Checkpoint {
                stream_id: r.try_get("service").map_err(storage_err)?,
                position: r.try_get::<i64, _>("cursor_value").map_err(storage_err)? as u64,
                updated_at: r.try_get("updated_at").map_err(storage_err)?,
            })
        })
        .transpose()
    }

    async fn save(&self, checkpoint: &Checkpoint) -> Result<bool, FeedError> {
        let result = sqlx::query(
            "INSERT INTO cursors (service, cursor_value, updated_at) VALUES (?, ?, ?)
             ON CONFLICT(service) DO UPDATE SET
                cursor_value = excluded.cursor_value,
                updated_at   = excluded.updated_at
             WHERE excluded.cursor_value >= cursors.cursor_value",
        )
        .bind(&checkpoint.stream_id)
        .bind(position_to_i64(checkpoint.position)?)
        .bind(checkpoint.updated_at)
        .execute(&self.pool)
        .await
        .map_err(storage_err)?;

        let accepted = result.rows_affected() > 0;
        debug!(
            stream = %checkpoint.stream_id,
            position = checkpoint.position,
            accepted,
            "checkpoint saved"
        );
        Ok(accepted)
    }

    async fn force_set(&self, checkpoint: &Checkpoint) -> Result<(), FeedError> {
        sqlx::query(
            "INSERT OR REPLACE INTO cursors (service, cursor_value, updated_at) VALUES (?, ?, ?)",
        )
        .bind(&checkpoint.stream_id)
        .bind(position_to_i64(checkpoint.position)?)
        .bind(checkpoint.updated_at)
        .execute(&self.pool)
        .await
        .map_err(storage_err)?;
        Ok(())
    }

    async fn delete(&self, stream_id: &str) -> Result<(), FeedError> {
        sqlx::query("DELETE FROM cursors WHERE service = ?")
            .bind(stream_id)
            .execute(&self.pool)
            .await
            .map_err(storage_err)?;
        Ok(())
    }
}

// ─── Tests ───────────────────────────────────────────────────────────────────
