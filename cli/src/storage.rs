//! Opens the configured storage backend.

use std::sync::Arc;

use feedgen_core::checkpoint::CheckpointStore;
use feedgen_core::store::PostStore;
use feedgen_storage::{InMemoryStorage, PostgresStorage, SqliteStorage};
use tracing::info;

use crate::config::Backend;

/// One backend, viewed through both storage traits.
#[derive(Clone)]
pub struct Storage {
    pub posts: Arc<dyn PostStore>,
    pub checkpoints: Arc<dyn CheckpointStore>,
}

impl Storage {
    fn shared<S>(store: S) -> Self
    where
        S: PostStore + CheckpointStore + 'static,
    {
        let store = Arc::new(store);
        Self {
            posts: store.clone(),
            checkpoints: store,
        }
    }

    /// Connect and create tables if needed.
    pub async fn open(backend: &Backend) -> anyhow::Result<Self> {
        let storage = match backend {
            Backend::Postgres(url) => Self::shared(PostgresStorage::connect(url).await?),
            Backend::Sqlite(url) => Self::shared(SqliteStorage::open(url).await?),
            Backend::Memory => Self::shared(InMemoryStorage::new()),
        };
        info!(backend = backend.name(), "storage ready");
        Ok(storage)
    }
}
