//! Snapshot store construction from configuration.
//!
//! ```text
//! open_snapshot_store(&EngineConfig)
//!   ├── Memory      → InMemoryKeyValueStore
//!   ├── Filesystem  → FilesystemKeyValueStore at <data_dir>/snapshots/
//!   └── Sqlite      → SqliteKeyValueStore at <data_dir>/snapshots.db
//! ```

use crate::Result;
use crate::config::{EngineConfig, SnapshotBackendKind};
use crate::storage::kv::{FilesystemKeyValueStore, InMemoryKeyValueStore};
use crate::storage::sqlite::SqliteKeyValueStore;
use crate::storage::traits::KeyValueStore;
use std::sync::Arc;

/// Directory name of the filesystem snapshot store.
pub const SNAPSHOT_DIR: &str = "snapshots";

/// File name of the `SQLite` snapshot store.
pub const SNAPSHOT_DB: &str = "snapshots.db";

/// Opens the snapshot store selected by `config`.
///
/// # Errors
///
/// Returns an error if the backing directory or database cannot be created.
pub fn open_snapshot_store(config: &EngineConfig) -> Result<Arc<dyn KeyValueStore>> {
    let store: Arc<dyn KeyValueStore> = match config.snapshot_backend {
        SnapshotBackendKind::Memory => Arc::new(InMemoryKeyValueStore::new()),
        SnapshotBackendKind::Filesystem => Arc::new(FilesystemKeyValueStore::new(
            config.data_dir.join(SNAPSHOT_DIR),
        )?),
        SnapshotBackendKind::Sqlite => {
            Arc::new(SqliteKeyValueStore::new(config.data_dir.join(SNAPSHOT_DB))?)
        },
    };
    tracing::debug!(
        backend = ?config.snapshot_backend,
        data_dir = %config.data_dir.display(),
        "Opened snapshot store"
    );
    Ok(store)
}
