//! Key-value stores backing the snapshot cache.
//!
//! | Backend | Use Case |
//! |---------|----------|
//! | [`InMemoryKeyValueStore`] | Tests, ephemeral sessions |
//! | [`FilesystemKeyValueStore`] | Default; one JSON file per key |
//! | [`crate::storage::sqlite::SqliteKeyValueStore`] | Embedded database |

mod filesystem;
mod memory;

pub use filesystem::{FilesystemKeyValueStore, MAX_VALUE_SIZE};
pub use memory::InMemoryKeyValueStore;
