//! Key-value persistence trait for local snapshots.

use crate::Result;
use async_trait::async_trait;

/// Device-local key-value persistence.
///
/// Satisfied by a file per key, an embedded database, or an in-memory map.
/// Writes are last-writer-wins.
#[async_trait]
pub trait KeyValueStore: Send + Sync {
    /// Reads the value stored under `key`.
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>>;

    /// Stores `value` under `key`, replacing any previous value.
    async fn set(&self, key: &str, value: &[u8]) -> Result<()>;

    /// Removes `key`. Removing a missing key is not an error.
    async fn remove(&self, key: &str) -> Result<()>;
}
