//! Filesystem-based key-value store.
//!
//! Stores each key as one file under a base directory. Writes go to a
//! temporary sibling first and are renamed into place, so a crash mid-write
//! leaves the previous value intact.
//!
//! # Security
//!
//! - **Path traversal**: keys are validated to prevent directory escape
//! - **File size limits**: reads above [`MAX_VALUE_SIZE`] are refused

use crate::storage::traits::KeyValueStore;
use crate::{Error, Result};
use async_trait::async_trait;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

/// Maximum size of a stored value (8 MiB).
pub const MAX_VALUE_SIZE: u64 = 8 * 1024 * 1024;

/// Filesystem-based key-value store.
#[derive(Debug, Clone)]
pub struct FilesystemKeyValueStore {
    base_path: PathBuf,
}

impl FilesystemKeyValueStore {
    /// Creates a store rooted at `base_path`, creating the directory.
    ///
    /// # Errors
    ///
    /// Returns an error if the directory cannot be created.
    pub fn new(base_path: impl Into<PathBuf>) -> Result<Self> {
        let base_path = base_path.into();
        std::fs::create_dir_all(&base_path)
            .map_err(|e| Error::failed("create_snapshot_dir", e))?;
        Ok(Self { base_path })
    }

    /// Returns the base path.
    #[must_use]
    pub fn base_path(&self) -> &Path {
        &self.base_path
    }

    /// Returns the file path for `key`.
    ///
    /// Only alphanumeric characters, dashes, dots and underscores are
    /// allowed, and the key may not start with a dot.
    fn key_path(&self, key: &str) -> Result<PathBuf> {
        if !Self::is_safe_key(key) {
            return Err(Error::InvalidInput(format!(
                "snapshot key contains invalid characters: {key}"
            )));
        }
        Ok(self.base_path.join(format!("{key}.json")))
    }

    fn is_safe_key(key: &str) -> bool {
        !key.is_empty()
            && key.len() <= 200
            && !key.starts_with('.')
            && key
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.'))
    }
}

#[async_trait]
impl KeyValueStore for FilesystemKeyValueStore {
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>> {
        let path = self.key_path(key)?;

        let metadata = match tokio::fs::metadata(&path).await {
            Ok(m) => m,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(Error::failed("read_snapshot_metadata", e)),
        };
        if metadata.len() > MAX_VALUE_SIZE {
            return Err(Error::InvalidInput(format!(
                "snapshot file exceeds maximum size of {MAX_VALUE_SIZE} bytes: {}",
                path.display()
            )));
        }

        match tokio::fs::read(&path).await {
            Ok(bytes) => Ok(Some(bytes)),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(Error::failed("read_snapshot_file", e)),
        }
    }

    async fn set(&self, key: &str, value: &[u8]) -> Result<()> {
        let path = self.key_path(key)?;
        let tmp = path.with_extension("json.tmp");

        tokio::fs::create_dir_all(&self.base_path)
            .await
            .map_err(|e| Error::failed("create_snapshot_dir", e))?;
        tokio::fs::write(&tmp, value)
            .await
            .map_err(|e| Error::failed("write_snapshot_file", e))?;
        tokio::fs::rename(&tmp, &path)
            .await
            .map_err(|e| Error::failed("rename_snapshot_file", e))
    }

    async fn remove(&self, key: &str) -> Result<()> {
        let path = self.key_path(key)?;
        match tokio::fs::remove_file(&path).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(e) => Err(Error::failed("remove_snapshot_file", e)),
        }
    }
}
