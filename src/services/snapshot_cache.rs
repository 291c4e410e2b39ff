//! Best-effort local snapshot persistence.
//!
//! A snapshot is a single JSON blob under a fixed key. Reads never fail:
//! a missing or unparsable blob loads as the empty snapshot. Writes never
//! fail either; errors are logged and counted, and the caller carries on.

use crate::models::Snapshot;
use crate::storage::traits::KeyValueStore;
use crate::{Error, Result};
use std::marker::PhantomData;
use std::sync::Arc;
use tracing::instrument;

/// Key of the journal (own moments) snapshot.
pub const JOURNAL_SNAPSHOT_KEY: &str = "journal_feed";

/// Key of the following-feed snapshot.
pub const FOLLOWING_SNAPSHOT_KEY: &str = "following_feed";

/// Typed snapshot persistence over a [`KeyValueStore`].
pub struct SnapshotCache<S> {
    store: Arc<dyn KeyValueStore>,
    key: String,
    _snapshot: PhantomData<fn() -> S>,
}

impl<S: Snapshot> SnapshotCache<S> {
    /// Creates a cache persisting under `key`.
    #[must_use]
    pub fn new(store: Arc<dyn KeyValueStore>, key: impl Into<String>) -> Self {
        Self {
            store,
            key: key.into(),
            _snapshot: PhantomData,
        }
    }

    /// The storage key.
    #[must_use]
    pub fn key(&self) -> &str {
        &self.key
    }

    /// Loads the snapshot, falling back to the empty snapshot.
    #[instrument(skip_all, fields(key = %self.key))]
    pub async fn load(&self) -> S {
        match self.try_load().await {
            Ok(Some(snapshot)) => {
                metrics::counter!("snapshot_cache_hits_total", "key" => self.key.clone())
                    .increment(1);
                snapshot
            },
            Ok(None) => {
                metrics::counter!("snapshot_cache_misses_total", "key" => self.key.clone())
                    .increment(1);
                S::default()
            },
            Err(e @ Error::CacheCorrupt(_)) => {
                tracing::warn!(error = %e, "Discarding unreadable snapshot");
                metrics::counter!("snapshot_cache_corrupt_total", "key" => self.key.clone())
                    .increment(1);
                S::default()
            },
            Err(e) => {
                tracing::warn!(error = %e, "Snapshot store read failed");
                metrics::counter!("snapshot_cache_misses_total", "key" => self.key.clone())
                    .increment(1);
                S::default()
            },
        }
    }

    /// Loads the snapshot, reporting what went wrong.
    ///
    /// # Errors
    ///
    /// Returns [`Error::CacheCorrupt`] if the blob does not parse, or the
    /// store's read error.
    pub async fn try_load(&self) -> Result<Option<S>> {
        let Some(bytes) = self.store.get(&self.key).await? else {
            return Ok(None);
        };
        serde_json::from_slice(&bytes)
            .map(Some)
            .map_err(|e| Error::CacheCorrupt(format!("{}: {e}", self.key)))
    }

    /// Persists `snapshot`; failures are logged and swallowed.
    #[instrument(skip_all, fields(key = %self.key))]
    pub async fn store(&self, snapshot: &S) {
        let written = match serde_json::to_vec(snapshot) {
            Ok(bytes) => self.store.set(&self.key, &bytes).await,
            Err(e) => Err(Error::failed("snapshot_serialize", e)),
        };
        if let Err(e) = written {
            tracing::warn!(error = %e, "Snapshot write failed");
            metrics::counter!("snapshot_cache_write_failures_total", "key" => self.key.clone())
                .increment(1);
        }
    }

    /// Removes the persisted snapshot; failures are logged and swallowed.
    pub async fn clear(&self) {
        if let Err(e) = self.store.remove(&self.key).await {
            tracing::warn!(key = %self.key, error = %e, "Snapshot removal failed");
        }
    }
}
