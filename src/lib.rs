//! # Moment Engine
//!
//! Engagement and recommendation core for a social journaling client.
//!
//! The crate owns the parts of the client that carry real state and ordering
//! decisions, and treats the remote backend as a set of injected adapters:
//!
//! - **Recommendation**: tiered "who to follow" over the follow graph
//!   ([`RecommendationService`])
//! - **Counters**: optimistic like/comment/repost counters with compensation
//!   on failure ([`CounterSynchronizer`])
//! - **Snapshots**: local-first feed cache over an injected key-value store
//!   ([`SnapshotCache`])
//! - **Feeds**: the journal feed with filters ([`MomentFeed`]) and the
//!   following feed with per-moment interaction flags ([`FeedSession`])
//!
//! ## Example
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use moment_engine::{RecommendationService, UserId};
//! use moment_engine::storage::InMemorySocialStore;
//!
//! let store = Arc::new(InMemorySocialStore::new());
//! let service = RecommendationService::new(store);
//! let candidates = service.recommend(&UserId::new("alice"), 5).await?;
//! ```

#![deny(clippy::all)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]
#![warn(missing_docs)]
#![forbid(unsafe_code)]
#![allow(clippy::multiple_crate_versions)]

use thiserror::Error as ThisError;

pub mod config;
pub mod models;
pub mod observability;
pub mod services;
pub mod storage;

pub use config::{EngineConfig, LoggingConfig, RemoteConfig, SnapshotBackendKind};
pub use models::{
    CounterKind, CounterState, DateRange, EngagementCounters, FeedEntry, FeedFilter, FeedSnapshot,
    FilterState, InteractionFlags, Moment, MomentId, Profile, ProfileSummary, UserCandidate, UserId,
};
pub use services::{
    Backends, CounterSynchronizer, Engine, FeedSession, FetchOutcome, MomentFeed,
    RecommendationService, SnapshotCache,
};
pub use storage::{Connectivity, EngagementBackend, GraphAccess, KeyValueStore, MomentSource};

/// Error type for engine operations.
///
/// # Error Variant Triggers
///
/// | Variant | Raised When |
/// |---------|-------------|
/// | `RemoteUnavailable` | Network failure, adapter timeout, open circuit breaker |
/// | `RemoteQuery` | Malformed query, permission denied, constraint violation |
/// | `AlreadyExists` | Duplicate like, repost or follow |
/// | `NotFound` | Redundant removal, unknown moment or comment |
/// | `ActionInProgress` | A counter mutation is already pending for the same pair |
/// | `RecommendationUnavailable` | Any recommendation tier failed |
/// | `CacheCorrupt` | A persisted snapshot failed to parse |
/// | `InvalidInput` | Self-follow, bad image index, empty comment |
/// | `Unauthenticated` | No current user |
/// | `OperationFailed` | Local I/O: config file, `SQLite` open, key-value writes |
#[derive(Debug, ThisError)]
pub enum Error {
    /// The remote store could not be reached (network, timeout, open circuit).
    #[error("remote unavailable during '{operation}': {cause}")]
    RemoteUnavailable {
        /// The remote operation that was attempted.
        operation: String,
        /// The underlying cause.
        cause: String,
    },

    /// The remote store rejected the query.
    #[error("remote query '{operation}' failed: {cause}")]
    RemoteQuery {
        /// The remote operation that was attempted.
        operation: String,
        /// The underlying cause.
        cause: String,
    },

    /// A relation that must be unique already exists.
    #[error("already exists: {0}")]
    AlreadyExists(String),

    /// A relation or record to remove does not exist.
    #[error("not found: {0}")]
    NotFound(String),

    /// A mutation on the same (moment, counter) pair is still in flight.
    ///
    /// The caller should wait for the pending action to settle and retry.
    #[error("{kind} action already in progress for moment {moment_id}")]
    ActionInProgress {
        /// The moment whose counter is busy.
        moment_id: String,
        /// The busy counter.
        kind: models::CounterKind,
    },

    /// The recommendation pipeline failed at some tier.
    #[error("recommendations unavailable: {0}")]
    RecommendationUnavailable(#[source] Box<Error>),

    /// A persisted snapshot could not be parsed.
    ///
    /// Only surfaced through logs and metrics; [`SnapshotCache::load`]
    /// degrades to an empty snapshot.
    #[error("snapshot cache corrupt: {0}")]
    CacheCorrupt(String),

    /// Invalid input was provided.
    #[error("invalid input: {0}")]
    InvalidInput(String),

    /// No user is signed in.
    #[error("no authenticated user")]
    Unauthenticated,

    /// A local operation failed.
    #[error("operation '{operation}' failed: {cause}")]
    OperationFailed {
        /// The operation that failed.
        operation: String,
        /// The underlying cause.
        cause: String,
    },
}

impl Error {
    /// Builds a [`Error::RemoteUnavailable`].
    pub fn unavailable(operation: impl Into<String>, cause: impl std::fmt::Display) -> Self {
        Self::RemoteUnavailable {
            operation: operation.into(),
            cause: cause.to_string(),
        }
    }

    /// Builds a [`Error::RemoteQuery`].
    pub fn query(operation: impl Into<String>, cause: impl std::fmt::Display) -> Self {
        Self::RemoteQuery {
            operation: operation.into(),
            cause: cause.to_string(),
        }
    }

    /// Builds a [`Error::OperationFailed`].
    pub fn failed(operation: impl Into<String>, cause: impl std::fmt::Display) -> Self {
        Self::OperationFailed {
            operation: operation.into(),
            cause: cause.to_string(),
        }
    }

    /// Returns `true` if the caller may retry the same action later.
    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::RemoteUnavailable { .. } | Self::ActionInProgress { .. }
        )
    }
}

/// Result type alias for engine operations.
pub type Result<T> = std::result::Result<T, Error>;
