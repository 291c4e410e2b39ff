//! Storage layer abstraction.
//!
//! The engine talks to the outside world through four adapter traits:
//! - [`GraphAccess`]: follow graph and profiles
//! - [`EngagementBackend`]: like/comment/repost relations and the counter RPC
//! - [`MomentSource`]: the moment relation
//! - [`KeyValueStore`]: device-local snapshot persistence
//!
//! Implementations live alongside: [`InMemorySocialStore`] for tests and
//! development, [`SqliteSocialStore`] as an embedded relational backend, and
//! the snapshot stores under [`kv`]. [`resilience`] wraps any remote adapter
//! with timeouts and circuit breaking.

// Allow significant_drop_tightening - dropping database connections slightly early
// provides no meaningful benefit.
#![allow(clippy::significant_drop_tightening)]
// Allow match_same_arms for explicit enum handling.
#![allow(clippy::match_same_arms)]

pub mod factory;
pub mod kv;
pub mod memory;
pub mod resilience;
pub mod sqlite;
pub mod traits;

pub use factory::open_snapshot_store;
pub use kv::{FilesystemKeyValueStore, InMemoryKeyValueStore};
pub use memory::{FaultKind, InMemorySocialStore};
pub use resilience::{
    CircuitBreaker, FailureClassifier, RemoteGuard, ResilientEngagementBackend,
    ResilientGraphAccess, ResilientMomentSource, Verdict, unreachable_only,
};
pub use sqlite::{SqliteKeyValueStore, SqliteSocialStore};
pub use traits::{
    Connectivity, ConnectivityFlag, EngagementBackend, GraphAccess, IdentityProvider,
    KeyValueStore, MomentSource, StaticIdentity,
};
