//! Business logic services.
//!
//! Services orchestrate the storage adapters and provide the high-level
//! operations the client calls.

mod counters;
mod engine;
mod feed;
mod moment_feed;
mod recommendation;
mod snapshot_cache;

pub use counters::CounterSynchronizer;
pub use engine::{Backends, Engine};
pub use feed::{FeedSession, FetchOutcome, SessionAdapters};
pub use moment_feed::{DEFAULT_RECENT_WINDOW_DAYS, MomentFeed};
pub use recommendation::{RecommendationService, RecommendationTier};
pub use snapshot_cache::{FOLLOWING_SNAPSHOT_KEY, JOURNAL_SNAPSHOT_KEY, SnapshotCache};
