//! Data models for the engine.
//!
//! This module contains the value types shared by the storage adapters and
//! the services.

mod engagement;
mod ids;
mod moment;
mod profile;
mod snapshot;

pub use engagement::{
    Comment, CounterEvent, CounterKind, CounterState, EngagementCounters, FollowEdge,
    InteractionFlags, Like, Repost,
};
pub use ids::{CommentId, MomentId, RepostId, UserId};
pub use moment::{Moment, MomentUpdate, NewMoment, UploadedImage};
pub use profile::{Profile, ProfileSummary, UserCandidate};
pub use snapshot::{
    DateRange, FeedEntry, FeedFilter, FeedSnapshot, FilterState, FollowingSnapshot, Snapshot,
};
