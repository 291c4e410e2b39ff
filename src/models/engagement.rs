//! Engagement counters, interaction flags and relation rows.

use super::{CommentId, MomentId, RepostId, UserId};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// The counters maintained by the atomic counter RPC.
///
/// `Like`, `Comment` and `Repost` live on moments; `Follower` and
/// `Following` live on profiles.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CounterKind {
    /// Likes on a moment.
    Like,
    /// Comments on a moment.
    Comment,
    /// Reposts of a moment.
    Repost,
    /// Followers of a user.
    Follower,
    /// Users a user follows.
    Following,
}

impl CounterKind {
    /// The counters that belong to a moment.
    pub const MOMENT: [Self; 3] = [Self::Like, Self::Comment, Self::Repost];

    /// Returns the counter name.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Like => "like",
            Self::Comment => "comment",
            Self::Repost => "repost",
            Self::Follower => "follower",
            Self::Following => "following",
        }
    }

    /// Returns `true` for counters stored on a moment.
    #[must_use]
    pub const fn is_moment_counter(self) -> bool {
        matches!(self, Self::Like | Self::Comment | Self::Repost)
    }
}

impl fmt::Display for CounterKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Per-(moment, counter) synchronization state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CounterState {
    /// The mirror equals the last known remote value.
    Idle,
    /// `+1` applied locally, remote increment in flight.
    PendingIncrement,
    /// `-1` applied locally (floored at zero), remote decrement in flight.
    PendingDecrement,
}

impl CounterState {
    /// Returns `true` while a remote call is in flight.
    #[must_use]
    pub const fn is_pending(self) -> bool {
        !matches!(self, Self::Idle)
    }
}

/// Mirrored engagement counters of one moment.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EngagementCounters {
    /// Like count.
    pub like_count: u64,
    /// Comment count.
    pub comment_count: u64,
    /// Repost count.
    pub repost_count: u64,
}

impl EngagementCounters {
    /// Returns the value of one moment counter.
    ///
    /// Profile counters have no slot here and read as zero.
    #[must_use]
    pub const fn get(&self, kind: CounterKind) -> u64 {
        match kind {
            CounterKind::Like => self.like_count,
            CounterKind::Comment => self.comment_count,
            CounterKind::Repost => self.repost_count,
            CounterKind::Follower | CounterKind::Following => 0,
        }
    }

    /// Sets the value of one moment counter. Profile counters are ignored.
    pub const fn set(&mut self, kind: CounterKind, value: u64) {
        match kind {
            CounterKind::Like => self.like_count = value,
            CounterKind::Comment => self.comment_count = value,
            CounterKind::Repost => self.repost_count = value,
            CounterKind::Follower | CounterKind::Following => {},
        }
    }
}

/// Whether the session user has liked and reposted a moment.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct InteractionFlags {
    /// A like row exists for (user, moment).
    pub liked: bool,
    /// A repost row exists for (user, moment).
    pub reposted: bool,
}

impl InteractionFlags {
    /// Returns the flag tracked by `kind`, if it has one.
    #[must_use]
    pub const fn get(&self, kind: CounterKind) -> Option<bool> {
        match kind {
            CounterKind::Like => Some(self.liked),
            CounterKind::Repost => Some(self.reposted),
            _ => None,
        }
    }

    /// Sets the flag tracked by `kind`; other kinds are ignored.
    pub const fn set(&mut self, kind: CounterKind, value: bool) {
        match kind {
            CounterKind::Like => self.liked = value,
            CounterKind::Repost => self.reposted = value,
            _ => {},
        }
    }
}

/// A directed follow edge.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FollowEdge {
    /// The user who follows.
    pub follower_id: UserId,
    /// The user being followed.
    pub following_id: UserId,
    /// When the follow happened.
    pub created_at: DateTime<Utc>,
}

/// A like row.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Like {
    /// The user who liked.
    pub user_id: UserId,
    /// The liked moment.
    pub moment_id: MomentId,
    /// When the like happened.
    pub created_at: DateTime<Utc>,
}

/// A comment row.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Comment {
    /// Comment id.
    pub id: CommentId,
    /// Author of the comment.
    pub user_id: UserId,
    /// The commented moment.
    pub moment_id: MomentId,
    /// Comment text.
    pub content: String,
    /// When the comment was written.
    pub created_at: DateTime<Utc>,
}

/// A repost row.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Repost {
    /// Repost id.
    pub id: RepostId,
    /// The user who reposted.
    pub user_id: UserId,
    /// The reposted moment.
    pub moment_id: MomentId,
    /// Optional quote text.
    pub content: Option<String>,
    /// When the repost happened.
    pub created_at: DateTime<Utc>,
}

/// A counter transition published to observers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CounterEvent {
    /// The moment whose counter changed.
    pub moment_id: MomentId,
    /// The counter that changed.
    pub kind: CounterKind,
    /// The mirrored value after the transition.
    pub value: u64,
    /// The state after the transition.
    pub state: CounterState,
    /// The interaction flag after the transition, for like and repost.
    pub flag: Option<bool>,
}
