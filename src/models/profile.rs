//! User profiles and recommendation candidates.

use super::UserId;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A user profile row as stored remotely.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Profile {
    /// Profile id (same as the user id).
    pub id: UserId,
    /// Display name.
    pub username: Option<String>,
    /// Avatar image URL.
    pub avatar_url: Option<String>,
    /// Number of users following this user.
    pub follower_count: u64,
    /// Number of users this user follows.
    pub following_count: u64,
    /// Registration time.
    pub created_at: DateTime<Utc>,
    /// Last profile activity.
    pub updated_at: DateTime<Utc>,
}

impl Profile {
    /// Creates a profile registered (and last active) at `created_at`.
    #[must_use]
    pub fn new(id: impl Into<UserId>, created_at: DateTime<Utc>) -> Self {
        Self {
            id: id.into(),
            username: None,
            avatar_url: None,
            follower_count: 0,
            following_count: 0,
            created_at,
            updated_at: created_at,
        }
    }

    /// Sets the display name.
    #[must_use]
    pub fn with_username(mut self, username: impl Into<String>) -> Self {
        self.username = Some(username.into());
        self
    }

    /// Sets the last activity time.
    #[must_use]
    pub const fn with_updated_at(mut self, updated_at: DateTime<Utc>) -> Self {
        self.updated_at = updated_at;
        self
    }

    /// Projects the profile to its summary.
    #[must_use]
    pub fn summary(&self) -> ProfileSummary {
        ProfileSummary {
            id: self.id.clone(),
            username: self.username.clone(),
            avatar_url: self.avatar_url.clone(),
            follower_count: self.follower_count,
            following_count: self.following_count,
        }
    }
}

/// The profile projection shown next to moments and recommendations.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProfileSummary {
    /// Profile id.
    pub id: UserId,
    /// Display name.
    pub username: Option<String>,
    /// Avatar image URL.
    pub avatar_url: Option<String>,
    /// Follower count at read time.
    #[serde(default)]
    pub follower_count: u64,
    /// Following count at read time.
    #[serde(default)]
    pub following_count: u64,
}

/// A user suggested to follow.
///
/// Produced fresh for every recommendation request and never persisted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserCandidate {
    /// The suggested user.
    pub user_id: UserId,
    /// Their profile summary.
    pub profile: ProfileSummary,
    /// Number of distinct co-followers that follow this user.
    ///
    /// Zero for the cold-start and active-user fallbacks, which are unweighted.
    pub weight: u32,
}

impl UserCandidate {
    /// Builds an unweighted candidate from a profile.
    #[must_use]
    pub fn unweighted(profile: &Profile) -> Self {
        Self {
            user_id: profile.id.clone(),
            profile: profile.summary(),
            weight: 0,
        }
    }
}
