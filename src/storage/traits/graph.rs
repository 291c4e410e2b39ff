//! Graph access trait over the follow and profile relations.
//!
//! The graph layer is read-mostly from the engine's perspective: the
//! recommendation pipeline only reads, and the feed session writes single
//! follow edges on explicit follow/unfollow actions.
//!
//! # Error Modes and Guarantees
//!
//! Every method fails with [`crate::Error::RemoteUnavailable`] (network,
//! timeout) or [`crate::Error::RemoteQuery`] (malformed query, permission).
//! Implementations own their retry policy; the engine never retries.
//!
//! | Operation | Ordering | Duplicates |
//! |-----------|----------|------------|
//! | `followings_of` | newest follow first | distinct |
//! | `followers_of` | newest follow first | distinct |
//! | `users_following` | unspecified | one row per edge |
//! | `recent_profiles` | registration desc | distinct |
//! | `active_profiles` | last update desc | distinct |

use crate::Result;
use crate::models::{Profile, UserId};
use async_trait::async_trait;

/// Trait for follow-graph backends.
///
/// # Implementor Notes
///
/// - Methods use `&self` to enable sharing via `Arc<dyn GraphAccess>`
/// - Follow edges are unique per ordered pair and never self-loops
/// - `users_following` must not deduplicate: repeated followers carry the
///   weighting signal
#[async_trait]
pub trait GraphAccess: Send + Sync {
    /// Returns every user `user` currently follows.
    async fn followings_of(&self, user: &UserId) -> Result<Vec<UserId>>;

    /// Returns every user currently following `user`.
    async fn followers_of(&self, user: &UserId) -> Result<Vec<UserId>>;

    /// Returns the follower id of every edge pointing at one of `targets`,
    /// skipping edges whose follower is `excluding`.
    ///
    /// One row per edge; a user following three of the targets appears three
    /// times.
    async fn users_following(&self, targets: &[UserId], excluding: &UserId)
    -> Result<Vec<UserId>>;

    /// Returns up to `limit` profiles by registration time, newest first,
    /// skipping `excluding`.
    async fn recent_profiles(&self, excluding: &UserId, limit: usize) -> Result<Vec<Profile>>;

    /// Returns up to `limit` profiles by last update, newest first, skipping
    /// `excluding` and everyone in `excluding_set`.
    async fn active_profiles(
        &self,
        excluding: &UserId,
        excluding_set: &[UserId],
        limit: usize,
    ) -> Result<Vec<Profile>>;

    /// Returns the profiles of `ids` that exist, in no particular order.
    async fn profiles(&self, ids: &[UserId]) -> Result<Vec<Profile>>;

    /// Returns `true` if `follower` follows `following`.
    async fn has_follow(&self, follower: &UserId, following: &UserId) -> Result<bool>;

    /// Creates the edge `follower -> following`.
    ///
    /// Fails with [`crate::Error::AlreadyExists`] if the edge exists and with
    /// [`crate::Error::InvalidInput`] for a self-loop.
    async fn insert_follow(&self, follower: &UserId, following: &UserId) -> Result<()>;

    /// Removes the edge `follower -> following`.
    ///
    /// Returns `false` if there was no such edge.
    async fn delete_follow(&self, follower: &UserId, following: &UserId) -> Result<bool>;
}
