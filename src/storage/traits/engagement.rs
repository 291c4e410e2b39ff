//! Engagement backend trait: like/comment/repost relations and the atomic
//! counter RPC.

use crate::Result;
use crate::models::{Comment, CommentId, CounterKind, Like, MomentId, Repost, UserId};
use async_trait::async_trait;

/// Trait for engagement backends.
///
/// Relation writes and counter RPCs are separate calls, mirroring the remote
/// store; keeping them consistent under partial failure is the job of
/// [`crate::CounterSynchronizer`].
///
/// # Implementor Notes
///
/// - At most one like and one repost row per (user, moment); a second insert
///   fails with [`crate::Error::AlreadyExists`]
/// - `increment`/`decrement` must be atomic server side and `decrement`
///   must floor at zero
/// - List methods return rows newest first
#[async_trait]
pub trait EngagementBackend: Send + Sync {
    /// Returns `true` if `user` has liked `moment`.
    async fn has_like(&self, user: &UserId, moment: &MomentId) -> Result<bool>;

    /// Inserts a like row.
    async fn insert_like(&self, user: &UserId, moment: &MomentId) -> Result<()>;

    /// Deletes a like row. Returns `false` if there was none.
    async fn delete_like(&self, user: &UserId, moment: &MomentId) -> Result<bool>;

    /// Lists the likes of a moment.
    async fn list_likes(&self, moment: &MomentId) -> Result<Vec<Like>>;

    /// Returns `true` if `user` has reposted `moment`.
    async fn has_repost(&self, user: &UserId, moment: &MomentId) -> Result<bool>;

    /// Inserts a repost row with optional quote text.
    async fn insert_repost(
        &self,
        user: &UserId,
        moment: &MomentId,
        content: Option<&str>,
    ) -> Result<Repost>;

    /// Deletes the repost row of `user` on `moment`. Returns `false` if there
    /// was none.
    async fn delete_repost(&self, user: &UserId, moment: &MomentId) -> Result<bool>;

    /// Lists the reposts of a moment.
    async fn list_reposts(&self, moment: &MomentId) -> Result<Vec<Repost>>;

    /// Inserts a comment row.
    async fn insert_comment(
        &self,
        user: &UserId,
        moment: &MomentId,
        content: &str,
    ) -> Result<Comment>;

    /// Deletes comment `comment` authored by `user` on `moment`.
    ///
    /// Returns `false` if no comment matches all three; nothing is deleted
    /// in that case.
    async fn delete_comment(
        &self,
        user: &UserId,
        comment: &CommentId,
        moment: &MomentId,
    ) -> Result<bool>;

    /// Lists the comments of a moment.
    async fn list_comments(&self, moment: &MomentId) -> Result<Vec<Comment>>;

    /// Atomically adds one to `kind` on `target` (a moment id for moment
    /// counters, a user id for profile counters).
    async fn increment(&self, kind: CounterKind, target: &str) -> Result<()>;

    /// Atomically subtracts one from `kind` on `target`, flooring at zero.
    async fn decrement(&self, kind: CounterKind, target: &str) -> Result<()>;
}
