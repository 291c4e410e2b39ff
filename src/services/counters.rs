//! Optimistic engagement counter synchronization.
//!
//! Each (moment, counter) pair runs a small state machine:
//!
//! ```text
//!            action (mirror ±1, floor 0)
//!   Idle  ------------------------------>  PendingIncrement / PendingDecrement
//!    ^                                              |
//!    |   remote ok: keep mirror                     |
//!    +----------------------------------------------+
//!    |   remote error / dropped: restore prior value|
//!    +----------------------------------------------+
//! ```
//!
//! The mirror changes before any remote call is made. A second action on a
//! pair that is already pending is rejected with
//! [`Error::ActionInProgress`]. On failure the mirror returns to exactly the
//! value it had before the action; nothing is re-read from the remote.
//!
//! Observers subscribe to [`CounterEvent`]s published on every transition.

use crate::models::{
    Comment, CommentId, CounterEvent, CounterKind, CounterState, EngagementCounters,
    InteractionFlags, MomentId, Repost, UserId,
};
use crate::storage::traits::EngagementBackend;
use crate::{Error, Result};
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tokio::sync::broadcast;
use tracing::instrument;

/// Capacity of the event channel; slow observers skip old events.
const EVENT_CAPACITY: usize = 256;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Direction {
    Up,
    Down,
}

impl Direction {
    const fn pending_state(self) -> CounterState {
        match self {
            Self::Up => CounterState::PendingIncrement,
            Self::Down => CounterState::PendingDecrement,
        }
    }

    const fn apply(self, value: u64) -> u64 {
        match self {
            Self::Up => value.saturating_add(1),
            Self::Down => value.saturating_sub(1),
        }
    }
}

#[derive(Debug, Default)]
struct Mirror {
    counters: EngagementCounters,
    flags: InteractionFlags,
    pending: HashMap<CounterKind, CounterState>,
}

impl Mirror {
    fn state(&self, kind: CounterKind) -> CounterState {
        self.pending.get(&kind).copied().unwrap_or(CounterState::Idle)
    }

    fn event(&self, moment_id: &MomentId, kind: CounterKind) -> CounterEvent {
        CounterEvent {
            moment_id: moment_id.clone(),
            kind,
            value: self.counters.get(kind),
            state: self.state(kind),
            flag: self.flags.get(kind),
        }
    }
}

/// Keeps mirrored like/comment/repost counters in step with the remote
/// counter RPC.
pub struct CounterSynchronizer {
    engagement: Arc<dyn EngagementBackend>,
    mirrors: Mutex<HashMap<MomentId, Mirror>>,
    events: broadcast::Sender<CounterEvent>,
}

impl CounterSynchronizer {
    /// Creates a synchronizer over `engagement`.
    #[must_use]
    pub fn new(engagement: Arc<dyn EngagementBackend>) -> Self {
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        Self {
            engagement,
            mirrors: Mutex::new(HashMap::new()),
            events,
        }
    }

    /// Subscribes to counter transitions.
    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<CounterEvent> {
        self.events.subscribe()
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<MomentId, Mirror>> {
        self.mirrors.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn publish(&self, event: CounterEvent) {
        // No subscribers is fine.
        let _ = self.events.send(event);
    }

    // =========================================================================
    // Mirror access
    // =========================================================================

    /// Records the last known remote values for `moment`.
    ///
    /// Counters with an action in flight keep their optimistic value.
    pub fn seed(&self, moment: &MomentId, counters: EngagementCounters, flags: InteractionFlags) {
        let mut mirrors = self.lock();
        let mirror = mirrors.entry(moment.clone()).or_default();
        for kind in CounterKind::MOMENT {
            if mirror.state(kind).is_pending() {
                continue;
            }
            mirror.counters.set(kind, counters.get(kind));
            if let Some(flag) = flags.get(kind) {
                mirror.flags.set(kind, flag);
            }
        }
    }

    /// Drops the mirror of `moment` unless an action on it is in flight.
    pub fn forget(&self, moment: &MomentId) {
        let mut mirrors = self.lock();
        if mirrors
            .get(moment)
            .is_some_and(|m| m.pending.is_empty())
        {
            mirrors.remove(moment);
        }
    }

    /// Mirrored counters of `moment`; zero if never seeded.
    #[must_use]
    pub fn counters(&self, moment: &MomentId) -> EngagementCounters {
        self.lock()
            .get(moment)
            .map(|m| m.counters)
            .unwrap_or_default()
    }

    /// Mirrored interaction flags of `moment`.
    #[must_use]
    pub fn flags(&self, moment: &MomentId) -> InteractionFlags {
        self.lock().get(moment).map(|m| m.flags).unwrap_or_default()
    }

    /// Current state of one counter.
    #[must_use]
    pub fn state(&self, moment: &MomentId, kind: CounterKind) -> CounterState {
        self.lock()
            .get(moment)
            .map_or(CounterState::Idle, |m| m.state(kind))
    }

    /// Returns `true` if `moment` is mirrored.
    #[must_use]
    pub fn is_tracked(&self, moment: &MomentId) -> bool {
        self.lock().contains_key(moment)
    }

    // =========================================================================
    // State machine
    // =========================================================================

    /// Idle -> Pending: applies the optimistic delta and returns a guard
    /// that compensates unless committed.
    fn begin(
        &self,
        moment: &MomentId,
        kind: CounterKind,
        direction: Direction,
    ) -> Result<PendingGuard<'_>> {
        let (event, prior_value, prior_flag) = {
            let mut mirrors = self.lock();
            let mirror = mirrors.entry(moment.clone()).or_default();
            if mirror.state(kind).is_pending() {
                metrics::counter!(
                    "counter_mutations_total",
                    "kind" => kind.as_str(),
                    "outcome" => "rejected"
                )
                .increment(1);
                return Err(Error::ActionInProgress {
                    moment_id: moment.to_string(),
                    kind,
                });
            }

            let prior_value = mirror.counters.get(kind);
            let prior_flag = mirror.flags.get(kind);
            mirror.counters.set(kind, direction.apply(prior_value));
            if prior_flag.is_some() {
                mirror.flags.set(kind, direction == Direction::Up);
            }
            mirror.pending.insert(kind, direction.pending_state());
            (mirror.event(moment, kind), prior_value, prior_flag)
        };
        self.publish(event);
        Ok(PendingGuard {
            sync: self,
            moment: moment.clone(),
            kind,
            prior_value,
            prior_flag,
            settled: false,
        })
    }

    /// Pending -> Idle, keeping the mirror (`restore == None`) or putting
    /// back the prior value.
    fn settle(&self, moment: &MomentId, kind: CounterKind, restore: Option<(u64, Option<bool>)>) {
        let event = {
            let mut mirrors = self.lock();
            let mirror = mirrors.entry(moment.clone()).or_default();
            if let Some((value, flag)) = restore {
                mirror.counters.set(kind, value);
                if let Some(flag) = flag {
                    mirror.flags.set(kind, flag);
                }
            }
            mirror.pending.remove(&kind);
            mirror.event(moment, kind)
        };
        let outcome = if restore.is_some() {
            "compensated"
        } else {
            "committed"
        };
        metrics::counter!(
            "counter_mutations_total",
            "kind" => kind.as_str(),
            "outcome" => outcome
        )
        .increment(1);
        self.publish(event);
    }

    // =========================================================================
    // Actions
    // =========================================================================

    /// Likes `moment` as `user`.
    ///
    /// # Errors
    ///
    /// [`Error::ActionInProgress`] if a like/unlike is pending,
    /// [`Error::AlreadyExists`] if already liked, or the remote failure. The
    /// mirror is restored on every error.
    #[instrument(skip(self), fields(user = %user, moment = %moment))]
    pub async fn like(&self, user: &UserId, moment: &MomentId) -> Result<()> {
        let guard = self.begin(moment, CounterKind::Like, Direction::Up)?;
        if self.engagement.has_like(user, moment).await? {
            return Err(Error::AlreadyExists(format!("{user} already liked {moment}")));
        }
        self.engagement.insert_like(user, moment).await?;
        if let Err(e) = self
            .engagement
            .increment(CounterKind::Like, moment.as_str())
            .await
        {
            self.rollback("delete_like", self.engagement.delete_like(user, moment))
                .await;
            return Err(e);
        }
        guard.commit();
        Ok(())
    }

    /// Removes the like of `user` on `moment`.
    ///
    /// # Errors
    ///
    /// [`Error::ActionInProgress`], [`Error::NotFound`] if not liked, or the
    /// remote failure. The mirror is restored on every error.
    #[instrument(skip(self), fields(user = %user, moment = %moment))]
    pub async fn unlike(&self, user: &UserId, moment: &MomentId) -> Result<()> {
        let guard = self.begin(moment, CounterKind::Like, Direction::Down)?;
        if !self.engagement.has_like(user, moment).await?
            || !self.engagement.delete_like(user, moment).await?
        {
            return Err(Error::NotFound(format!("{user} has not liked {moment}")));
        }
        if let Err(e) = self
            .engagement
            .decrement(CounterKind::Like, moment.as_str())
            .await
        {
            self.rollback("insert_like", self.engagement.insert_like(user, moment))
                .await;
            return Err(e);
        }
        guard.commit();
        Ok(())
    }

    /// Reposts `moment` as `user`, optionally with quote text.
    ///
    /// # Errors
    ///
    /// [`Error::ActionInProgress`], [`Error::AlreadyExists`] if already
    /// reposted, or the remote failure. The mirror is restored on every
    /// error.
    #[instrument(skip(self, content), fields(user = %user, moment = %moment))]
    pub async fn repost(
        &self,
        user: &UserId,
        moment: &MomentId,
        content: Option<&str>,
    ) -> Result<Repost> {
        let guard = self.begin(moment, CounterKind::Repost, Direction::Up)?;
        if self.engagement.has_repost(user, moment).await? {
            return Err(Error::AlreadyExists(format!(
                "{user} already reposted {moment}"
            )));
        }
        let repost = self.engagement.insert_repost(user, moment, content).await?;
        if let Err(e) = self
            .engagement
            .increment(CounterKind::Repost, moment.as_str())
            .await
        {
            self.rollback("delete_repost", self.engagement.delete_repost(user, moment))
                .await;
            return Err(e);
        }
        guard.commit();
        Ok(repost)
    }

    /// Removes the repost of `user` on `moment`.
    ///
    /// # Errors
    ///
    /// [`Error::ActionInProgress`], [`Error::NotFound`] if not reposted, or
    /// the remote failure. The mirror is restored on every error.
    #[instrument(skip(self), fields(user = %user, moment = %moment))]
    pub async fn unrepost(&self, user: &UserId, moment: &MomentId) -> Result<()> {
        let guard = self.begin(moment, CounterKind::Repost, Direction::Down)?;
        if !self.engagement.has_repost(user, moment).await?
            || !self.engagement.delete_repost(user, moment).await?
        {
            return Err(Error::NotFound(format!("{user} has not reposted {moment}")));
        }
        if let Err(e) = self
            .engagement
            .decrement(CounterKind::Repost, moment.as_str())
            .await
        {
            self.rollback(
                "insert_repost",
                self.engagement.insert_repost(user, moment, None),
            )
            .await;
            return Err(e);
        }
        guard.commit();
        Ok(())
    }

    /// Adds a comment to `moment` as `user`.
    ///
    /// # Errors
    ///
    /// [`Error::InvalidInput`] for blank content, [`Error::ActionInProgress`],
    /// or the remote failure. The mirror is restored on every error.
    #[instrument(skip(self, content), fields(user = %user, moment = %moment))]
    pub async fn comment(&self, user: &UserId, moment: &MomentId, content: &str) -> Result<Comment> {
        if content.trim().is_empty() {
            return Err(Error::InvalidInput("comment content is empty".to_string()));
        }
        let guard = self.begin(moment, CounterKind::Comment, Direction::Up)?;
        let comment = self.engagement.insert_comment(user, moment, content).await?;
        if let Err(e) = self
            .engagement
            .increment(CounterKind::Comment, moment.as_str())
            .await
        {
            self.rollback(
                "delete_comment",
                self.engagement.delete_comment(user, &comment.id, moment),
            )
            .await;
            return Err(e);
        }
        guard.commit();
        Ok(comment)
    }

    /// Deletes comment `comment` written by `user` on `moment`.
    ///
    /// # Errors
    ///
    /// [`Error::ActionInProgress`], [`Error::NotFound`] if `user` has no
    /// such comment on `moment` (a comment on another moment is left in
    /// place), or the remote failure. The mirror is restored on every error.
    #[instrument(skip(self), fields(user = %user, comment = %comment, moment = %moment))]
    pub async fn delete_comment(
        &self,
        user: &UserId,
        comment: &CommentId,
        moment: &MomentId,
    ) -> Result<()> {
        let guard = self.begin(moment, CounterKind::Comment, Direction::Down)?;
        if !self.engagement.delete_comment(user, comment, moment).await? {
            return Err(Error::NotFound(format!(
                "comment {comment} by {user} on {moment}"
            )));
        }
        if let Err(e) = self
            .engagement
            .decrement(CounterKind::Comment, moment.as_str())
            .await
        {
            // The row cannot be restored with its original id.
            tracing::warn!(error = %e, "Comment removed but counter decrement failed");
            return Err(e);
        }
        guard.commit();
        Ok(())
    }

    /// Best-effort undo of a relation write whose counter RPC failed.
    async fn rollback<T, F>(&self, operation: &'static str, undo: F)
    where
        F: std::future::Future<Output = Result<T>> + Send,
    {
        if let Err(e) = undo.await {
            tracing::warn!(operation, error = %e, "Failed to roll back relation write");
        }
    }
}

/// An in-flight counter action.
///
/// Dropping the guard without [`PendingGuard::commit`] compensates, so an
/// early `?` return or a cancelled future restores the mirror.
struct PendingGuard<'a> {
    sync: &'a CounterSynchronizer,
    moment: MomentId,
    kind: CounterKind,
    prior_value: u64,
    prior_flag: Option<bool>,
    settled: bool,
}

impl PendingGuard<'_> {
    fn commit(mut self) {
        self.settled = true;
        self.sync.settle(&self.moment, self.kind, None);
    }
}

impl Drop for PendingGuard<'_> {
    fn drop(&mut self) {
        if !self.settled {
            self.sync.settle(
                &self.moment,
                self.kind,
                Some((self.prior_value, self.prior_flag)),
            );
        }
    }
}
