//! The following feed: moments by everyone the signed-in user follows,
//! with that user's like/repost state per moment.
//!
//! # Flow
//!
//! ```text
//! fetch_following_moments(force)
//!   ├── in flight already?      → InFlight (no second round trip)
//!   ├── !force && have entries  → Cached
//!   ├── offline && have entries → Offline (persisted entries restored first)
//!   └── followings_of(me) → list_by_authors → has_like / has_repost per moment
//!         └── replace entries, seed counter mirrors, persist snapshot
//! ```
//!
//! Engagement actions go through the [`CounterSynchronizer`]; the rendered
//! view ([`FeedSession::view`]) overlays its mirrors on the stored entries so
//! optimistic changes show up immediately.

use super::counters::CounterSynchronizer;
use super::recommendation::RecommendationService;
use super::snapshot_cache::SnapshotCache;
use crate::models::{
    Comment, CommentId, CounterEvent, CounterKind, FeedEntry, FollowingSnapshot, InteractionFlags,
    Like, MomentId, Repost, Snapshot, UserCandidate, UserId,
};
use crate::storage::traits::{
    Connectivity, EngagementBackend, GraphAccess, IdentityProvider, MomentSource,
};
use crate::{Error, Result};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tokio::sync::broadcast;
use tracing::instrument;

/// What a fetch call did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FetchOutcome {
    /// A remote fetch replaced the held data.
    Fetched {
        /// Number of items now held.
        count: usize,
    },
    /// Held or persisted data was served without a remote call.
    Cached,
    /// Offline; persisted data was served without a remote call.
    Offline,
    /// Another fetch was already running; nothing was done.
    InFlight,
}

impl FetchOutcome {
    /// Returns `true` if the network was used.
    #[must_use]
    pub const fn is_fetched(self) -> bool {
        matches!(self, Self::Fetched { .. })
    }
}

/// Single-flight marker; clears its flag on drop.
pub(crate) struct FlightGuard<'a>(&'a AtomicBool);

impl<'a> FlightGuard<'a> {
    /// Claims `flag`, or returns `None` if it is already claimed.
    pub(crate) fn try_acquire(flag: &'a AtomicBool) -> Option<Self> {
        flag.compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| Self(flag))
    }
}

impl Drop for FlightGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

/// Remote adapters used by a [`FeedSession`].
#[derive(Clone)]
pub struct SessionAdapters {
    /// Who is signed in.
    pub identity: Arc<dyn IdentityProvider>,
    /// Whether the network is reachable.
    pub connectivity: Arc<dyn Connectivity>,
    /// Follow graph and profiles.
    pub graph: Arc<dyn GraphAccess>,
    /// Engagement relations and the counter RPC.
    pub engagement: Arc<dyn EngagementBackend>,
    /// The moment relation.
    pub moments: Arc<dyn MomentSource>,
}

#[derive(Debug, Default)]
struct SessionState {
    feed: FollowingSnapshot,
    recommendations: Vec<UserCandidate>,
}

/// One signed-in user's following feed, engagement actions and follow
/// suggestions.
pub struct FeedSession {
    adapters: SessionAdapters,
    counters: CounterSynchronizer,
    recommender: RecommendationService,
    cache: SnapshotCache<FollowingSnapshot>,
    state: Mutex<SessionState>,
    loading_following: AtomicBool,
    loading_recommendations: AtomicBool,
}

impl FeedSession {
    /// Creates a session with an empty feed.
    #[must_use]
    pub fn new(adapters: SessionAdapters, cache: SnapshotCache<FollowingSnapshot>) -> Self {
        Self {
            counters: CounterSynchronizer::new(Arc::clone(&adapters.engagement)),
            recommender: RecommendationService::new(Arc::clone(&adapters.graph)),
            adapters,
            cache,
            state: Mutex::new(SessionState::default()),
            loading_following: AtomicBool::new(false),
            loading_recommendations: AtomicBool::new(false),
        }
    }

    fn lock(&self) -> MutexGuard<'_, SessionState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    async fn me(&self) -> Result<UserId> {
        self.adapters
            .identity
            .current_user()
            .await?
            .ok_or(Error::Unauthenticated)
    }

    async fn persist(&self) {
        let snapshot = self.lock().feed.clone();
        self.cache.store(&snapshot).await;
    }

    /// The counter synchronizer behind the engagement actions.
    #[must_use]
    pub const fn counters(&self) -> &CounterSynchronizer {
        &self.counters
    }

    /// Subscribes to counter transitions.
    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<CounterEvent> {
        self.counters.subscribe()
    }

    // =========================================================================
    // Feed
    // =========================================================================

    /// Loads the persisted feed for an instant first render.
    ///
    /// Returns the number of entries restored; zero if memory already held
    /// entries or nothing was persisted.
    #[instrument(skip(self))]
    pub async fn restore(&self) -> usize {
        if !self.lock().feed.is_empty() {
            return 0;
        }
        let cached = self.cache.load().await;
        for entry in &cached.entries {
            self.counters
                .seed(&entry.moment.id, entry.moment.counters, entry.flags);
        }
        let mut state = self.lock();
        if !state.feed.is_empty() {
            return 0;
        }
        state.feed = cached;
        state.feed.entries.len()
    }

    /// Fetches the moments of everyone the user follows.
    ///
    /// Offline, a held or persisted feed is served even when forced, with
    /// no remote call.
    ///
    /// # Errors
    ///
    /// [`Error::Unauthenticated`] or the remote failure. The held feed is
    /// unchanged on error.
    #[instrument(skip(self))]
    pub async fn fetch_following_moments(&self, force_refresh: bool) -> Result<FetchOutcome> {
        let Some(_flight) = FlightGuard::try_acquire(&self.loading_following) else {
            tracing::debug!("Following feed fetch already in flight");
            return Ok(FetchOutcome::InFlight);
        };
        if !force_refresh && !self.lock().feed.is_empty() {
            return Ok(FetchOutcome::Cached);
        }
        if !self.adapters.connectivity.is_online() {
            self.restore().await;
            if !self.lock().feed.is_empty() {
                tracing::debug!("Offline, serving cached following feed");
                return Ok(FetchOutcome::Offline);
            }
        }

        let me = self.me().await?;
        let followings = self.adapters.graph.followings_of(&me).await?;
        let moments = if followings.is_empty() {
            Vec::new()
        } else {
            self.adapters.moments.list_by_authors(&followings).await?
        };

        let mut entries = Vec::with_capacity(moments.len());
        for moment in moments {
            let flags = InteractionFlags {
                liked: self.flag_for(&me, CounterKind::Like, &moment.id).await,
                reposted: self.flag_for(&me, CounterKind::Repost, &moment.id).await,
            };
            self.counters.seed(&moment.id, moment.counters, flags);
            entries.push(FeedEntry { moment, flags });
        }

        let count = entries.len();
        self.lock().feed.entries = entries;
        self.persist().await;
        tracing::debug!(count, "Fetched following feed");
        Ok(FetchOutcome::Fetched { count })
    }

    /// The feed as it should be rendered: stored entries with the live
    /// counter mirrors applied.
    #[must_use]
    pub fn view(&self) -> Vec<FeedEntry> {
        let mut entries = self.lock().feed.entries.clone();
        for entry in &mut entries {
            if self.counters.is_tracked(&entry.moment.id) {
                entry.moment.counters = self.counters.counters(&entry.moment.id);
                entry.flags = self.counters.flags(&entry.moment.id);
            }
        }
        entries
    }

    /// Returns `true` if there is anything to render.
    #[must_use]
    pub fn has_following_moments(&self) -> bool {
        !self.lock().feed.is_empty()
    }

    /// Returns `true` while a following-feed fetch is in flight.
    #[must_use]
    pub fn is_loading_following(&self) -> bool {
        self.loading_following.load(Ordering::Acquire)
    }

    /// Copies the mirror of `moment` into the stored entry and persists.
    async fn settle_entry(&self, moment: &MomentId) {
        let counters = self.counters.counters(moment);
        let flags = self.counters.flags(moment);
        let changed = {
            let mut state = self.lock();
            state
                .feed
                .entries
                .iter_mut()
                .find(|e| &e.moment.id == moment)
                .map(|entry| {
                    entry.moment.counters = counters;
                    entry.flags = flags;
                })
                .is_some()
        };
        if changed {
            self.persist().await;
        }
    }

    // =========================================================================
    // Interaction flags
    // =========================================================================

    /// Whether the user has liked `moment`; `false` if unknown.
    pub async fn has_like(&self, moment: &MomentId) -> bool {
        match self.me().await {
            Ok(me) => self.flag_for(&me, CounterKind::Like, moment).await,
            Err(_) => false,
        }
    }

    /// Whether the user has reposted `moment`; `false` if unknown.
    pub async fn has_repost(&self, moment: &MomentId) -> bool {
        match self.me().await {
            Ok(me) => self.flag_for(&me, CounterKind::Repost, moment).await,
            Err(_) => false,
        }
    }

    async fn flag_for(&self, me: &UserId, kind: CounterKind, moment: &MomentId) -> bool {
        let engagement = &self.adapters.engagement;
        let result = if kind == CounterKind::Like {
            engagement.has_like(me, moment).await
        } else {
            engagement.has_repost(me, moment).await
        };
        result.unwrap_or_else(|e| {
            tracing::warn!(kind = %kind, moment = %moment, error = %e, "Interaction flag lookup failed");
            false
        })
    }

    // =========================================================================
    // Engagement actions
    // =========================================================================

    /// Likes `moment`.
    ///
    /// # Errors
    ///
    /// See [`CounterSynchronizer::like`].
    pub async fn like(&self, moment: &MomentId) -> Result<()> {
        let me = self.me().await?;
        let result = self.counters.like(&me, moment).await;
        self.settle_entry(moment).await;
        result
    }

    /// Removes the like on `moment`.
    ///
    /// # Errors
    ///
    /// See [`CounterSynchronizer::unlike`].
    pub async fn unlike(&self, moment: &MomentId) -> Result<()> {
        let me = self.me().await?;
        let result = self.counters.unlike(&me, moment).await;
        self.settle_entry(moment).await;
        result
    }

    /// Comments on `moment`.
    ///
    /// # Errors
    ///
    /// See [`CounterSynchronizer::comment`].
    pub async fn comment(&self, moment: &MomentId, content: &str) -> Result<Comment> {
        let me = self.me().await?;
        let result = self.counters.comment(&me, moment, content).await;
        self.settle_entry(moment).await;
        result
    }

    /// Deletes the user's comment `comment` on `moment`.
    ///
    /// # Errors
    ///
    /// See [`CounterSynchronizer::delete_comment`].
    pub async fn delete_comment(&self, comment: &CommentId, moment: &MomentId) -> Result<()> {
        let me = self.me().await?;
        let result = self.counters.delete_comment(&me, comment, moment).await;
        self.settle_entry(moment).await;
        result
    }

    /// Reposts `moment`, optionally with quote text.
    ///
    /// # Errors
    ///
    /// See [`CounterSynchronizer::repost`].
    pub async fn repost(&self, moment: &MomentId, content: Option<&str>) -> Result<Repost> {
        let me = self.me().await?;
        let result = self.counters.repost(&me, moment, content).await;
        self.settle_entry(moment).await;
        result
    }

    /// Removes the repost of `moment`.
    ///
    /// # Errors
    ///
    /// See [`CounterSynchronizer::unrepost`].
    pub async fn unrepost(&self, moment: &MomentId) -> Result<()> {
        let me = self.me().await?;
        let result = self.counters.unrepost(&me, moment).await;
        self.settle_entry(moment).await;
        result
    }

    // =========================================================================
    // Follow graph
    // =========================================================================

    /// Follows `target`, drops it from the suggestions and refreshes the
    /// feed.
    ///
    /// # Errors
    ///
    /// [`Error::InvalidInput`] for a self-follow (no remote call is made),
    /// [`Error::AlreadyExists`], or the remote failure. A failed refresh
    /// after the follow is only logged.
    #[instrument(skip_all, fields(followee = %target))]
    pub async fn follow(&self, target: &UserId) -> Result<()> {
        let me = self.me().await?;
        if &me == target {
            return Err(Error::InvalidInput("cannot follow yourself".to_string()));
        }
        let graph = &self.adapters.graph;
        if graph.has_follow(&me, target).await? {
            return Err(Error::AlreadyExists(format!("{me} already follows {target}")));
        }
        graph.insert_follow(&me, target).await?;
        if let Err(e) = self.bump_follow_counters(&me, target, true).await {
            if let Err(undo) = graph.delete_follow(&me, target).await {
                tracing::warn!(error = %undo, "Failed to roll back follow");
            }
            return Err(e);
        }

        self.lock()
            .recommendations
            .retain(|c| &c.user_id != target);
        if let Err(e) = self.fetch_following_moments(true).await {
            tracing::warn!(error = %e, "Feed refresh after follow failed");
        }
        Ok(())
    }

    /// Unfollows `target` and drops their moments from the feed.
    ///
    /// # Errors
    ///
    /// [`Error::NotFound`] if not following, or the remote failure.
    #[instrument(skip_all, fields(followee = %target))]
    pub async fn unfollow(&self, target: &UserId) -> Result<()> {
        let me = self.me().await?;
        let graph = &self.adapters.graph;
        if !graph.has_follow(&me, target).await? || !graph.delete_follow(&me, target).await? {
            return Err(Error::NotFound(format!("{me} does not follow {target}")));
        }
        if let Err(e) = self.bump_follow_counters(&me, target, false).await {
            if let Err(undo) = graph.insert_follow(&me, target).await {
                tracing::warn!(error = %undo, "Failed to roll back unfollow");
            }
            return Err(e);
        }

        let dropped: Vec<MomentId> = {
            let mut state = self.lock();
            let (gone, kept): (Vec<FeedEntry>, Vec<FeedEntry>) =
                std::mem::take(&mut state.feed.entries)
                    .into_iter()
                    .partition(|e| &e.moment.author_id == target);
            state.feed.entries = kept;
            gone.into_iter().map(|e| e.moment.id).collect()
        };
        for moment in &dropped {
            self.counters.forget(moment);
        }
        self.persist().await;
        Ok(())
    }

    /// Moves `me`'s following count and `target`'s follower count together.
    ///
    /// If the follower RPC fails, the following RPC already applied is
    /// reversed (best effort, logged on failure).
    async fn bump_follow_counters(&self, me: &UserId, target: &UserId, up: bool) -> Result<()> {
        let engagement = self.adapters.engagement.as_ref();
        shift(engagement, CounterKind::Following, me, up).await?;
        if let Err(e) = shift(engagement, CounterKind::Follower, target, up).await {
            if let Err(undo) = shift(engagement, CounterKind::Following, me, !up).await {
                tracing::warn!(error = %undo, "Failed to roll back following counter");
            }
            return Err(e);
        }
        Ok(())
    }

    /// Whether the user follows `target`; `false` if unknown.
    pub async fn is_following(&self, target: &UserId) -> bool {
        let result = match self.me().await {
            Ok(me) => self.adapters.graph.has_follow(&me, target).await,
            Err(e) => Err(e),
        };
        result.unwrap_or_else(|e| {
            tracing::warn!(target_user = %target, error = %e, "Follow status lookup failed");
            false
        })
    }

    // =========================================================================
    // Recommendations
    // =========================================================================

    /// Recomputes follow suggestions.
    ///
    /// # Errors
    ///
    /// [`Error::Unauthenticated`] or [`Error::RecommendationUnavailable`];
    /// the previous suggestions are kept on error.
    #[instrument(skip(self))]
    pub async fn refresh_recommendations(&self, limit: usize) -> Result<FetchOutcome> {
        let Some(_flight) = FlightGuard::try_acquire(&self.loading_recommendations) else {
            return Ok(FetchOutcome::InFlight);
        };
        let me = self.me().await?;
        let candidates = self.recommender.recommend(&me, limit).await?;
        let count = candidates.len();
        self.lock().recommendations = candidates;
        Ok(FetchOutcome::Fetched { count })
    }

    /// The current follow suggestions.
    #[must_use]
    pub fn recommendations(&self) -> Vec<UserCandidate> {
        self.lock().recommendations.clone()
    }

    /// Returns `true` while recommendations are being computed.
    #[must_use]
    pub fn is_loading_recommendations(&self) -> bool {
        self.loading_recommendations.load(Ordering::Acquire)
    }

    // =========================================================================
    // Passthroughs
    // =========================================================================

    /// Comments on `moment`, newest first.
    ///
    /// # Errors
    ///
    /// The remote failure.
    pub async fn comments(&self, moment: &MomentId) -> Result<Vec<Comment>> {
        self.adapters.engagement.list_comments(moment).await
    }

    /// Reposts of `moment`, newest first.
    ///
    /// # Errors
    ///
    /// The remote failure.
    pub async fn reposts(&self, moment: &MomentId) -> Result<Vec<Repost>> {
        self.adapters.engagement.list_reposts(moment).await
    }

    /// Likes on `moment`, newest first.
    ///
    /// # Errors
    ///
    /// The remote failure.
    pub async fn likes(&self, moment: &MomentId) -> Result<Vec<Like>> {
        self.adapters.engagement.list_likes(moment).await
    }

    /// Clears the feed and suggestions, in memory and on disk.
    pub async fn reset(&self) {
        let dropped: Vec<MomentId> = {
            let mut state = self.lock();
            let ids = state.feed.entries.iter().map(|e| e.moment.id.clone()).collect();
            *state = SessionState::default();
            ids
        };
        for moment in &dropped {
            self.counters.forget(moment);
        }
        self.cache.clear().await;
    }
}

/// One profile counter RPC, up or down.
async fn shift(
    engagement: &dyn EngagementBackend,
    kind: CounterKind,
    user: &UserId,
    up: bool,
) -> Result<()> {
    if up {
        engagement.increment(kind, user.as_str()).await
    } else {
        engagement.decrement(kind, user.as_str()).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_flight_guard_is_exclusive_and_releases() {
        let flag = AtomicBool::new(false);
        let first = FlightGuard::try_acquire(&flag);
        assert!(first.is_some());
        assert!(FlightGuard::try_acquire(&flag).is_none());
        drop(first);
        assert!(FlightGuard::try_acquire(&flag).is_some());
    }

    #[test]
    fn test_fetch_outcome_is_fetched() {
        assert!(FetchOutcome::Fetched { count: 0 }.is_fetched());
        assert!(!FetchOutcome::Cached.is_fetched());
        assert!(!FetchOutcome::InFlight.is_fetched());
    }
}
