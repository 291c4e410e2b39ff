//! The journal: the signed-in user's own moments.
//!
//! State is a [`FeedSnapshot`] held in memory and mirrored to the
//! [`SnapshotCache`]. Remote fetches replace the moment list wholesale;
//! single-moment mutations patch it in place. Every change is re-persisted.
//!
//! A failed fetch leaves the in-memory state as it was.

use super::feed::{FetchOutcome, FlightGuard};
use super::snapshot_cache::SnapshotCache;
use crate::models::{
    DateRange, FeedFilter, FeedSnapshot, FilterState, Moment, MomentId, MomentUpdate, NewMoment,
    Snapshot, UserId,
};
use crate::storage::traits::{Connectivity, IdentityProvider, MomentSource};
use crate::{Error, Result};
use chrono::NaiveDate;
use std::sync::atomic::AtomicBool;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tracing::instrument;

/// Default width of the "recent" window in days.
pub const DEFAULT_RECENT_WINDOW_DAYS: u32 = 30;

/// The journal feed.
pub struct MomentFeed {
    source: Arc<dyn MomentSource>,
    identity: Arc<dyn IdentityProvider>,
    connectivity: Arc<dyn Connectivity>,
    cache: SnapshotCache<FeedSnapshot>,
    recent_window_days: u32,
    state: Mutex<FeedSnapshot>,
    fetching: AtomicBool,
}

impl MomentFeed {
    /// Creates an empty feed.
    #[must_use]
    pub fn new(
        source: Arc<dyn MomentSource>,
        identity: Arc<dyn IdentityProvider>,
        connectivity: Arc<dyn Connectivity>,
        cache: SnapshotCache<FeedSnapshot>,
    ) -> Self {
        Self {
            source,
            identity,
            connectivity,
            cache,
            recent_window_days: DEFAULT_RECENT_WINDOW_DAYS,
            state: Mutex::new(FeedSnapshot::default()),
            fetching: AtomicBool::new(false),
        }
    }

    /// Sets the width of the "recent" window.
    #[must_use]
    pub const fn with_recent_window_days(mut self, days: u32) -> Self {
        self.recent_window_days = days;
        self
    }

    fn lock(&self) -> MutexGuard<'_, FeedSnapshot> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    async fn owner(&self) -> Result<UserId> {
        self.identity
            .current_user()
            .await?
            .ok_or(Error::Unauthenticated)
    }

    async fn persist(&self) {
        let snapshot = self.lock().clone();
        self.cache.store(&snapshot).await;
    }

    // =========================================================================
    // Reads
    // =========================================================================

    /// A copy of the current snapshot.
    #[must_use]
    pub fn snapshot(&self) -> FeedSnapshot {
        self.lock().clone()
    }

    /// All moments, newest first.
    #[must_use]
    pub fn moments(&self) -> Vec<Moment> {
        self.lock().moments.clone()
    }

    /// The current filter state.
    #[must_use]
    pub fn filter_state(&self) -> FilterState {
        self.lock().filter_state.clone()
    }

    /// Moments passing the selected tags and date range.
    #[must_use]
    pub fn filtered_moments(&self) -> Vec<Moment> {
        self.lock().filtered().cloned().collect()
    }

    /// Moments dated within the recent window ending at `today`.
    #[must_use]
    pub fn recent_moments(&self, today: NaiveDate) -> Vec<Moment> {
        let window = DateRange::trailing(today, self.recent_window_days);
        self.lock()
            .moments
            .iter()
            .filter(|m| m.date >= window.start)
            .cloned()
            .collect()
    }

    /// Every tag in use, sorted and deduplicated.
    #[must_use]
    pub fn all_tags(&self) -> Vec<String> {
        self.lock().all_tags()
    }

    /// Number of moments held, ignoring filters.
    #[must_use]
    pub fn total_count(&self) -> usize {
        self.lock().moments.len()
    }

    /// Returns `true` while a fetch is in flight.
    #[must_use]
    pub fn is_loading(&self) -> bool {
        self.fetching.load(std::sync::atomic::Ordering::Acquire)
    }

    // =========================================================================
    // Fetches
    // =========================================================================

    /// Loads the persisted snapshot into memory if nothing is held yet.
    ///
    /// Returns `true` if there is something to render afterwards.
    pub async fn restore(&self) -> bool {
        if !self.lock().is_empty() {
            return true;
        }
        let cached = self.cache.load().await;
        let mut state = self.lock();
        if state.is_empty() {
            *state = cached;
        }
        !state.is_empty()
    }

    /// Fetches all of the user's moments.
    ///
    /// Without `force_refresh` a non-empty snapshot (in memory or persisted)
    /// is served as is. Offline, a non-empty snapshot is served even when
    /// forced. Neither case touches the network.
    ///
    /// # Errors
    ///
    /// [`Error::Unauthenticated`] without a signed-in user, or the remote
    /// failure. State is unchanged on error.
    #[instrument(skip(self))]
    pub async fn fetch_moments(&self, force_refresh: bool) -> Result<FetchOutcome> {
        let has_snapshot = self.restore().await;
        if has_snapshot && !force_refresh {
            return Ok(FetchOutcome::Cached);
        }
        if has_snapshot && !self.connectivity.is_online() {
            tracing::debug!("Offline, serving cached journal");
            return Ok(FetchOutcome::Offline);
        }

        let Some(_flight) = FlightGuard::try_acquire(&self.fetching) else {
            return Ok(FetchOutcome::InFlight);
        };
        let owner = self.owner().await?;
        let moments = self.source.list_all(&owner).await?;
        let count = moments.len();
        self.lock().moments = moments;
        self.persist().await;
        Ok(FetchOutcome::Fetched { count })
    }

    /// Replaces the moments with those dated within `start..=end` and
    /// records the range in the filter state.
    ///
    /// # Errors
    ///
    /// [`Error::Unauthenticated`] or the remote failure.
    #[instrument(skip(self))]
    pub async fn fetch_by_date_range(
        &self,
        start: NaiveDate,
        end: NaiveDate,
    ) -> Result<FetchOutcome> {
        let Some(_flight) = FlightGuard::try_acquire(&self.fetching) else {
            return Ok(FetchOutcome::InFlight);
        };
        let owner = self.owner().await?;
        let range = DateRange::new(start, end);
        let moments = self.source.list_by_date_range(&owner, range).await?;
        let count = moments.len();
        {
            let mut state = self.lock();
            state.moments = moments;
            state.filter_state.date_range = Some(range);
        }
        self.persist().await;
        Ok(FetchOutcome::Fetched { count })
    }

    /// Replaces the moments with those carrying any of `tags` and records
    /// the selection. An empty selection behaves like
    /// [`Self::fetch_moments`] without forcing.
    ///
    /// # Errors
    ///
    /// [`Error::Unauthenticated`] or the remote failure.
    #[instrument(skip(self))]
    pub async fn fetch_by_tags(&self, tags: &[String]) -> Result<FetchOutcome> {
        if tags.is_empty() {
            return self.fetch_moments(false).await;
        }
        let Some(_flight) = FlightGuard::try_acquire(&self.fetching) else {
            return Ok(FetchOutcome::InFlight);
        };
        let owner = self.owner().await?;
        let moments = self.source.list_by_tags(&owner, tags).await?;
        let count = moments.len();
        {
            let mut state = self.lock();
            state.moments = moments;
            state.filter_state.selected_tags = tags.to_vec();
        }
        self.persist().await;
        Ok(FetchOutcome::Fetched { count })
    }

    // =========================================================================
    // Filters
    // =========================================================================

    /// Switches the active filter using the local calendar date.
    ///
    /// # Errors
    ///
    /// See [`Self::set_filter_on`].
    pub async fn set_filter(&self, filter: FeedFilter) -> Result<FetchOutcome> {
        self.set_filter_on(filter, chrono::Local::now().date_naive())
            .await
    }

    /// Switches the active filter.
    ///
    /// `All` drops tag and date selections and refetches everything,
    /// `Recent` fetches the window ending at `today`, `Tagged` only marks
    /// the filter active.
    ///
    /// The filter switch is persisted before the fetch starts, so it
    /// survives a fetch that fails, is skipped offline, or is already in
    /// flight.
    ///
    /// # Errors
    ///
    /// The failure of the triggered fetch; the filter switch itself is kept.
    pub async fn set_filter_on(&self, filter: FeedFilter, today: NaiveDate) -> Result<FetchOutcome> {
        if filter == FeedFilter::All {
            return self.clear_filters().await;
        }
        self.lock().filter_state.active_filter = filter;
        self.persist().await;
        match filter {
            FeedFilter::Recent => {
                let window = DateRange::trailing(today, self.recent_window_days);
                self.fetch_by_date_range(window.start, window.end).await
            },
            FeedFilter::All | FeedFilter::Tagged => Ok(FetchOutcome::Cached),
        }
    }

    /// Resets the filter state, persists it, and refetches everything.
    ///
    /// # Errors
    ///
    /// The failure of the refetch; the reset itself is kept.
    pub async fn clear_filters(&self) -> Result<FetchOutcome> {
        self.lock().filter_state = FilterState::default();
        self.persist().await;
        // A filtered fetch left a subset behind, so the cache cannot serve this.
        self.fetch_moments(true).await
    }

    // =========================================================================
    // Mutations
    // =========================================================================

    /// Creates a moment and puts it at the top of the list.
    ///
    /// # Errors
    ///
    /// [`Error::Unauthenticated`] or the remote failure.
    #[instrument(skip(self, request), fields(title = %request.title))]
    pub async fn create_moment(&self, request: &NewMoment) -> Result<Moment> {
        let owner = self.owner().await?;
        let moment = self.source.create(&owner, request).await?;
        self.lock().moments.insert(0, moment.clone());
        self.persist().await;
        Ok(moment)
    }

    /// Updates a moment, then re-reads that one entry.
    ///
    /// # Errors
    ///
    /// The remote failure.
    #[instrument(skip(self, update), fields(moment = %id))]
    pub async fn update_moment(&self, id: &MomentId, update: &MomentUpdate) -> Result<()> {
        self.source.update(id, update).await?;
        self.reload_entry(id).await
    }

    /// Deletes a moment and drops it from the list.
    ///
    /// # Errors
    ///
    /// The remote failure; the list is untouched in that case.
    #[instrument(skip(self), fields(moment = %id))]
    pub async fn delete_moment(&self, id: &MomentId) -> Result<()> {
        self.source.delete(id).await?;
        self.lock().moments.retain(|m| &m.id != id);
        self.persist().await;
        Ok(())
    }

    /// Deletes the image at `index` of a moment, then re-reads that entry.
    ///
    /// # Errors
    ///
    /// The remote failure, including an out-of-range index.
    #[instrument(skip(self), fields(moment = %id))]
    pub async fn delete_image(&self, id: &MomentId, index: usize) -> Result<()> {
        self.source.delete_image(id, index).await?;
        self.reload_entry(id).await
    }

    async fn reload_entry(&self, id: &MomentId) -> Result<()> {
        if !self.lock().moments.iter().any(|m| &m.id == id) {
            return Ok(());
        }
        let Some(fresh) = self.source.get(id).await? else {
            return Ok(());
        };
        {
            let mut state = self.lock();
            if let Some(slot) = state.moments.iter_mut().find(|m| &m.id == id) {
                *slot = fresh;
            }
        }
        self.persist().await;
        Ok(())
    }

    /// Forgets everything, in memory and on disk.
    pub async fn reset(&self) {
        *self.lock() = FeedSnapshot::default();
        self.cache.clear().await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::EngagementCounters;
    use crate::services::snapshot_cache::JOURNAL_SNAPSHOT_KEY;
    use crate::storage::{ConnectivityFlag, InMemoryKeyValueStore, InMemorySocialStore, StaticIdentity};
    use chrono::Utc;

    fn day(d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2026, 5, d).unwrap()
    }

    fn moment(id: &str, date: NaiveDate, tags: &[&str]) -> Moment {
        Moment {
            id: MomentId::new(id),
            author_id: UserId::new("me"),
            author: None,
            title: id.to_string(),
            content: String::new(),
            date,
            images: Vec::new(),
            image_tokens: Vec::new(),
            tags: tags.iter().map(ToString::to_string).collect(),
            counters: EngagementCounters::default(),
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    fn feed(store: &Arc<InMemorySocialStore>) -> MomentFeed {
        MomentFeed::new(
            store.clone(),
            Arc::new(StaticIdentity::signed_in("me")),
            Arc::new(ConnectivityFlag::default()),
            SnapshotCache::new(Arc::new(InMemoryKeyValueStore::new()), JOURNAL_SNAPSHOT_KEY),
        )
    }

    #[tokio::test]
    async fn test_filtered_and_recent_views() {
        let store = Arc::new(InMemorySocialStore::new());
        store.add_moment(moment("a", day(1), &["hike"]));
        store.add_moment(moment("b", day(20), &["food", "hike"]));
        store.add_moment(moment("c", day(28), &["food"]));
        let feed = feed(&store).with_recent_window_days(10);

        feed.fetch_moments(false).await.unwrap();
        assert_eq!(feed.total_count(), 3);
        assert_eq!(feed.all_tags(), vec!["food".to_string(), "hike".to_string()]);

        let recent: Vec<_> = feed
            .recent_moments(day(28))
            .into_iter()
            .map(|m| m.id)
            .collect();
        assert_eq!(recent, vec![MomentId::new("c"), MomentId::new("b")]);

        feed.lock().filter_state = FilterState {
            active_filter: FeedFilter::Tagged,
            selected_tags: vec!["hike".into()],
            date_range: Some(DateRange::new(day(10), day(31))),
        };
        let filtered: Vec<_> = feed.filtered_moments().into_iter().map(|m| m.id).collect();
        assert_eq!(filtered, vec![MomentId::new("b")]);
    }

    #[tokio::test]
    async fn test_unauthenticated_fetch_leaves_state() {
        let store = Arc::new(InMemorySocialStore::new());
        let feed = MomentFeed::new(
            store.clone(),
            Arc::new(StaticIdentity::anonymous()),
            Arc::new(ConnectivityFlag::default()),
            SnapshotCache::new(Arc::new(InMemoryKeyValueStore::new()), JOURNAL_SNAPSHOT_KEY),
        );
        assert!(matches!(
            feed.fetch_moments(true).await,
            Err(Error::Unauthenticated)
        ));
        assert_eq!(store.call_count(), 0);
        assert!(!feed.is_loading());
    }

    #[tokio::test]
    async fn test_empty_tag_selection_uses_plain_fetch() {
        let store = Arc::new(InMemorySocialStore::new());
        store.add_moment(moment("a", day(1), &["x"]));
        let feed = feed(&store);

        let outcome = feed.fetch_by_tags(&[]).await.unwrap();
        assert_eq!(outcome, FetchOutcome::Fetched { count: 1 });
        assert_eq!(store.calls_to("list_by_tags"), 0);
        assert_eq!(store.calls_to("list_all"), 1);
    }

    #[tokio::test]
    async fn test_tagged_filter_only_marks_active() {
        let store = Arc::new(InMemorySocialStore::new());
        let feed = feed(&store);
        let outcome = feed.set_filter_on(FeedFilter::Tagged, day(1)).await.unwrap();
        assert_eq!(outcome, FetchOutcome::Cached);
        assert_eq!(feed.filter_state().active_filter, FeedFilter::Tagged);
        assert_eq!(store.call_count(), 0);
    }
}
