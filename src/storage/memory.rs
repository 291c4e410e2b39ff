//! In-memory social store for testing.
//!
//! Provides a fast, non-persistent implementation of [`GraphAccess`],
//! [`EngagementBackend`] and [`MomentSource`] for unit tests and development.
//! It also records every call and can inject failures, which is what the
//! offline and compensation tests rely on.

use crate::models::{
    Comment, CommentId, CounterKind, DateRange, FollowEdge, Like, Moment, MomentId, MomentUpdate,
    NewMoment, Profile, Repost, RepostId, UserId,
};
use crate::storage::traits::{EngagementBackend, GraphAccess, MomentSource};
use crate::{Error, Result};
use async_trait::async_trait;
use chrono::Utc;
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};
use tokio::sync::Notify;

/// How an injected fault fails a call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FaultKind {
    /// Fail with [`Error::RemoteUnavailable`].
    Unavailable,
    /// Fail with [`Error::RemoteQuery`].
    Query,
}

#[derive(Debug, Default)]
struct Tables {
    profiles: Vec<Profile>,
    follows: Vec<FollowEdge>,
    moments: Vec<Moment>,
    likes: Vec<Like>,
    reposts: Vec<Repost>,
    comments: Vec<Comment>,
}

#[derive(Debug, Default)]
struct Faults {
    offline: bool,
    operations: HashMap<&'static str, FaultKind>,
}

/// In-memory social store for testing.
///
/// Uses `RwLock` for thread-safe access. Data is not persisted between runs.
///
/// # Example
///
/// ```rust,ignore
/// use moment_engine::storage::{FaultKind, InMemorySocialStore};
///
/// let store = InMemorySocialStore::new();
/// store.add_follow("alice", "bob");
/// store.fail_operation("increment", FaultKind::Unavailable);
/// ```
#[derive(Debug, Default)]
pub struct InMemorySocialStore {
    tables: RwLock<Tables>,
    faults: RwLock<Faults>,
    calls: Mutex<HashMap<&'static str, u64>>,
    total_calls: AtomicU64,
    counter_latch: Mutex<Option<Arc<Notify>>>,
}

fn read<T>(lock: &RwLock<T>) -> RwLockReadGuard<'_, T> {
    lock.read().unwrap_or_else(PoisonError::into_inner)
}

fn write<T>(lock: &RwLock<T>) -> RwLockWriteGuard<'_, T> {
    lock.write().unwrap_or_else(PoisonError::into_inner)
}

impl InMemorySocialStore {
    /// Creates a new empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    // =========================================================================
    // Seeding (not counted as remote calls)
    // =========================================================================

    /// Adds a profile.
    pub fn add_profile(&self, profile: Profile) {
        write(&self.tables).profiles.push(profile);
    }

    /// Adds the edge `follower -> following` and bumps both profile counters.
    pub fn add_follow(&self, follower: impl Into<UserId>, following: impl Into<UserId>) {
        let edge = FollowEdge {
            follower_id: follower.into(),
            following_id: following.into(),
            created_at: Utc::now(),
        };
        let mut tables = write(&self.tables);
        bump_profile(&mut tables, CounterKind::Following, edge.follower_id.as_str(), 1);
        bump_profile(&mut tables, CounterKind::Follower, edge.following_id.as_str(), 1);
        tables.follows.push(edge);
    }

    /// Adds a moment as-is.
    pub fn add_moment(&self, moment: Moment) {
        write(&self.tables).moments.push(moment);
    }

    /// Returns a stored moment without counting a call.
    #[must_use]
    pub fn moment(&self, id: &MomentId) -> Option<Moment> {
        read(&self.tables)
            .moments
            .iter()
            .find(|m| &m.id == id)
            .cloned()
    }

    /// Returns a stored profile without counting a call.
    #[must_use]
    pub fn profile(&self, id: &UserId) -> Option<Profile> {
        read(&self.tables)
            .profiles
            .iter()
            .find(|p| &p.id == id)
            .cloned()
    }

    /// Returns the number of like rows.
    #[must_use]
    pub fn like_count(&self) -> usize {
        read(&self.tables).likes.len()
    }

    // =========================================================================
    // Fault injection and call accounting
    // =========================================================================

    /// Makes every call fail with [`Error::RemoteUnavailable`] while set.
    pub fn set_offline(&self, offline: bool) {
        write(&self.faults).offline = offline;
    }

    /// Makes every call to `operation` fail with `kind` until cleared.
    pub fn fail_operation(&self, operation: &'static str, kind: FaultKind) {
        write(&self.faults).operations.insert(operation, kind);
    }

    /// Removes all injected faults.
    pub fn clear_faults(&self) {
        *write(&self.faults) = Faults::default();
    }

    /// Total number of trait calls made so far.
    #[must_use]
    pub fn call_count(&self) -> u64 {
        self.total_calls.load(Ordering::Relaxed)
    }

    /// Number of calls made to `operation`.
    #[must_use]
    pub fn calls_to(&self, operation: &str) -> u64 {
        self.calls
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(operation)
            .copied()
            .unwrap_or(0)
    }

    /// Holds every subsequent `increment`/`decrement` until the returned
    /// handle is notified once per held call.
    pub fn hold_counter_calls(&self) -> Arc<Notify> {
        let notify = Arc::new(Notify::new());
        *self
            .counter_latch
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = Some(Arc::clone(&notify));
        notify
    }

    /// Lets counter calls through immediately again.
    pub fn release_counter_calls(&self) {
        self.counter_latch
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
    }

    fn enter(&self, operation: &'static str) -> Result<()> {
        self.total_calls.fetch_add(1, Ordering::Relaxed);
        *self
            .calls
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .entry(operation)
            .or_default() += 1;

        let faults = read(&self.faults);
        if faults.offline {
            return Err(Error::unavailable(operation, "store is offline"));
        }
        match faults.operations.get(operation) {
            Some(FaultKind::Unavailable) => Err(Error::unavailable(operation, "injected fault")),
            Some(FaultKind::Query) => Err(Error::query(operation, "injected fault")),
            None => Ok(()),
        }
    }

    async fn wait_for_counter_latch(&self) {
        let latch = self
            .counter_latch
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone();
        if let Some(notify) = latch {
            notify.notified().await;
        }
    }

    fn with_author(tables: &Tables, mut moment: Moment) -> Moment {
        moment.author = tables
            .profiles
            .iter()
            .find(|p| p.id == moment.author_id)
            .map(Profile::summary);
        moment
    }

    fn owned_by_date_desc(
        tables: &Tables,
        owner: &UserId,
        keep: impl Fn(&Moment) -> bool,
    ) -> Vec<Moment> {
        let mut moments: Vec<Moment> = tables
            .moments
            .iter()
            .filter(|m| &m.author_id == owner && keep(m))
            .cloned()
            .collect();
        moments.sort_by(|a, b| b.date.cmp(&a.date));
        moments
    }
}

fn bump_profile(tables: &mut Tables, kind: CounterKind, user: &str, delta: i8) -> bool {
    let Some(profile) = tables.profiles.iter_mut().find(|p| p.id.as_str() == user) else {
        return false;
    };
    let slot = match kind {
        CounterKind::Follower => &mut profile.follower_count,
        _ => &mut profile.following_count,
    };
    *slot = if delta > 0 {
        slot.saturating_add(1)
    } else {
        slot.saturating_sub(1)
    };
    true
}

fn bump_moment(tables: &mut Tables, kind: CounterKind, moment: &str, delta: i8) -> bool {
    let Some(moment) = tables.moments.iter_mut().find(|m| m.id.as_str() == moment) else {
        return false;
    };
    let current = moment.counters.get(kind);
    let next = if delta > 0 {
        current.saturating_add(1)
    } else {
        current.saturating_sub(1)
    };
    moment.counters.set(kind, next);
    true
}

#[async_trait]
impl GraphAccess for InMemorySocialStore {
    async fn followings_of(&self, user: &UserId) -> Result<Vec<UserId>> {
        self.enter("followings_of")?;
        Ok(read(&self.tables)
            .follows
            .iter()
            .rev()
            .filter(|e| &e.follower_id == user)
            .map(|e| e.following_id.clone())
            .collect())
    }

    async fn followers_of(&self, user: &UserId) -> Result<Vec<UserId>> {
        self.enter("followers_of")?;
        Ok(read(&self.tables)
            .follows
            .iter()
            .rev()
            .filter(|e| &e.following_id == user)
            .map(|e| e.follower_id.clone())
            .collect())
    }

    async fn users_following(
        &self,
        targets: &[UserId],
        excluding: &UserId,
    ) -> Result<Vec<UserId>> {
        self.enter("users_following")?;
        let targets: HashSet<&UserId> = targets.iter().collect();
        Ok(read(&self.tables)
            .follows
            .iter()
            .filter(|e| targets.contains(&e.following_id) && &e.follower_id != excluding)
            .map(|e| e.follower_id.clone())
            .collect())
    }

    async fn recent_profiles(&self, excluding: &UserId, limit: usize) -> Result<Vec<Profile>> {
        self.enter("recent_profiles")?;
        let mut profiles: Vec<Profile> = read(&self.tables)
            .profiles
            .iter()
            .filter(|p| &p.id != excluding)
            .cloned()
            .collect();
        profiles.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        profiles.truncate(limit);
        Ok(profiles)
    }

    async fn active_profiles(
        &self,
        excluding: &UserId,
        excluding_set: &[UserId],
        limit: usize,
    ) -> Result<Vec<Profile>> {
        self.enter("active_profiles")?;
        let mut profiles: Vec<Profile> = read(&self.tables)
            .profiles
            .iter()
            .filter(|p| &p.id != excluding && !excluding_set.contains(&p.id))
            .cloned()
            .collect();
        profiles.sort_by(|a, b| b.updated_at.cmp(&a.updated_at));
        profiles.truncate(limit);
        Ok(profiles)
    }

    async fn profiles(&self, ids: &[UserId]) -> Result<Vec<Profile>> {
        self.enter("profiles")?;
        Ok(read(&self.tables)
            .profiles
            .iter()
            .filter(|p| ids.contains(&p.id))
            .cloned()
            .collect())
    }

    async fn has_follow(&self, follower: &UserId, following: &UserId) -> Result<bool> {
        self.enter("has_follow")?;
        Ok(read(&self.tables)
            .follows
            .iter()
            .any(|e| &e.follower_id == follower && &e.following_id == following))
    }

    async fn insert_follow(&self, follower: &UserId, following: &UserId) -> Result<()> {
        self.enter("insert_follow")?;
        if follower == following {
            return Err(Error::InvalidInput("cannot follow yourself".to_string()));
        }
        let mut tables = write(&self.tables);
        if tables
            .follows
            .iter()
            .any(|e| &e.follower_id == follower && &e.following_id == following)
        {
            return Err(Error::AlreadyExists(format!(
                "{follower} already follows {following}"
            )));
        }
        tables.follows.push(FollowEdge {
            follower_id: follower.clone(),
            following_id: following.clone(),
            created_at: Utc::now(),
        });
        Ok(())
    }

    async fn delete_follow(&self, follower: &UserId, following: &UserId) -> Result<bool> {
        self.enter("delete_follow")?;
        let mut tables = write(&self.tables);
        let before = tables.follows.len();
        tables
            .follows
            .retain(|e| !(&e.follower_id == follower && &e.following_id == following));
        Ok(tables.follows.len() != before)
    }
}

#[async_trait]
impl EngagementBackend for InMemorySocialStore {
    async fn has_like(&self, user: &UserId, moment: &MomentId) -> Result<bool> {
        self.enter("has_like")?;
        Ok(read(&self.tables)
            .likes
            .iter()
            .any(|l| &l.user_id == user && &l.moment_id == moment))
    }

    async fn insert_like(&self, user: &UserId, moment: &MomentId) -> Result<()> {
        self.enter("insert_like")?;
        let mut tables = write(&self.tables);
        if tables
            .likes
            .iter()
            .any(|l| &l.user_id == user && &l.moment_id == moment)
        {
            return Err(Error::AlreadyExists(format!("{user} already liked {moment}")));
        }
        tables.likes.push(Like {
            user_id: user.clone(),
            moment_id: moment.clone(),
            created_at: Utc::now(),
        });
        Ok(())
    }

    async fn delete_like(&self, user: &UserId, moment: &MomentId) -> Result<bool> {
        self.enter("delete_like")?;
        let mut tables = write(&self.tables);
        let before = tables.likes.len();
        tables
            .likes
            .retain(|l| !(&l.user_id == user && &l.moment_id == moment));
        Ok(tables.likes.len() != before)
    }

    async fn list_likes(&self, moment: &MomentId) -> Result<Vec<Like>> {
        self.enter("list_likes")?;
        Ok(read(&self.tables)
            .likes
            .iter()
            .rev()
            .filter(|l| &l.moment_id == moment)
            .cloned()
            .collect())
    }

    async fn has_repost(&self, user: &UserId, moment: &MomentId) -> Result<bool> {
        self.enter("has_repost")?;
        Ok(read(&self.tables)
            .reposts
            .iter()
            .any(|r| &r.user_id == user && &r.moment_id == moment))
    }

    async fn insert_repost(
        &self,
        user: &UserId,
        moment: &MomentId,
        content: Option<&str>,
    ) -> Result<Repost> {
        self.enter("insert_repost")?;
        let mut tables = write(&self.tables);
        if tables
            .reposts
            .iter()
            .any(|r| &r.user_id == user && &r.moment_id == moment)
        {
            return Err(Error::AlreadyExists(format!(
                "{user} already reposted {moment}"
            )));
        }
        let repost = Repost {
            id: RepostId::generate(),
            user_id: user.clone(),
            moment_id: moment.clone(),
            content: content.map(str::to_string),
            created_at: Utc::now(),
        };
        tables.reposts.push(repost.clone());
        Ok(repost)
    }

    async fn delete_repost(&self, user: &UserId, moment: &MomentId) -> Result<bool> {
        self.enter("delete_repost")?;
        let mut tables = write(&self.tables);
        let before = tables.reposts.len();
        tables
            .reposts
            .retain(|r| !(&r.user_id == user && &r.moment_id == moment));
        Ok(tables.reposts.len() != before)
    }

    async fn list_reposts(&self, moment: &MomentId) -> Result<Vec<Repost>> {
        self.enter("list_reposts")?;
        Ok(read(&self.tables)
            .reposts
            .iter()
            .rev()
            .filter(|r| &r.moment_id == moment)
            .cloned()
            .collect())
    }

    async fn insert_comment(
        &self,
        user: &UserId,
        moment: &MomentId,
        content: &str,
    ) -> Result<Comment> {
        self.enter("insert_comment")?;
        let comment = Comment {
            id: CommentId::generate(),
            user_id: user.clone(),
            moment_id: moment.clone(),
            content: content.to_string(),
            created_at: Utc::now(),
        };
        write(&self.tables).comments.push(comment.clone());
        Ok(comment)
    }

    async fn delete_comment(
        &self,
        user: &UserId,
        comment: &CommentId,
        moment: &MomentId,
    ) -> Result<bool> {
        self.enter("delete_comment")?;
        let mut tables = write(&self.tables);
        let before = tables.comments.len();
        tables
            .comments
            .retain(|c| !(&c.id == comment && &c.user_id == user && &c.moment_id == moment));
        Ok(tables.comments.len() < before)
    }

    async fn list_comments(&self, moment: &MomentId) -> Result<Vec<Comment>> {
        self.enter("list_comments")?;
        Ok(read(&self.tables)
            .comments
            .iter()
            .rev()
            .filter(|c| &c.moment_id == moment)
            .cloned()
            .collect())
    }

    async fn increment(&self, kind: CounterKind, target: &str) -> Result<()> {
        self.enter("increment")?;
        self.wait_for_counter_latch().await;
        let mut tables = write(&self.tables);
        let found = if kind.is_moment_counter() {
            bump_moment(&mut tables, kind, target, 1)
        } else {
            bump_profile(&mut tables, kind, target, 1)
        };
        if found {
            Ok(())
        } else {
            Err(Error::query("increment", format!("no {kind} counter for {target}")))
        }
    }

    async fn decrement(&self, kind: CounterKind, target: &str) -> Result<()> {
        self.enter("decrement")?;
        self.wait_for_counter_latch().await;
        let mut tables = write(&self.tables);
        let found = if kind.is_moment_counter() {
            bump_moment(&mut tables, kind, target, -1)
        } else {
            bump_profile(&mut tables, kind, target, -1)
        };
        if found {
            Ok(())
        } else {
            Err(Error::query("decrement", format!("no {kind} counter for {target}")))
        }
    }
}

#[async_trait]
impl MomentSource for InMemorySocialStore {
    async fn list_all(&self, owner: &UserId) -> Result<Vec<Moment>> {
        self.enter("list_all")?;
        Ok(Self::owned_by_date_desc(&read(&self.tables), owner, |_| true))
    }

    async fn list_by_date_range(&self, owner: &UserId, range: DateRange) -> Result<Vec<Moment>> {
        self.enter("list_by_date_range")?;
        Ok(Self::owned_by_date_desc(&read(&self.tables), owner, |m| {
            range.contains(m.date)
        }))
    }

    async fn list_by_tags(&self, owner: &UserId, tags: &[String]) -> Result<Vec<Moment>> {
        self.enter("list_by_tags")?;
        Ok(Self::owned_by_date_desc(&read(&self.tables), owner, |m| {
            m.has_any_tag(tags)
        }))
    }

    async fn list_by_authors(&self, authors: &[UserId]) -> Result<Vec<Moment>> {
        self.enter("list_by_authors")?;
        let tables = read(&self.tables);
        let mut moments: Vec<Moment> = tables
            .moments
            .iter()
            .filter(|m| authors.contains(&m.author_id))
            .map(|m| Self::with_author(&tables, m.clone()))
            .collect();
        moments.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(moments)
    }

    async fn get(&self, id: &MomentId) -> Result<Option<Moment>> {
        self.enter("get")?;
        let tables = read(&self.tables);
        Ok(tables
            .moments
            .iter()
            .find(|m| &m.id == id)
            .map(|m| Self::with_author(&tables, m.clone())))
    }

    async fn create(&self, author: &UserId, request: &NewMoment) -> Result<Moment> {
        self.enter("create")?;
        let now = Utc::now();
        let moment = Moment {
            id: MomentId::generate(),
            author_id: author.clone(),
            author: None,
            title: request.title.clone(),
            content: request.content.clone(),
            date: request.date.unwrap_or_else(|| now.date_naive()),
            images: request.images.iter().map(|i| i.url.clone()).collect(),
            image_tokens: request.images.iter().map(|i| i.token.clone()).collect(),
            tags: request.tags.clone(),
            counters: crate::models::EngagementCounters::default(),
            created_at: now,
            updated_at: now,
        };
        write(&self.tables).moments.push(moment.clone());
        Ok(moment)
    }

    async fn update(&self, id: &MomentId, update: &MomentUpdate) -> Result<()> {
        self.enter("update")?;
        let mut tables = write(&self.tables);
        let moment = tables
            .moments
            .iter_mut()
            .find(|m| &m.id == id)
            .ok_or_else(|| Error::NotFound(format!("moment {id}")))?;
        update.apply_to(moment, Utc::now());
        Ok(())
    }

    async fn delete(&self, id: &MomentId) -> Result<()> {
        self.enter("delete")?;
        let mut tables = write(&self.tables);
        let before = tables.moments.len();
        tables.moments.retain(|m| &m.id != id);
        if tables.moments.len() == before {
            return Err(Error::NotFound(format!("moment {id}")));
        }
        Ok(())
    }

    async fn delete_image(&self, id: &MomentId, index: usize) -> Result<()> {
        self.enter("delete_image")?;
        let mut tables = write(&self.tables);
        let moment = tables
            .moments
            .iter_mut()
            .find(|m| &m.id == id)
            .ok_or_else(|| Error::NotFound(format!("moment {id}")))?;
        if index >= moment.images.len() {
            return Err(Error::InvalidInput(format!(
                "image index {index} out of range for {} images",
                moment.images.len()
            )));
        }
        moment.images.remove(index);
        if index < moment.image_tokens.len() {
            moment.image_tokens.remove(index);
        }
        moment.updated_at = Utc::now();
        Ok(())
    }
}
