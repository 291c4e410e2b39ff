//! Integration tests for the following feed session.
//!
//! Tests interaction-flag resolution, single-flight fetching, engagement
//! actions reflected in the rendered view, follow/unfollow, and restoring
//! the persisted feed in a new session.

// Integration tests use expect/unwrap for simplicity - panics are acceptable in tests
#![allow(clippy::expect_used, clippy::unwrap_used)]

use async_trait::async_trait;
use chrono::{Duration, NaiveDate, Utc};
use moment_engine::models::{
    EngagementCounters, FeedEntry, FollowingSnapshot, Moment, MomentId, Profile, UserId,
};
use moment_engine::services::{FOLLOWING_SNAPSHOT_KEY, SessionAdapters};
use moment_engine::storage::{
    ConnectivityFlag, EngagementBackend, FaultKind, IdentityProvider, InMemoryKeyValueStore,
    InMemorySocialStore, KeyValueStore, StaticIdentity,
};
use moment_engine::{Error, FeedSession, FetchOutcome, Result, SnapshotCache};
use std::sync::Arc;
use tokio::sync::Notify;

fn moment(id: &str, author: &str, minutes_ago: i64, likes: u64) -> Moment {
    let at = Utc::now() - Duration::minutes(minutes_ago);
    Moment {
        id: MomentId::new(id),
        author_id: UserId::new(author),
        author: None,
        title: id.to_string(),
        content: String::new(),
        date: NaiveDate::from_ymd_opt(2026, 8, 1).unwrap(),
        images: Vec::new(),
        image_tokens: Vec::new(),
        tags: Vec::new(),
        counters: EngagementCounters {
            like_count: likes,
            ..EngagementCounters::default()
        },
        created_at: at,
        updated_at: at,
    }
}

/// me follows alice and bob; carol is not followed.
fn social_store() -> Arc<InMemorySocialStore> {
    let store = Arc::new(InMemorySocialStore::new());
    let base = Utc::now() - Duration::days(1);
    for (i, name) in ["me", "alice", "bob", "carol"].iter().enumerate() {
        let at = base + Duration::minutes(i64::try_from(i).unwrap());
        store.add_profile(Profile::new(*name, at).with_username(*name));
    }
    store.add_follow("me", "alice");
    store.add_follow("me", "bob");
    store.add_moment(moment("m-alice", "alice", 30, 0));
    store.add_moment(moment("m-bob", "bob", 10, 4));
    store.add_moment(moment("m-carol", "carol", 5, 1));
    store
}

fn adapters(store: &Arc<InMemorySocialStore>, identity: Arc<dyn IdentityProvider>) -> SessionAdapters {
    SessionAdapters {
        identity,
        connectivity: Arc::new(ConnectivityFlag::default()),
        graph: store.clone(),
        engagement: store.clone(),
        moments: store.clone(),
    }
}

fn session(store: &Arc<InMemorySocialStore>, kv: &Arc<dyn KeyValueStore>) -> FeedSession {
    FeedSession::new(
        adapters(store, Arc::new(StaticIdentity::signed_in("me"))),
        SnapshotCache::new(Arc::clone(kv), FOLLOWING_SNAPSHOT_KEY),
    )
}

fn offline_session(
    store: &Arc<InMemorySocialStore>,
    kv: &Arc<dyn KeyValueStore>,
    online: &Arc<ConnectivityFlag>,
) -> FeedSession {
    FeedSession::new(
        SessionAdapters {
            connectivity: online.clone(),
            ..adapters(store, Arc::new(StaticIdentity::signed_in("me")))
        },
        SnapshotCache::new(Arc::clone(kv), FOLLOWING_SNAPSHOT_KEY),
    )
}

fn kv() -> Arc<dyn KeyValueStore> {
    Arc::new(InMemoryKeyValueStore::new())
}

fn entry<'a>(view: &'a [FeedEntry], id: &str) -> &'a FeedEntry {
    view.iter().find(|e| e.moment.id.as_str() == id).unwrap()
}

// ============================================================================
// Fetching
// ============================================================================

#[tokio::test]
async fn test_fetch_resolves_flags_per_moment() {
    let store = social_store();
    store
        .insert_like(&UserId::new("me"), &MomentId::new("m-bob"))
        .await
        .unwrap();
    let session = session(&store, &kv());

    let outcome = session.fetch_following_moments(false).await.unwrap();

    assert_eq!(outcome, FetchOutcome::Fetched { count: 2 });
    let view = session.view();
    let order: Vec<&str> = view.iter().map(|e| e.moment.id.as_str()).collect();
    assert_eq!(order, vec!["m-bob", "m-alice"]);
    assert!(entry(&view, "m-bob").liked());
    assert!(!entry(&view, "m-alice").liked());
    assert!(!entry(&view, "m-bob").reposted());
    assert_eq!(
        entry(&view, "m-bob").moment.author.as_ref().unwrap().username.as_deref(),
        Some("bob")
    );
}

#[tokio::test]
async fn test_flag_lookup_failure_degrades_to_false() {
    let store = social_store();
    store
        .insert_like(&UserId::new("me"), &MomentId::new("m-bob"))
        .await
        .unwrap();
    store.fail_operation("has_like", FaultKind::Unavailable);
    let session = session(&store, &kv());

    session.fetch_following_moments(false).await.unwrap();

    assert!(!entry(&session.view(), "m-bob").liked());
    assert!(!session.has_like(&MomentId::new("m-bob")).await);
}

#[tokio::test]
async fn test_second_fetch_without_force_is_served_from_memory() {
    let store = social_store();
    let session = session(&store, &kv());
    session.fetch_following_moments(false).await.unwrap();
    let calls = store.call_count();

    assert_eq!(
        session.fetch_following_moments(false).await.unwrap(),
        FetchOutcome::Cached
    );
    assert_eq!(store.call_count(), calls);
}

#[tokio::test]
async fn test_offline_forced_fetch_serves_held_feed() {
    let store = social_store();
    let online = Arc::new(ConnectivityFlag::new(true));
    let session = offline_session(&store, &kv(), &online);
    session.fetch_following_moments(false).await.unwrap();
    online.set_online(false);
    let calls = store.call_count();

    assert_eq!(
        session.fetch_following_moments(true).await.unwrap(),
        FetchOutcome::Offline
    );
    assert_eq!(store.call_count(), calls);
    assert_eq!(session.view().len(), 2);
}

#[tokio::test]
async fn test_offline_fetch_restores_persisted_feed() {
    let store = social_store();
    let device = kv();
    let online = Arc::new(ConnectivityFlag::new(true));
    offline_session(&store, &device, &online)
        .fetch_following_moments(false)
        .await
        .unwrap();
    online.set_online(false);
    let calls = store.call_count();

    let session = offline_session(&store, &device, &online);
    assert_eq!(
        session.fetch_following_moments(true).await.unwrap(),
        FetchOutcome::Offline
    );
    assert_eq!(store.call_count(), calls);
    assert_eq!(session.view().len(), 2);
}

#[tokio::test]
async fn test_offline_without_feed_still_tries() {
    let store = social_store();
    let online = Arc::new(ConnectivityFlag::new(false));
    let session = offline_session(&store, &kv(), &online);

    assert_eq!(
        session.fetch_following_moments(false).await.unwrap(),
        FetchOutcome::Fetched { count: 2 }
    );
}

#[tokio::test]
async fn test_failed_fetch_leaves_feed_untouched() {
    let store = social_store();
    let session = session(&store, &kv());
    session.fetch_following_moments(false).await.unwrap();
    store.fail_operation("list_by_authors", FaultKind::Unavailable);

    assert!(session.fetch_following_moments(true).await.is_err());
    assert_eq!(session.view().len(), 2);
}

/// Identity provider that answers only once released.
struct GatedIdentity {
    gate: Notify,
}

#[async_trait]
impl IdentityProvider for GatedIdentity {
    async fn current_user(&self) -> Result<Option<UserId>> {
        self.gate.notified().await;
        Ok(Some(UserId::new("me")))
    }
}

#[tokio::test]
async fn test_concurrent_fetch_is_a_no_op() {
    let store = social_store();
    let identity = Arc::new(GatedIdentity { gate: Notify::new() });
    let session = Arc::new(FeedSession::new(
        adapters(&store, identity.clone()),
        SnapshotCache::new(kv(), FOLLOWING_SNAPSHOT_KEY),
    ));

    let first = {
        let session = Arc::clone(&session);
        tokio::spawn(async move { session.fetch_following_moments(true).await })
    };
    while !session.is_loading_following() {
        tokio::task::yield_now().await;
    }

    let second = session.fetch_following_moments(true).await.unwrap();
    assert_eq!(second, FetchOutcome::InFlight);

    identity.gate.notify_one();
    assert_eq!(
        first.await.unwrap().unwrap(),
        FetchOutcome::Fetched { count: 2 }
    );
    assert_eq!(store.calls_to("followings_of"), 1);
    assert!(!session.is_loading_following());
}

#[tokio::test]
async fn test_unauthenticated_session() {
    let store = social_store();
    let session = FeedSession::new(
        adapters(&store, Arc::new(StaticIdentity::anonymous())),
        SnapshotCache::new(kv(), FOLLOWING_SNAPSHOT_KEY),
    );
    assert!(matches!(
        session.fetch_following_moments(false).await,
        Err(Error::Unauthenticated)
    ));
    assert!(matches!(
        session.like(&MomentId::new("m-bob")).await,
        Err(Error::Unauthenticated)
    ));
}

// ============================================================================
// Engagement through the session
// ============================================================================

#[tokio::test]
async fn test_like_updates_view_and_snapshot() {
    let store = social_store();
    let device = kv();
    let session = session(&store, &device);
    session.fetch_following_moments(false).await.unwrap();

    session.like(&MomentId::new("m-bob")).await.unwrap();

    let view = session.view();
    assert!(entry(&view, "m-bob").liked());
    assert_eq!(entry(&view, "m-bob").moment.counters.like_count, 5);

    let cache: SnapshotCache<FollowingSnapshot> =
        SnapshotCache::new(Arc::clone(&device), FOLLOWING_SNAPSHOT_KEY);
    let persisted = cache.load().await;
    assert!(entry(&persisted.entries, "m-bob").liked());
}

#[tokio::test]
async fn test_failed_like_reverts_view() {
    let store = social_store();
    let session = session(&store, &kv());
    session.fetch_following_moments(false).await.unwrap();
    store.fail_operation("increment", FaultKind::Unavailable);

    assert!(session.like(&MomentId::new("m-alice")).await.is_err());

    let view = session.view();
    assert!(!entry(&view, "m-alice").liked());
    assert_eq!(entry(&view, "m-alice").moment.counters.like_count, 0);
}

#[tokio::test]
async fn test_comment_and_repost_passthroughs() {
    let store = social_store();
    let session = session(&store, &kv());
    session.fetch_following_moments(false).await.unwrap();
    let m = MomentId::new("m-alice");

    let comment = session.comment(&m, "lovely").await.unwrap();
    session.repost(&m, None).await.unwrap();

    assert_eq!(session.comments(&m).await.unwrap()[0].id, comment.id);
    assert_eq!(session.reposts(&m).await.unwrap().len(), 1);
    let view = session.view();
    assert_eq!(entry(&view, "m-alice").moment.counters.comment_count, 1);
    assert!(entry(&view, "m-alice").reposted());

    session.delete_comment(&comment.id, &m).await.unwrap();
    session.unrepost(&m).await.unwrap();
    let view = session.view();
    assert_eq!(entry(&view, "m-alice").moment.counters.comment_count, 0);
    assert!(!entry(&view, "m-alice").reposted());
    assert!(session.likes(&m).await.unwrap().is_empty());
}

// ============================================================================
// Follow graph
// ============================================================================

#[tokio::test]
async fn test_follow_refreshes_feed_and_prunes_suggestions() {
    let store = social_store();
    let session = session(&store, &kv());
    session.fetch_following_moments(false).await.unwrap();
    session.refresh_recommendations(5).await.unwrap();
    assert!(
        session
            .recommendations()
            .iter()
            .any(|c| c.user_id.as_str() == "carol")
    );

    session.follow(&UserId::new("carol")).await.unwrap();

    assert!(session.is_following(&UserId::new("carol")).await);
    assert!(
        session
            .recommendations()
            .iter()
            .all(|c| c.user_id.as_str() != "carol")
    );
    let view = session.view();
    assert_eq!(view.len(), 3);
    assert_eq!(view[0].moment.id.as_str(), "m-carol");
    assert_eq!(store.profile(&UserId::new("carol")).unwrap().follower_count, 1);
    assert_eq!(store.profile(&UserId::new("me")).unwrap().following_count, 3);

    let err = session.follow(&UserId::new("carol")).await.unwrap_err();
    assert!(matches!(err, Error::AlreadyExists(_)));
}

#[tokio::test]
async fn test_self_follow_rejected_without_remote_call() {
    let store = social_store();
    let session = session(&store, &kv());
    let calls = store.call_count();

    let err = session.follow(&UserId::new("me")).await.unwrap_err();

    assert!(matches!(err, Error::InvalidInput(_)));
    assert_eq!(store.call_count(), calls);
}

#[tokio::test]
async fn test_unfollow_drops_author_moments() {
    let store = social_store();
    let session = session(&store, &kv());
    session.fetch_following_moments(false).await.unwrap();

    session.unfollow(&UserId::new("alice")).await.unwrap();

    let view = session.view();
    assert_eq!(view.len(), 1);
    assert_eq!(view[0].moment.author_id.as_str(), "bob");
    assert_eq!(store.profile(&UserId::new("alice")).unwrap().follower_count, 0);
    assert!(!session.is_following(&UserId::new("alice")).await);

    let err = session.unfollow(&UserId::new("alice")).await.unwrap_err();
    assert!(matches!(err, Error::NotFound(_)));
}

#[tokio::test]
async fn test_follow_counter_failure_rolls_back_edge() {
    let store = social_store();
    let session = session(&store, &kv());
    store.fail_operation("increment", FaultKind::Unavailable);

    assert!(session.follow(&UserId::new("carol")).await.is_err());

    store.clear_faults();
    assert!(!session.is_following(&UserId::new("carol")).await);
}

#[tokio::test]
async fn test_follower_counter_failure_reverts_following_count() {
    let store = social_store();
    let session = session(&store, &kv());
    let me = UserId::new("me");
    let before = store.profile(&me).unwrap().following_count;

    // No profile row, so the follower counter RPC fails after the
    // following counter was already bumped.
    let err = session.follow(&UserId::new("ghost")).await.unwrap_err();

    assert!(matches!(err, Error::RemoteQuery { .. }));
    assert_eq!(store.profile(&me).unwrap().following_count, before);
    assert!(!session.is_following(&UserId::new("ghost")).await);
}

#[tokio::test]
async fn test_unfollow_counter_failure_reverts_following_count() {
    let store = social_store();
    store.add_follow("me", "ghost");
    let session = session(&store, &kv());
    let me = UserId::new("me");
    let before = store.profile(&me).unwrap().following_count;

    let err = session.unfollow(&UserId::new("ghost")).await.unwrap_err();

    assert!(matches!(err, Error::RemoteQuery { .. }));
    assert_eq!(store.profile(&me).unwrap().following_count, before);
    assert!(session.is_following(&UserId::new("ghost")).await);
}

// ============================================================================
// Restore
// ============================================================================

#[tokio::test]
async fn test_new_session_restores_persisted_feed() {
    let store = social_store();
    let device = kv();
    {
        let first = session(&store, &device);
        first.fetch_following_moments(false).await.unwrap();
        first.like(&MomentId::new("m-alice")).await.unwrap();
    }
    let calls = store.call_count();

    let second = session(&store, &device);
    assert_eq!(second.restore().await, 2);
    assert_eq!(
        second.fetch_following_moments(false).await.unwrap(),
        FetchOutcome::Cached
    );
    assert_eq!(store.call_count(), calls);

    let view = second.view();
    assert!(entry(&view, "m-alice").liked());
    assert_eq!(entry(&view, "m-alice").moment.counters.like_count, 1);
}

#[tokio::test]
async fn test_reset_forgets_everything() {
    let store = social_store();
    let device = kv();
    let session = session(&store, &device);
    session.fetch_following_moments(false).await.unwrap();

    session.reset().await;

    assert!(!session.has_following_moments());
    assert!(device.get(FOLLOWING_SNAPSHOT_KEY).await.unwrap().is_none());
}
