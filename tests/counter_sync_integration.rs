//! Integration tests for optimistic counter synchronization.
//!
//! Tests the like/comment/repost state machine against the in-memory store:
//! - Optimistic apply then compensation on remote failure
//! - Existence checks (`AlreadyExists` / `NotFound`)
//! - Per-(moment, counter) in-flight rejection
//! - Compensation when an in-flight action is dropped
//! - Mirror/remote agreement over random action sequences

// Integration tests use expect/unwrap for simplicity - panics are acceptable in tests
#![allow(clippy::expect_used, clippy::unwrap_used)]

use chrono::{NaiveDate, Utc};
use moment_engine::models::{
    CounterKind, CounterState, EngagementCounters, InteractionFlags, Moment, MomentId, UserId,
};
use moment_engine::storage::{EngagementBackend, FaultKind, InMemorySocialStore};
use moment_engine::{CounterSynchronizer, Error};
use proptest::prelude::*;
use std::sync::Arc;
use std::time::Duration;

fn moment(id: &str, likes: u64) -> Moment {
    Moment {
        id: MomentId::new(id),
        author_id: UserId::new("author"),
        author: None,
        title: "sunset".to_string(),
        content: String::new(),
        date: NaiveDate::from_ymd_opt(2026, 6, 1).unwrap(),
        images: Vec::new(),
        image_tokens: Vec::new(),
        tags: Vec::new(),
        counters: EngagementCounters {
            like_count: likes,
            ..EngagementCounters::default()
        },
        created_at: Utc::now(),
        updated_at: Utc::now(),
    }
}

/// Store with one moment `m` and a synchronizer seeded from it.
fn setup(likes: u64) -> (Arc<InMemorySocialStore>, Arc<CounterSynchronizer>, MomentId) {
    let store = Arc::new(InMemorySocialStore::new());
    let m = moment("m", likes);
    let id = m.id.clone();
    let counters = m.counters;
    store.add_moment(m);

    let sync = Arc::new(CounterSynchronizer::new(store.clone()));
    sync.seed(&id, counters, InteractionFlags::default());
    (store, sync, id)
}

fn remote_likes(store: &InMemorySocialStore, id: &MomentId) -> u64 {
    store.moment(id).unwrap().counters.like_count
}

// ============================================================================
// Compensation
// ============================================================================

#[tokio::test]
async fn test_failed_like_restores_exact_prior_value() {
    let (store, sync, m) = setup(0);
    store.fail_operation("increment", FaultKind::Unavailable);

    let err = sync.like(&UserId::new("me"), &m).await.unwrap_err();

    assert!(matches!(err, Error::RemoteUnavailable { .. }));
    assert!(err.is_retryable());
    assert_eq!(sync.counters(&m).like_count, 0);
    assert!(!sync.flags(&m).liked);
    assert_eq!(sync.state(&m, CounterKind::Like), CounterState::Idle);
    // The like row written before the counter RPC was removed again.
    assert_eq!(store.like_count(), 0);
}

#[tokio::test]
async fn test_query_error_also_compensates() {
    let (store, sync, m) = setup(7);
    store.fail_operation("increment", FaultKind::Query);

    let err = sync
        .comment(&UserId::new("me"), &m, "nice")
        .await
        .unwrap_err();

    assert!(matches!(err, Error::RemoteQuery { .. }));
    assert_eq!(sync.counters(&m).comment_count, 0);
    assert_eq!(sync.counters(&m).like_count, 7);
    store.clear_faults();
    assert!(store.list_comments(&m).await.unwrap().is_empty());
}

#[tokio::test]
async fn test_successful_like_and_unlike_track_remote() {
    let (store, sync, m) = setup(3);
    let me = UserId::new("me");

    sync.like(&me, &m).await.unwrap();
    assert_eq!(sync.counters(&m).like_count, 4);
    assert!(sync.flags(&m).liked);
    assert_eq!(remote_likes(&store, &m), 4);

    sync.unlike(&me, &m).await.unwrap();
    assert_eq!(sync.counters(&m).like_count, 3);
    assert!(!sync.flags(&m).liked);
    assert_eq!(remote_likes(&store, &m), 3);
}

#[tokio::test]
async fn test_events_show_optimistic_value_then_settle() {
    let (_store, sync, m) = setup(0);
    let mut events = sync.subscribe();

    sync.like(&UserId::new("me"), &m).await.unwrap();

    let pending = events.recv().await.unwrap();
    assert_eq!(pending.state, CounterState::PendingIncrement);
    assert_eq!(pending.value, 1);
    let settled = events.recv().await.unwrap();
    assert_eq!(settled.state, CounterState::Idle);
    assert_eq!(settled.value, 1);
    assert_eq!(settled.flag, Some(true));
}

// ============================================================================
// Existence checks
// ============================================================================

#[tokio::test]
async fn test_duplicate_like_is_rejected_and_reverted() {
    let (store, sync, m) = setup(0);
    let me = UserId::new("me");
    sync.like(&me, &m).await.unwrap();

    let err = sync.like(&me, &m).await.unwrap_err();

    assert!(matches!(err, Error::AlreadyExists(_)));
    assert!(!err.is_retryable());
    assert_eq!(sync.counters(&m).like_count, 1);
    assert_eq!(store.like_count(), 1);
    assert_eq!(remote_likes(&store, &m), 1);
}

#[tokio::test]
async fn test_redundant_unrepost_is_not_found() {
    let (store, sync, m) = setup(0);

    let err = sync.unrepost(&UserId::new("me"), &m).await.unwrap_err();

    assert!(matches!(err, Error::NotFound(_)));
    assert_eq!(sync.counters(&m).repost_count, 0);
    assert_eq!(store.calls_to("decrement"), 0);
}

#[tokio::test]
async fn test_repost_keeps_quote_text() {
    let (store, sync, m) = setup(0);
    let me = UserId::new("me");

    let repost = sync.repost(&me, &m, Some("look at this")).await.unwrap();

    assert_eq!(repost.content.as_deref(), Some("look at this"));
    assert!(sync.flags(&m).reposted);
    let listed = store.list_reposts(&m).await.unwrap();
    assert_eq!(listed.len(), 1);
    assert_eq!(listed[0].id, repost.id);
}

#[tokio::test]
async fn test_comment_then_delete_then_delete_again() {
    let (_store, sync, m) = setup(0);
    let me = UserId::new("me");

    let comment = sync.comment(&me, &m, "first").await.unwrap();
    assert_eq!(sync.counters(&m).comment_count, 1);

    sync.delete_comment(&me, &comment.id, &m).await.unwrap();
    assert_eq!(sync.counters(&m).comment_count, 0);

    let err = sync
        .delete_comment(&me, &comment.id, &m)
        .await
        .unwrap_err();
    assert!(matches!(err, Error::NotFound(_)));
    assert_eq!(sync.counters(&m).comment_count, 0);
}

#[tokio::test]
async fn test_only_the_author_can_delete_a_comment() {
    let (_store, sync, m) = setup(0);
    let comment = sync.comment(&UserId::new("me"), &m, "mine").await.unwrap();

    let err = sync
        .delete_comment(&UserId::new("someone-else"), &comment.id, &m)
        .await
        .unwrap_err();

    assert!(matches!(err, Error::NotFound(_)));
    assert_eq!(sync.counters(&m).comment_count, 1);
}

#[tokio::test]
async fn test_delete_comment_under_wrong_moment_changes_nothing() {
    let (store, sync, m) = setup(0);
    let other = moment("other", 0);
    let other_id = other.id.clone();
    store.add_moment(other);
    sync.seed(
        &other_id,
        EngagementCounters {
            comment_count: 2,
            ..EngagementCounters::default()
        },
        InteractionFlags::default(),
    );
    let me = UserId::new("me");
    let comment = sync.comment(&me, &m, "on m").await.unwrap();

    let err = sync
        .delete_comment(&me, &comment.id, &other_id)
        .await
        .unwrap_err();

    assert!(matches!(err, Error::NotFound(_)));
    assert_eq!(sync.counters(&other_id).comment_count, 2);
    assert_eq!(sync.counters(&m).comment_count, 1);
    assert_eq!(store.moment(&m).unwrap().counters.comment_count, 1);
    assert_eq!(store.list_comments(&m).await.unwrap().len(), 1);
    assert_eq!(store.calls_to("decrement"), 0);
}

// ============================================================================
// Concurrency
// ============================================================================

#[tokio::test]
async fn test_second_action_on_pending_pair_is_rejected() {
    let (store, sync, m) = setup(0);
    let latch = store.hold_counter_calls();

    let first = {
        let sync = Arc::clone(&sync);
        let m = m.clone();
        tokio::spawn(async move { sync.like(&UserId::new("me"), &m).await })
    };
    while sync.state(&m, CounterKind::Like) != CounterState::PendingIncrement {
        tokio::task::yield_now().await;
    }

    let err = sync.unlike(&UserId::new("me"), &m).await.unwrap_err();
    assert!(matches!(err, Error::ActionInProgress { kind: CounterKind::Like, .. }));
    assert!(err.is_retryable());
    // Only the first optimistic delta is applied.
    assert_eq!(sync.counters(&m).like_count, 1);

    latch.notify_one();
    first.await.unwrap().unwrap();
    store.release_counter_calls();

    assert_eq!(sync.state(&m, CounterKind::Like), CounterState::Idle);
    assert_eq!(sync.counters(&m).like_count, 1);
    assert_eq!(remote_likes(&store, &m), 1);
}

#[tokio::test]
async fn test_different_counters_on_one_moment_run_independently() {
    let (store, sync, m) = setup(0);
    let latch = store.hold_counter_calls();

    let like = {
        let sync = Arc::clone(&sync);
        let m = m.clone();
        tokio::spawn(async move { sync.like(&UserId::new("me"), &m).await })
    };
    while sync.state(&m, CounterKind::Like) != CounterState::PendingIncrement {
        tokio::task::yield_now().await;
    }

    let comment = {
        let sync = Arc::clone(&sync);
        let m = m.clone();
        tokio::spawn(async move { sync.comment(&UserId::new("me"), &m, "hi").await })
    };
    while sync.state(&m, CounterKind::Comment) != CounterState::PendingIncrement {
        tokio::task::yield_now().await;
    }

    latch.notify_one();
    latch.notify_one();
    like.await.unwrap().unwrap();
    comment.await.unwrap().unwrap();
    store.release_counter_calls();

    assert_eq!(
        sync.counters(&m),
        EngagementCounters {
            like_count: 1,
            comment_count: 1,
            repost_count: 0,
        }
    );
}

#[tokio::test]
async fn test_dropped_action_compensates() {
    let (store, sync, m) = setup(5);
    let _latch = store.hold_counter_calls();

    let outcome =
        tokio::time::timeout(Duration::from_millis(20), sync.like(&UserId::new("me"), &m)).await;

    assert!(outcome.is_err());
    assert_eq!(sync.counters(&m).like_count, 5);
    assert_eq!(sync.state(&m, CounterKind::Like), CounterState::Idle);
}

// ============================================================================
// Properties
// ============================================================================

proptest! {
    /// Property: after every action the mirror either equals the remote
    /// counter (success) or its own prior value (failure); it never drops
    /// below zero.
    #[test]
    fn prop_mirror_tracks_remote_or_reverts(
        actions in prop::collection::vec((any::<bool>(), any::<bool>()), 1..25),
    ) {
        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_time()
            .build()
            .unwrap();
        let (store, sync, m) = setup(0);
        let me = UserId::new("me");

        for (like, fail) in actions {
            store.clear_faults();
            if fail {
                store.fail_operation("increment", FaultKind::Unavailable);
                store.fail_operation("decrement", FaultKind::Unavailable);
            }
            let before = sync.counters(&m).like_count;
            let result = runtime.block_on(async {
                if like {
                    sync.like(&me, &m).await
                } else {
                    sync.unlike(&me, &m).await
                }
            });
            let after = sync.counters(&m).like_count;

            match result {
                Ok(()) => prop_assert_eq!(after, remote_likes(&store, &m)),
                Err(_) => prop_assert_eq!(after, before),
            }
            prop_assert_eq!(sync.state(&m, CounterKind::Like), CounterState::Idle);
        }
    }
}
