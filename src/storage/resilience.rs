//! Remote adapter resilience: per-call timeouts and circuit breaking.
//!
//! Wraps graph, engagement and moment adapters so a hung or failing backend
//! surfaces as [`Error::RemoteUnavailable`] quickly instead of stalling the
//! session. Nothing here retries; retry policy belongs to the caller.
//!
//! # Circuit Breaker States
//!
//! ```text
//! +--------+     failures >= threshold     +------+
//! | Closed | --------------------------->  | Open |
//! +--------+                               +------+
//!     ^                                        |
//!     |  success                               | timeout elapsed
//!     |                                        v
//!     +--------------------------------  +-----------+
//!                                        | Half-Open |
//!                                        +-----------+
//! ```
//!
//! By default only [`Error::RemoteUnavailable`] (including timeouts) counts
//! as a breaker failure; query errors and existence violations mean the
//! backend answered. [`RemoteGuard::with_classifier`] swaps that rule.
//!
//! # Usage
//!
//! ```rust,ignore
//! use moment_engine::config::RemoteConfig;
//! use moment_engine::storage::{InMemorySocialStore, ResilientGraphAccess};
//! use std::sync::Arc;
//!
//! let store = Arc::new(InMemorySocialStore::new());
//! let graph = ResilientGraphAccess::new(store, &RemoteConfig::default(), "graph");
//! ```

use crate::config::RemoteConfig;
use crate::models::{
    Comment, CommentId, CounterKind, DateRange, Like, Moment, MomentId, MomentUpdate, NewMoment,
    Profile, Repost, UserId,
};
use crate::storage::traits::{EngagementBackend, GraphAccess, MomentSource};
use crate::{Error, Result};
use async_trait::async_trait;
use std::future::Future;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::{Duration, Instant};

/// Circuit breaker state machine.
#[derive(Debug)]
enum BreakerState {
    Closed { failures: u32 },
    Open { opened_at: Instant },
    HalfOpen { trials: u32 },
}

/// Decides which errors mean the adapter could not be reached.
pub type FailureClassifier = fn(&Error) -> bool;

/// The default classifier: only [`Error::RemoteUnavailable`] is a failure.
#[must_use]
pub const fn unreachable_only(error: &Error) -> bool {
    matches!(error, Error::RemoteUnavailable { .. })
}

/// How the breaker judged one finished call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verdict {
    /// The call succeeded.
    Success,
    /// The adapter answered with an error that does not count against it.
    Answered,
    /// The adapter was unreachable; the circuit stays as it was.
    Failure,
    /// The adapter was unreachable and the circuit just opened.
    Tripped,
}

impl Verdict {
    /// The `status` label recorded for the call.
    #[must_use]
    pub const fn status(self) -> &'static str {
        match self {
            Self::Success => "success",
            Self::Answered => "error",
            Self::Failure | Self::Tripped => "unavailable",
        }
    }
}

/// Circuit breaker for one remote adapter.
///
/// Admission and bookkeeping are split: [`Self::admit`] gates a call before
/// it starts, [`Self::observe`] classifies its result afterwards.
#[derive(Debug)]
pub struct CircuitBreaker {
    state: BreakerState,
    failure_threshold: u32,
    reset_timeout: Duration,
    trial_calls: u32,
    classify: FailureClassifier,
    adapter: &'static str,
}

impl CircuitBreaker {
    /// Creates a breaker that only counts unreachable-adapter errors.
    #[must_use]
    pub fn new(config: &RemoteConfig, adapter: &'static str) -> Self {
        Self::with_classifier(config, adapter, unreachable_only)
    }

    /// Creates a breaker that counts the errors `classify` accepts.
    #[must_use]
    pub fn with_classifier(
        config: &RemoteConfig,
        adapter: &'static str,
        classify: FailureClassifier,
    ) -> Self {
        Self {
            state: BreakerState::Closed { failures: 0 },
            failure_threshold: config.breaker_failure_threshold.max(1),
            reset_timeout: Duration::from_millis(config.breaker_reset_timeout_ms),
            trial_calls: config.breaker_half_open_max_calls.max(1),
            classify,
            adapter,
        }
    }

    /// Lets `operation` through, or fails it fast while the circuit is open.
    ///
    /// After the reset timeout the circuit turns half-open and admits up to
    /// `breaker_half_open_max_calls` trial calls.
    ///
    /// # Errors
    ///
    /// [`Error::RemoteUnavailable`] when the call is not admitted.
    pub fn admit(&mut self, operation: &str) -> Result<()> {
        let admitted = match self.state {
            BreakerState::Closed { .. } => true,
            BreakerState::Open { opened_at } if opened_at.elapsed() >= self.reset_timeout => {
                tracing::info!(adapter = self.adapter, "Circuit breaker half-open");
                self.state = BreakerState::HalfOpen { trials: 1 };
                true
            },
            BreakerState::Open { .. } => false,
            BreakerState::HalfOpen { ref mut trials } if *trials < self.trial_calls => {
                *trials += 1;
                true
            },
            BreakerState::HalfOpen { .. } => false,
        };
        if admitted {
            Ok(())
        } else {
            Err(Error::unavailable(
                operation,
                format!("circuit breaker open for adapter '{}'", self.adapter),
            ))
        }
    }

    /// Records the result of an admitted call.
    pub fn observe<T>(&mut self, result: &Result<T>) -> Verdict {
        let failed = match result {
            Ok(_) => None,
            Err(e) => Some((self.classify)(e)),
        };
        match failed {
            None | Some(false) => {
                if !matches!(self.state, BreakerState::Closed { failures: 0 }) {
                    tracing::info!(adapter = self.adapter, "Circuit breaker closed");
                }
                self.state = BreakerState::Closed { failures: 0 };
                if failed.is_none() {
                    Verdict::Success
                } else {
                    Verdict::Answered
                }
            },
            Some(true) => self.record_failure(),
        }
    }

    fn record_failure(&mut self) -> Verdict {
        let failures = match self.state {
            BreakerState::Closed { failures } => failures + 1,
            // A failed trial reopens at once.
            BreakerState::HalfOpen { .. } => self.failure_threshold,
            BreakerState::Open { .. } => return Verdict::Failure,
        };
        if failures < self.failure_threshold {
            self.state = BreakerState::Closed { failures };
            return Verdict::Failure;
        }
        tracing::warn!(
            adapter = self.adapter,
            failures,
            threshold = self.failure_threshold,
            "Circuit breaker opened"
        );
        self.state = BreakerState::Open {
            opened_at: Instant::now(),
        };
        Verdict::Tripped
    }

    /// Returns the current state as a numeric value for metrics.
    ///
    /// - 0: Closed
    /// - 1: Open
    /// - 2: Half-Open
    #[must_use]
    pub const fn state_value(&self) -> u8 {
        match self.state {
            BreakerState::Closed { .. } => 0,
            BreakerState::Open { .. } => 1,
            BreakerState::HalfOpen { .. } => 2,
        }
    }
}

/// Timeout plus circuit breaker shared by the resilient wrappers.
#[derive(Debug)]
pub struct RemoteGuard {
    breaker: Mutex<CircuitBreaker>,
    timeout: Duration,
    adapter: &'static str,
}

impl RemoteGuard {
    /// Creates a guard for `adapter` with the default failure classifier.
    #[must_use]
    pub fn new(config: &RemoteConfig, adapter: &'static str) -> Self {
        Self::with_classifier(config, adapter, unreachable_only)
    }

    /// Creates a guard whose breaker counts the errors `classify` accepts.
    ///
    /// Timeouts surface as [`Error::RemoteUnavailable`] and are judged by
    /// `classify` like any other error.
    #[must_use]
    pub fn with_classifier(
        config: &RemoteConfig,
        adapter: &'static str,
        classify: FailureClassifier,
    ) -> Self {
        Self {
            breaker: Mutex::new(CircuitBreaker::with_classifier(config, adapter, classify)),
            timeout: Duration::from_millis(config.timeout_ms.max(1)),
            adapter,
        }
    }

    /// Returns the breaker state (see [`CircuitBreaker::state_value`]).
    #[must_use]
    pub fn state_value(&self) -> u8 {
        self.lock().state_value()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, CircuitBreaker> {
        self.breaker.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Runs `call` under the breaker and timeout.
    ///
    /// # Errors
    ///
    /// Returns [`Error::RemoteUnavailable`] when the circuit is open or the
    /// call times out, otherwise whatever `call` returns.
    pub async fn call<T, F>(&self, operation: &'static str, call: F) -> Result<T>
    where
        F: Future<Output = Result<T>> + Send,
    {
        let admitted = {
            let mut breaker = self.lock();
            breaker.admit(operation).map_err(|e| (e, breaker.state_value()))
        };
        if let Err((e, state)) = admitted {
            self.record_metrics(operation, "circuit_open", state);
            return Err(e);
        }

        let result = tokio::time::timeout(self.timeout, call)
            .await
            .unwrap_or_else(|_| {
                Err(Error::unavailable(
                    operation,
                    format!("timed out after {}ms", self.timeout.as_millis()),
                ))
            });

        let (verdict, state) = {
            let mut breaker = self.lock();
            (breaker.observe(&result), breaker.state_value())
        };
        self.record_metrics(operation, verdict.status(), state);
        if verdict == Verdict::Tripped {
            metrics::counter!(
                "remote_circuit_breaker_trips_total",
                "adapter" => self.adapter,
                "operation" => operation
            )
            .increment(1);
        }
        result
    }

    fn record_metrics(&self, operation: &'static str, status: &'static str, state: u8) {
        metrics::counter!(
            "remote_requests_total",
            "adapter" => self.adapter,
            "operation" => operation,
            "status" => status
        )
        .increment(1);
        metrics::gauge!(
            "remote_circuit_breaker_state",
            "adapter" => self.adapter
        )
        .set(f64::from(state));
    }
}

// ============================================================================
// Resilient Graph Access
// ============================================================================

/// [`GraphAccess`] wrapper with timeout and circuit breaker protection.
pub struct ResilientGraphAccess<G: GraphAccess + ?Sized> {
    inner: Arc<G>,
    guard: RemoteGuard,
}

impl<G: GraphAccess + ?Sized> ResilientGraphAccess<G> {
    /// Wraps `inner`.
    #[must_use]
    pub fn new(inner: Arc<G>, config: &RemoteConfig, adapter: &'static str) -> Self {
        Self {
            inner,
            guard: RemoteGuard::new(config, adapter),
        }
    }

    /// Returns the guard protecting the adapter.
    #[must_use]
    pub const fn guard(&self) -> &RemoteGuard {
        &self.guard
    }
}

#[async_trait]
impl<G: GraphAccess + ?Sized> GraphAccess for ResilientGraphAccess<G> {
    async fn followings_of(&self, user: &UserId) -> Result<Vec<UserId>> {
        self.guard
            .call("followings_of", self.inner.followings_of(user))
            .await
    }

    async fn followers_of(&self, user: &UserId) -> Result<Vec<UserId>> {
        self.guard
            .call("followers_of", self.inner.followers_of(user))
            .await
    }

    async fn users_following(
        &self,
        targets: &[UserId],
        excluding: &UserId,
    ) -> Result<Vec<UserId>> {
        self.guard
            .call(
                "users_following",
                self.inner.users_following(targets, excluding),
            )
            .await
    }

    async fn recent_profiles(&self, excluding: &UserId, limit: usize) -> Result<Vec<Profile>> {
        self.guard
            .call("recent_profiles", self.inner.recent_profiles(excluding, limit))
            .await
    }

    async fn active_profiles(
        &self,
        excluding: &UserId,
        excluding_set: &[UserId],
        limit: usize,
    ) -> Result<Vec<Profile>> {
        self.guard
            .call(
                "active_profiles",
                self.inner.active_profiles(excluding, excluding_set, limit),
            )
            .await
    }

    async fn profiles(&self, ids: &[UserId]) -> Result<Vec<Profile>> {
        self.guard.call("profiles", self.inner.profiles(ids)).await
    }

    async fn has_follow(&self, follower: &UserId, following: &UserId) -> Result<bool> {
        self.guard
            .call("has_follow", self.inner.has_follow(follower, following))
            .await
    }

    async fn insert_follow(&self, follower: &UserId, following: &UserId) -> Result<()> {
        self.guard
            .call("insert_follow", self.inner.insert_follow(follower, following))
            .await
    }

    async fn delete_follow(&self, follower: &UserId, following: &UserId) -> Result<bool> {
        self.guard
            .call("delete_follow", self.inner.delete_follow(follower, following))
            .await
    }
}

// ============================================================================
// Resilient Engagement Backend
// ============================================================================

/// [`EngagementBackend`] wrapper with timeout and circuit breaker protection.
pub struct ResilientEngagementBackend<E: EngagementBackend + ?Sized> {
    inner: Arc<E>,
    guard: RemoteGuard,
}

impl<E: EngagementBackend + ?Sized> ResilientEngagementBackend<E> {
    /// Wraps `inner`.
    #[must_use]
    pub fn new(inner: Arc<E>, config: &RemoteConfig, adapter: &'static str) -> Self {
        Self {
            inner,
            guard: RemoteGuard::new(config, adapter),
        }
    }

    /// Returns the guard protecting the adapter.
    #[must_use]
    pub const fn guard(&self) -> &RemoteGuard {
        &self.guard
    }
}

#[async_trait]
impl<E: EngagementBackend + ?Sized> EngagementBackend for ResilientEngagementBackend<E> {
    async fn has_like(&self, user: &UserId, moment: &MomentId) -> Result<bool> {
        self.guard
            .call("has_like", self.inner.has_like(user, moment))
            .await
    }

    async fn insert_like(&self, user: &UserId, moment: &MomentId) -> Result<()> {
        self.guard
            .call("insert_like", self.inner.insert_like(user, moment))
            .await
    }

    async fn delete_like(&self, user: &UserId, moment: &MomentId) -> Result<bool> {
        self.guard
            .call("delete_like", self.inner.delete_like(user, moment))
            .await
    }

    async fn list_likes(&self, moment: &MomentId) -> Result<Vec<Like>> {
        self.guard
            .call("list_likes", self.inner.list_likes(moment))
            .await
    }

    async fn has_repost(&self, user: &UserId, moment: &MomentId) -> Result<bool> {
        self.guard
            .call("has_repost", self.inner.has_repost(user, moment))
            .await
    }

    async fn insert_repost(
        &self,
        user: &UserId,
        moment: &MomentId,
        content: Option<&str>,
    ) -> Result<Repost> {
        self.guard
            .call(
                "insert_repost",
                self.inner.insert_repost(user, moment, content),
            )
            .await
    }

    async fn delete_repost(&self, user: &UserId, moment: &MomentId) -> Result<bool> {
        self.guard
            .call("delete_repost", self.inner.delete_repost(user, moment))
            .await
    }

    async fn list_reposts(&self, moment: &MomentId) -> Result<Vec<Repost>> {
        self.guard
            .call("list_reposts", self.inner.list_reposts(moment))
            .await
    }

    async fn insert_comment(
        &self,
        user: &UserId,
        moment: &MomentId,
        content: &str,
    ) -> Result<Comment> {
        self.guard
            .call(
                "insert_comment",
                self.inner.insert_comment(user, moment, content),
            )
            .await
    }

    async fn delete_comment(
        &self,
        user: &UserId,
        comment: &CommentId,
        moment: &MomentId,
    ) -> Result<bool> {
        self.guard
            .call(
                "delete_comment",
                self.inner.delete_comment(user, comment, moment),
            )
            .await
    }

    async fn list_comments(&self, moment: &MomentId) -> Result<Vec<Comment>> {
        self.guard
            .call("list_comments", self.inner.list_comments(moment))
            .await
    }

    async fn increment(&self, kind: CounterKind, target: &str) -> Result<()> {
        self.guard
            .call("increment", self.inner.increment(kind, target))
            .await
    }

    async fn decrement(&self, kind: CounterKind, target: &str) -> Result<()> {
        self.guard
            .call("decrement", self.inner.decrement(kind, target))
            .await
    }
}

// ============================================================================
// Resilient Moment Source
// ============================================================================

/// [`MomentSource`] wrapper with timeout and circuit breaker protection.
pub struct ResilientMomentSource<M: MomentSource + ?Sized> {
    inner: Arc<M>,
    guard: RemoteGuard,
}

impl<M: MomentSource + ?Sized> ResilientMomentSource<M> {
    /// Wraps `inner`.
    #[must_use]
    pub fn new(inner: Arc<M>, config: &RemoteConfig, adapter: &'static str) -> Self {
        Self {
            inner,
            guard: RemoteGuard::new(config, adapter),
        }
    }
}

#[async_trait]
impl<M: MomentSource + ?Sized> MomentSource for ResilientMomentSource<M> {
    async fn list_all(&self, owner: &UserId) -> Result<Vec<Moment>> {
        self.guard.call("list_all", self.inner.list_all(owner)).await
    }

    async fn list_by_date_range(&self, owner: &UserId, range: DateRange) -> Result<Vec<Moment>> {
        self.guard
            .call(
                "list_by_date_range",
                self.inner.list_by_date_range(owner, range),
            )
            .await
    }

    async fn list_by_tags(&self, owner: &UserId, tags: &[String]) -> Result<Vec<Moment>> {
        self.guard
            .call("list_by_tags", self.inner.list_by_tags(owner, tags))
            .await
    }

    async fn list_by_authors(&self, authors: &[UserId]) -> Result<Vec<Moment>> {
        self.guard
            .call("list_by_authors", self.inner.list_by_authors(authors))
            .await
    }

    async fn get(&self, id: &MomentId) -> Result<Option<Moment>> {
        self.guard.call("get", self.inner.get(id)).await
    }

    async fn create(&self, author: &UserId, request: &NewMoment) -> Result<Moment> {
        self.guard
            .call("create", self.inner.create(author, request))
            .await
    }

    async fn update(&self, id: &MomentId, update: &MomentUpdate) -> Result<()> {
        self.guard
            .call("update", self.inner.update(id, update))
            .await
    }

    async fn delete(&self, id: &MomentId) -> Result<()> {
        self.guard.call("delete", self.inner.delete(id)).await
    }

    async fn delete_image(&self, id: &MomentId, index: usize) -> Result<()> {
        self.guard
            .call("delete_image", self.inner.delete_image(id, index))
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::InMemorySocialStore;

    fn config(threshold: u32, reset_ms: u64) -> RemoteConfig {
        RemoteConfig {
            breaker_failure_threshold: threshold,
            breaker_reset_timeout_ms: reset_ms,
            ..RemoteConfig::default()
        }
    }

    fn down() -> Result<()> {
        Err(Error::unavailable("op", "connection reset"))
    }

    #[test]
    fn test_circuit_breaker_opens_after_threshold_failures() {
        let mut breaker = CircuitBreaker::new(&config(3, 10_000), "test");

        assert_eq!(breaker.observe(&down()), Verdict::Failure);
        assert_eq!(breaker.observe(&down()), Verdict::Failure);
        assert_eq!(breaker.state_value(), 0);

        assert_eq!(breaker.observe(&down()), Verdict::Tripped);
        assert_eq!(breaker.state_value(), 1);
        let err = breaker.admit("op").unwrap_err();
        assert!(matches!(err, Error::RemoteUnavailable { .. }));
    }

    #[test]
    fn test_answered_errors_reset_the_failure_streak() {
        let mut breaker = CircuitBreaker::new(&config(2, 10_000), "test");

        breaker.observe(&down());
        let answered: Result<()> = Err(Error::query("op", "denied"));
        assert_eq!(breaker.observe(&answered), Verdict::Answered);
        assert_eq!(breaker.observe(&down()), Verdict::Failure);
        assert_eq!(breaker.state_value(), 0);
    }

    #[test]
    fn test_custom_classifier_counts_query_errors() {
        fn any_error(_: &Error) -> bool {
            true
        }
        let mut breaker = CircuitBreaker::with_classifier(&config(1, 10_000), "test", any_error);

        let answered: Result<()> = Err(Error::query("op", "denied"));
        assert_eq!(breaker.observe(&answered), Verdict::Tripped);
        assert!(breaker.admit("op").is_err());
    }

    #[test]
    fn test_circuit_breaker_half_open_then_closes() {
        let mut breaker = CircuitBreaker::new(&config(1, 0), "test");

        breaker.observe(&down());
        std::thread::sleep(Duration::from_millis(1));
        assert!(breaker.admit("op").is_ok());
        assert_eq!(breaker.state_value(), 2);
        // half_open_max_calls defaults to one trial call
        assert!(breaker.admit("op").is_err());

        assert_eq!(breaker.observe(&Ok(())), Verdict::Success);
        assert_eq!(breaker.state_value(), 0);
    }

    #[test]
    fn test_circuit_breaker_reopens_on_half_open_failure() {
        let mut breaker = CircuitBreaker::new(&config(3, 0), "test");

        for _ in 0..3 {
            breaker.observe(&down());
        }
        std::thread::sleep(Duration::from_millis(1));
        breaker.admit("op").unwrap();
        assert_eq!(breaker.observe(&down()), Verdict::Tripped);
        assert_eq!(breaker.state_value(), 1);
    }

    #[test]
    fn test_thresholds_clamped_to_one() {
        let breaker = CircuitBreaker::new(
            &RemoteConfig {
                breaker_failure_threshold: 0,
                breaker_half_open_max_calls: 0,
                ..RemoteConfig::default()
            },
            "test",
        );
        assert_eq!(breaker.failure_threshold, 1);
        assert_eq!(breaker.trial_calls, 1);
    }

    #[tokio::test]
    async fn test_open_circuit_fails_fast_without_calling_backend() {
        let store = Arc::new(InMemorySocialStore::new());
        let graph = ResilientGraphAccess::new(Arc::clone(&store), &config(2, 60_000), "graph");
        let user = UserId::new("a");

        store.set_offline(true);
        for _ in 0..2 {
            assert!(graph.followings_of(&user).await.is_err());
        }
        assert_eq!(graph.guard().state_value(), 1);

        store.set_offline(false);
        let err = graph.followings_of(&user).await.unwrap_err();
        assert!(matches!(err, Error::RemoteUnavailable { .. }));
        assert_eq!(store.calls_to("followings_of"), 2);
    }

    #[tokio::test]
    async fn test_query_errors_do_not_trip_breaker() {
        let store = Arc::new(InMemorySocialStore::new());
        let engagement =
            ResilientEngagementBackend::new(Arc::clone(&store), &config(1, 60_000), "engagement");

        for _ in 0..3 {
            let err = engagement
                .increment(CounterKind::Like, "missing")
                .await
                .unwrap_err();
            assert!(matches!(err, Error::RemoteQuery { .. }));
        }
        assert_eq!(engagement.guard().state_value(), 0);
    }

    #[tokio::test]
    async fn test_timeout_maps_to_unavailable() {
        let store = Arc::new(InMemorySocialStore::new());
        let remote = RemoteConfig {
            timeout_ms: 20,
            ..RemoteConfig::default()
        };
        let engagement = ResilientEngagementBackend::new(Arc::clone(&store), &remote, "engagement");

        let _latch = store.hold_counter_calls();
        let err = engagement
            .increment(CounterKind::Like, "m1")
            .await
            .unwrap_err();
        assert!(matches!(err, Error::RemoteUnavailable { .. }));
        assert!(err.is_retryable());
    }
}
