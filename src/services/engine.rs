//! Engine assembly from configuration.
//!
//! ```text
//! Engine::open(&EngineConfig, Backends)
//!   ├── open_snapshot_store()      → Arc<dyn KeyValueStore>
//!   ├── MomentFeed   (journal,   SnapshotCache<FeedSnapshot>)
//!   └── FeedSession  (following, SnapshotCache<FollowingSnapshot>)
//! ```
//!
//! Remote adapters are passed in as a [`Backends`] set; wrapping them with
//! timeouts and circuit breakers is opt-in through
//! [`Backends::with_resilience`].

use super::feed::{FeedSession, FetchOutcome, SessionAdapters};
use super::moment_feed::MomentFeed;
use super::snapshot_cache::{FOLLOWING_SNAPSHOT_KEY, JOURNAL_SNAPSHOT_KEY, SnapshotCache};
use crate::Result;
use crate::config::{EngineConfig, RemoteConfig};
use crate::storage::factory::open_snapshot_store;
use crate::storage::resilience::{
    ResilientEngagementBackend, ResilientGraphAccess, ResilientMomentSource,
};
use crate::storage::traits::{
    Connectivity, EngagementBackend, GraphAccess, IdentityProvider, MomentSource,
};
use std::sync::Arc;

/// The adapters an engine runs against.
///
/// All backends are wrapped in `Arc` for shared ownership across services.
#[derive(Clone)]
pub struct Backends {
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

impl Backends {
    /// Uses one store for the graph, engagement and moment contracts.
    pub fn from_store<S>(
        store: Arc<S>,
        identity: Arc<dyn IdentityProvider>,
        connectivity: Arc<dyn Connectivity>,
    ) -> Self
    where
        S: GraphAccess + EngagementBackend + MomentSource + 'static,
    {
        Self {
            identity,
            connectivity,
            graph: Arc::clone(&store) as Arc<dyn GraphAccess>,
            engagement: Arc::clone(&store) as Arc<dyn EngagementBackend>,
            moments: store,
        }
    }

    /// Wraps every remote adapter with a timeout and a circuit breaker.
    #[must_use]
    pub fn with_resilience(self, remote: &RemoteConfig) -> Self {
        Self {
            graph: Arc::new(ResilientGraphAccess::new(self.graph, remote, "graph")),
            engagement: Arc::new(ResilientEngagementBackend::new(
                self.engagement,
                remote,
                "engagement",
            )),
            moments: Arc::new(ResilientMomentSource::new(self.moments, remote, "moments")),
            ..self
        }
    }

    fn session_adapters(&self) -> SessionAdapters {
        SessionAdapters {
            identity: Arc::clone(&self.identity),
            connectivity: Arc::clone(&self.connectivity),
            graph: Arc::clone(&self.graph),
            engagement: Arc::clone(&self.engagement),
            moments: Arc::clone(&self.moments),
        }
    }
}

/// The journal and the following feed of one device, sharing one snapshot
/// store.
pub struct Engine {
    journal: MomentFeed,
    session: FeedSession,
    recommendation_limit: usize,
}

impl Engine {
    /// Builds an engine, opening the configured snapshot store.
    ///
    /// # Errors
    ///
    /// Returns an error if the snapshot store cannot be opened.
    pub fn open(config: &EngineConfig, backends: Backends) -> Result<Self> {
        let store = open_snapshot_store(config)?;
        let journal = MomentFeed::new(
            Arc::clone(&backends.moments),
            Arc::clone(&backends.identity),
            Arc::clone(&backends.connectivity),
            SnapshotCache::new(Arc::clone(&store), JOURNAL_SNAPSHOT_KEY),
        )
        .with_recent_window_days(config.recent_window_days);
        let session = FeedSession::new(
            backends.session_adapters(),
            SnapshotCache::new(store, FOLLOWING_SNAPSHOT_KEY),
        );
        tracing::info!(
            backend = ?config.snapshot_backend,
            recommendation_limit = config.recommendation_limit,
            "Engine ready"
        );
        Ok(Self {
            journal,
            session,
            recommendation_limit: config.recommendation_limit,
        })
    }

    /// The journal feed.
    #[must_use]
    pub const fn journal(&self) -> &MomentFeed {
        &self.journal
    }

    /// The following feed session.
    #[must_use]
    pub const fn session(&self) -> &FeedSession {
        &self.session
    }

    /// Restores both persisted feeds for an instant first render.
    pub async fn restore(&self) {
        let journal = self.journal.restore().await;
        let following = self.session.restore().await;
        tracing::debug!(journal, following, "Restored snapshots");
    }

    /// Recomputes follow suggestions with the configured limit.
    ///
    /// # Errors
    ///
    /// See [`FeedSession::refresh_recommendations`].
    pub async fn refresh_recommendations(&self) -> Result<FetchOutcome> {
        self.session
            .refresh_recommendations(self.recommendation_limit)
            .await
    }

    /// Drops all local state, for sign-out.
    pub async fn reset(&self) {
        self.journal.reset().await;
        self.session.reset().await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::SnapshotBackendKind;
    use crate::models::{Profile, UserId};
    use crate::storage::{ConnectivityFlag, InMemorySocialStore, StaticIdentity};
    use chrono::Utc;

    fn backends(store: &Arc<InMemorySocialStore>) -> Backends {
        Backends::from_store(
            Arc::clone(store),
            Arc::new(StaticIdentity::signed_in("me")),
            Arc::new(ConnectivityFlag::default()),
        )
    }

    #[tokio::test]
    async fn test_configured_limit_drives_recommendations() {
        let store = Arc::new(InMemorySocialStore::new());
        for i in 0..6 {
            store.add_profile(Profile::new(format!("user-{i}"), Utc::now()));
        }
        let mut config = EngineConfig::default().with_snapshot_backend(SnapshotBackendKind::Memory);
        config.recommendation_limit = 2;

        let engine = Engine::open(&config, backends(&store)).unwrap();
        engine.refresh_recommendations().await.unwrap();
        let suggested = engine.session().recommendations();
        assert_eq!(suggested.len(), 2);
        assert!(suggested.iter().all(|c| c.user_id != UserId::new("me")));
    }

    #[tokio::test]
    async fn test_resilient_backends_still_answer() {
        let store = Arc::new(InMemorySocialStore::new());
        let config = EngineConfig::default().with_snapshot_backend(SnapshotBackendKind::Memory);
        let engine = Engine::open(
            &config,
            backends(&store).with_resilience(&config.remote),
        )
        .unwrap();

        let outcome = engine.session().fetch_following_moments(true).await.unwrap();
        assert_eq!(outcome, FetchOutcome::Fetched { count: 0 });
        assert_eq!(store.calls_to("followings_of"), 1);
    }
}
