//! Session capabilities: who is signed in and whether the network is up.

use crate::Result;
use crate::models::UserId;
use async_trait::async_trait;
use std::sync::atomic::{AtomicBool, Ordering};

/// Identity interface.
#[async_trait]
pub trait IdentityProvider: Send + Sync {
    /// Returns the signed-in user, if any.
    async fn current_user(&self) -> Result<Option<UserId>>;
}

/// A fixed identity, for tests and single-user embeddings.
#[derive(Debug, Clone, Default)]
pub struct StaticIdentity(Option<UserId>);

impl StaticIdentity {
    /// An identity that is always `user`.
    #[must_use]
    pub fn signed_in(user: impl Into<UserId>) -> Self {
        Self(Some(user.into()))
    }

    /// An identity with nobody signed in.
    #[must_use]
    pub const fn anonymous() -> Self {
        Self(None)
    }
}

#[async_trait]
impl IdentityProvider for StaticIdentity {
    async fn current_user(&self) -> Result<Option<UserId>> {
        Ok(self.0.clone())
    }
}

/// Network reachability check.
pub trait Connectivity: Send + Sync {
    /// Returns `true` if the remote store is believed reachable.
    fn is_online(&self) -> bool;
}

/// A connectivity flag toggled by the host (OS reachability callbacks,
/// tests).
#[derive(Debug)]
pub struct ConnectivityFlag(AtomicBool);

impl ConnectivityFlag {
    /// Creates a flag with the given initial state.
    #[must_use]
    pub const fn new(online: bool) -> Self {
        Self(AtomicBool::new(online))
    }

    /// Updates the flag.
    pub fn set_online(&self, online: bool) {
        self.0.store(online, Ordering::Release);
    }
}

impl Default for ConnectivityFlag {
    fn default() -> Self {
        Self::new(true)
    }
}

impl Connectivity for ConnectivityFlag {
    fn is_online(&self) -> bool {
        self.0.load(Ordering::Acquire)
    }
}
