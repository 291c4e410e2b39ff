//! Storage adapter traits.

mod engagement;
mod graph;
mod identity;
mod kv;
mod moments;

pub use engagement::EngagementBackend;
pub use graph::GraphAccess;
pub use identity::{Connectivity, ConnectivityFlag, IdentityProvider, StaticIdentity};
pub use kv::KeyValueStore;
pub use moments::MomentSource;
