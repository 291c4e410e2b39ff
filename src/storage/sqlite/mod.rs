//! `SQLite` storage backends.
//!
//! ## Module Structure
//!
//! - [`connection`]: Connection handling ([`Mutex<Connection>`](rusqlite::Connection), lock acquisition, configuration)
//! - [`sql`]: Schema and placeholder helpers
//! - [`rows`]: Row conversion for moments, profiles and engagement rows
//! - [`metrics`]: Shared metrics recording helpers
//! - [`SqliteSocialStore`]: embedded graph, engagement and moment store
//! - [`SqliteKeyValueStore`]: snapshot storage
//!
//! Each store owns its own connection; WAL mode lets both point at the same
//! file if needed.

mod connection;
mod kv;
mod metrics;
mod rows;
mod social;
mod sql;

pub use connection::{acquire_lock, configure_connection, open_connection, remote_error};
pub use kv::SqliteKeyValueStore;
pub use metrics::record_operation_metrics;
pub use social::SqliteSocialStore;
pub use sql::numbered_placeholders;
