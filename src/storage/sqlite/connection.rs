//! Shared connection handling for `SQLite` stores.
//!
//! This module provides utilities for managing `SQLite` connections with
//! mutex poison recovery and the pragmas both stores rely on.

use crate::{Error, Result};
use rusqlite::{Connection, ErrorCode};
use std::path::Path;
use std::sync::{Mutex, MutexGuard};

/// Helper to acquire mutex lock with poison recovery.
///
/// If the mutex is poisoned (due to a panic in a previous critical section),
/// we recover the inner value and log a warning. This prevents cascading
/// failures when one operation panics.
pub fn acquire_lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    match mutex.lock() {
        Ok(guard) => guard,
        Err(poisoned) => {
            tracing::warn!("SQLite mutex was poisoned, recovering");
            metrics::counter!("sqlite_mutex_poison_recovery_total").increment(1);
            poisoned.into_inner()
        },
    }
}

/// Configures a `SQLite` connection.
///
/// # Configuration Applied
///
/// - **WAL mode**: concurrent readers with a single writer
/// - **NORMAL synchronous**: balances durability with performance
/// - **`busy_timeout`**: waits up to 5 seconds for locks instead of failing
/// - **`foreign_keys`**: enforced
pub fn configure_connection(conn: &Connection) -> Result<()> {
    // journal_mode returns a row, so pragma_update errors are not meaningful here
    let _ = conn.pragma_update(None, "journal_mode", "WAL");
    let _ = conn.pragma_update(None, "synchronous", "NORMAL");
    let _ = conn.pragma_update(None, "busy_timeout", "5000");
    conn.pragma_update(None, "foreign_keys", "ON")
        .map_err(|e| Error::failed("configure_sqlite", e))
}

/// Opens and configures a connection at `path`, or in memory when `None`.
pub fn open_connection(path: Option<&Path>) -> Result<Connection> {
    let conn = match path {
        Some(path) => Connection::open(path).map_err(|e| Error::failed("open_sqlite", e))?,
        None => Connection::open_in_memory()
            .map_err(|e| Error::failed("open_sqlite_in_memory", e))?,
    };
    configure_connection(&conn)?;
    Ok(conn)
}

/// Maps a `SQLite` error raised while serving a remote-style operation onto
/// the remote error taxonomy.
///
/// Busy/locked databases read as unavailable, uniqueness violations as
/// duplicates, everything else as a failed query.
pub fn remote_error(operation: &'static str, err: &rusqlite::Error) -> Error {
    match err.sqlite_error_code() {
        Some(ErrorCode::DatabaseBusy | ErrorCode::DatabaseLocked) => {
            Error::unavailable(operation, err)
        },
        Some(ErrorCode::ConstraintViolation) => {
            Error::AlreadyExists(format!("{operation}: {err}"))
        },
        _ => Error::query(operation, err),
    }
}
