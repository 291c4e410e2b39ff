//! Observability: structured logging setup.
//!
//! The library only emits `tracing` events and `metrics` samples. Installing
//! a subscriber is left to the embedding application through
//! [`init_logging`]; installing a metrics recorder/exporter is left to it
//! entirely.
//!
//! # Metrics emitted
//!
//! | Name | Labels |
//! |------|--------|
//! | `recommendation_requests_total` | `tier` |
//! | `recommendation_failures_total` | |
//! | `counter_mutations_total` | `kind`, `outcome` |
//! | `snapshot_cache_hits_total` / `_misses_total` / `_corrupt_total` / `_write_failures_total` | `key` |
//! | `remote_requests_total` | `adapter`, `operation`, `status` |
//! | `remote_circuit_breaker_state` | `adapter` |
//! | `storage_operations_total`, `storage_operation_duration_ms` | `backend`, `operation`, `status` |

use crate::config::{LogFormat, LoggingConfig};
use crate::{Error, Result};
use std::sync::OnceLock;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

/// Environment variable consulted before `RUST_LOG`.
pub const LOG_ENV: &str = "MOMENT_ENGINE_LOG";

static LOGGING_INIT: OnceLock<()> = OnceLock::new();

/// Builds the event filter: `MOMENT_ENGINE_LOG`, then `RUST_LOG`, then the
/// configured default.
#[must_use]
pub fn build_filter(config: &LoggingConfig) -> EnvFilter {
    EnvFilter::try_from_env(LOG_ENV)
        .or_else(|_| EnvFilter::try_from_default_env())
        .unwrap_or_else(|_| EnvFilter::new(&config.default_filter))
}

/// Installs the global `tracing` subscriber.
///
/// Calling it again after a successful install is a no-op.
///
/// # Errors
///
/// Returns an error if another global subscriber was installed outside this
/// function.
pub fn init_logging(config: &LoggingConfig) -> Result<()> {
    if LOGGING_INIT.get().is_some() {
        return Ok(());
    }

    let filter = build_filter(config);
    let installed = match config.format {
        LogFormat::Json => tracing_subscriber::registry()
            .with(
                tracing_subscriber::fmt::layer()
                    .json()
                    .with_current_span(true)
                    .with_span_list(true)
                    .with_target(true),
            )
            .with(filter)
            .try_init(),
        LogFormat::Text => tracing_subscriber::registry()
            .with(
                tracing_subscriber::fmt::layer()
                    .compact()
                    .with_target(true),
            )
            .with(filter)
            .try_init(),
    };
    installed.map_err(|e| Error::failed("logging_init", e))?;

    let _ = LOGGING_INIT.set(());
    tracing::debug!(format = ?config.format, "Logging initialized");
    Ok(())
}
