//! Configuration management.
//!
//! Values come from defaults, then an optional TOML file, then
//! `MOMENT_ENGINE_*` environment variables.

use serde::Deserialize;
use std::path::{Path, PathBuf};

/// Environment variable prefix for overrides.
pub const ENV_PREFIX: &str = "MOMENT_ENGINE_";

/// Main configuration for the engine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EngineConfig {
    /// Directory holding snapshot files or the snapshot database.
    pub data_dir: PathBuf,
    /// Where snapshots are stored.
    pub snapshot_backend: SnapshotBackendKind,
    /// Default number of recommendations per request.
    pub recommendation_limit: usize,
    /// Width of the "recent" journal filter in days, ending today.
    pub recent_window_days: u32,
    /// Remote adapter timeouts and circuit breaking.
    pub remote: RemoteConfig,
    /// Log output settings.
    pub logging: LoggingConfig,
}

/// Snapshot store selection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SnapshotBackendKind {
    /// Process memory; nothing survives a restart.
    Memory,
    /// One JSON file per snapshot under `data_dir`.
    #[default]
    Filesystem,
    /// A `snapshots.db` `SQLite` file under `data_dir`.
    Sqlite,
}

impl SnapshotBackendKind {
    /// Parses a backend name, falling back to the default.
    #[must_use]
    pub fn parse(s: &str) -> Self {
        match s.to_lowercase().as_str() {
            "memory" | "in-memory" | "in_memory" => Self::Memory,
            "sqlite" => Self::Sqlite,
            _ => Self::Filesystem,
        }
    }
}

/// Remote adapter resilience configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteConfig {
    /// Per-call timeout.
    pub timeout_ms: u64,
    /// Consecutive failures before opening the circuit.
    pub breaker_failure_threshold: u32,
    /// How long to keep the circuit open before half-open.
    pub breaker_reset_timeout_ms: u64,
    /// Maximum trial calls while half-open.
    pub breaker_half_open_max_calls: u32,
}

impl Default for RemoteConfig {
    fn default() -> Self {
        Self {
            timeout_ms: 10_000,
            breaker_failure_threshold: 5,
            breaker_reset_timeout_ms: 30_000,
            breaker_half_open_max_calls: 1,
        }
    }
}

impl RemoteConfig {
    /// Sets the per-call timeout.
    #[must_use]
    pub const fn with_timeout_ms(mut self, timeout_ms: u64) -> Self {
        self.timeout_ms = timeout_ms;
        self
    }

    /// Sets the failure threshold.
    #[must_use]
    pub const fn with_failure_threshold(mut self, threshold: u32) -> Self {
        self.breaker_failure_threshold = threshold;
        self
    }

    /// Sets the reset timeout in milliseconds.
    #[must_use]
    pub const fn with_reset_timeout_ms(mut self, timeout_ms: u64) -> Self {
        self.breaker_reset_timeout_ms = timeout_ms;
        self
    }
}

/// Log output format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LogFormat {
    /// Compact human-readable lines.
    #[default]
    Text,
    /// One JSON object per event.
    Json,
}

impl LogFormat {
    /// Parses a format name, falling back to text.
    #[must_use]
    pub fn parse(s: &str) -> Self {
        if s.eq_ignore_ascii_case("json") {
            Self::Json
        } else {
            Self::Text
        }
    }
}

/// Logging configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoggingConfig {
    /// Output format.
    pub format: LogFormat,
    /// Filter used when neither `MOMENT_ENGINE_LOG` nor `RUST_LOG` is set.
    pub default_filter: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            format: LogFormat::Text,
            default_filter: "moment_engine=info".to_string(),
        }
    }
}

/// Configuration file structure (for TOML parsing).
#[derive(Debug, Deserialize, Default)]
pub struct ConfigFile {
    /// Data directory.
    pub data_dir: Option<String>,
    /// Snapshot backend name.
    pub snapshot_backend: Option<String>,
    /// Recommendation limit.
    pub recommendation_limit: Option<usize>,
    /// Recent filter window in days.
    pub recent_window_days: Option<u32>,
    /// Remote section.
    pub remote: Option<ConfigFileRemote>,
    /// Logging section.
    pub logging: Option<ConfigFileLogging>,
}

/// Remote section in config file.
#[derive(Debug, Deserialize, Default)]
pub struct ConfigFileRemote {
    /// Per-call timeout.
    pub timeout_ms: Option<u64>,
    /// Breaker failure threshold.
    pub breaker_failure_threshold: Option<u32>,
    /// Breaker reset timeout.
    pub breaker_reset_timeout_ms: Option<u64>,
    /// Breaker half-open trial calls.
    pub breaker_half_open_max_calls: Option<u32>,
}

/// Logging section in config file.
#[derive(Debug, Deserialize, Default)]
pub struct ConfigFileLogging {
    /// `text` or `json`.
    pub format: Option<String>,
    /// Default filter directive.
    pub filter: Option<String>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            data_dir: default_data_dir(),
            snapshot_backend: SnapshotBackendKind::default(),
            recommendation_limit: 5,
            recent_window_days: 30,
            remote: RemoteConfig::default(),
            logging: LoggingConfig::default(),
        }
    }
}

fn default_data_dir() -> PathBuf {
    directories::ProjectDirs::from("", "", "moment-engine").map_or_else(
        || PathBuf::from(".moment-engine"),
        |dirs| dirs.data_dir().to_path_buf(),
    )
}

impl EngineConfig {
    /// Creates a new configuration with default values.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Loads configuration from a file path.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed.
    pub fn load_from_file(path: &Path) -> crate::Result<Self> {
        let contents = std::fs::read_to_string(path)
            .map_err(|e| crate::Error::failed("read_config_file", e))?;
        Self::from_toml(&contents)
    }

    /// Parses configuration from TOML text.
    ///
    /// # Errors
    ///
    /// Returns an error if the text is not a valid config file.
    pub fn from_toml(contents: &str) -> crate::Result<Self> {
        let file: ConfigFile =
            toml::from_str(contents).map_err(|e| crate::Error::failed("parse_config_file", e))?;
        Ok(Self::from_config_file(file))
    }

    /// Loads configuration from the default location.
    ///
    /// Checks the following paths in order:
    /// 1. Platform-specific config dir (`~/Library/Application Support/moment-engine/` on macOS)
    /// 2. XDG config dir (`~/.config/moment-engine/` for Unix compatibility)
    ///
    /// Returns default configuration if no config file is found. Environment
    /// overrides are applied either way.
    #[must_use]
    pub fn load_default() -> Self {
        Self::find_config_file()
            .and_then(|path| match Self::load_from_file(&path) {
                Ok(config) => Some(config),
                Err(e) => {
                    tracing::warn!(path = %path.display(), error = %e, "Ignoring unreadable config file");
                    None
                },
            })
            .unwrap_or_default()
            .with_env_overrides()
    }

    fn find_config_file() -> Option<PathBuf> {
        let base_dirs = directories::BaseDirs::new()?;

        let platform_config = base_dirs
            .config_dir()
            .join("moment-engine")
            .join("config.toml");
        if platform_config.exists() {
            return Some(platform_config);
        }

        let xdg_config = base_dirs
            .home_dir()
            .join(".config")
            .join("moment-engine")
            .join("config.toml");
        xdg_config.exists().then_some(xdg_config)
    }

    /// Converts a `ConfigFile` to `EngineConfig`.
    fn from_config_file(file: ConfigFile) -> Self {
        let mut config = Self::default();

        if let Some(data_dir) = file.data_dir {
            config.data_dir = PathBuf::from(data_dir);
        }
        if let Some(backend) = file.snapshot_backend {
            config.snapshot_backend = SnapshotBackendKind::parse(&backend);
        }
        if let Some(limit) = file.recommendation_limit {
            config.recommendation_limit = limit;
        }
        if let Some(days) = file.recent_window_days {
            config.recent_window_days = days;
        }
        if let Some(remote) = file.remote {
            if let Some(v) = remote.timeout_ms {
                config.remote.timeout_ms = v;
            }
            if let Some(v) = remote.breaker_failure_threshold {
                config.remote.breaker_failure_threshold = v;
            }
            if let Some(v) = remote.breaker_reset_timeout_ms {
                config.remote.breaker_reset_timeout_ms = v;
            }
            if let Some(v) = remote.breaker_half_open_max_calls {
                config.remote.breaker_half_open_max_calls = v;
            }
        }
        if let Some(logging) = file.logging {
            if let Some(format) = logging.format {
                config.logging.format = LogFormat::parse(&format);
            }
            if let Some(filter) = logging.filter {
                config.logging.default_filter = filter;
            }
        }

        config
    }

    /// Applies `MOMENT_ENGINE_*` environment variable overrides.
    #[must_use]
    pub fn with_env_overrides(self) -> Self {
        self.with_overrides(|key| std::env::var(key).ok())
    }

    /// Applies overrides looked up by full variable name.
    ///
    /// Unparseable values are ignored.
    #[must_use]
    pub fn with_overrides(mut self, lookup: impl Fn(&str) -> Option<String>) -> Self {
        let var = |name: &str| lookup(&format!("{ENV_PREFIX}{name}"));

        if let Some(v) = var("DATA_DIR") {
            self.data_dir = PathBuf::from(v);
        }
        if let Some(v) = var("SNAPSHOT_BACKEND") {
            self.snapshot_backend = SnapshotBackendKind::parse(&v);
        }
        if let Some(v) = var("RECOMMENDATION_LIMIT").and_then(|v| v.parse().ok()) {
            self.recommendation_limit = v;
        }
        if let Some(v) = var("REMOTE_TIMEOUT_MS").and_then(|v| v.parse().ok()) {
            self.remote.timeout_ms = v;
        }
        if let Some(v) = var("BREAKER_FAILURE_THRESHOLD").and_then(|v| v.parse::<u32>().ok()) {
            self.remote.breaker_failure_threshold = v.max(1);
        }
        if let Some(v) = var("BREAKER_RESET_MS").and_then(|v| v.parse().ok()) {
            self.remote.breaker_reset_timeout_ms = v;
        }
        if let Some(v) = var("LOG_FORMAT") {
            self.logging.format = LogFormat::parse(&v);
        }
        self
    }

    /// Sets the data directory.
    #[must_use]
    pub fn with_data_dir(mut self, path: impl Into<PathBuf>) -> Self {
        self.data_dir = path.into();
        self
    }

    /// Sets the snapshot backend.
    #[must_use]
    pub const fn with_snapshot_backend(mut self, backend: SnapshotBackendKind) -> Self {
        self.snapshot_backend = backend;
        self
    }

    /// Sets the remote resilience configuration.
    #[must_use]
    pub fn with_remote(mut self, remote: RemoteConfig) -> Self {
        self.remote = remote;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use test_case::test_case;

    #[test]
    fn test_defaults() {
        let config = EngineConfig::default();
        assert_eq!(config.snapshot_backend, SnapshotBackendKind::Filesystem);
        assert_eq!(config.recommendation_limit, 5);
        assert_eq!(config.recent_window_days, 30);
        assert_eq!(config.remote.timeout_ms, 10_000);
        assert_eq!(config.logging.format, LogFormat::Text);
    }

    #[test]
    fn test_from_toml_partial() {
        let config = EngineConfig::from_toml(
            r#"
            data_dir = "/tmp/moments"
            snapshot_backend = "sqlite"
            recommendation_limit = 8

            [remote]
            timeout_ms = 2500

            [logging]
            format = "json"
            "#,
        )
        .unwrap();

        assert_eq!(config.data_dir, PathBuf::from("/tmp/moments"));
        assert_eq!(config.snapshot_backend, SnapshotBackendKind::Sqlite);
        assert_eq!(config.recommendation_limit, 8);
        assert_eq!(config.remote.timeout_ms, 2500);
        assert_eq!(config.remote.breaker_failure_threshold, 5);
        assert_eq!(config.logging.format, LogFormat::Json);
        assert_eq!(config.recent_window_days, 30);
    }

    #[test]
    fn test_invalid_toml_is_an_error() {
        assert!(matches!(
            EngineConfig::from_toml("recommendation_limit = \"many\""),
            Err(crate::Error::OperationFailed { .. })
        ));
    }

    #[test]
    fn test_load_from_file() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "recent_window_days = 7\n").unwrap();

        let config = EngineConfig::load_from_file(&path).unwrap();
        assert_eq!(config.recent_window_days, 7);
        assert!(EngineConfig::load_from_file(&dir.path().join("missing.toml")).is_err());
    }

    #[test]
    fn test_overrides_win_and_ignore_garbage() {
        let vars: HashMap<&str, &str> = HashMap::from([
            ("MOMENT_ENGINE_SNAPSHOT_BACKEND", "memory"),
            ("MOMENT_ENGINE_RECOMMENDATION_LIMIT", "not-a-number"),
            ("MOMENT_ENGINE_BREAKER_FAILURE_THRESHOLD", "0"),
            ("MOMENT_ENGINE_LOG_FORMAT", "JSON"),
        ]);
        let config = EngineConfig::default()
            .with_overrides(|key| vars.get(key).map(|v| (*v).to_string()));

        assert_eq!(config.snapshot_backend, SnapshotBackendKind::Memory);
        assert_eq!(config.recommendation_limit, 5);
        assert_eq!(config.remote.breaker_failure_threshold, 1);
        assert_eq!(config.logging.format, LogFormat::Json);
    }

    #[test_case("memory", SnapshotBackendKind::Memory ; "memory")]
    #[test_case("SQLite", SnapshotBackendKind::Sqlite ; "sqlite any case")]
    #[test_case("filesystem", SnapshotBackendKind::Filesystem ; "filesystem")]
    #[test_case("bogus", SnapshotBackendKind::Filesystem ; "unknown falls back")]
    fn test_backend_parse(input: &str, expected: SnapshotBackendKind) {
        assert_eq!(SnapshotBackendKind::parse(input), expected);
    }
}
