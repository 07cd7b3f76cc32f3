//! Configuration module for foldsync.
//!
//! Provides typed configuration structs that map to the YAML configuration file,
//! with loading, validation, defaults, and a builder pattern for programmatic use.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::domain::{FlowType, LayoutMode};

// ---------------------------------------------------------------------------
// Config struct with sub-sections
// ---------------------------------------------------------------------------

/// Top-level configuration for foldsync.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub sync: SyncConfig,
    pub database: DatabaseConfig,
    pub remote_copy: RemoteCopyConfig,
    pub snapshot: SnapshotConfig,
    pub logging: LoggingConfig,
    /// Flows applied (idempotently) at startup.
    pub flows: Vec<FlowDefinition>,
}

/// Engine timing and concurrency settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SyncConfig {
    /// Quiet window before a burst of notifications for one path is acted on.
    pub debounce_ms: u64,
    /// Base polling interval of folder watchers.
    pub poll_interval_ms: u64,
    /// Upper bound of the random offset added to each watcher's interval.
    pub poll_jitter_ms: u64,
    /// Seconds between drift-healing full scans.
    pub full_scan_interval_secs: u64,
    /// Seconds between flow status consistency checks.
    pub consistency_check_interval_secs: u64,
    /// Maximum number of events handled concurrently.
    pub workers: usize,
    /// How long an idle dequeue loop waits before polling again.
    pub idle_backoff_ms: u64,
    /// Records fetched per page during full scans.
    pub page_size: u32,
}

/// SQLite state database settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DatabaseConfig {
    pub path: PathBuf,
}

/// Remote-copy service settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RemoteCopyConfig {
    pub enabled: bool,
    /// Base URL of the service's HTTP API, e.g. `http://127.0.0.1:5572`.
    pub base_url: Option<String>,
    /// Seconds between job status polls.
    pub poll_interval_secs: u64,
    /// Polls before a job is recorded as timed out.
    pub max_polls: u32,
    /// Bulk-copy existing content when an internal→content flow is defined.
    pub bulk_initial_copy: bool,
}

/// Snapshot tool settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SnapshotConfig {
    pub enabled: bool,
    /// Executable name or path of the snapshot CLI.
    pub binary: String,
    /// Snapshot repository location.
    pub repository: Option<String>,
    /// File holding the repository password.
    pub password_file: Option<PathBuf>,
    /// Seconds between snapshot runs.
    pub interval_secs: u64,
}

/// Logging / tracing settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Log level: `trace`, `debug`, `info`, `warn`, or `error`.
    pub level: String,
    /// Output format: `pretty` or `json`.
    pub format: String,
}

/// A flow to ensure at startup.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FlowDefinition {
    pub name: String,
    pub source: PathBuf,
    pub destination: PathBuf,
    pub flow_type: FlowType,
    #[serde(default)]
    pub layout: LayoutMode,
    #[serde(default)]
    pub filters: Vec<String>,
}

// ---------------------------------------------------------------------------
// Config::load()
// ---------------------------------------------------------------------------

impl Config {
    /// Load configuration from a YAML file at `path`.
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        if content.trim().is_empty() {
            return Ok(Self::default());
        }
        let config: Config = serde_yaml::from_str(&content)?;
        Ok(config)
    }

    /// Try to load from `path`; fall back to [`Config::default`] on any error.
    pub fn load_or_default(path: &Path) -> Self {
        Self::load(path).unwrap_or_default()
    }

    /// Platform-appropriate default path for the configuration file.
    ///
    /// Typically `$XDG_CONFIG_HOME/foldsync/config.yaml` on Linux.
    pub fn default_path() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("~/.config"))
            .join("foldsync")
            .join("config.yaml")
    }
}

// ---------------------------------------------------------------------------
// Defaults
// ---------------------------------------------------------------------------

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            debounce_ms: 500,
            poll_interval_ms: 2_000,
            poll_jitter_ms: 500,
            full_scan_interval_secs: 3_600,
            consistency_check_interval_secs: 60,
            workers: 4,
            idle_backoff_ms: 100,
            page_size: 500,
        }
    }
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            path: dirs::data_dir()
                .unwrap_or_else(|| PathBuf::from("~/.local/share"))
                .join("foldsync")
                .join("foldsync.db"),
        }
    }
}

impl Default for RemoteCopyConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            base_url: None,
            poll_interval_secs: 5,
            max_polls: 720,
            bulk_initial_copy: false,
        }
    }
}

impl Default for SnapshotConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            binary: "restic".to_string(),
            repository: None,
            password_file: None,
            interval_secs: 86_400,
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: "pretty".to_string(),
        }
    }
}

// ---------------------------------------------------------------------------
// Config::validate()
// ---------------------------------------------------------------------------

/// A single validation error found in the configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidationError {
    /// Dotted path to the offending field, e.g. `"sync.workers"`.
    pub field: String,
    /// Human-readable explanation.
    pub message: String,
}

impl ValidationError {
    fn new(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            message: message.into(),
        }
    }
}

impl std::fmt::Display for ValidationError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.field, self.message)
    }
}

/// Valid values for `logging.level`.
const VALID_LOG_LEVELS: &[&str] = &["trace", "debug", "info", "warn", "error"];

/// Valid values for `logging.format`.
const VALID_LOG_FORMATS: &[&str] = &["pretty", "json"];

impl Config {
    /// Validate the configuration and return all errors found.
    ///
    /// An empty vector means the configuration is valid.
    pub fn validate(&self) -> Vec<ValidationError> {
        let mut errors = Vec::new();

        // --- sync ---
        let positive = [
            ("sync.debounce_ms", self.sync.debounce_ms),
            ("sync.poll_interval_ms", self.sync.poll_interval_ms),
            ("sync.full_scan_interval_secs", self.sync.full_scan_interval_secs),
            (
                "sync.consistency_check_interval_secs",
                self.sync.consistency_check_interval_secs,
            ),
            ("sync.idle_backoff_ms", self.sync.idle_backoff_ms),
        ];
        for (field, value) in positive {
            if value == 0 {
                errors.push(ValidationError::new(field, "must be greater than 0"));
            }
        }
        if self.sync.workers == 0 {
            errors.push(ValidationError::new("sync.workers", "must be greater than 0"));
        }
        if self.sync.page_size == 0 {
            errors.push(ValidationError::new("sync.page_size", "must be greater than 0"));
        }

        // --- remote_copy ---
        if self.remote_copy.enabled {
            match self.remote_copy.base_url.as_deref() {
                Some(url) if url.starts_with("http://") || url.starts_with("https://") => {}
                Some(url) => errors.push(ValidationError::new(
                    "remote_copy.base_url",
                    format!("must be an http(s) URL, got {url:?}"),
                )),
                None => errors.push(ValidationError::new(
                    "remote_copy.base_url",
                    "is required when remote_copy is enabled",
                )),
            }
            if self.remote_copy.poll_interval_secs == 0 {
                errors.push(ValidationError::new(
                    "remote_copy.poll_interval_secs",
                    "must be greater than 0",
                ));
            }
            if self.remote_copy.max_polls == 0 {
                errors.push(ValidationError::new(
                    "remote_copy.max_polls",
                    "must be greater than 0",
                ));
            }
        }

        // --- snapshot ---
        if self.snapshot.enabled {
            if self.snapshot.repository.is_none() {
                errors.push(ValidationError::new(
                    "snapshot.repository",
                    "is required when snapshot is enabled",
                ));
            }
            if self.snapshot.binary.trim().is_empty() {
                errors.push(ValidationError::new("snapshot.binary", "must not be empty"));
            }
            if self.snapshot.interval_secs == 0 {
                errors.push(ValidationError::new(
                    "snapshot.interval_secs",
                    "must be greater than 0",
                ));
            }
        }

        // --- logging ---
        if !VALID_LOG_LEVELS.contains(&self.logging.level.as_str()) {
            errors.push(ValidationError::new(
                "logging.level",
                format!(
                    "invalid level {:?}, expected one of {:?}",
                    self.logging.level, VALID_LOG_LEVELS
                ),
            ));
        }
        if !VALID_LOG_FORMATS.contains(&self.logging.format.as_str()) {
            errors.push(ValidationError::new(
                "logging.format",
                format!(
                    "invalid format {:?}, expected one of {:?}",
                    self.logging.format, VALID_LOG_FORMATS
                ),
            ));
        }

        // --- flows ---
        for (i, flow) in self.flows.iter().enumerate() {
            if flow.name.trim().is_empty() {
                errors.push(ValidationError::new(format!("flows[{i}].name"), "must not be empty"));
            }
            if !flow.source.is_absolute() {
                errors.push(ValidationError::new(
                    format!("flows[{i}].source"),
                    "must be an absolute path",
                ));
            }
            if !flow.destination.is_absolute() {
                errors.push(ValidationError::new(
                    format!("flows[{i}].destination"),
                    "must be an absolute path",
                ));
            }
            if flow.source == flow.destination {
                errors.push(ValidationError::new(
                    format!("flows[{i}].destination"),
                    "must differ from source",
                ));
            }
        }

        errors
    }
}

// ---------------------------------------------------------------------------
// ConfigBuilder
// ---------------------------------------------------------------------------

/// Builder for constructing a [`Config`] programmatically.
///
/// Starts from [`Config::default`] and allows selective overrides.
///
/// # Example
///
/// ```rust,no_run
/// use foldsync_core::config::ConfigBuilder;
///
/// let config = ConfigBuilder::new()
///     .sync_debounce_ms(250)
///     .sync_workers(8)
///     .logging_level("debug")
///     .build();
/// ```
#[derive(Debug, Clone)]
pub struct ConfigBuilder {
    config: Config,
}

impl ConfigBuilder {
    /// Create a new builder initialised with [`Config::default`] values.
    pub fn new() -> Self {
        Self {
            config: Config::default(),
        }
    }

    // --- sync ---

    pub fn sync_debounce_ms(mut self, ms: u64) -> Self {
        self.config.sync.debounce_ms = ms;
        self
    }

    pub fn sync_poll_interval_ms(mut self, ms: u64) -> Self {
        self.config.sync.poll_interval_ms = ms;
        self
    }

    pub fn sync_poll_jitter_ms(mut self, ms: u64) -> Self {
        self.config.sync.poll_jitter_ms = ms;
        self
    }

    pub fn sync_full_scan_interval_secs(mut self, secs: u64) -> Self {
        self.config.sync.full_scan_interval_secs = secs;
        self
    }

    pub fn sync_workers(mut self, workers: usize) -> Self {
        self.config.sync.workers = workers;
        self
    }

    pub fn sync_page_size(mut self, size: u32) -> Self {
        self.config.sync.page_size = size;
        self
    }

    // --- database ---

    pub fn database_path(mut self, path: PathBuf) -> Self {
        self.config.database.path = path;
        self
    }

    // --- remote_copy ---

    pub fn remote_copy_base_url(mut self, url: impl Into<String>) -> Self {
        self.config.remote_copy.enabled = true;
        self.config.remote_copy.base_url = Some(url.into());
        self
    }

    pub fn remote_copy_bulk_initial_copy(mut self, enabled: bool) -> Self {
        self.config.remote_copy.bulk_initial_copy = enabled;
        self
    }

    // --- snapshot ---

    pub fn snapshot_repository(mut self, repository: impl Into<String>) -> Self {
        self.config.snapshot.enabled = true;
        self.config.snapshot.repository = Some(repository.into());
        self
    }

    // --- logging ---

    pub fn logging_level(mut self, level: impl Into<String>) -> Self {
        self.config.logging.level = level.into();
        self
    }

    pub fn logging_format(mut self, format: impl Into<String>) -> Self {
        self.config.logging.format = format.into();
        self
    }

    // --- flows ---

    pub fn flow(mut self, flow: FlowDefinition) -> Self {
        self.config.flows.push(flow);
        self
    }

    // --- build ---

    /// Consume the builder and return the finished [`Config`].
    pub fn build(self) -> Config {
        self.config
    }

    /// Build and validate in one step. Returns `Err` with the list of
    /// validation errors if the configuration is invalid.
    pub fn build_validated(self) -> Result<Config, Vec<ValidationError>> {
        let config = self.build();
        let errors = config.validate();
        if errors.is_empty() {
            Ok(config)
        } else {
            Err(errors)
        }
    }
}

impl Default for ConfigBuilder {
    fn default() -> Self {
        Self::new()
    }
}

// ---------------------------------------------------------------------------
// Unit tests
// ---------------------------------------------------------------------------
