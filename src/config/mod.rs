//! Configuration management for graphdump
//!
//! This module handles loading, parsing, and validating configuration:
//! - Configuration files (TOML format)
//! - Command-line overrides (applied by the `cli` module)
//!
//! Configuration precedence (highest to lowest):
//! 1. Command-line arguments
//! 2. Configuration file
//! 3. Default values

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::error::{ConfigError, ExportError, Result};

/// Hard ceiling for `limits.max_depth`; keeps recursion comfortably within
/// the default thread stack.
pub const MAX_ALLOWED_DEPTH: usize = 1_000;

/// Main configuration structure
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    /// Connection configuration
    #[serde(default)]
    pub connection: ConnectionConfig,

    /// Value encoding limits
    #[serde(default)]
    pub limits: EncodingLimits,

    /// Export behaviour
    #[serde(default)]
    pub export: ExportConfig,

    /// Retry and circuit breaker configuration
    #[serde(default)]
    pub retry: RetryConfig,

    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Connection-related configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConnectionConfig {
    /// HTTP endpoint of the database server
    #[serde(default = "default_endpoint")]
    pub endpoint: String,

    /// Database to export
    #[serde(default = "default_database")]
    pub database: String,

    /// Username for basic authentication
    #[serde(default)]
    pub username: Option<String>,

    /// Password for basic authentication
    #[serde(default)]
    pub password: Option<String>,

    /// Connection timeout in seconds
    #[serde(default = "default_connect_timeout")]
    pub connect_timeout: u64,
}

/// Limits applied while encoding values.
///
/// Exceeding a limit degrades the output (a truncation sentinel or a
/// summary object) instead of failing the export.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct EncodingLimits {
    /// Strings longer than this many characters are truncated
    #[serde(default = "default_max_string_length")]
    pub max_string_length: usize,

    /// Byte arrays longer than this are truncated
    #[serde(default = "default_max_binary_length")]
    pub max_binary_length: usize,

    /// Maximum nesting depth of lists and maps
    #[serde(default = "default_max_depth")]
    pub max_depth: usize,

    /// Items shown per list or map
    #[serde(default = "default_max_collection_items")]
    pub max_collection_items: usize,

    /// Labels shown per node
    #[serde(default = "default_max_labels_per_node")]
    pub max_labels_per_node: usize,

    /// Characters kept per label
    #[serde(default = "default_max_label_length")]
    pub max_label_length: usize,

    /// Characters kept per map key or property name
    #[serde(default = "default_max_key_length")]
    pub max_key_length: usize,

    /// Nodes shown per path
    #[serde(default = "default_max_path_length")]
    pub max_path_length: usize,

    /// Paths with at most this many nodes are written with properties
    #[serde(default = "default_path_full_threshold")]
    pub path_full_threshold: usize,

    /// Paths with at most this many nodes are written with labels and types only
    #[serde(default = "default_path_compact_threshold")]
    pub path_compact_threshold: usize,

    /// From this depth on, collections nested inside collections are summarized
    #[serde(default)]
    pub nested_shallow_depth: Option<usize>,

    /// From this depth on, collections themselves are summarized
    #[serde(default)]
    pub nested_reference_depth: Option<usize>,
}

/// Export behaviour configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExportConfig {
    /// Directory receiving the export file
    #[serde(default = "default_output_dir")]
    pub output_dir: PathBuf,

    /// Rows requested per page
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,

    /// Seconds between progress log lines
    #[serde(default = "default_progress_interval")]
    pub progress_interval: u64,

    /// Show a progress bar on the terminal
    #[serde(default)]
    pub show_progress: bool,

    /// Label count assumed when sizing the header if metadata reports fewer
    #[serde(default = "default_expected_labels")]
    pub expected_labels: usize,

    /// Labels and relationship types listed individually in the manifest
    #[serde(default = "default_max_manifest_labels")]
    pub max_manifest_labels: usize,

    /// Smallest header reservation in bytes
    #[serde(default = "default_header_min_bytes")]
    pub header_min_bytes: usize,

    /// Reserved bytes per expected label
    #[serde(default = "default_header_per_label_bytes")]
    pub header_per_label_bytes: usize,

    /// Extra bytes added on top of the estimate
    #[serde(default = "default_header_safety_margin")]
    pub header_safety_margin: usize,

    /// Error and warning records kept for the trailer; later ones are only counted
    #[serde(default = "default_max_error_records")]
    pub max_error_records: usize,

    /// Seconds without modification after which another run's temp file counts as abandoned
    #[serde(default = "default_stale_temp_after")]
    pub stale_temp_after: u64,
}

/// Retry and circuit breaker configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryConfig {
    /// Retries after the first attempt of a database operation
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,

    /// Base backoff delay in milliseconds
    #[serde(default = "default_base_delay_ms")]
    pub base_delay_ms: u64,

    /// Backoff ceiling in milliseconds
    #[serde(default = "default_max_delay_ms")]
    pub max_delay_ms: u64,

    /// Per-attempt query timeout in seconds
    #[serde(default = "default_query_timeout")]
    pub query_timeout: u64,

    /// Consecutive failures that open the circuit
    #[serde(default = "default_failure_threshold")]
    pub failure_threshold: u32,

    /// Seconds the circuit stays open
    #[serde(default = "default_open_duration")]
    pub open_duration: u64,

    /// Half-open successes needed to close the circuit
    #[serde(default = "default_required_successes")]
    pub required_successes: u32,
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log level (error, warn, info, debug, trace)
    #[serde(default = "default_log_level")]
    pub level: LogLevel,

    /// Enable timestamps in logs
    #[serde(default = "default_log_timestamps")]
    pub timestamps: bool,
}

/// Log level options
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Error,
    Warn,
    Info,
    Debug,
    Trace,
}

// Default value functions
fn default_endpoint() -> String {
    "http://localhost:7474".to_string()
}

fn default_database() -> String {
    "neo4j".to_string()
}

fn default_connect_timeout() -> u64 {
    30
}

fn default_max_string_length() -> usize {
    100_000
}

fn default_max_binary_length() -> usize {
    1024 * 1024
}

fn default_max_depth() -> usize {
    100
}

fn default_max_collection_items() -> usize {
    10_000
}

fn default_max_labels_per_node() -> usize {
    100
}

fn default_max_label_length() -> usize {
    256
}

fn default_max_key_length() -> usize {
    1024
}

fn default_max_path_length() -> usize {
    1000
}

fn default_path_full_threshold() -> usize {
    100
}

fn default_path_compact_threshold() -> usize {
    500
}

fn default_output_dir() -> PathBuf {
    PathBuf::from(".")
}

fn default_batch_size() -> usize {
    10_000
}

fn default_progress_interval() -> u64 {
    30
}

fn default_expected_labels() -> usize {
    64
}

fn default_max_manifest_labels() -> usize {
    1_000
}

fn default_header_min_bytes() -> usize {
    16 * 1024
}

fn default_header_per_label_bytes() -> usize {
    256
}

fn default_header_safety_margin() -> usize {
    4096
}

fn default_max_error_records() -> usize {
    10_000
}

fn default_stale_temp_after() -> u64 {
    24 * 60 * 60
}

fn default_max_retries() -> u32 {
    5
}

fn default_base_delay_ms() -> u64 {
    500
}

fn default_max_delay_ms() -> u64 {
    30_000
}

fn default_query_timeout() -> u64 {
    300
}

fn default_failure_threshold() -> u32 {
    5
}

fn default_open_duration() -> u64 {
    60
}

fn default_required_successes() -> u32 {
    3
}

fn default_log_level() -> LogLevel {
    LogLevel::Info
}

fn default_log_timestamps() -> bool {
    true
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            endpoint: default_endpoint(),
            database: default_database(),
            username: None,
            password: None,
            connect_timeout: default_connect_timeout(),
        }
    }
}

impl Default for EncodingLimits {
    fn default() -> Self {
        Self {
            max_string_length: default_max_string_length(),
            max_binary_length: default_max_binary_length(),
            max_depth: default_max_depth(),
            max_collection_items: default_max_collection_items(),
            max_labels_per_node: default_max_labels_per_node(),
            max_label_length: default_max_label_length(),
            max_key_length: default_max_key_length(),
            max_path_length: default_max_path_length(),
            path_full_threshold: default_path_full_threshold(),
            path_compact_threshold: default_path_compact_threshold(),
            nested_shallow_depth: None,
            nested_reference_depth: None,
        }
    }
}

impl Default for ExportConfig {
    fn default() -> Self {
        Self {
            output_dir: default_output_dir(),
            batch_size: default_batch_size(),
            progress_interval: default_progress_interval(),
            show_progress: false,
            expected_labels: default_expected_labels(),
            max_manifest_labels: default_max_manifest_labels(),
            header_min_bytes: default_header_min_bytes(),
            header_per_label_bytes: default_header_per_label_bytes(),
            header_safety_margin: default_header_safety_margin(),
            max_error_records: default_max_error_records(),
            stale_temp_after: default_stale_temp_after(),
        }
    }
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: default_max_retries(),
            base_delay_ms: default_base_delay_ms(),
            max_delay_ms: default_max_delay_ms(),
            query_timeout: default_query_timeout(),
            failure_threshold: default_failure_threshold(),
            open_duration: default_open_duration(),
            required_successes: default_required_successes(),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            timestamps: default_log_timestamps(),
        }
    }
}

impl Config {
    /// Create a new configuration with default values
    pub fn new() -> Self {
        Self::default()
    }

    /// Load configuration from a TOML file
    ///
    /// # Arguments
    /// * `path` - Path to the configuration file
    ///
    /// # Returns
    /// * `Result<Config>` - Loaded configuration or error
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|e| {
            ExportError::Config(ConfigError::FileNotFound(format!(
                "{}: {}",
                path.display(),
                e
            )))
        })?;
        Self::from_toml_str(&content)
    }

    /// Parse configuration from TOML text
    pub fn from_toml_str(content: &str) -> Result<Self> {
        Ok(toml::from_str(content)?)
    }

    /// Load configuration from an explicit file, or from the default
    /// location when it exists, or fall back to defaults
    ///
    /// An explicitly given file that does not exist is an error.
    pub fn load_from_file(path: Option<&Path>) -> Result<Self> {
        match path {
            Some(p) => Self::from_file(p),
            None => {
                let default_path = Self::default_path();
                if default_path.exists() {
                    Self::from_file(default_path)
                } else {
                    Ok(Self::default())
                }
            }
        }
    }

    /// Get the default configuration file path
    ///
    /// # Returns
    /// * `PathBuf` - `~/.graphdump/config.toml`
    pub fn default_path() -> PathBuf {
        dirs::home_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join(".graphdump")
            .join("config.toml")
    }

    /// Validate the configuration
    ///
    /// All problems are collected and reported together.
    ///
    /// # Returns
    /// * `Result<()>` - Ok if valid, error otherwise
    pub fn validate(&self) -> Result<()> {
        let mut problems: Vec<ExportError> = Vec::new();
        let mut invalid = |field: &str, value: String| {
            problems.push(
                ConfigError::InvalidValue {
                    field: field.to_string(),
                    value,
                }
                .into(),
            );
        };

        if !self.connection.endpoint.starts_with("http://")
            && !self.connection.endpoint.starts_with("https://")
        {
            invalid("connection.endpoint", self.connection.endpoint.clone());
        }
        if self.connection.database.trim().is_empty() {
            invalid("connection.database", String::new());
        }
        if self.limits.max_depth == 0 || self.limits.max_depth > MAX_ALLOWED_DEPTH {
            invalid("limits.max_depth", self.limits.max_depth.to_string());
        }
        if self.limits.max_collection_items == 0 {
            invalid("limits.max_collection_items", "0".to_string());
        }
        if self.limits.max_key_length == 0 {
            invalid("limits.max_key_length", "0".to_string());
        }
        if self.limits.path_full_threshold > self.limits.path_compact_threshold {
            invalid(
                "limits.path_full_threshold",
                self.limits.path_full_threshold.to_string(),
            );
        }
        if self.export.batch_size == 0 {
            invalid("export.batch_size", "0".to_string());
        }
        if self.export.header_min_bytes < 1024 {
            invalid(
                "export.header_min_bytes",
                self.export.header_min_bytes.to_string(),
            );
        }
        if self.retry.base_delay_ms > self.retry.max_delay_ms {
            invalid("retry.base_delay_ms", self.retry.base_delay_ms.to_string());
        }
        if self.retry.failure_threshold == 0 {
            invalid("retry.failure_threshold", "0".to_string());
        }
        if self.retry.query_timeout == 0 {
            invalid("retry.query_timeout", "0".to_string());
        }

        match problems.len() {
            0 => Ok(()),
            1 => Err(problems.remove(0)),
            _ => Err(ExportError::Aggregate(problems)),
        }
    }

    /// Get connection timeout as Duration
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connection.connect_timeout)
    }

    /// Get progress log interval as Duration
    pub fn progress_interval(&self) -> Duration {
        Duration::from_secs(self.export.progress_interval)
    }

    pub fn stale_temp_after(&self) -> Duration {
        Duration::from_secs(self.export.stale_temp_after)
    }
}

impl RetryConfig {
    pub fn base_delay(&self) -> Duration {
        Duration::from_millis(self.base_delay_ms)
    }

    pub fn max_delay(&self) -> Duration {
        Duration::from_millis(self.max_delay_ms)
    }

    pub fn query_timeout(&self) -> Duration {
        Duration::from_secs(self.query_timeout)
    }

    pub fn open_duration(&self) -> Duration {
        Duration::from_secs(self.open_duration)
    }
}

impl LogLevel {
    /// Convert to tracing::Level
    pub fn to_tracing_level(&self) -> tracing::Level {
        match self {
            LogLevel::Error => tracing::Level::ERROR,
            LogLevel::Warn => tracing::Level::WARN,
            LogLevel::Info => tracing::Level::INFO,
            LogLevel::Debug => tracing::Level::DEBUG,
            LogLevel::Trace => tracing::Level::TRACE,
        }
    }
}
