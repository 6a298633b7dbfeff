//! Configuration management for CLI, environment variables, and config files.

use crate::error::{ValidationIssue, ViewCounterError};
use crate::scheduler::IntervalClass;
use crate::week::DEFAULT_BOOKMARK_KEY;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::str::FromStr;

/// Main configuration for view-counter.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub counter: CounterConfig,
    #[serde(default)]
    pub meta: MetaConfig,
    #[serde(default)]
    pub cache: CacheConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Flush and rollover scheduling.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CounterConfig {
    pub flush_interval: IntervalClass,
    pub rollover_interval: IntervalClass,
    pub flush_on_shutdown: bool,
    /// Push flushed deltas into cached entities.
    pub update_cache: bool,
}

/// Where the rollover bookmark is kept.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MetaConfig {
    pub path: PathBuf,
    pub bookmark_key: String,
}

/// Read-through entity cache sizing.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    pub max_entries: usize,
    pub ttl_secs: u64,
}

/// Configuration for logging output.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    pub level: String,
    pub metrics_enabled: bool,
    pub metrics_interval_secs: u64,
}

impl Default for CounterConfig {
    fn default() -> Self {
        Self {
            flush_interval: IntervalClass::FifteenMinutes,
            rollover_interval: IntervalClass::FifteenMinutes,
            flush_on_shutdown: true,
            update_cache: true,
        }
    }
}

impl Default for MetaConfig {
    fn default() -> Self {
        Self {
            path: dirs::data_local_dir()
                .map(|d| d.join("view-counter/meta.json"))
                .unwrap_or_else(|| PathBuf::from("./view-counter-meta.json")),
            bookmark_key: DEFAULT_BOOKMARK_KEY.to_string(),
        }
    }
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            max_entries: 10_000,
            ttl_secs: 300,
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            metrics_enabled: false,
            metrics_interval_secs: 60,
        }
    }
}

fn parse_env<T: FromStr>(name: &str, val: &str) -> Result<T, ViewCounterError> {
    val.trim()
        .parse()
        .map_err(|_| ViewCounterError::InvalidArgument(format!("{} has invalid format", name)))
}

impl Config {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_file(path: &PathBuf) -> Result<Self, ViewCounterError> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| ViewCounterError::IoError(format!("{}: {}", path.display(), e)))?;

        let ext = path
            .extension()
            .and_then(|e| e.to_str())
            .map(|e| e.to_lowercase());
        match ext.as_deref() {
            Some("json") => Ok(serde_json::from_str(&content)?),
            _ => Ok(toml::from_str(&content)?),
        }
    }

    pub fn from_default_locations() -> Result<Self, ViewCounterError> {
        let config_dirs = [
            dirs::config_dir().map(|d| d.join("view-counter/config.toml")),
            Some(PathBuf::from("/etc/view-counter/config.toml")),
            Some(PathBuf::from("./view-counter.toml")),
        ];

        for path in config_dirs.iter().flatten() {
            if path.exists() {
                tracing::info!("Loading config from: {}", path.display());
                return Self::from_file(path);
            }
        }

        Ok(Self::default())
    }

    pub fn merge_from_env(mut self) -> Result<Self, ViewCounterError> {
        if let Ok(val) = std::env::var("VIEW_COUNTER_FLUSH_INTERVAL") {
            self.counter.flush_interval = parse_env("VIEW_COUNTER_FLUSH_INTERVAL", &val)?;
        }
        if let Ok(val) = std::env::var("VIEW_COUNTER_ROLLOVER_INTERVAL") {
            self.counter.rollover_interval = parse_env("VIEW_COUNTER_ROLLOVER_INTERVAL", &val)?;
        }
        if let Ok(val) = std::env::var("VIEW_COUNTER_UPDATE_CACHE") {
            self.counter.update_cache = parse_env("VIEW_COUNTER_UPDATE_CACHE", &val)?;
        }
        if let Ok(val) = std::env::var("VIEW_COUNTER_META_PATH") {
            self.meta.path = PathBuf::from(val);
        }
        if let Ok(val) = std::env::var("VIEW_COUNTER_CACHE_MAX_ENTRIES") {
            self.cache.max_entries = parse_env("VIEW_COUNTER_CACHE_MAX_ENTRIES", &val)?;
        }
        if let Ok(val) = std::env::var("VIEW_COUNTER_CACHE_TTL") {
            self.cache.ttl_secs = parse_env("VIEW_COUNTER_CACHE_TTL", &val)?;
        }
        if let Ok(val) = std::env::var("VIEW_COUNTER_LOG_LEVEL") {
            self.logging.level = val;
        }
        if let Ok(val) = std::env::var("VIEW_COUNTER_METRICS_INTERVAL") {
            self.logging.metrics_interval_secs =
                parse_env("VIEW_COUNTER_METRICS_INTERVAL", &val)?;
            self.logging.metrics_enabled = true;
        }

        Ok(self)
    }

    pub fn merge_from_cli(mut self, cli: &CliArgs) -> Self {
        if let Some(interval) = cli.flush_interval {
            self.counter.flush_interval = interval;
        }

        if let Some(ref path) = cli.meta_path {
            self.meta.path = path.clone();
        }

        if cli.no_cache {
            self.counter.update_cache = false;
        }

        if let Some(ref level) = cli.log_level {
            self.logging.level = level.clone();
        }

        self
    }

    pub fn load() -> Result<Self, ViewCounterError> {
        Self::from_default_locations()?.merge_from_env()
    }

    pub fn load_with_cli(cli: &CliArgs) -> Result<Self, ViewCounterError> {
        let base = match cli.config_file {
            Some(ref path) => Self::from_file(path)?,
            None => Self::from_default_locations()?,
        };
        Ok(base.merge_from_env()?.merge_from_cli(cli))
    }

    pub fn validate(&self) -> Result<(), ViewCounterError> {
        let mut issues = Vec::new();

        if self.meta.bookmark_key.trim().is_empty() {
            issues.push(ValidationIssue {
                field: "meta.bookmark_key".to_string(),
                message: "Bookmark key cannot be empty".to_string(),
            });
        }

        if self.meta.path.as_os_str().is_empty() {
            issues.push(ValidationIssue {
                field: "meta.path".to_string(),
                message: "Meta store path cannot be empty".to_string(),
            });
        }

        if self.cache.max_entries == 0 {
            issues.push(ValidationIssue {
                field: "cache.max_entries".to_string(),
                message: "Must be greater than 0".to_string(),
            });
        }

        if self.cache.ttl_secs == 0 {
            issues.push(ValidationIssue {
                field: "cache.ttl_secs".to_string(),
                message: "Must be greater than 0".to_string(),
            });
        }

        if self.logging.metrics_enabled && self.logging.metrics_interval_secs == 0 {
            issues.push(ValidationIssue {
                field: "logging.metrics_interval_secs".to_string(),
                message: "Must be greater than 0 when metrics are enabled".to_string(),
            });
        }

        let valid_levels = ["error", "warn", "info", "debug", "trace"];
        if !valid_levels.contains(&self.logging.level.as_str()) {
            issues.push(ValidationIssue {
                field: "logging.level".to_string(),
                message: format!(
                    "Invalid log level '{}'. Valid levels: {}",
                    self.logging.level,
                    valid_levels.join(", ")
                ),
            });
        }

        if issues.is_empty() {
            Ok(())
        } else {
            Err(ViewCounterError::ValidationError(issues))
        }
    }
}

/// Command-line arguments that override configuration values.
#[derive(Debug, Clone, Default)]
pub struct CliArgs {
    pub config_file: Option<PathBuf>,
    pub meta_path: Option<PathBuf>,
    pub flush_interval: Option<IntervalClass>,
    pub no_cache: bool,
    pub log_level: Option<String>,
}
