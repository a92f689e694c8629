//! Configuration System
//!
//! Handles loading configuration from files and environment variables.
//! Supports TOML config files and environment variable overrides.

use crate::index::DEFAULT_PERIOD_RECORDS;
use crate::storage::{StoreConfig, DEFAULT_RESTORE_BYTES, LARGE_LOG_BYTES};
use serde::Deserialize;
use std::path::{Path, PathBuf};

/// Main configuration structure
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub store: StoreSettings,

    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Status store configuration
#[derive(Debug, Clone, Deserialize)]
pub struct StoreSettings {
    /// Log file template; empty keeps records in memory only
    #[serde(default = "default_log_path")]
    pub log_path: String,

    #[serde(default = "default_index_interval")]
    pub index_interval: usize,

    #[serde(default = "default_restore_bytes")]
    pub restore_bytes: u64,

    #[serde(default = "default_large_log_bytes")]
    pub large_log_bytes: u64,
}

fn default_log_path() -> String {
    dirs::data_local_dir()
        .map(|p| p.join("statuslog").join("statuslog.log").to_string_lossy().to_string())
        .unwrap_or_else(|| "./statuslog.log".to_string())
}

fn default_index_interval() -> usize {
    DEFAULT_PERIOD_RECORDS
}

fn default_restore_bytes() -> u64 {
    DEFAULT_RESTORE_BYTES
}

fn default_large_log_bytes() -> u64 {
    LARGE_LOG_BYTES
}

impl Default for StoreSettings {
    fn default() -> Self {
        Self {
            log_path: default_log_path(),
            index_interval: default_index_interval(),
            restore_bytes: default_restore_bytes(),
            large_log_bytes: default_large_log_bytes(),
        }
    }
}

impl StoreSettings {
    /// Settings for [`crate::storage::Store::new`], with `~/` expanded.
    pub fn to_store_config(&self) -> StoreConfig {
        StoreConfig {
            index_interval: self.index_interval,
            restore_bytes: self.restore_bytes,
            large_log_bytes: self.large_log_bytes,
            ..StoreConfig::new(expand_home(&self.log_path))
        }
    }
}

fn expand_home(path: &str) -> String {
    match (path.strip_prefix("~/"), dirs::home_dir()) {
        (Some(rest), Some(home)) => home.join(rest).to_string_lossy().to_string(),
        _ => path.to_string(),
    }
}

/// Logging configuration
#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,

    #[serde(default = "default_log_format")]
    pub format: String,
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_log_format() -> String {
    "pretty".to_string()
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: default_log_format(),
        }
    }
}

impl Config {
    /// Load configuration from a file
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|e| ConfigError::Io {
            path: path.to_path_buf(),
            error: e.to_string(),
        })?;

        Self::parse(&content).map_err(|e| match e {
            ConfigError::Parse { error, .. } => ConfigError::Parse {
                path: path.to_path_buf(),
                error,
            },
            other => other,
        })
    }

    /// Parse configuration from TOML text
    pub fn parse(content: &str) -> Result<Self, ConfigError> {
        toml::from_str(content).map_err(|e| ConfigError::Parse {
            path: PathBuf::new(),
            error: e.to_string(),
        })
    }

    /// Load configuration from environment variables only
    pub fn from_env() -> Self {
        let mut config = Config::default();
        config.apply_env_overrides();
        config
    }

    /// Load configuration with environment variable overrides
    pub fn load_with_env(path: &Path) -> Result<Self, ConfigError> {
        let mut config = Self::load(path)?;
        config.apply_env_overrides();
        Ok(config)
    }

    /// Load from default locations or environment
    pub fn load_default() -> Self {
        let config_paths = [
            dirs::config_dir().map(|p| p.join("statuslog").join("config.toml")),
            Some(PathBuf::from("/etc/statuslog/config.toml")),
            Some(PathBuf::from("./config.toml")),
        ];

        for path in config_paths.iter().flatten() {
            if path.exists() {
                match Self::load_with_env(path) {
                    Ok(config) => {
                        tracing::info!(path = ?path, "Loaded config");
                        return config;
                    }
                    Err(e) => {
                        tracing::warn!(path = ?path, error = %e, "Failed to load config");
                    }
                }
            }
        }

        tracing::info!("Using default config with environment overrides");
        Self::from_env()
    }

    /// Apply environment variable overrides to an existing config
    fn apply_env_overrides(&mut self) {
        // Store overrides
        if let Ok(log_path) = std::env::var("STATUSLOG_LOG_PATH") {
            self.store.log_path = log_path;
        }
        if let Ok(interval) = std::env::var("STATUSLOG_INDEX_INTERVAL") {
            match interval.parse() {
                Ok(n) => self.store.index_interval = n,
                Err(_) => tracing::warn!(value = %interval, "Ignoring invalid STATUSLOG_INDEX_INTERVAL"),
            }
        }
        if let Ok(bytes) = std::env::var("STATUSLOG_RESTORE_BYTES") {
            match bytes.parse() {
                Ok(n) => self.store.restore_bytes = n,
                Err(_) => tracing::warn!(value = %bytes, "Ignoring invalid STATUSLOG_RESTORE_BYTES"),
            }
        }

        // Logging overrides
        if let Ok(level) = std::env::var("STATUSLOG_LOG_LEVEL") {
            self.logging.level = level;
        }
        if let Ok(format) = std::env::var("STATUSLOG_LOG_FORMAT") {
            self.logging.format = format;
        }
    }
}

/// Configuration errors
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read config file {path:?}: {error}")]
    Io { path: PathBuf, error: String },

    #[error("Failed to parse config file {path:?}: {error}")]
    Parse { path: PathBuf, error: String },
}

/// Generate a default config file content
pub fn generate_default_config() -> String {
    r#"# statuslog configuration
#
# Environment variables override these settings:
# - STATUSLOG_LOG_PATH
# - STATUSLOG_INDEX_INTERVAL
# - STATUSLOG_RESTORE_BYTES
# - STATUSLOG_LOG_LEVEL
# - STATUSLOG_LOG_FORMAT

[store]
# Log file. May contain %Y %y %m %d %H %M to rotate by date; "" keeps
# records in memory only.
log_path = "~/.local/share/statuslog/statuslog.log"

# Records summarized by one index period
index_interval = 10000

# Restore replays at most this many bytes from the end of the log (100 MiB)
restore_bytes = 104857600

# Restore suggests rotating logs from this size on (10 MiB)
large_log_bytes = 10485760

[logging]
# Log level: trace, debug, info, warn, error
level = "info"

# Log format: pretty (for development) or json (for production)
format = "pretty"
"#
    .to_string()
}
