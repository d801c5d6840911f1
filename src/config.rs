//! Configuration file support for flowjournal
//!
//! Reads `flowjournal.toml` (or the file passed with `--config`). Every value
//! has a default, so a missing file is not an error. CLI flags and
//! `FLOWJOURNAL_*` environment variables are applied on top in `main.rs`.

use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::path::{Path, PathBuf};

/// Name of the config file looked up in the working directory
pub const DEFAULT_CONFIG_FILE: &str = "flowjournal.toml";

/// Configuration structure
#[derive(Debug, Deserialize, Serialize, Default, Clone, PartialEq)]
pub struct Config {
    /// HTTP listener settings
    #[serde(default)]
    pub server: ServerConfig,

    /// Database location and pool sizing
    #[serde(default)]
    pub database: DatabaseConfig,

    /// Log output settings
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// HTTP listener settings
#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
pub struct ServerConfig {
    /// Address to bind
    /// Default: 127.0.0.1:8000
    #[serde(default = "default_listen")]
    pub listen: SocketAddr,

    /// Number of request worker threads
    /// Default: 4
    #[serde(default = "default_workers")]
    pub workers: usize,
}

/// Database location and pool sizing
#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
pub struct DatabaseConfig {
    /// SQLite file path
    /// Default: flowjournal.db
    #[serde(default = "default_db_path")]
    pub path: PathBuf,

    /// Connections kept open while idle
    /// Default: 2
    #[serde(default = "default_pool_min")]
    pub pool_min: u32,

    /// Upper bound on open connections
    /// Default: 10
    #[serde(default = "default_pool_max")]
    pub pool_max: u32,

    /// How long a request waits for a free connection
    /// Default: 30
    #[serde(default = "default_connection_timeout")]
    pub connection_timeout_secs: u64,

    /// How long SQLite waits on a locked database before failing
    /// Default: 5000
    #[serde(default = "default_busy_timeout")]
    pub busy_timeout_ms: u64,
}

/// Log output settings
#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
pub struct LoggingConfig {
    /// Level for the flowjournal target when RUST_LOG is unset
    /// Default: info
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Emit JSON lines instead of human-readable output
    #[serde(default)]
    pub json: bool,
}

fn default_listen() -> SocketAddr {
    SocketAddr::from(([127, 0, 0, 1], 8000))
}

fn default_workers() -> usize {
    4
}

fn default_db_path() -> PathBuf {
    PathBuf::from("flowjournal.db")
}

fn default_pool_min() -> u32 {
    2
}

fn default_pool_max() -> u32 {
    10
}

fn default_connection_timeout() -> u64 {
    30
}

fn default_busy_timeout() -> u64 {
    5000
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen: default_listen(),
            workers: default_workers(),
        }
    }
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            path: default_db_path(),
            pool_min: default_pool_min(),
            pool_max: default_pool_max(),
            connection_timeout_secs: default_connection_timeout(),
            busy_timeout_ms: default_busy_timeout(),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            json: false,
        }
    }
}

/// Errors raised while loading or validating configuration
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read {path}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("Failed to parse {path}: {source}")]
    Parse {
        path: PathBuf,
        source: toml::de::Error,
    },

    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

impl Config {
    /// Load config from an explicit file, or `./flowjournal.toml` if present
    ///
    /// Returns default config if no file is given and none exists.
    /// An explicit path that cannot be read is an error.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        match path {
            Some(path) => Self::from_file(path),
            None => {
                let fallback = Path::new(DEFAULT_CONFIG_FILE);
                if fallback.exists() {
                    Self::from_file(fallback)
                } else {
                    Ok(Self::default())
                }
            }
        }
    }

    /// Parse a TOML config file
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        toml::from_str(&contents).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }

    /// Reject settings the server cannot run with
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.server.workers == 0 {
            return Err(ConfigError::Invalid("server.workers must be at least 1".into()));
        }
        if self.database.pool_max == 0 {
            return Err(ConfigError::Invalid("database.pool_max must be at least 1".into()));
        }
        if self.database.pool_min > self.database.pool_max {
            return Err(ConfigError::Invalid(format!(
                "database.pool_min ({}) exceeds database.pool_max ({})",
                self.database.pool_min, self.database.pool_max
            )));
        }
        Ok(())
    }
}
