//! Configuration for the thermolog server.

use serde::{Deserialize, Serialize};
use std::path::Path;
use thermolog_common::config::{LoggingConfig, ZenohConfig};
use thiserror::Error;

use crate::store::DEFAULT_HISTORY_LIMIT;

/// Configuration errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    Io(#[from] std::io::Error),
    #[error("Failed to parse config: {0}")]
    Parse(#[from] json5::Error),
    #[error("Validation error: {0}")]
    Validation(String),
}

/// Complete server configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Zenoh connection settings.
    #[serde(default)]
    pub zenoh: ZenohConfig,

    /// Sensor ingestion settings.
    #[serde(default)]
    pub ingest: IngestConfig,

    /// Reading storage settings.
    #[serde(default)]
    pub storage: StorageConfig,

    /// HTTP query API settings.
    #[serde(default)]
    pub http: HttpConfig,

    /// Logging configuration.
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Sensor ingestion configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IngestConfig {
    /// Key expression the sensor publishes on (default: "dht22").
    #[serde(default = "default_topic")]
    pub topic: String,

    /// First delay before retrying a lost broker connection (milliseconds).
    #[serde(default = "default_reconnect_initial")]
    pub reconnect_initial_ms: u64,

    /// Upper bound for the retry delay (milliseconds).
    #[serde(default = "default_reconnect_max")]
    pub reconnect_max_ms: u64,
}

fn default_topic() -> String {
    "dht22".to_string()
}

fn default_reconnect_initial() -> u64 {
    500
}

fn default_reconnect_max() -> u64 {
    30_000
}

impl Default for IngestConfig {
    fn default() -> Self {
        Self {
            topic: default_topic(),
            reconnect_initial_ms: default_reconnect_initial(),
            reconnect_max_ms: default_reconnect_max(),
        }
    }
}

/// Storage configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    /// SQLite database file (default: "sensor_data.db").
    #[serde(default = "default_db_path")]
    pub path: String,
}

fn default_db_path() -> String {
    "sensor_data.db".to_string()
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            path: default_db_path(),
        }
    }
}

/// HTTP query API configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HttpConfig {
    /// Address to listen on (default: "0.0.0.0:5000").
    #[serde(default = "default_listen")]
    pub listen: String,

    /// Maximum readings returned by `/history`, 1 to 100 (default: 100).
    #[serde(default = "default_history_limit")]
    pub history_limit: usize,

    /// Per-request timeout in seconds (0 = none).
    #[serde(default)]
    pub request_timeout_secs: u64,
}

fn default_listen() -> String {
    "0.0.0.0:5000".to_string()
}

fn default_history_limit() -> usize {
    DEFAULT_HISTORY_LIMIT
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            listen: default_listen(),
            history_limit: default_history_limit(),
            request_timeout_secs: 0,
        }
    }
}

impl ServerConfig {
    /// Load configuration from a JSON5 file.
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        Self::parse(&content)
    }

    /// Parse configuration from a JSON5 string.
    pub fn parse(content: &str) -> Result<Self, ConfigError> {
        let config: ServerConfig = json5::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// Validate the configuration.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !matches!(self.zenoh.mode.as_str(), "client" | "peer" | "router") {
            return Err(ConfigError::Validation(format!(
                "Invalid Zenoh mode: {}",
                self.zenoh.mode
            )));
        }

        if self.ingest.topic.is_empty() {
            return Err(ConfigError::Validation(
                "ingest.topic must not be empty".to_string(),
            ));
        }

        if let Err(e) = zenoh::key_expr::KeyExpr::try_from(self.ingest.topic.as_str()) {
            return Err(ConfigError::Validation(format!(
                "Invalid topic '{}': {}",
                self.ingest.topic, e
            )));
        }

        if self.ingest.reconnect_initial_ms == 0 {
            return Err(ConfigError::Validation(
                "reconnect_initial_ms must be > 0".to_string(),
            ));
        }

        if self.ingest.reconnect_initial_ms > self.ingest.reconnect_max_ms {
            return Err(ConfigError::Validation(
                "reconnect_initial_ms must not exceed reconnect_max_ms".to_string(),
            ));
        }

        if self.storage.path.is_empty() {
            return Err(ConfigError::Validation(
                "storage.path must not be empty".to_string(),
            ));
        }

        if self.http.listen.parse::<std::net::SocketAddr>().is_err() {
            return Err(ConfigError::Validation(format!(
                "Invalid listen address: {}",
                self.http.listen
            )));
        }

        if !(1..=DEFAULT_HISTORY_LIMIT).contains(&self.http.history_limit) {
            return Err(ConfigError::Validation(format!(
                "history_limit must be between 1 and {}, got {}",
                DEFAULT_HISTORY_LIMIT, self.http.history_limit
            )));
        }

        Ok(())
    }
}
