//! Server configuration

use crate::error::ConfigError;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tether_net::ConnectionConfig;
use tether_proto::RECEIVE_BUFFER_SIZE;

/// Server configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Bind address
    pub host: String,
    /// Listening port; 0 picks a free port
    pub port: u16,
    /// Size of a single client read
    pub buffer_size: usize,
    /// Idle read timeout per client, in seconds; 0 disables it
    pub idle_timeout_secs: u64,
    /// Pause after a failed accept, in milliseconds
    pub accept_backoff_ms: u64,
    /// Append-only log of everything clients send
    pub log_file: PathBuf,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8080,
            buffer_size: RECEIVE_BUFFER_SIZE,
            idle_timeout_secs: 300,
            accept_backoff_ms: 100,
            log_file: PathBuf::from("received_data.log"),
        }
    }
}

impl ServerConfig {
    /// Load a JSON config file; missing fields take their defaults
    pub fn from_json_file(path: &Path) -> Result<Self, ConfigError> {
        let raw = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.display().to_string(),
            source,
        })?;
        let config: Self = serde_json::from_str(&raw).map_err(|source| ConfigError::Parse {
            path: path.display().to_string(),
            source,
        })?;
        config.validate()?;
        Ok(config)
    }

    /// Reject settings the server cannot run with
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.host.is_empty() {
            return Err(ConfigError::Invalid {
                field: "host",
                reason: "must not be empty".to_string(),
            });
        }
        if self.buffer_size == 0 {
            return Err(ConfigError::Invalid {
                field: "buffer_size",
                reason: "must be at least 1".to_string(),
            });
        }
        Ok(())
    }

    /// `host:port` to bind
    pub fn bind_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    /// Idle read timeout, if enabled
    pub fn idle_timeout(&self) -> Option<Duration> {
        (self.idle_timeout_secs > 0).then(|| Duration::from_secs(self.idle_timeout_secs))
    }

    /// Accept error pause
    pub fn accept_backoff(&self) -> Duration {
        Duration::from_millis(self.accept_backoff_ms)
    }

    /// Connection settings for an accepted client socket
    pub fn connection_config(&self) -> ConnectionConfig {
        ConnectionConfig {
            receive_buffer_size: self.buffer_size,
            ..ConnectionConfig::accepted(self.idle_timeout())
        }
    }
}
