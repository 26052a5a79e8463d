//! Agent configuration

use anyhow::{ensure, Context, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;
use tether_net::ConnectionConfig;

/// What a clean disconnect or read failure does to the current connection
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "kebab-case")]
pub enum DisconnectPolicy {
    /// Abandon the connection as soon as it is known to be gone
    #[default]
    Reconnect,
    /// Count it like any other failed receive against the failure threshold
    RetryBudget,
}

/// Agent configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AgentConfig {
    /// Server host name or address
    pub server_host: String,
    /// Server port
    pub server_port: u16,
    /// Connection tuning
    pub connection: ConnectionConfig,
    /// Consecutive failed receives before forcing a reconnect
    pub receive_failure_threshold: u32,
    /// Pause between abandoning a connection and the next connect cycle
    pub reconnect_cooldown_secs: u64,
    /// Hard limit on a shell command, in seconds
    pub command_timeout_secs: u64,
    /// Limit on a utility handler call, in seconds
    pub utility_timeout_secs: u64,
    /// Disconnect handling
    pub disconnect_policy: DisconnectPolicy,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            server_host: "127.0.0.1".to_string(),
            server_port: 8080,
            connection: ConnectionConfig::default(),
            receive_failure_threshold: 10,
            reconnect_cooldown_secs: 300,
            command_timeout_secs: 15,
            utility_timeout_secs: 60,
            disconnect_policy: DisconnectPolicy::default(),
        }
    }
}

impl AgentConfig {
    /// Load a JSON config file; missing fields take their defaults
    pub fn from_json_file(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file {}", path.display()))?;
        let config: Self = serde_json::from_str(&raw)
            .with_context(|| format!("Invalid config file {}", path.display()))?;
        config.validate()?;
        Ok(config)
    }

    /// Reject settings the agent cannot run with
    pub fn validate(&self) -> Result<()> {
        ensure!(!self.server_host.is_empty(), "server_host must not be empty");
        ensure!(self.server_port != 0, "server_port must not be 0");
        ensure!(
            self.connection.connect_retries > 0,
            "connection.connect_retries must be at least 1"
        );
        ensure!(
            self.receive_failure_threshold > 0,
            "receive_failure_threshold must be at least 1"
        );
        ensure!(self.command_timeout_secs > 0, "command_timeout_secs must be at least 1");
        Ok(())
    }

    /// Reconnect cool-down
    pub fn reconnect_cooldown(&self) -> Duration {
        Duration::from_secs(self.reconnect_cooldown_secs)
    }

    /// Shell command timeout
    pub fn command_timeout(&self) -> Duration {
        Duration::from_secs(self.command_timeout_secs)
    }

    /// Utility handler timeout
    pub fn utility_timeout(&self) -> Duration {
        Duration::from_secs(self.utility_timeout_secs)
    }
}
