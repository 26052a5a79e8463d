//! Connection tuning knobs

use serde::{Deserialize, Serialize};
use std::time::Duration;
use tether_proto::RECEIVE_BUFFER_SIZE;

/// Connection configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ConnectionConfig {
    /// Connect attempts per `connect()` call
    pub connect_retries: u32,
    /// Wait after the first failed attempt, doubled after each further one
    pub retry_base_delay_ms: u64,
    /// Bound on a single connect attempt, in seconds
    pub connect_timeout_secs: u64,
    /// Keepalive interval; `None` or zero disables keepalive
    pub keepalive_interval_ms: Option<u64>,
    /// Bound on a single read, in seconds; `None` blocks until data or error
    pub read_timeout_secs: Option<u64>,
    /// Size of a single receive
    pub receive_buffer_size: usize,
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            connect_retries: 5,
            retry_base_delay_ms: 20_000,
            connect_timeout_secs: 30,
            keepalive_interval_ms: Some(30_000),
            read_timeout_secs: None,
            receive_buffer_size: RECEIVE_BUFFER_SIZE,
        }
    }
}

impl ConnectionConfig {
    /// Configuration for a server-side client handle: no dialing, no
    /// keepalive, reads bounded by `idle_timeout`
    pub fn accepted(idle_timeout: Option<Duration>) -> Self {
        Self {
            connect_retries: 0,
            keepalive_interval_ms: None,
            read_timeout_secs: idle_timeout.map(|d| d.as_secs().max(1)),
            ..Self::default()
        }
    }

    /// Base retry delay
    pub fn retry_base_delay(&self) -> Duration {
        Duration::from_millis(self.retry_base_delay_ms)
    }

    /// Connect timeout
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs)
    }

    /// Keepalive interval, if enabled
    pub fn keepalive_interval(&self) -> Option<Duration> {
        self.keepalive_interval_ms
            .filter(|ms| *ms > 0)
            .map(Duration::from_millis)
    }

    /// Read timeout, if any
    pub fn read_timeout(&self) -> Option<Duration> {
        self.read_timeout_secs.map(Duration::from_secs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = ConnectionConfig::default();
        assert_eq!(config.connect_retries, 5);
        assert_eq!(config.retry_base_delay(), Duration::from_secs(20));
        assert_eq!(config.receive_buffer_size, 4096);
        assert_eq!(config.read_timeout(), None);
    }

    #[test]
    fn test_zero_keepalive_disables() {
        let config = ConnectionConfig {
            keepalive_interval_ms: Some(0),
            ..Default::default()
        };
        assert_eq!(config.keepalive_interval(), None);
    }

    #[test]
    fn test_accepted_profile() {
        let config = ConnectionConfig::accepted(Some(Duration::from_secs(300)));
        assert_eq!(config.keepalive_interval(), None);
        assert_eq!(config.read_timeout(), Some(Duration::from_secs(300)));
    }
}
