//! Dialer abstraction and the TCP implementation

use crate::TransportError;
use async_trait::async_trait;
use std::time::Duration;
use tokio::net::TcpStream;
use tracing::debug;

/// Opens outbound connections to a fixed target
#[async_trait]
pub trait Dialer: Send + Sync {
    /// Make one connection attempt
    async fn dial(&self) -> Result<TcpStream, TransportError>;

    /// Human-readable target, for logs
    fn target(&self) -> String;
}

/// Plain TCP dialer
#[derive(Debug, Clone)]
pub struct TcpDialer {
    /// `host:port` to connect to
    addr: String,
    /// Bound on a single attempt
    connect_timeout: Duration,
}

impl TcpDialer {
    /// Create a dialer for `host:port`
    pub fn new(host: &str, port: u16, connect_timeout: Duration) -> Self {
        Self {
            addr: format!("{}:{}", host, port),
            connect_timeout,
        }
    }
}

#[async_trait]
impl Dialer for TcpDialer {
    async fn dial(&self) -> Result<TcpStream, TransportError> {
        debug!("Dialing {}", self.addr);
        match tokio::time::timeout(self.connect_timeout, TcpStream::connect(&self.addr)).await {
            Ok(Ok(stream)) => Ok(stream),
            Ok(Err(e)) => Err(TransportError::Connection(format!(
                "Failed to connect to {}: {}",
                self.addr, e
            ))),
            Err(_) => Err(TransportError::Timeout),
        }
    }

    fn target(&self) -> String {
        self.addr.clone()
    }
}
