//! Transport error types

use std::io;
use thiserror::Error;

/// Transport-specific errors
#[derive(Debug, Error)]
pub enum TransportError {
    /// Could not establish a connection
    #[error("Connection error: {0}")]
    Connection(String),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// Operation timed out
    #[error("Operation timed out")]
    Timeout,

    /// Peer closed the connection, or it was closed locally
    #[error("Connection closed")]
    Closed,

    /// Operation attempted while not connected
    #[error("Not connected")]
    NotConnected,
}

impl TransportError {
    /// Whether the error means the connection is gone
    pub fn is_disconnect(&self) -> bool {
        !matches!(self, Self::NotConnected)
    }
}
