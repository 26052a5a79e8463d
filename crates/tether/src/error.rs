//! Error types for the Tether server

use crate::registry::ClientId;
use std::io;
use thiserror::Error;

/// Main error type for server operations
#[derive(Debug, Error)]
pub enum ServerError {
    /// The listening socket could not be bound
    #[error("Failed to bind {addr}: {source}")]
    Bind {
        /// Address that was requested
        addr: String,
        /// Underlying error
        source: io::Error,
    },

    /// I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// Configuration errors
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    /// Protocol errors while framing a command
    #[error("Protocol error: {0}")]
    Protocol(#[from] tether_proto::ProtocolError),

    /// No session with this id is registered
    #[error("Client #{0} not available")]
    UnknownClient(ClientId),

    /// A console line could not be parsed
    #[error("{0}")]
    Usage(String),
}

/// Configuration loading errors
#[derive(Debug, Error)]
pub enum ConfigError {
    /// The config file could not be read
    #[error("Failed to read {path}: {source}")]
    Read {
        /// Path of the config file
        path: String,
        /// Underlying error
        source: io::Error,
    },

    /// The config file is not valid JSON for this schema
    #[error("Invalid config {path}: {source}")]
    Parse {
        /// Path of the config file
        path: String,
        /// Underlying error
        source: serde_json::Error,
    },

    /// A value is out of range
    #[error("Invalid value for {field}: {reason}")]
    Invalid {
        /// Offending field
        field: &'static str,
        /// Why it was rejected
        reason: String,
    },
}

/// Result type alias for server operations
pub type Result<T> = std::result::Result<T, ServerError>;
