//! # Tether Net
//!
//! TCP connection layer shared by the Tether agent and server.

#![warn(missing_docs)]

/// Dialer abstraction and the TCP implementation
pub mod transport;

/// Connection lifecycle, framed receive and best-effort send
pub mod connection;

/// Connection tuning knobs
pub mod config;

/// Periodic keepalive task
mod keepalive;

/// Transport error types
pub mod error;

pub use config::ConnectionConfig;
pub use connection::{Connection, ConnectionHandle, ConnectionState, Received};
pub use error::TransportError;
pub use transport::{Dialer, TcpDialer};
