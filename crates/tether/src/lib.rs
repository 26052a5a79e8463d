//! # Tether
//!
//! Multi-client command server. Agents connect in, the operator selects them
//! from a line console and sends command batches; everything the agents send
//! back is printed and appended to a log file.

#![warn(missing_docs)]

pub use tether_proto as proto;

/// Error types for the Tether server
pub mod error;

/// Server configuration
pub mod config;

/// Client registry and session notifications
pub mod registry;

/// Client output sinks
pub mod output;

/// Accept loop and per-client reader tasks
pub mod server;

/// Operator console
pub mod console;

pub use config::ServerConfig;
pub use console::{Console, ConsoleCommand, Outcome};
pub use error::{ConfigError, Result, ServerError};
pub use output::{ClientOutput, ConsoleOutputSink, FanoutSink, FileOutputSink, OutputSink};
pub use registry::{ClientId, ClientRegistry, LogNotifier, Notifier, Session, SessionEvent, SessionInfo};
pub use server::Server;
