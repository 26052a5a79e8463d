//! # Tether Agent
//!
//! Keeps a connection to the Tether server, executes the command batches it
//! receives and streams their output back.

#![warn(missing_docs)]

/// Agent main loop and reconnect policy
pub mod agent;

/// Command routing to the shell and to utility handlers
pub mod router;

/// Shell execution
pub mod handlers;

/// Agent configuration
pub mod config;

pub use agent::{AgentLoop, SessionEnd};
pub use config::{AgentConfig, DisconnectPolicy};
pub use handlers::ShellExecutor;
pub use router::{CommandOutput, CommandRouter, Dispatch, ResultSink, RouteReport, UtilityHandler};
