//! # Tether Protocol
//!
//! Frame codec and command model for the Tether remote command channel.
//!
//! The command direction (server to agent) carries marker-delimited frames,
//! `>>` + batch + `<<`. The output direction (agent to server) carries plain
//! text records and is never frame-wrapped.

#![warn(missing_docs)]

/// Frame structure and wire markers
pub mod frame;

/// Stateless frame codec
pub mod codec;

/// Command batches, commands and their dispatch kinds
pub mod command;

/// Error types for protocol operations
pub mod error;

pub use codec::{FrameCodec, RECEIVE_BUFFER_SIZE, PROTOCOL_ERROR_NOTICE};
pub use command::{Command, CommandBatch, CommandKind, Utility};
pub use error::ProtocolError;
pub use frame::Frame;
