//! Error types for protocol operations

use thiserror::Error;

/// Protocol-specific errors
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ProtocolError {
    /// The trimmed buffer does not begin with the start marker
    #[error("Invalid frame: missing start marker `{marker}`")]
    MissingStartMarker {
        /// Expected marker
        marker: &'static str,
    },

    /// The trimmed buffer does not end with the end marker
    #[error("Invalid frame: missing end marker `{marker}`")]
    MissingEndMarker {
        /// Expected marker
        marker: &'static str,
    },

    /// Frame too large to arrive in a single receive
    #[error("Frame too large: {size} bytes (max: {max})")]
    FrameTooLarge {
        /// Actual frame size
        size: usize,
        /// Maximum allowed size
        max: usize,
    },
}

impl ProtocolError {
    /// Whether the error came from decoding a received buffer
    pub fn is_malformed_frame(&self) -> bool {
        matches!(self, Self::MissingStartMarker { .. } | Self::MissingEndMarker { .. })
    }
}
