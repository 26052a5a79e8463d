//! Frame structure and wire markers

use std::fmt;

/// Marker that opens every command frame
pub const FRAME_START: &str = ">>";

/// Marker that closes every command frame
pub const FRAME_END: &str = "<<";

/// Line terminator appended after the end marker
pub const FRAME_TERMINATOR: &str = "\n";

/// Reserved payload carried by keepalive frames
pub const KEEPALIVE_PAYLOAD: &str = "ping";

/// A command-direction frame: the payload between the markers
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    payload: String,
}

impl Frame {
    /// Create a frame carrying `payload`
    pub fn new(payload: impl Into<String>) -> Self {
        Self {
            payload: payload.into(),
        }
    }

    /// Create a keepalive frame
    pub fn keepalive() -> Self {
        Self::new(KEEPALIVE_PAYLOAD)
    }

    /// The unwrapped payload
    pub fn payload(&self) -> &str {
        &self.payload
    }

    /// Consume the frame, returning its payload
    pub fn into_payload(self) -> String {
        self.payload
    }

    /// Check if this is a keepalive frame
    pub fn is_keepalive(&self) -> bool {
        self.payload == KEEPALIVE_PAYLOAD
    }

    /// Size of the encoded frame in bytes, terminator included
    pub fn wire_len(&self) -> usize {
        FRAME_START.len() + self.payload.len() + FRAME_END.len() + FRAME_TERMINATOR.len()
    }
}

impl fmt::Display for Frame {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}{}", FRAME_START, self.payload, FRAME_END)
    }
}
