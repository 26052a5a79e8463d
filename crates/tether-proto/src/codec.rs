//! Stateless frame codec
//!
//! There is no buffering across calls: every `decode` consumes exactly the
//! bytes returned by a single socket read, so a frame must fit in one
//! receive buffer.

use crate::frame::{FRAME_END, FRAME_START, FRAME_TERMINATOR};
use crate::{Frame, ProtocolError};
use bytes::{BufMut, Bytes, BytesMut};

/// Size of a single receive, and therefore the largest frame a peer accepts
pub const RECEIVE_BUFFER_SIZE: usize = 4096;

/// Notice sent back to the peer when a received buffer is not a valid frame
pub const PROTOCOL_ERROR_NOTICE: &str =
    "Invalid command format. Command must start with '>>' and end with '<<'.";

/// Header prefixed to every output record sent by the agent
pub const OUTPUT_HEADER: &str = "Output:\n";

/// Frame codec for the command direction
#[derive(Debug, Clone)]
pub struct FrameCodec {
    /// Maximum encoded frame size allowed
    max_frame_size: usize,
}

impl Default for FrameCodec {
    fn default() -> Self {
        Self::new()
    }
}

impl FrameCodec {
    /// Create a codec bounded by the default receive buffer size
    pub fn new() -> Self {
        Self {
            max_frame_size: RECEIVE_BUFFER_SIZE,
        }
    }

    /// Create a codec with a custom max frame size
    pub fn with_max_frame_size(max_frame_size: usize) -> Self {
        Self { max_frame_size }
    }

    /// Maximum encoded frame size
    pub fn max_frame_size(&self) -> usize {
        self.max_frame_size
    }

    /// Encode a frame to its wire form, `>>payload<<\n`
    pub fn encode_frame(&self, frame: &Frame) -> Result<Bytes, ProtocolError> {
        let size = frame.wire_len();
        if size > self.max_frame_size {
            return Err(ProtocolError::FrameTooLarge {
                size,
                max: self.max_frame_size,
            });
        }

        let mut buf = BytesMut::with_capacity(size);
        buf.put_slice(FRAME_START.as_bytes());
        buf.put_slice(frame.payload().as_bytes());
        buf.put_slice(FRAME_END.as_bytes());
        buf.put_slice(FRAME_TERMINATOR.as_bytes());
        Ok(buf.freeze())
    }

    /// Encode a raw payload
    pub fn encode(&self, payload: &str) -> Result<Bytes, ProtocolError> {
        self.encode_frame(&Frame::new(payload))
    }

    /// Decode the bytes of one receive.
    ///
    /// Returns `Ok(None)` for an empty payload, which carries no command and
    /// is not an error. A buffer missing either marker is rejected whole.
    pub fn decode(&self, raw: &[u8]) -> Result<Option<Frame>, ProtocolError> {
        let text = String::from_utf8_lossy(raw);
        let trimmed = text.trim();

        if !trimmed.starts_with(FRAME_START) {
            return Err(ProtocolError::MissingStartMarker {
                marker: FRAME_START,
            });
        }
        // ">><" both starts with the start marker and would end with the end
        // marker if the two were allowed to overlap
        if trimmed.len() < FRAME_START.len() + FRAME_END.len() || !trimmed.ends_with(FRAME_END) {
            return Err(ProtocolError::MissingEndMarker { marker: FRAME_END });
        }

        let payload = &trimmed[FRAME_START.len()..trimmed.len() - FRAME_END.len()];
        if payload.is_empty() {
            return Ok(None);
        }
        Ok(Some(Frame::new(payload)))
    }
}

/// Build an output-direction record, `Output:\n<text>\n`
pub fn encode_output(text: &str) -> Bytes {
    let text = text.trim();
    let mut buf = BytesMut::with_capacity(OUTPUT_HEADER.len() + text.len() + 1);
    buf.put_slice(OUTPUT_HEADER.as_bytes());
    buf.put_slice(text.as_bytes());
    buf.put_u8(b'\n');
    buf.freeze()
}
