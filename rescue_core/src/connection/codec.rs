//! Message framing: 4-byte big-endian length prefix + one JSON document.

use crate::error::ConnectionError;
use crate::messages::Message;

/// Encoding/decoding context shared by every connection of a process.
///
/// Passed explicitly into connections and the connection manager instead of
/// living in process-wide state, so tests can run several independent
/// endpoints side by side.
#[derive(Debug)]
pub struct Codec {
    max_frame_len: usize,
}

impl Codec {
    /// Upper bound on a single frame; a handshake snapshot of a large city
    /// fits comfortably below this.
    pub const DEFAULT_MAX_FRAME_LEN: usize = 16 * 1024 * 1024;

    /// Creates a codec with the default frame limit.
    pub fn new() -> Self {
        Self {
            max_frame_len: Self::DEFAULT_MAX_FRAME_LEN,
        }
    }

    /// Creates a codec with a custom frame limit.
    pub fn with_max_frame_len(max_frame_len: usize) -> Self {
        Self { max_frame_len }
    }

    /// The frame limit enforced on both directions.
    pub fn max_frame_len(&self) -> usize {
        self.max_frame_len
    }

    /// Encodes one message into a length-prefixed frame.
    pub fn encode(&self, message: &Message) -> Result<Vec<u8>, ConnectionError> {
        let payload = serde_json::to_vec(message).map_err(ConnectionError::codec)?;
        if payload.len() > self.max_frame_len {
            return Err(ConnectionError::FrameTooLarge {
                got: payload.len(),
                limit: self.max_frame_len,
            });
        }
        let mut frame = Vec::with_capacity(payload.len() + 4);
        frame.extend_from_slice(&(payload.len() as u32).to_be_bytes());
        frame.extend_from_slice(&payload);
        Ok(frame)
    }

    /// Decodes one frame payload (without the length prefix).
    pub fn decode(&self, payload: &[u8]) -> Result<Message, ConnectionError> {
        serde_json::from_slice(payload).map_err(ConnectionError::codec)
    }
}

impl Default for Codec {
    fn default() -> Self {
        Self::new()
    }
}
