//! Message buffer for accumulating partial reads.
//!
//! Uses `bytes::BytesMut` so complete bodies are split off without copying.
//! A small state machine handles fragmented messages:
//! - `WaitingForHeader`: need the 4-byte length prefix
//! - `WaitingForBody`: prefix parsed, need N more body bytes
//!
//! # Example
//!
//! ```
//! use agentwire::protocol::{encode_message, MessageBuffer};
//!
//! let encoded = encode_message(&"line").unwrap();
//! let mut buffer = MessageBuffer::new();
//!
//! assert!(buffer.push(&encoded[..3]).unwrap().is_empty());
//! let bodies = buffer.push(&encoded[3..]).unwrap();
//! assert_eq!(bodies.len(), 1);
//! ```

use bytes::{Bytes, BytesMut};

use super::wire_format::{decode_header, validate_length, DEFAULT_MAX_MESSAGE_SIZE, HEADER_SIZE};
use crate::error::Result;

#[derive(Debug, Clone, Copy)]
enum State {
    WaitingForHeader,
    WaitingForBody { remaining: u32 },
}

/// Buffer for accumulating incoming bytes and extracting complete message bodies.
pub struct MessageBuffer {
    /// Accumulated bytes from socket reads.
    buffer: BytesMut,
    state: State,
    max_message_size: u32,
}

impl MessageBuffer {
    /// Create a new buffer with default settings (64KB capacity, 64 MiB max).
    pub fn new() -> Self {
        Self::with_max_message(DEFAULT_MAX_MESSAGE_SIZE)
    }

    /// Create a new buffer with a custom maximum body size.
    pub fn with_max_message(max_message_size: u32) -> Self {
        Self {
            buffer: BytesMut::with_capacity(64 * 1024),
            state: State::WaitingForHeader,
            max_message_size,
        }
    }

    /// Push data into the buffer and extract all complete bodies.
    ///
    /// Partial data stays buffered for the next push.
    ///
    /// # Errors
    ///
    /// Returns error if a length prefix exceeds the maximum message size.
    pub fn push(&mut self, data: &[u8]) -> Result<Vec<Bytes>> {
        self.buffer.extend_from_slice(data);

        let mut bodies = Vec::new();
        while let Some(body) = self.try_extract_one()? {
            bodies.push(body);
        }
        Ok(bodies)
    }

    fn try_extract_one(&mut self) -> Result<Option<Bytes>> {
        loop {
            match self.state {
                State::WaitingForHeader => {
                    let Some(length) = decode_header(&self.buffer) else {
                        return Ok(None);
                    };
                    validate_length(length, self.max_message_size)?;

                    let _ = self.buffer.split_to(HEADER_SIZE);
                    self.state = State::WaitingForBody { remaining: length };
                }
                State::WaitingForBody { remaining } => {
                    let remaining = remaining as usize;
                    if self.buffer.len() < remaining {
                        return Ok(None);
                    }

                    let body = self.buffer.split_to(remaining).freeze();
                    self.state = State::WaitingForHeader;
                    return Ok(Some(body));
                }
            }
        }
    }

    /// Get the number of buffered bytes.
    pub fn len(&self) -> usize {
        self.buffer.len()
    }

    /// Check if the buffer is empty.
    pub fn is_empty(&self) -> bool {
        self.buffer.is_empty()
    }

    /// Check if a message has started but not yet completed.
    pub fn has_partial(&self) -> bool {
        !self.buffer.is_empty() || matches!(self.state, State::WaitingForBody { .. })
    }

    /// Clear the buffer and reset state.
    pub fn clear(&mut self) {
        self.buffer.clear();
        self.state = State::WaitingForHeader;
    }

    #[cfg(test)]
    fn state_name(&self) -> &'static str {
        match self.state {
            State::WaitingForHeader => "WaitingForHeader",
            State::WaitingForBody { .. } => "WaitingForBody",
        }
    }
}

impl Default for MessageBuffer {
    fn default() -> Self {
        Self::new()
    }
}
