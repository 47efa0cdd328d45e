//! Wire format for structured messages.
//!
//! Each message is a length prefix followed by a MsgPack body:
//! ```text
//! ┌──────────┬──────────────────────┐
//! │ Length   │ Body (MsgPack map)   │
//! │ 4 bytes  │ `Length` bytes       │
//! │ uint32 BE│                      │
//! └──────────┴──────────────────────┘
//! ```

use bytes::{BufMut, Bytes, BytesMut};

use crate::codec::MsgPackCodec;
use crate::error::{AgentwireError, Result};

/// Length prefix size in bytes.
pub const HEADER_SIZE: usize = 4;

/// Default maximum message body size (64 MiB).
pub const DEFAULT_MAX_MESSAGE_SIZE: u32 = 64 * 1024 * 1024;

/// Encode a length prefix (Big Endian).
#[inline]
pub fn encode_header(body_length: u32) -> [u8; HEADER_SIZE] {
    body_length.to_be_bytes()
}

/// Decode a length prefix.
///
/// Returns `None` if the buffer is too short.
///
/// # Example
///
/// ```
/// use agentwire::protocol::decode_header;
///
/// assert_eq!(decode_header(&[0, 0, 1, 0]), Some(256));
/// assert_eq!(decode_header(&[0, 0]), None);
/// ```
#[inline]
pub fn decode_header(buf: &[u8]) -> Option<u32> {
    if buf.len() < HEADER_SIZE {
        return None;
    }
    Some(u32::from_be_bytes([buf[0], buf[1], buf[2], buf[3]]))
}

/// Reject bodies above the configured maximum.
pub fn validate_length(body_length: u32, max_message_size: u32) -> Result<()> {
    if body_length > max_message_size {
        return Err(AgentwireError::Protocol(format!(
            "Message size {} exceeds maximum {}",
            body_length, max_message_size
        )));
    }
    Ok(())
}

/// Serialize a value and prepend its length prefix.
pub fn encode_message<T: serde::Serialize>(value: &T) -> Result<Bytes> {
    let body = MsgPackCodec::encode(value)?;
    let length = u32::try_from(body.len()).map_err(|_| {
        AgentwireError::Protocol(format!("Message size {} does not fit u32", body.len()))
    })?;

    let mut buf = BytesMut::with_capacity(HEADER_SIZE + body.len());
    buf.put_slice(&encode_header(length));
    buf.put_slice(&body);
    Ok(buf.freeze())
}
