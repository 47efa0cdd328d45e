//! Caller-side helpers for agent endpoints.
//!
//! # Example
//!
//! ```ignore
//! use agentwire::remote::open_monitor;
//! use agentwire::protocol::MonitorRequest;
//!
//! let conn = dialer.open_stream(&replica, "Agent.Monitor").await?;
//! let mut stream = open_monitor(conn, &MonitorRequest::default()).await?;
//! while let Some(envelope) = stream.next().await? {
//!     print!("{}", String::from_utf8_lossy(&envelope.payload));
//! }
//! ```

use std::collections::VecDeque;

use bytes::Bytes;
use serde::de::DeserializeOwned;
use serde::Serialize;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite};

use crate::codec::MsgPackCodec;
use crate::error::{AgentwireError, Result};
use crate::protocol::{
    MessageBuffer, MonitorRequest, RpcResponse, StreamEnvelope, DEFAULT_MAX_MESSAGE_SIZE,
};
use crate::transport::{read_message, write_message, Conn};

/// Read buffer size for envelope streams.
const READ_CHUNK: usize = 16 * 1024;

/// Send one request and read exactly one response.
///
/// A coded remote error comes back as `AgentwireError::Remote`.
pub async fn call_unary<C, Req, Resp>(conn: &mut C, request: &Req, max_message_size: u32) -> Result<Resp>
where
    C: AsyncRead + AsyncWrite + Unpin + Send + ?Sized,
    Req: Serialize + Sync,
    Resp: DeserializeOwned,
{
    write_message(conn, request).await?;
    let response: RpcResponse<Resp> = read_message(conn, max_message_size).await?;
    response.into_result()
}

/// Start a monitor session on an already addressed connection.
pub async fn open_monitor<C: Conn>(mut conn: C, request: &MonitorRequest) -> Result<EnvelopeStream<C>> {
    write_message(&mut conn, request).await?;
    Ok(EnvelopeStream::new(conn))
}

/// Envelopes arriving on a monitor connection.
pub struct EnvelopeStream<C> {
    conn: C,
    buffer: MessageBuffer,
    ready: VecDeque<Bytes>,
    read_buf: Vec<u8>,
}

impl<C: Conn> EnvelopeStream<C> {
    pub fn new(conn: C) -> Self {
        Self::with_max_message(conn, DEFAULT_MAX_MESSAGE_SIZE)
    }

    pub fn with_max_message(conn: C, max_message_size: u32) -> Self {
        Self {
            conn,
            buffer: MessageBuffer::with_max_message(max_message_size),
            ready: VecDeque::new(),
            read_buf: vec![0u8; READ_CHUNK],
        }
    }

    /// Next envelope, or `None` once the connection closed cleanly.
    ///
    /// # Errors
    ///
    /// `ConnectionClosed` if the connection ends inside a message.
    pub async fn next(&mut self) -> Result<Option<StreamEnvelope>> {
        loop {
            if let Some(body) = self.ready.pop_front() {
                return MsgPackCodec::decode(&body).map(Some);
            }

            let n = self.conn.read(&mut self.read_buf).await?;
            if n == 0 {
                if self.buffer.has_partial() {
                    return Err(AgentwireError::ConnectionClosed);
                }
                return Ok(None);
            }
            self.ready.extend(self.buffer.push(&self.read_buf[..n])?);
        }
    }

    /// Read envelopes until the stream ends or carries an error.
    pub async fn collect(mut self) -> Result<Vec<StreamEnvelope>> {
        let mut out = Vec::new();
        while let Some(envelope) = self.next().await? {
            let terminal = envelope.is_error();
            out.push(envelope);
            if terminal {
                break;
            }
        }
        Ok(out)
    }

    /// Give back the connection. Buffered but unread envelopes are lost.
    pub fn into_inner(self) -> C {
        self.conn
    }
}
