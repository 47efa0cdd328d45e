//! Connections, message I/O, and outbound dialing.
//!
//! Any `AsyncRead + AsyncWrite` byte stream can carry agent RPCs: TCP
//! sockets between replicas, multiplexed streams on a node session, or
//! `tokio::io::duplex` pipes in tests.
//!
//! # Example
//!
//! ```ignore
//! use agentwire::transport::{ReplicaDialer, TcpDialer};
//!
//! let dialer = TcpDialer::new();
//! let conn = dialer.open_stream(&replica, "Agent.Monitor").await?;
//! ```

use std::time::Duration;

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::Serialize;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::TcpStream;

use crate::cluster::ReplicaInfo;
use crate::codec::MsgPackCodec;
use crate::error::{AgentwireError, Result};
use crate::protocol::{decode_header, encode_message, validate_length, RpcHeader, HEADER_SIZE};

/// Initial body buffer; larger bodies grow it as bytes arrive.
const INITIAL_BODY_CAPACITY: usize = 8 * 1024;

/// Default timeout for establishing a replica connection.
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// A bidirectional byte stream usable as an RPC connection.
pub trait Conn: AsyncRead + AsyncWrite + Unpin + Send + 'static {}

impl<T> Conn for T where T: AsyncRead + AsyncWrite + Unpin + Send + 'static {}

/// Type-erased connection.
pub type BoxedConn = Box<dyn Conn>;

/// Read exactly one length-prefixed message.
///
/// Reads no further than the message end, so the remaining bytes on the
/// connection can be handed to a bridge untouched. Memory is committed only
/// for body bytes that actually arrive.
///
/// # Errors
///
/// `ConnectionClosed` if the stream ends before a complete message.
pub async fn read_message<R, T>(reader: &mut R, max_message_size: u32) -> Result<T>
where
    R: AsyncRead + Unpin + ?Sized,
    T: DeserializeOwned,
{
    let mut header = [0u8; HEADER_SIZE];
    reader.read_exact(&mut header).await.map_err(eof_as_closed)?;

    let length = decode_header(&header).unwrap_or_default();
    validate_length(length, max_message_size)?;

    let mut body = Vec::with_capacity((length as usize).min(INITIAL_BODY_CAPACITY));
    (&mut *reader)
        .take(u64::from(length))
        .read_to_end(&mut body)
        .await?;
    if body.len() < length as usize {
        return Err(AgentwireError::ConnectionClosed);
    }

    MsgPackCodec::decode(&body)
}

/// Write one length-prefixed message and flush.
pub async fn write_message<W, T>(writer: &mut W, value: &T) -> Result<()>
where
    W: AsyncWrite + Unpin + ?Sized,
    T: Serialize,
{
    let encoded = encode_message(value)?;
    writer.write_all(&encoded).await?;
    writer.flush().await?;
    Ok(())
}

fn eof_as_closed(err: std::io::Error) -> AgentwireError {
    if err.kind() == std::io::ErrorKind::UnexpectedEof {
        AgentwireError::ConnectionClosed
    } else {
        AgentwireError::Io(err)
    }
}

/// Opens RPC streams to peer replicas.
#[async_trait]
pub trait ReplicaDialer: Send + Sync {
    /// Open a connection to `replica` already addressed to `method`.
    async fn open_stream(&self, replica: &ReplicaInfo, method: &str) -> Result<BoxedConn>;
}

/// [`ReplicaDialer`] over plain TCP.
///
/// Each stream is a fresh connection whose first message is the
/// [`RpcHeader`] naming the endpoint.
#[derive(Debug, Clone)]
pub struct TcpDialer {
    connect_timeout: Duration,
}

impl TcpDialer {
    pub fn new() -> Self {
        Self {
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
        }
    }

    /// Set the connect timeout.
    pub fn connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }
}

impl Default for TcpDialer {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ReplicaDialer for TcpDialer {
    async fn open_stream(&self, replica: &ReplicaInfo, method: &str) -> Result<BoxedConn> {
        let connect = TcpStream::connect(replica.rpc_addr);
        let mut stream = tokio::time::timeout(self.connect_timeout, connect)
            .await
            .map_err(|_| {
                AgentwireError::Io(std::io::Error::new(
                    std::io::ErrorKind::TimedOut,
                    format!("connect to {} timed out", replica.name),
                ))
            })??;
        stream.set_nodelay(true)?;

        write_message(&mut stream, &RpcHeader::new(method)).await?;
        tracing::debug!(server = %replica.name, method, "opened replica stream");

        Ok(Box::new(stream))
    }
}
