//! Error types for agentwire.
//!
//! Every failure that can reach a caller maps onto one of the response codes
//! understood by the cluster RPC layer (see [`AgentwireError::code`]).

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Invalid target or argument.
pub const CODE_BAD_REQUEST: i64 = 400;
/// Caller lacks the required agent capability.
pub const CODE_PERMISSION_DENIED: i64 = 403;
/// Unknown node connection, profile or request type.
pub const CODE_NOT_FOUND: i64 = 404;
/// Internal or transport failure.
pub const CODE_INTERNAL: i64 = 500;

/// Main error type for all agentwire operations.
#[derive(Debug, Error)]
pub enum AgentwireError {
    /// I/O error on a connection.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON error while encoding a stream frame.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// MsgPack serialization error.
    #[error("MsgPack encode error: {0}")]
    MsgPackEncode(#[from] rmp_serde::encode::Error),

    /// MsgPack deserialization error.
    #[error("MsgPack decode error: {0}")]
    MsgPackDecode(#[from] rmp_serde::decode::Error),

    /// Malformed message on the wire.
    #[error("Protocol error: {0}")]
    Protocol(String),

    /// No endpoint registered under the requested method name.
    #[error("Unknown RPC method: {0}")]
    UnknownMethod(String),

    /// The node is not present in the catalog.
    #[error("Unknown node {0:?}")]
    UnknownNode(String),

    /// The node's agent is too old to serve streaming RPCs.
    #[error("node {0:?} does not support agent RPCs")]
    NodeUnsupported(String),

    /// No replica holds a live connection to the node.
    #[error("No path to node {0:?}")]
    NoNodeConnection(String),

    /// The named replica is not a known member.
    #[error("unknown server {0}")]
    UnknownServer(String),

    /// Leadership is not currently known.
    #[error("No cluster leader")]
    NoLeader,

    /// Node or membership lookup failed.
    #[error("lookup failed: {0}")]
    Lookup(String),

    /// Token could not be resolved.
    #[error("token resolution failed: {0}")]
    Token(String),

    /// Token resolved but lacks the required capability.
    #[error("Permission denied")]
    PermissionDenied,

    /// Log level string does not name a known severity.
    #[error("Unknown log level")]
    InvalidLogLevel,

    /// Profile request type is not one of the known kinds.
    #[error("Unknown profile request type")]
    UnknownRequestType,

    /// The requested named profile does not exist.
    #[error("profile not found: {0}")]
    ProfileNotFound(String),

    /// Capture routine failed.
    #[error("capture failed: {0}")]
    Capture(String),

    /// Frame buffer stopped accepting entries.
    #[error("frame buffer closed")]
    FramerClosed,

    /// Connection closed before a complete message arrived.
    #[error("Connection closed")]
    ConnectionClosed,

    /// Coded error returned by a remote agent.
    #[error("{0}")]
    Remote(RpcError),
}

impl AgentwireError {
    /// Response code surfaced to the caller, if any.
    pub fn code(&self) -> Option<i64> {
        match self {
            Self::UnknownNode(_)
            | Self::NodeUnsupported(_)
            | Self::UnknownServer(_)
            | Self::NoLeader
            | Self::InvalidLogLevel => Some(CODE_BAD_REQUEST),
            Self::PermissionDenied => Some(CODE_PERMISSION_DENIED),
            Self::NoNodeConnection(_)
            | Self::UnknownRequestType
            | Self::ProfileNotFound(_)
            | Self::UnknownMethod(_) => Some(CODE_NOT_FOUND),
            // Token failures are reported uncoded; the caller decides.
            Self::Token(_) => None,
            Self::Remote(err) => err.code,
            _ => Some(CODE_INTERNAL),
        }
    }

    /// Wire form of this error.
    pub fn to_rpc(&self) -> RpcError {
        match self {
            Self::Remote(err) => err.clone(),
            other => RpcError {
                message: other.to_string(),
                code: other.code(),
            },
        }
    }

    /// Wire form with an explicit code, overriding the default mapping.
    pub fn to_rpc_coded(&self, code: i64) -> RpcError {
        RpcError {
            message: self.to_string(),
            code: Some(code),
        }
    }
}

/// Error as carried in responses and stream envelopes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct RpcError {
    /// Human-readable message.
    pub message: String,
    /// Response code, when known.
    pub code: Option<i64>,
}

impl RpcError {
    /// Create a coded error.
    pub fn coded(code: i64, message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            code: Some(code),
        }
    }
}

impl std::fmt::Display for RpcError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self.code {
            Some(code) => write!(f, "{} ({})", self.message, code),
            None => f.write_str(&self.message),
        }
    }
}

impl From<RpcError> for AgentwireError {
    fn from(err: RpcError) -> Self {
        Self::Remote(err)
    }
}

/// Result type alias using AgentwireError.
pub type Result<T> = std::result::Result<T, AgentwireError>;
