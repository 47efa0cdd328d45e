//! Messages exchanged on agent RPC connections.
//!
//! Field names follow the control plane's wire convention (PascalCase, with
//! `ID`/`JSON` acronyms upper-cased) so peers can decode them by name.

use bytes::Bytes;
use serde::{Deserialize, Serialize};

use crate::error::{AgentwireError, Result, RpcError};

/// Literal `ServerID` value addressing whichever replica currently leads.
pub const LEADER: &str = "leader";

/// Source tag stamped on frames produced by the log monitor.
pub const LOG_FRAME_EVENT: &str = "log";

/// Addressing fields shared by every agent request.
///
/// An empty string means "unset".
pub trait Addressed {
    /// Target worker node, if any.
    fn node_id(&self) -> &str;
    /// Target replica name, `"leader"`, or empty for this replica.
    fn server_id(&self) -> &str;
    /// Clear the replica target before forwarding to stop forwarding loops.
    fn clear_server_id(&mut self);
}

/// Request to stream the agent's live log output.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase", default)]
pub struct MonitorRequest {
    /// Worker node to monitor. Takes precedence over `server_id`.
    #[serde(rename = "NodeID")]
    pub node_id: String,
    /// Replica to monitor, or `"leader"`.
    #[serde(rename = "ServerID")]
    pub server_id: String,
    /// Minimum severity, case-insensitive; empty means `INFO`.
    pub log_level: String,
    /// Ask the log source for JSON-formatted lines.
    #[serde(rename = "LogJSON")]
    pub log_json: bool,
    /// Send raw log bytes instead of JSON-encoded frames.
    pub plain_text: bool,
    /// Opaque credential.
    pub auth_token: String,
}

impl Addressed for MonitorRequest {
    fn node_id(&self) -> &str {
        &self.node_id
    }

    fn server_id(&self) -> &str {
        &self.server_id
    }

    fn clear_server_id(&mut self) {
        self.server_id.clear();
    }
}

/// Request for a one-shot runtime profile.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase", default)]
pub struct AgentProfileRequest {
    /// Worker node to profile.
    #[serde(rename = "NodeID")]
    pub node_id: String,
    /// Replica to profile, or `"leader"`.
    #[serde(rename = "ServerID")]
    pub server_id: String,
    /// One of `cpu`, `cmdline`, `lookup`, `trace`.
    pub req_type: String,
    /// Capture duration for `cpu` and `trace`.
    pub seconds: u64,
    /// Profile name for `lookup`.
    pub profile: String,
    /// Verbosity for `lookup`.
    pub debug: i64,
    /// Opaque credential.
    pub auth_token: String,
}

impl Addressed for AgentProfileRequest {
    fn node_id(&self) -> &str {
        &self.node_id
    }

    fn server_id(&self) -> &str {
        &self.server_id
    }

    fn clear_server_id(&mut self) {
        self.server_id.clear();
    }
}

/// Result of a profile capture.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase", default)]
pub struct AgentProfileResponse {
    /// Replica or node that actually produced the payload.
    #[serde(rename = "AgentID")]
    pub agent_id: String,
    /// Raw captured bytes.
    pub payload: Bytes,
}

/// One increment of a log stream.
///
/// JSON-encoded inside an envelope payload unless the caller asked for plain
/// text. `Data` is base64 in that encoding.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase", default)]
pub struct StreamFrame {
    /// Logical offset: bytes emitted on this stream before this frame.
    pub offset: i64,
    /// Log bytes.
    #[serde(with = "base64_bytes")]
    pub data: Bytes,
    /// Source file, empty for the log monitor.
    pub file: String,
    /// Source tag.
    pub file_event: String,
}

impl StreamFrame {
    /// Heartbeat frames carry neither data nor an event.
    pub fn heartbeat() -> Self {
        Self::default()
    }

    /// Check if this frame is a heartbeat.
    #[inline]
    pub fn is_heartbeat(&self) -> bool {
        self.data.is_empty() && self.file_event.is_empty()
    }
}

/// The only unit written to a streaming caller.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase", default)]
pub struct StreamEnvelope {
    /// Raw log bytes (plain text) or a JSON-encoded [`StreamFrame`].
    pub payload: Bytes,
    /// Terminal error.
    pub error: Option<RpcError>,
}

impl StreamEnvelope {
    /// Data envelope.
    pub fn data(payload: Bytes) -> Self {
        Self {
            payload,
            error: None,
        }
    }

    /// Terminal error envelope.
    pub fn error(error: RpcError) -> Self {
        Self {
            payload: Bytes::new(),
            error: Some(error),
        }
    }

    /// Check if this envelope terminates the stream.
    #[inline]
    pub fn is_error(&self) -> bool {
        self.error.is_some()
    }
}

/// First message on every RPC connection, naming the endpoint.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct RpcHeader {
    /// Registered endpoint name, e.g. `"Agent.Monitor"`.
    pub method: String,
}

impl RpcHeader {
    pub fn new(method: impl Into<String>) -> Self {
        Self {
            method: method.into(),
        }
    }
}

/// Reply to a unary call. Exactly one of `error` and `body` is set.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct RpcResponse<T> {
    pub error: Option<RpcError>,
    pub body: Option<T>,
}

impl<T> RpcResponse<T> {
    /// Successful reply.
    pub fn ok(body: T) -> Self {
        Self {
            error: None,
            body: Some(body),
        }
    }

    /// Failed reply.
    pub fn err(error: RpcError) -> Self {
        Self {
            error: Some(error),
            body: None,
        }
    }

    /// Convert into a `Result`, treating a reply with neither field as a
    /// protocol violation.
    pub fn into_result(self) -> Result<T> {
        match (self.error, self.body) {
            (Some(err), _) => Err(AgentwireError::Remote(err)),
            (None, Some(body)) => Ok(body),
            (None, None) => Err(AgentwireError::Protocol(
                "response carries neither body nor error".to_string(),
            )),
        }
    }
}

impl<T> From<std::result::Result<T, RpcError>> for RpcResponse<T> {
    fn from(result: std::result::Result<T, RpcError>) -> Self {
        match result {
            Ok(body) => Self::ok(body),
            Err(err) => Self::err(err),
        }
    }
}

mod base64_bytes {
    use base64::engine::general_purpose::STANDARD;
    use base64::Engine;
    use bytes::Bytes;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(data: &Bytes, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&STANDARD.encode(data))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Bytes, D::Error> {
        let encoded = String::deserialize(deserializer)?;
        STANDARD
            .decode(encoded.as_bytes())
            .map(Bytes::from)
            .map_err(serde::de::Error::custom)
    }
}
