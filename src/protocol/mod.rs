//! Protocol module - wire format, message reassembly, and message types.
//!
//! - 4-byte length prefix + MsgPack body for every structured message
//! - [`MessageBuffer`] for reassembling messages from fragmented reads
//! - Request, response, frame and envelope types

mod message_buffer;
mod messages;
mod wire_format;

pub use message_buffer::MessageBuffer;
pub use messages::{
    Addressed, AgentProfileRequest, AgentProfileResponse, MonitorRequest, RpcHeader, RpcResponse,
    StreamEnvelope, StreamFrame, LEADER, LOG_FRAME_EVENT,
};
pub use wire_format::{
    decode_header, encode_header, encode_message, validate_length, DEFAULT_MAX_MESSAGE_SIZE,
    HEADER_SIZE,
};
