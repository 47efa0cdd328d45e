//! Codec module - serialization of control messages and frame payloads.
//!
//! - [`MsgPackCodec`] - MessagePack via `rmp-serde`, used for every control
//!   message on a connection (requests, responses, stream envelopes)
//! - [`JsonCodec`] - JSON via `serde_json`, used for the secondary encoding of
//!   log frames nested inside an envelope payload
//!
//! # Example
//!
//! ```
//! use agentwire::codec::{JsonCodec, MsgPackCodec};
//!
//! let encoded = MsgPackCodec::encode(&"hello").unwrap();
//! let decoded: String = MsgPackCodec::decode(&encoded).unwrap();
//! assert_eq!(decoded, "hello");
//!
//! let json = JsonCodec::encode(&vec![1, 2]).unwrap();
//! assert_eq!(&json[..], b"[1,2]");
//! ```

mod json;
mod msgpack;

pub use json::JsonCodec;
pub use msgpack::MsgPackCodec;
