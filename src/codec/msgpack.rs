//! MsgPack codec using `rmp-serde`.
//!
//! **Always** encode with `to_vec_named`. Peers in the control plane decode
//! structs by field name, so structs must go out as maps, not positional
//! arrays.
//!
//! # Example
//!
//! ```
//! use agentwire::codec::MsgPackCodec;
//! use agentwire::protocol::MonitorRequest;
//!
//! let req = MonitorRequest { log_level: "debug".into(), ..Default::default() };
//! let encoded = MsgPackCodec::encode(&req).unwrap();
//! let decoded: MonitorRequest = MsgPackCodec::decode(&encoded).unwrap();
//! assert_eq!(decoded, req);
//! ```

use crate::error::Result;

/// MessagePack codec for control messages.
pub struct MsgPackCodec;

impl MsgPackCodec {
    /// Encode a value to MsgPack bytes in struct-as-map format.
    ///
    /// # Errors
    ///
    /// Returns error if the value cannot be serialized.
    #[inline]
    pub fn encode<T: serde::Serialize>(value: &T) -> Result<Vec<u8>> {
        Ok(rmp_serde::to_vec_named(value)?)
    }

    /// Decode MsgPack bytes to a value.
    ///
    /// # Errors
    ///
    /// Returns error if the bytes cannot be deserialized to type T.
    #[inline]
    pub fn decode<T: serde::de::DeserializeOwned>(bytes: &[u8]) -> Result<T> {
        Ok(rmp_serde::from_slice(bytes)?)
    }
}
