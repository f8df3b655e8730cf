//! Payload schema codec.
//!
//! Frame payloads are schema-encoded and opaque to the transport; this
//! MessagePack codec is the pluggable seam where that encoding lives.
//!
//! **Always `to_vec_named`, never `to_vec`**: structs are serialized as maps
//! (with field names), so payloads stay decodable across field reordering
//! between protocol revisions.

use crate::error::Result;

/// MessagePack codec for schema-encoded payloads.
///
/// Implemented as a marker struct with static methods rather than a trait
/// object, allowing compile-time codec selection.
pub struct MsgPackCodec;

impl MsgPackCodec {
    /// Encode a value to MsgPack bytes (struct-as-map format).
    #[inline]
    pub fn encode<T: serde::Serialize>(value: &T) -> Result<Vec<u8>> {
        Ok(rmp_serde::to_vec_named(value)?)
    }

    /// Decode MsgPack bytes to a value.
    #[inline]
    pub fn decode<T: serde::de::DeserializeOwned>(bytes: &[u8]) -> Result<T> {
        Ok(rmp_serde::from_slice(bytes)?)
    }
}
