//! Transparent per-frame compression.
//!
//! Compression wraps an entire inner frame (header + payload) as an opaque
//! blob inside a reserved outer frame type. The splice layer makes this
//! invisible to everything above it: [`InflatingReader`] unwraps inbound
//! wrapper frames, [`DeflatingWriter`] wraps outbound frames whose payload
//! meets the size threshold, and the async channel applies the same engines
//! at the frame level.
//!
//! Wrapper payload layout (all integers Little Endian):
//! ```text
//! ┌───────────────┬────────────────────┬──────────────────┐
//! │ original_type │ uncompressed_size  │ compressed blob  │
//! │ 1 byte        │ 8 bytes (u64 LE)   │ rest of payload  │
//! └───────────────┴────────────────────┴──────────────────┘
//! ```
//! The blob inflates to one or more complete inner frames totalling exactly
//! `uncompressed_size` bytes.

mod engine;
mod reader;
mod writer;

pub use engine::{
    DeflateEngine, InflateEngine, ZlibDeflater, ZlibInflater, ZstdDeflater, ZstdInflater,
};
pub use reader::InflatingReader;
pub use writer::DeflatingWriter;

use crate::error::{Result, XwireError};

/// Length of the fixed prefix before the compressed blob.
pub const WRAPPER_PREFIX_LEN: usize = 9;

/// Supported compression algorithms, negotiated by capability name.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompressionAlgorithm {
    /// Stream-mode zlib (`deflate_stream`): reusable engines sharing one
    /// dictionary across frames.
    Zlib,
    /// One-shot zstd (`zstd_stream`): a fresh encoder per frame.
    Zstd,
}

impl CompressionAlgorithm {
    /// Parse a capability name. Returns `None` for unsupported algorithms
    /// (the caller should fall back to an uncompressed connection).
    pub fn from_name(name: &str) -> Option<Self> {
        match name {
            "deflate_stream" | "zlib" => Some(Self::Zlib),
            "zstd_stream" | "zstd" => Some(Self::Zstd),
            _ => None,
        }
    }

    /// The capability name for this algorithm.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Zlib => "deflate_stream",
            Self::Zstd => "zstd_stream",
        }
    }

    /// Build the outbound engine for this algorithm.
    pub fn deflater(&self) -> Box<dyn DeflateEngine> {
        match self {
            Self::Zlib => Box::new(ZlibDeflater::new()),
            Self::Zstd => Box::new(ZstdDeflater::new()),
        }
    }

    /// Build the inbound engine for this algorithm.
    pub fn inflater(&self) -> Box<dyn InflateEngine> {
        match self {
            Self::Zlib => Box::new(ZlibInflater::new()),
            Self::Zstd => Box::new(ZstdInflater),
        }
    }
}

/// Encode a wrapper frame payload.
pub fn encode_wrapper_payload(original_type: u8, uncompressed_size: u64, blob: &[u8]) -> Vec<u8> {
    let mut payload = Vec::with_capacity(WRAPPER_PREFIX_LEN + blob.len());
    payload.push(original_type);
    payload.extend_from_slice(&uncompressed_size.to_le_bytes());
    payload.extend_from_slice(blob);
    payload
}

/// Decode a wrapper frame payload into `(original_type, uncompressed_size,
/// blob)`.
pub fn decode_wrapper_payload(payload: &[u8]) -> Result<(u8, u64, &[u8])> {
    if payload.len() < WRAPPER_PREFIX_LEN {
        return Err(XwireError::Framing(format!(
            "compression wrapper payload too short: {} bytes",
            payload.len()
        )));
    }
    let original_type = payload[0];
    let uncompressed_size = u64::from_le_bytes([
        payload[1], payload[2], payload[3], payload[4], payload[5], payload[6], payload[7],
        payload[8],
    ]);
    Ok((original_type, uncompressed_size, &payload[WRAPPER_PREFIX_LEN..]))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn wrapper_payload_roundtrip() {
        let payload = encode_wrapper_payload(13, 1024, b"compressed");
        let (original_type, size, blob) = decode_wrapper_payload(&payload).unwrap();
        assert_eq!(original_type, 13);
        assert_eq!(size, 1024);
        assert_eq!(blob, b"compressed");
    }

    #[test]
    fn wrapper_prefix_is_little_endian() {
        let payload = encode_wrapper_payload(0xAB, 0x0102_0304, b"");
        assert_eq!(payload[0], 0xAB);
        assert_eq!(&payload[1..9], &[0x04, 0x03, 0x02, 0x01, 0, 0, 0, 0]);
    }

    #[test]
    fn short_wrapper_payload_is_framing() {
        assert!(decode_wrapper_payload(&[0u8; 8]).is_err());
    }

    #[test]
    fn algorithm_names() {
        assert_eq!(
            CompressionAlgorithm::from_name("deflate_stream"),
            Some(CompressionAlgorithm::Zlib)
        );
        assert_eq!(
            CompressionAlgorithm::from_name("zstd_stream"),
            Some(CompressionAlgorithm::Zstd)
        );
        assert_eq!(CompressionAlgorithm::from_name("lz4_message"), None);
        assert_eq!(CompressionAlgorithm::Zlib.as_str(), "deflate_stream");
    }

    #[test]
    fn engine_modes_match_algorithm() {
        assert!(CompressionAlgorithm::Zlib.deflater().reusable());
        assert!(CompressionAlgorithm::Zlib.inflater().reusable());
        assert!(!CompressionAlgorithm::Zstd.deflater().reusable());
        assert!(!CompressionAlgorithm::Zstd.inflater().reusable());
    }
}
