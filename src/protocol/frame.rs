//! Frame struct with typed accessors.
//!
//! Represents one length-prefixed wire unit: a decoded header plus its
//! payload. Uses `bytes::Bytes` for zero-copy payload sharing.

use bytes::Bytes;

use super::header::{FrameHeader, HEADER_SIZE};

/// A complete wire frame.
#[derive(Debug, Clone)]
pub struct Frame {
    /// Decoded header.
    pub header: FrameHeader,
    /// Payload bytes (zero-copy via `bytes::Bytes`).
    pub payload: Bytes,
}

impl Frame {
    /// Create a frame for `payload` with the given type tag.
    pub fn new(message_type: u8, payload: Bytes) -> Self {
        Self {
            header: FrameHeader::new(payload.len() as u32, message_type),
            payload,
        }
    }

    /// Create a frame from raw payload bytes (copies data).
    pub fn from_parts(message_type: u8, payload: &[u8]) -> Self {
        Self::new(message_type, Bytes::copy_from_slice(payload))
    }

    /// The frame's type tag.
    #[inline]
    pub fn message_type(&self) -> u8 {
        self.header.message_type
    }

    /// Get a reference to the payload bytes.
    #[inline]
    pub fn payload(&self) -> &[u8] {
        &self.payload
    }

    /// Get the payload length.
    #[inline]
    pub fn payload_len(&self) -> usize {
        self.payload.len()
    }

    /// Total size of this frame on the wire (header + payload).
    #[inline]
    pub fn wire_len(&self) -> usize {
        HEADER_SIZE + self.payload.len()
    }

    /// Encode the whole frame as a single contiguous byte vector.
    pub fn to_wire(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(self.wire_len());
        buf.extend_from_slice(&self.header.encode());
        buf.extend_from_slice(&self.payload);
        buf
    }
}

/// Build a complete frame as a single byte vector without constructing a
/// [`Frame`] first.
pub fn build_frame(message_type: u8, payload: &[u8]) -> Vec<u8> {
    let header = FrameHeader::new(payload.len() as u32, message_type);
    let mut buf = Vec::with_capacity(HEADER_SIZE + payload.len());
    buf.extend_from_slice(&header.encode());
    buf.extend_from_slice(payload);
    buf
}
