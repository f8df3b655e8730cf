//! Frame header encoding and decoding.
//!
//! Implements the 5-byte header format:
//! ```text
//! ┌─────────────┬──────────┐
//! │ Length      │ Type     │
//! │ 4 bytes     │ 1 byte   │
//! │ uint32 LE   │          │
//! └─────────────┴──────────┘
//! ```
//!
//! `Length` counts the type byte plus the payload, so a valid header always
//! carries `length >= 1`. All multi-byte integers are Little Endian.

use crate::error::{Result, XwireError};

/// Header size in bytes (fixed, exactly 5).
pub const HEADER_SIZE: usize = 5;

/// Maximum accepted payload size (1 GiB). Larger declared sizes are treated
/// as framing corruption rather than honored with an allocation.
pub const MAX_PAYLOAD_SIZE: u32 = 1_073_741_824;

/// Decoded frame header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameHeader {
    /// Wire length field: `1 + payload bytes`.
    pub length: u32,
    /// Raw wire tag for the frame type.
    pub message_type: u8,
}

impl FrameHeader {
    /// Create a header for a payload of `payload_length` bytes.
    pub fn new(payload_length: u32, message_type: u8) -> Self {
        Self {
            length: payload_length + 1,
            message_type,
        }
    }

    /// Payload length in bytes, excluding the type byte.
    ///
    /// A zero wire length cannot describe any frame and is reported as a
    /// framing error here rather than at parse time: any 5 bytes parse.
    pub fn payload_length(&self) -> Result<usize> {
        match self.length.checked_sub(1) {
            Some(n) if n <= MAX_PAYLOAD_SIZE => Ok(n as usize),
            Some(n) => Err(XwireError::Framing(format!(
                "declared payload size {n} exceeds maximum {MAX_PAYLOAD_SIZE}"
            ))),
            None => Err(XwireError::Framing(
                "frame header declares zero length".to_string(),
            )),
        }
    }

    /// Encode the header to bytes (Little Endian).
    pub fn encode(&self) -> [u8; HEADER_SIZE] {
        let mut buf = [0u8; HEADER_SIZE];
        self.encode_into(&mut buf);
        buf
    }

    /// Encode the header into an existing buffer.
    ///
    /// # Panics
    ///
    /// Panics if the buffer is smaller than [`HEADER_SIZE`].
    pub fn encode_into(&self, buf: &mut [u8]) {
        debug_assert!(buf.len() >= HEADER_SIZE);
        buf[0..4].copy_from_slice(&self.length.to_le_bytes());
        buf[4] = self.message_type;
    }

    /// Decode a header from bytes (Little Endian).
    ///
    /// Returns `None` if the buffer is too short. Any 5 bytes decode
    /// successfully; an invalid type tag is detected later by the registry
    /// lookup.
    pub fn decode(buf: &[u8]) -> Option<Self> {
        if buf.len() < HEADER_SIZE {
            return None;
        }
        Some(Self {
            length: u32::from_le_bytes([buf[0], buf[1], buf[2], buf[3]]),
            message_type: buf[4],
        })
    }
}
