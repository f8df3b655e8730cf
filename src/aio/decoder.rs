//! Incremental frame decoder.
//!
//! An explicit two-state continuation driven by arbitrary byte chunks:
//! - `Header`: accumulate to 5 bytes
//! - `Payload`: accumulate to the declared size
//!
//! Header completion is reported separately from frame completion so the
//! pending-peek cell can be fulfilled before the body arrives. The decoder
//! never touches I/O, so the whole read path is testable without a socket.

use bytes::BytesMut;

use crate::error::Result;
use crate::protocol::{Frame, FrameHeader, HEADER_SIZE};

enum DecodeState {
    /// Waiting for a complete header.
    Header { buf: [u8; HEADER_SIZE], filled: usize },
    /// Header parsed, waiting for payload bytes.
    Payload {
        header: FrameHeader,
        want: usize,
        buf: BytesMut,
    },
}

/// What one `feed` call achieved.
#[derive(Debug, Default)]
pub struct FeedProgress {
    /// Bytes consumed from the chunk.
    pub consumed: usize,
    /// Set when the header completed during this call.
    pub header: Option<FrameHeader>,
    /// Set when the frame completed; feeding stops at the frame boundary.
    pub frame: Option<Frame>,
}

/// State machine turning a byte stream into frames, one at a time.
pub struct FrameDecoder {
    state: DecodeState,
}

impl FrameDecoder {
    pub fn new() -> Self {
        Self {
            state: DecodeState::Header {
                buf: [0u8; HEADER_SIZE],
                filled: 0,
            },
        }
    }

    /// Whether the decoder sits at a frame boundary with nothing buffered.
    pub fn is_idle(&self) -> bool {
        matches!(self.state, DecodeState::Header { filled: 0, .. })
    }

    /// Feed a chunk; stops after at most one completed frame so the caller
    /// controls read-ahead. Declared sizes are validated here, so a corrupt
    /// length can never drive an allocation.
    pub fn feed(&mut self, chunk: &[u8]) -> Result<FeedProgress> {
        let mut progress = FeedProgress::default();
        loop {
            match &mut self.state {
                DecodeState::Header { buf, filled } => {
                    let n = (HEADER_SIZE - *filled).min(chunk.len() - progress.consumed);
                    buf[*filled..*filled + n]
                        .copy_from_slice(&chunk[progress.consumed..progress.consumed + n]);
                    *filled += n;
                    progress.consumed += n;
                    if *filled < HEADER_SIZE {
                        return Ok(progress);
                    }
                    // Any 5 bytes parse; the length is validated right after.
                    let header =
                        FrameHeader::decode(buf).expect("buffer has exactly HEADER_SIZE bytes");
                    let want = header.payload_length()?;
                    progress.header = Some(header);
                    self.state = DecodeState::Payload {
                        header,
                        want,
                        buf: BytesMut::with_capacity(want),
                    };
                }
                DecodeState::Payload { header, want, buf } => {
                    let n = (*want - buf.len()).min(chunk.len() - progress.consumed);
                    buf.extend_from_slice(&chunk[progress.consumed..progress.consumed + n]);
                    progress.consumed += n;
                    if buf.len() < *want {
                        return Ok(progress);
                    }
                    progress.frame = Some(Frame {
                        header: *header,
                        payload: buf.split().freeze(),
                    });
                    self.state = DecodeState::Header {
                        buf: [0u8; HEADER_SIZE],
                        filled: 0,
                    };
                    return Ok(progress);
                }
            }
        }
    }
}

impl Default for FrameDecoder {
    fn default() -> Self {
        Self::new()
    }
}

/// Decode a buffer that must contain exactly whole frames (the inflated body
/// of a compression wrapper).
pub fn decode_all(bytes: &[u8]) -> Result<Vec<Frame>> {
    let mut decoder = FrameDecoder::new();
    let mut frames = Vec::new();
    let mut offset = 0;
    while offset < bytes.len() {
        let progress = decoder.feed(&bytes[offset..])?;
        offset += progress.consumed;
        if let Some(frame) = progress.frame {
            frames.push(frame);
        }
    }
    if !decoder.is_idle() {
        return Err(crate::error::XwireError::Framing(
            "truncated frame inside compressed payload".to_string(),
        ));
    }
    Ok(frames)
}
