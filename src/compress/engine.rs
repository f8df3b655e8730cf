//! Compression engine strategies.
//!
//! An engine pair is chosen once at capability negotiation and injected into
//! the splice layer. Engines come in two modes, exposed via `reusable()`:
//!
//! - **Stream-mode** (zlib): one long-lived compressor whose sink is swapped
//!   per frame. Frames share the deflate dictionary and are separated by sync
//!   flushes, so the decompressor must also persist and see every frame in
//!   arrival order.
//! - **One-shot** (zstd): a fresh encoder per frame; each blob is a complete,
//!   independently decodable stream.

use std::io::{self, Write};

use flate2::write::ZlibEncoder;
use flate2::{Compression, Decompress, FlushDecompress, Status};

use crate::error::{Result, XwireError};

/// Per-frame compressor sink.
pub trait DeflateEngine: Send {
    /// Whether this engine instance survives across frames.
    fn reusable(&self) -> bool;

    /// Start a new frame.
    fn begin(&mut self) -> io::Result<()>;

    /// Feed uncompressed frame bytes.
    fn write(&mut self, chunk: &[u8]) -> io::Result<()>;

    /// Complete the frame and take the compressed blob.
    fn finish(&mut self) -> io::Result<Vec<u8>>;
}

/// Per-frame decompressor, bounded to the declared uncompressed size.
pub trait InflateEngine: Send {
    /// Whether this engine instance survives across frames.
    fn reusable(&self) -> bool;

    /// Inflate a whole wrapper blob.
    ///
    /// The output can never exceed `declared` bytes; producing more or fewer
    /// is a framing violation.
    fn inflate(&mut self, blob: &[u8], declared: usize) -> Result<Vec<u8>>;
}

/// Default zlib level, matching the common flate2 default.
const ZLIB_DEFAULT_LEVEL: u32 = 6;

/// Stream-mode zlib compressor. One deflate stream spans the connection's
/// life; frames are separated by sync flushes and share the dictionary.
pub struct ZlibDeflater {
    encoder: ZlibEncoder<Vec<u8>>,
}

impl ZlibDeflater {
    pub fn new() -> Self {
        Self::with_level(ZLIB_DEFAULT_LEVEL)
    }

    /// Level ranges from 0 (no compression) to 9 (best compression).
    pub fn with_level(level: u32) -> Self {
        Self {
            encoder: ZlibEncoder::new(Vec::new(), Compression::new(level.min(9))),
        }
    }
}

impl Default for ZlibDeflater {
    fn default() -> Self {
        Self::new()
    }
}

impl DeflateEngine for ZlibDeflater {
    fn reusable(&self) -> bool {
        true
    }

    fn begin(&mut self) -> io::Result<()> {
        Ok(())
    }

    fn write(&mut self, chunk: &[u8]) -> io::Result<()> {
        self.encoder.write_all(chunk)
    }

    fn finish(&mut self) -> io::Result<Vec<u8>> {
        // Sync-flush so the frame is decodable without ending the stream.
        self.encoder.flush()?;
        Ok(std::mem::take(self.encoder.get_mut()))
    }
}

/// Stream-mode zlib decompressor, the inverse of [`ZlibDeflater`].
pub struct ZlibInflater {
    raw: Decompress,
}

impl ZlibInflater {
    pub fn new() -> Self {
        Self {
            raw: Decompress::new(true),
        }
    }
}

impl Default for ZlibInflater {
    fn default() -> Self {
        Self::new()
    }
}

impl InflateEngine for ZlibInflater {
    fn reusable(&self) -> bool {
        true
    }

    fn inflate(&mut self, blob: &[u8], declared: usize) -> Result<Vec<u8>> {
        let mut out = vec![0u8; declared];
        let mut filled = 0usize;
        let mut consumed = 0usize;
        let mut scratch = [0u8; 64];
        let mut ended = false;

        while consumed < blob.len() || filled < declared {
            let before_in = self.raw.total_in();
            let before_out = self.raw.total_out();
            let status = if filled < declared {
                self.raw
                    .decompress(&blob[consumed..], &mut out[filled..], FlushDecompress::Sync)
            } else {
                self.raw
                    .decompress(&blob[consumed..], &mut scratch, FlushDecompress::Sync)
            }
            .map_err(|e| XwireError::Framing(format!("inflate failed: {e}")))?;

            let in_delta = (self.raw.total_in() - before_in) as usize;
            let out_delta = (self.raw.total_out() - before_out) as usize;

            if filled == declared && out_delta > 0 {
                return Err(XwireError::Framing(
                    "decompressed frame exceeds declared size".to_string(),
                ));
            }
            filled += out_delta;
            consumed += in_delta;

            if status == Status::StreamEnd {
                ended = true;
                break;
            }
            if consumed >= blob.len() {
                break;
            }
            if in_delta == 0 && out_delta == 0 {
                return Err(XwireError::Framing(
                    "inflate stalled on compressed frame".to_string(),
                ));
            }
        }

        if ended {
            // The peer ended the deflate stream; the next frame starts fresh.
            self.raw.reset(true);
            if consumed < blob.len() {
                return Err(XwireError::Framing(
                    "trailing bytes after end of compressed stream".to_string(),
                ));
            }
        }
        if filled != declared {
            return Err(XwireError::Framing(format!(
                "decompressed frame size {filled} does not match declared {declared}"
            )));
        }
        Ok(out)
    }
}

/// Default zstd level (the zstd crate's own default).
const ZSTD_DEFAULT_LEVEL: i32 = 3;

/// One-shot zstd compressor: a fresh encoder per frame.
pub struct ZstdDeflater {
    level: i32,
    encoder: Option<zstd::stream::write::Encoder<'static, Vec<u8>>>,
}

impl ZstdDeflater {
    pub fn new() -> Self {
        Self::with_level(ZSTD_DEFAULT_LEVEL)
    }

    /// Level ranges from 1 (fastest) to 22 (best compression).
    pub fn with_level(level: i32) -> Self {
        Self {
            level: level.clamp(1, 22),
            encoder: None,
        }
    }
}

impl Default for ZstdDeflater {
    fn default() -> Self {
        Self::new()
    }
}

impl DeflateEngine for ZstdDeflater {
    fn reusable(&self) -> bool {
        false
    }

    fn begin(&mut self) -> io::Result<()> {
        self.encoder = Some(zstd::stream::write::Encoder::new(Vec::new(), self.level)?);
        Ok(())
    }

    fn write(&mut self, chunk: &[u8]) -> io::Result<()> {
        match self.encoder.as_mut() {
            Some(encoder) => encoder.write_all(chunk),
            None => Err(io::Error::other("deflate frame not started")),
        }
    }

    fn finish(&mut self) -> io::Result<Vec<u8>> {
        match self.encoder.take() {
            Some(encoder) => encoder.finish(),
            None => Err(io::Error::other("deflate frame not started")),
        }
    }
}

/// One-shot zstd decompressor.
pub struct ZstdInflater;

impl Default for ZstdInflater {
    fn default() -> Self {
        Self
    }
}

impl InflateEngine for ZstdInflater {
    fn reusable(&self) -> bool {
        false
    }

    fn inflate(&mut self, blob: &[u8], declared: usize) -> Result<Vec<u8>> {
        let out = zstd::bulk::decompress(blob, declared)
            .map_err(|e| XwireError::Framing(format!("inflate failed: {e}")))?;
        if out.len() != declared {
            return Err(XwireError::Framing(format!(
                "decompressed frame size {} does not match declared {declared}",
                out.len()
            )));
        }
        Ok(out)
    }
}
