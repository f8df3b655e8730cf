//! Input-side compression splice.
//!
//! Wraps a byte stream and inflates compression-wrapper frames in place,
//! while non-wrapper frames pass through unchanged. Callers above see a
//! plain frame stream regardless of what was negotiated.

use std::io::{self, Read};

use crate::error::XwireError;
use crate::protocol::{FrameHeader, HEADER_SIZE, SERVER_COMPRESSION_TAG};

use super::engine::InflateEngine;
use super::decode_wrapper_payload;

/// Where the next bytes handed to the caller come from.
enum Source {
    /// Read the next outer frame header from the wire.
    Outer,
    /// Replaying a non-wrapper frame: the already-consumed header bytes are
    /// recycled first, then payload bytes stream through counted.
    Passthrough {
        header: [u8; HEADER_SIZE],
        offset: usize,
        remaining: u64,
    },
    /// Serving an inflated inner frame until exhausted.
    Inflated { data: Vec<u8>, pos: usize },
}

/// A `Read` adapter that transparently inflates wrapper frames.
pub struct InflatingReader<R> {
    inner: R,
    engine: Box<dyn InflateEngine>,
    source: Source,
}

impl<R: Read> InflatingReader<R> {
    pub fn new(inner: R, engine: Box<dyn InflateEngine>) -> Self {
        Self {
            inner,
            engine,
            source: Source::Outer,
        }
    }

    pub fn get_ref(&self) -> &R {
        &self.inner
    }

    pub fn into_inner(self) -> R {
        self.inner
    }

    /// Read the next outer header and pick the source for its bytes.
    ///
    /// Returns `false` on a clean EOF at a frame boundary.
    fn fill_source(&mut self) -> io::Result<bool> {
        let mut header = [0u8; HEADER_SIZE];
        let n = self.inner.read(&mut header[..1])?;
        if n == 0 {
            return Ok(false);
        }
        self.inner.read_exact(&mut header[1..])?;

        let parsed = FrameHeader::decode(&header)
            .ok_or_else(|| io::Error::other("frame header truncated"))?;
        let payload_len = parsed.payload_length().map_err(invalid_data)?;

        if parsed.message_type == SERVER_COMPRESSION_TAG {
            let mut payload = vec![0u8; payload_len];
            self.inner.read_exact(&mut payload)?;
            let (_original_type, size, blob) =
                decode_wrapper_payload(&payload).map_err(invalid_data)?;
            if size == 0 || blob.is_empty() {
                return Err(io::Error::new(
                    io::ErrorKind::InvalidData,
                    "empty compression wrapper frame",
                ));
            }
            let data = self.engine.inflate(blob, size as usize).map_err(invalid_data)?;
            self.source = Source::Inflated { data, pos: 0 };
        } else {
            self.source = Source::Passthrough {
                header,
                offset: 0,
                remaining: payload_len as u64,
            };
        }
        Ok(true)
    }
}

fn invalid_data(err: XwireError) -> io::Error {
    io::Error::new(io::ErrorKind::InvalidData, err.to_string())
}

impl<R: Read> Read for InflatingReader<R> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        if buf.is_empty() {
            return Ok(0);
        }
        loop {
            if matches!(self.source, Source::Outer) && !self.fill_source()? {
                return Ok(0);
            }
            match &mut self.source {
                Source::Outer => continue,
                Source::Passthrough {
                    header,
                    offset,
                    remaining,
                } => {
                    if *offset < HEADER_SIZE {
                        let n = (HEADER_SIZE - *offset).min(buf.len());
                        buf[..n].copy_from_slice(&header[*offset..*offset + n]);
                        *offset += n;
                        if *offset == HEADER_SIZE && *remaining == 0 {
                            self.source = Source::Outer;
                        }
                        return Ok(n);
                    }
                    if *remaining == 0 {
                        self.source = Source::Outer;
                        continue;
                    }
                    let want = (*remaining).min(buf.len() as u64) as usize;
                    let n = self.inner.read(&mut buf[..want])?;
                    if n == 0 {
                        return Err(io::Error::new(
                            io::ErrorKind::UnexpectedEof,
                            "stream ended inside a frame",
                        ));
                    }
                    *remaining -= n as u64;
                    if *remaining == 0 {
                        self.source = Source::Outer;
                    }
                    return Ok(n);
                }
                Source::Inflated { data, pos } => {
                    if *pos >= data.len() {
                        self.source = Source::Outer;
                        continue;
                    }
                    let n = (data.len() - *pos).min(buf.len());
                    buf[..n].copy_from_slice(&data[*pos..*pos + n]);
                    *pos += n;
                    return Ok(n);
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::io::Cursor;

    use super::super::{CompressionAlgorithm, DeflateEngine, encode_wrapper_payload};
    use super::*;
    use crate::protocol::build_frame;

    fn wrap_frame(algorithm: CompressionAlgorithm, inner: &[u8]) -> Vec<u8> {
        let mut deflater = algorithm.deflater();
        deflater.begin().unwrap();
        deflater.write(inner).unwrap();
        let blob = deflater.finish().unwrap();
        let payload = encode_wrapper_payload(inner[4], inner.len() as u64, &blob);
        build_frame(SERVER_COMPRESSION_TAG, &payload)
    }

    fn read_all_chunked(reader: &mut impl Read, chunk: usize) -> Vec<u8> {
        let mut out = Vec::new();
        let mut buf = vec![0u8; chunk];
        loop {
            match reader.read(&mut buf).unwrap() {
                0 => return out,
                n => out.extend_from_slice(&buf[..n]),
            }
        }
    }

    #[test]
    fn passthrough_frames_are_unchanged() {
        let wire = build_frame(13, b"plain row data");
        let mut reader = InflatingReader::new(
            Cursor::new(wire.clone()),
            CompressionAlgorithm::Zlib.inflater(),
        );
        assert_eq!(read_all_chunked(&mut reader, 4096), wire);
    }

    #[test]
    fn wrapper_frames_are_inflated() {
        let inner = build_frame(13, &vec![0x42u8; 1000]);
        let wire = wrap_frame(CompressionAlgorithm::Zlib, &inner);
        let mut reader =
            InflatingReader::new(Cursor::new(wire), CompressionAlgorithm::Zlib.inflater());
        assert_eq!(read_all_chunked(&mut reader, 4096), inner);
    }

    #[test]
    fn arbitrary_chunk_sizes_span_boundaries() {
        let inner = build_frame(13, &vec![0x17u8; 1000]);
        let mut wire = build_frame(11, b"notice first");
        wire.extend_from_slice(&wrap_frame(CompressionAlgorithm::Zlib, &inner));
        wire.extend_from_slice(&build_frame(0, b""));

        let mut expected = build_frame(11, b"notice first");
        expected.extend_from_slice(&inner);
        expected.extend_from_slice(&build_frame(0, b""));

        for chunk in [1usize, 3, 4096] {
            let mut reader = InflatingReader::new(
                Cursor::new(wire.clone()),
                CompressionAlgorithm::Zlib.inflater(),
            );
            assert_eq!(read_all_chunked(&mut reader, chunk), expected, "chunk {chunk}");
        }
    }

    #[test]
    fn zstd_wrapper_roundtrip() {
        let inner = build_frame(13, &vec![0x33u8; 2000]);
        let wire = wrap_frame(CompressionAlgorithm::Zstd, &inner);
        let mut reader =
            InflatingReader::new(Cursor::new(wire), CompressionAlgorithm::Zstd.inflater());
        assert_eq!(read_all_chunked(&mut reader, 3), inner);
    }

    #[test]
    fn zero_length_payload_never_hits_the_engine() {
        // An engine that panics if used; the empty frame must bypass it.
        struct PanicEngine;
        impl InflateEngine for PanicEngine {
            fn reusable(&self) -> bool {
                false
            }
            fn inflate(&mut self, _: &[u8], _: usize) -> crate::error::Result<Vec<u8>> {
                panic!("engine must not be used for plain frames");
            }
        }

        let wire = build_frame(0, b"");
        let mut reader = InflatingReader::new(Cursor::new(wire.clone()), Box::new(PanicEngine));
        assert_eq!(read_all_chunked(&mut reader, 1), wire);
    }

    #[test]
    fn declared_size_mismatch_is_invalid_data() {
        let inner = build_frame(13, &vec![9u8; 500]);
        let mut deflater = CompressionAlgorithm::Zlib.deflater();
        deflater.begin().unwrap();
        deflater.write(&inner).unwrap();
        let blob = deflater.finish().unwrap();
        // Lie about the uncompressed size.
        let payload = encode_wrapper_payload(13, 100, &blob);
        let wire = build_frame(SERVER_COMPRESSION_TAG, &payload);

        let mut reader =
            InflatingReader::new(Cursor::new(wire), CompressionAlgorithm::Zlib.inflater());
        let err = read_all_err(&mut reader);
        assert_eq!(err.kind(), io::ErrorKind::InvalidData);
    }

    #[test]
    fn empty_wrapper_is_invalid_data() {
        let payload = encode_wrapper_payload(13, 0, b"");
        let wire = build_frame(SERVER_COMPRESSION_TAG, &payload);
        let mut reader =
            InflatingReader::new(Cursor::new(wire), CompressionAlgorithm::Zlib.inflater());
        let err = read_all_err(&mut reader);
        assert_eq!(err.kind(), io::ErrorKind::InvalidData);
    }

    #[test]
    fn eof_mid_frame_is_unexpected_eof() {
        let wire = build_frame(13, b"truncated payload");
        let mut reader = InflatingReader::new(
            Cursor::new(wire[..wire.len() - 4].to_vec()),
            CompressionAlgorithm::Zlib.inflater(),
        );
        let err = read_all_err(&mut reader);
        assert_eq!(err.kind(), io::ErrorKind::UnexpectedEof);
    }

    fn read_all_err(reader: &mut impl Read) -> io::Error {
        let mut buf = [0u8; 64];
        loop {
            match reader.read(&mut buf) {
                Ok(0) => panic!("expected an error, got clean EOF"),
                Ok(_) => {}
                Err(e) => return e,
            }
        }
    }
}
