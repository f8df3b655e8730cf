//! Output-side compression splice.
//!
//! Wraps a byte sink and watches the frame structure of everything written
//! through it. Once a frame's header is complete the payload length is known
//! and the frame is either passed through (below the threshold) or streamed
//! into the compression engine; frame completion then emits a wrapper frame
//! in place of the original.

use std::io::{self, Write};

use crate::error::XwireError;
use crate::protocol::{CLIENT_COMPRESSION_TAG, FrameHeader, HEADER_SIZE};

use super::encode_wrapper_payload;
use super::engine::DeflateEngine;

/// Where bytes for the current frame are going.
enum Sink {
    /// Accumulating the 5 header bytes of the next frame.
    Header { buf: [u8; HEADER_SIZE], filled: usize },
    /// Small frame: bytes pass straight through.
    Passthrough { remaining: u64 },
    /// Large frame: the whole inner frame streams into the engine.
    Compressing {
        original_type: u8,
        total: u64,
        remaining: u64,
    },
}

impl Sink {
    fn header() -> Self {
        Sink::Header {
            buf: [0u8; HEADER_SIZE],
            filled: 0,
        }
    }
}

/// A `Write` adapter that transparently compresses large frames.
pub struct DeflatingWriter<W> {
    inner: W,
    engine: Box<dyn DeflateEngine>,
    threshold: usize,
    sink: Sink,
}

impl<W: Write> DeflatingWriter<W> {
    pub fn new(inner: W, engine: Box<dyn DeflateEngine>, threshold: usize) -> Self {
        Self {
            inner,
            engine,
            threshold,
            sink: Sink::header(),
        }
    }

    pub fn get_ref(&self) -> &W {
        &self.inner
    }

    pub fn into_inner(self) -> W {
        self.inner
    }

    /// Complete the current frame: take the blob and write the wrapper.
    fn emit_wrapper(&mut self, original_type: u8, total: u64) -> io::Result<()> {
        let blob = self.engine.finish()?;
        let payload = encode_wrapper_payload(original_type, total, &blob);
        let outer = FrameHeader::new(payload.len() as u32, CLIENT_COMPRESSION_TAG);
        self.inner.write_all(&outer.encode())?;
        self.inner.write_all(&payload)?;
        self.sink = Sink::header();
        Ok(())
    }
}

fn invalid_data(err: XwireError) -> io::Error {
    io::Error::new(io::ErrorKind::InvalidData, err.to_string())
}

impl<W: Write> Write for DeflatingWriter<W> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        if buf.is_empty() {
            return Ok(0);
        }
        match std::mem::replace(&mut self.sink, Sink::header()) {
            Sink::Header {
                buf: mut hbuf,
                mut filled,
            } => {
                let n = (HEADER_SIZE - filled).min(buf.len());
                hbuf[filled..filled + n].copy_from_slice(&buf[..n]);
                filled += n;
                if filled < HEADER_SIZE {
                    self.sink = Sink::Header { buf: hbuf, filled };
                    return Ok(n);
                }

                let header = FrameHeader::decode(&hbuf)
                    .ok_or_else(|| io::Error::other("frame header truncated"))?;
                let payload_len = header.payload_length().map_err(invalid_data)? as u64;

                if (payload_len as usize) < self.threshold {
                    self.inner.write_all(&hbuf)?;
                    self.sink = if payload_len == 0 {
                        Sink::header()
                    } else {
                        Sink::Passthrough {
                            remaining: payload_len,
                        }
                    };
                } else {
                    self.engine.begin()?;
                    self.engine.write(&hbuf)?;
                    if payload_len == 0 {
                        self.emit_wrapper(header.message_type, HEADER_SIZE as u64)?;
                    } else {
                        self.sink = Sink::Compressing {
                            original_type: header.message_type,
                            total: HEADER_SIZE as u64 + payload_len,
                            remaining: payload_len,
                        };
                    }
                }
                Ok(n)
            }
            Sink::Passthrough { remaining } => {
                let want = remaining.min(buf.len() as u64) as usize;
                let n = self.inner.write(&buf[..want])?;
                if n == 0 {
                    return Err(io::Error::new(
                        io::ErrorKind::WriteZero,
                        "inner writer accepted no bytes",
                    ));
                }
                let remaining = remaining - n as u64;
                self.sink = if remaining == 0 {
                    Sink::header()
                } else {
                    Sink::Passthrough { remaining }
                };
                Ok(n)
            }
            Sink::Compressing {
                original_type,
                total,
                remaining,
            } => {
                let want = remaining.min(buf.len() as u64) as usize;
                self.engine.write(&buf[..want])?;
                let remaining = remaining - want as u64;
                if remaining == 0 {
                    self.emit_wrapper(original_type, total)?;
                } else {
                    self.sink = Sink::Compressing {
                        original_type,
                        total,
                        remaining,
                    };
                }
                Ok(want)
            }
        }
    }

    fn flush(&mut self) -> io::Result<()> {
        self.inner.flush()
    }
}
