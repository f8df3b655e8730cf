//! Blocking message writer.

use std::io::Write;

use crate::error::Result;
use crate::protocol::ClientMessage;

/// Blocking frame writer over any byte sink.
pub struct SyncWriter<W> {
    inner: W,
}

impl<W: Write> SyncWriter<W> {
    pub fn new(inner: W) -> Self {
        Self { inner }
    }

    pub fn get_ref(&self) -> &W {
        &self.inner
    }

    pub fn into_inner(self) -> W {
        self.inner
    }

    /// Encode and write one message, flushing the stream.
    pub fn send(&mut self, msg: &ClientMessage) -> Result<()> {
        let frame = msg.to_frame()?;
        self.inner.write_all(&frame.header.encode())?;
        self.inner.write_all(&frame.payload)?;
        self.inner.flush()?;
        Ok(())
    }
}
