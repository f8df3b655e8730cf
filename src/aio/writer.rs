//! Dedicated writer task for the async channel.
//!
//! Frames are sent to the task over a bounded mpsc channel, which both
//! serializes access to the write half and provides natural backpressure.
//! The task batches ready frames into vectored writes, and the outbound
//! compression splice runs inside it so frame order (and the zlib stream
//! dictionary) stays consistent no matter how many tasks are sending.

use std::io::IoSlice;

use bytes::Bytes;
use tokio::io::{AsyncWrite, AsyncWriteExt};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::compress::{DeflateEngine, encode_wrapper_payload};
use crate::error::{Result, XwireError};
use crate::protocol::{CLIENT_COMPRESSION_TAG, FrameHeader, HEADER_SIZE};

/// Capacity of the writer queue.
const WRITE_QUEUE_CAPACITY: usize = 64;

/// Maximum frames to batch into a single vectored write.
const MAX_BATCH_SIZE: usize = 64;

/// A frame ready to be written to the stream.
#[derive(Debug)]
pub struct OutboundFrame {
    /// Pre-encoded header (5 bytes).
    pub header: [u8; HEADER_SIZE],
    /// Payload bytes (may be empty).
    pub payload: Bytes,
}

impl OutboundFrame {
    /// Create an outbound frame for `payload` with the given type tag.
    #[inline]
    pub fn new(message_type: u8, payload: Bytes) -> Self {
        Self {
            header: FrameHeader::new(payload.len() as u32, message_type).encode(),
            payload,
        }
    }

    /// Total size of this frame (header + payload).
    #[inline]
    pub fn size(&self) -> usize {
        HEADER_SIZE + self.payload.len()
    }

    #[inline]
    fn message_type(&self) -> u8 {
        self.header[4]
    }
}

pub(crate) enum WriterOp {
    Frame(OutboundFrame),
    EnableCompression(Box<dyn DeflateEngine>),
}

/// Handle for sending frames to the writer task. Cheaply cloneable.
#[derive(Clone)]
pub struct WriterHandle {
    tx: mpsc::Sender<WriterOp>,
}

impl WriterHandle {
    /// Queue a frame, waiting for queue space if the writer lags.
    ///
    /// Resolves when the frame is accepted by the writer task, not when the
    /// bytes reach the wire.
    pub async fn send(&self, frame: OutboundFrame) -> Result<()> {
        self.tx
            .send(WriterOp::Frame(frame))
            .await
            .map_err(|_| XwireError::ConnectionClosed)
    }

    /// Install the outbound compression engine. Frames queued after this
    /// call are subject to the threshold decision.
    pub(crate) async fn enable_compression(&self, engine: Box<dyn DeflateEngine>) -> Result<()> {
        self.tx
            .send(WriterOp::EnableCompression(engine))
            .await
            .map_err(|_| XwireError::ConnectionClosed)
    }

    /// Whether the writer task has terminated.
    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }
}

/// Spawn the writer task and return a handle for sending frames.
pub fn spawn_writer_task<W>(
    writer: W,
    compression_threshold: usize,
) -> (WriterHandle, JoinHandle<Result<()>>)
where
    W: AsyncWrite + Unpin + Send + 'static,
{
    let (tx, rx) = mpsc::channel(WRITE_QUEUE_CAPACITY);
    let task = tokio::spawn(writer_loop(rx, writer, compression_threshold));
    (WriterHandle { tx }, task)
}

/// Main writer loop: receive ops, splice compression, batch, write.
async fn writer_loop<W>(
    mut rx: mpsc::Receiver<WriterOp>,
    mut writer: W,
    threshold: usize,
) -> Result<()>
where
    W: AsyncWrite + Unpin,
{
    let mut engine: Option<Box<dyn DeflateEngine>> = None;
    loop {
        let first = match rx.recv().await {
            Some(op) => op,
            // Channel dropped: clean shutdown.
            None => return Ok(()),
        };

        let mut batch = Vec::with_capacity(MAX_BATCH_SIZE);
        apply_op(first, &mut batch, &mut engine, threshold)?;
        while batch.len() < MAX_BATCH_SIZE {
            match rx.try_recv() {
                Ok(op) => apply_op(op, &mut batch, &mut engine, threshold)?,
                Err(_) => break,
            }
        }

        write_batch(&mut writer, &batch).await?;
    }
}

fn apply_op(
    op: WriterOp,
    batch: &mut Vec<OutboundFrame>,
    engine: &mut Option<Box<dyn DeflateEngine>>,
    threshold: usize,
) -> Result<()> {
    match op {
        WriterOp::Frame(frame) => batch.push(splice(frame, engine, threshold)?),
        WriterOp::EnableCompression(new_engine) => {
            tracing::debug!(
                reusable = new_engine.reusable(),
                "outbound compression enabled"
            );
            *engine = Some(new_engine);
        }
    }
    Ok(())
}

/// Apply the threshold decision: frames at/above it are wrapped, the rest
/// pass through untouched.
fn splice(
    frame: OutboundFrame,
    engine: &mut Option<Box<dyn DeflateEngine>>,
    threshold: usize,
) -> Result<OutboundFrame> {
    let Some(engine) = engine.as_mut() else {
        return Ok(frame);
    };
    if frame.payload.len() < threshold {
        return Ok(frame);
    }
    engine.begin()?;
    engine.write(&frame.header)?;
    engine.write(&frame.payload)?;
    let blob = engine.finish()?;

    let payload = encode_wrapper_payload(
        frame.message_type(),
        frame.size() as u64,
        &blob,
    );
    Ok(OutboundFrame::new(CLIENT_COMPRESSION_TAG, Bytes::from(payload)))
}

/// Write a batch of frames using vectored I/O, continuing across partial
/// writes.
async fn write_batch<W>(writer: &mut W, batch: &[OutboundFrame]) -> Result<()>
where
    W: AsyncWrite + Unpin,
{
    if batch.is_empty() {
        return Ok(());
    }

    let total_size: usize = batch.iter().map(|f| f.size()).sum();
    let mut total_written = 0usize;

    while total_written < total_size {
        let slices = build_remaining_slices(batch, total_written);
        let written = writer.write_vectored(&slices).await?;
        if written == 0 {
            return Err(XwireError::Io(std::io::Error::new(
                std::io::ErrorKind::WriteZero,
                "write_vectored returned 0",
            )));
        }
        total_written += written;
    }

    writer.flush().await?;
    Ok(())
}

/// Build the IoSlice array for whatever remains after `skip_bytes`.
fn build_remaining_slices(batch: &[OutboundFrame], skip_bytes: usize) -> Vec<IoSlice<'_>> {
    let mut slices = Vec::with_capacity(batch.len() * 2);
    let mut skipped = 0;

    for frame in batch {
        let header_end = skipped + HEADER_SIZE;
        if skip_bytes < header_end {
            let start = skip_bytes.saturating_sub(skipped);
            slices.push(IoSlice::new(&frame.header[start..]));
        }
        skipped = header_end;

        if !frame.payload.is_empty() {
            let payload_end = skipped + frame.payload.len();
            if skip_bytes < payload_end {
                let start = skip_bytes.saturating_sub(skipped);
                slices.push(IoSlice::new(&frame.payload[start..]));
            }
            skipped = payload_end;
        }
    }

    slices
}
