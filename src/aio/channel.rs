//! Asynchronous channel: event-driven reader and dedicated writer task.
//!
//! The read loop suspends only at "awaiting more bytes" boundaries. Decoded
//! messages land on a bounded read-ahead queue (the backpressure valve); once
//! it is full no further low-level read is issued until dispatch frees a
//! slot. Bytes already off the wire are kept un-decoded in a carry buffer, so
//! at most `read_ahead_depth` decoded messages ever wait.

use std::collections::VecDeque;
use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

use bytes::{Bytes, BytesMut};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite};
use tokio::sync::{Notify, oneshot};

use crate::compress::{CompressionAlgorithm, InflateEngine, decode_wrapper_payload};
use crate::config::TransportConfig;
use crate::dispatch::{
    ListenerQueue, MessageListener, PendingPeek, ResponseListener, lock,
};
use crate::error::{Result, XwireError};
use crate::protocol::{
    ClientMessage, Frame, SERVER_COMPRESSION_TAG, ServerKind, ServerMessage,
};

use super::decoder::{FrameDecoder, decode_all};
use super::writer::{OutboundFrame, WriterHandle, spawn_writer_task};

/// Boxed read half of the duplex stream.
pub type BoxedAsyncReader = Box<dyn AsyncRead + Send + Unpin>;

/// Read buffer size for the low-level read call.
const READ_BUFFER_SIZE: usize = 16 * 1024;

/// A queued decoded message, or the request-level error it decoded to.
type QueueItem = std::result::Result<ServerMessage, XwireError>;

struct Shared {
    listeners: ListenerQueue,
    peek: PendingPeek,
    notify: Notify,
    halt: AtomicBool,
    closed: AtomicBool,
    /// Read-ahead occupancy, mirrored for observability.
    queued: AtomicUsize,
    suspend: Mutex<Option<oneshot::Sender<SuspendedReader>>>,
    inflater: Mutex<Option<Box<dyn InflateEngine>>>,
}

impl Shared {
    /// Close the channel and fan the error out to every listener. Idempotent.
    fn fail(&self, err: &XwireError) {
        if self.closed.swap(true, Ordering::AcqRel) {
            return;
        }
        tracing::error!(error = %err, "async channel closed by fatal error");
        self.listeners.fail_all(err);
        self.peek.abort();
        lock(&self.suspend).take();
        self.notify.notify_waiters();
        self.notify.notify_one();
    }
}

/// Reader state handed back when the read loop halts for stream
/// substitution.
pub struct SuspendedReader {
    stream: BoxedAsyncReader,
    leftover: Bytes,
    queue: VecDeque<QueueItem>,
}

impl SuspendedReader {
    /// Swap the stream (e.g. for the TLS-wrapped replacement), returning the
    /// previous one. Undecoded bytes and undelivered messages are kept.
    pub fn replace_stream(&mut self, stream: BoxedAsyncReader) -> BoxedAsyncReader {
        std::mem::replace(&mut self.stream, stream)
    }

    /// Bytes read off the wire but not yet decoded.
    pub fn leftover(&self) -> &[u8] {
        &self.leftover
    }
}

struct ReaderState {
    stream: BoxedAsyncReader,
    decoder: FrameDecoder,
    /// Bytes read but not yet decoded.
    carry: BytesMut,
    queue: VecDeque<QueueItem>,
    depth: usize,
}

/// An asynchronous connection over one duplex stream.
///
/// Requests are queued listeners; no caller thread ever blocks on the
/// socket. Must be created from within a tokio runtime.
pub struct AsyncChannel {
    shared: Arc<Shared>,
    writer: WriterHandle,
    config: TransportConfig,
}

impl AsyncChannel {
    /// Create a channel from the two halves of an already-connected stream.
    pub fn new<R, W>(reader: R, writer: W, config: TransportConfig) -> Self
    where
        R: AsyncRead + Send + Unpin + 'static,
        W: AsyncWrite + Send + Unpin + 'static,
    {
        let shared = Arc::new(Shared {
            listeners: ListenerQueue::new(),
            peek: PendingPeek::new(),
            notify: Notify::new(),
            halt: AtomicBool::new(false),
            closed: AtomicBool::new(false),
            queued: AtomicUsize::new(0),
            suspend: Mutex::new(None),
            inflater: Mutex::new(None),
        });

        let (writer_handle, writer_task) = spawn_writer_task(writer, config.compression_threshold);

        // Writer failures are transport failures: fan them out like read
        // failures.
        {
            let shared = Arc::clone(&shared);
            tokio::spawn(async move {
                match writer_task.await {
                    Ok(Err(err)) => shared.fail(&err),
                    Err(join_err) if !join_err.is_cancelled() => {
                        shared.fail(&XwireError::ConnectionClosed);
                    }
                    _ => {}
                }
            });
        }

        let state = ReaderState {
            stream: Box::new(reader),
            decoder: FrameDecoder::new(),
            carry: BytesMut::with_capacity(READ_BUFFER_SIZE),
            queue: VecDeque::new(),
            depth: config.read_ahead_depth,
        };
        tokio::spawn(read_loop(state, Arc::clone(&shared)));

        Self {
            shared,
            writer: writer_handle,
            config,
        }
    }

    pub fn config(&self) -> &TransportConfig {
        &self.config
    }

    pub fn is_closed(&self) -> bool {
        self.shared.closed.load(Ordering::Acquire)
    }

    fn ensure_open(&self) -> Result<()> {
        if self.is_closed() {
            return Err(XwireError::ConnectionClosed);
        }
        Ok(())
    }

    /// Queue one message for writing. Resolves when the writer task accepts
    /// the frame.
    pub async fn send_message(&self, msg: &ClientMessage) -> Result<()> {
        self.ensure_open()?;
        let frame = msg.to_frame()?;
        self.writer
            .send(OutboundFrame::new(frame.message_type(), frame.payload))
            .await
    }

    /// Queue a listener for the next logical exchange.
    pub fn push_listener(&self, listener: Box<dyn MessageListener>) {
        if self.shared.listeners.push(listener) {
            self.shared.notify.notify_one();
        }
    }

    /// One full exchange: push a listener, send the request, await the
    /// response of `expected` kind. The configured read timeout bounds the
    /// wait.
    pub async fn execute(
        &self,
        msg: &ClientMessage,
        expected: ServerKind,
    ) -> Result<ServerMessage> {
        let (listener, future) = ResponseListener::channel(expected);
        self.push_listener(Box::new(listener));
        self.send_message(msg).await?;
        future.wait(self.config.read_timeout).await
    }

    /// Kind of the next inbound message without consuming it.
    ///
    /// Wakes as soon as the next frame's header completes; the body stays
    /// unconsumed until a listener or reader takes it.
    pub async fn peek_kind(&self) -> Result<ServerKind> {
        self.ensure_open()?;
        let rx = self.shared.peek.arm();
        self.shared.notify.notify_one();
        match self.config.read_timeout {
            Some(limit) => match tokio::time::timeout(limit, rx).await {
                Ok(Ok(kind)) => Ok(kind),
                Ok(Err(_)) => Err(XwireError::ConnectionClosed),
                Err(_) => Err(XwireError::Timeout),
            },
            None => rx.await.map_err(|_| XwireError::ConnectionClosed),
        }
    }

    /// Splice per-frame compression into both directions.
    pub async fn enable_compression(&self, algorithm: CompressionAlgorithm) -> Result<()> {
        self.ensure_open()?;
        tracing::debug!(algorithm = algorithm.as_str(), "enabling compression");
        *lock(&self.shared.inflater) = Some(algorithm.inflater());
        self.writer.enable_compression(algorithm.deflater()).await
    }

    /// Ask the read loop to halt after delivering the next message, handing
    /// its state back for stream substitution.
    ///
    /// Notices never trigger the halt: they keep flowing so the stream
    /// cannot desynchronize while the halt is armed.
    pub fn stop_after_next(&self) -> oneshot::Receiver<SuspendedReader> {
        let (tx, rx) = oneshot::channel();
        *lock(&self.shared.suspend) = Some(tx);
        self.shared.halt.store(true, Ordering::Release);
        self.shared.notify.notify_one();
        rx
    }

    /// Restart the read loop from a suspended state, typically after the
    /// stream was swapped for its TLS-wrapped replacement.
    pub fn resume(&self, suspended: SuspendedReader) -> Result<()> {
        self.ensure_open()?;
        let state = ReaderState {
            stream: suspended.stream,
            decoder: FrameDecoder::new(),
            carry: BytesMut::from(&suspended.leftover[..]),
            queue: suspended.queue,
            depth: self.config.read_ahead_depth,
        };
        tokio::spawn(read_loop(state, Arc::clone(&self.shared)));
        Ok(())
    }

    /// Decoded messages currently waiting in the read-ahead queue.
    pub fn pending_reads(&self) -> usize {
        self.shared.queued.load(Ordering::Acquire)
    }

    /// Close the channel, failing any queued listeners.
    pub fn close(&self) {
        self.shared.fail(&XwireError::ConnectionClosed);
    }
}

impl Drop for AsyncChannel {
    fn drop(&mut self) {
        self.close();
    }
}

/// Main read loop. Exits on fatal error, close, or an armed halt.
async fn read_loop(mut state: ReaderState, shared: Arc<Shared>) {
    let mut read_buf = vec![0u8; READ_BUFFER_SIZE];
    loop {
        if shared.closed.load(Ordering::Acquire) {
            return;
        }

        dispatch(&mut state, &shared);

        // Decode buffered bytes while the read-ahead has room.
        while !state.carry.is_empty() && state.queue.len() < state.depth {
            let pushed_non_notice = match step_decode(&mut state, &shared) {
                Ok(flag) => flag,
                Err(err) => {
                    shared.fail(&err);
                    return;
                }
            };
            dispatch(&mut state, &shared);
            if pushed_non_notice && shared.halt.load(Ordering::Acquire) {
                suspend(state, &shared);
                return;
            }
        }

        if state.queue.len() >= state.depth {
            // Backpressure: no low-level read until dispatch frees a slot.
            shared.notify.notified().await;
            continue;
        }

        tokio::select! {
            result = state.stream.read(&mut read_buf) => match result {
                Ok(0) => {
                    shared.fail(&XwireError::ConnectionClosed);
                    return;
                }
                Ok(n) => state.carry.extend_from_slice(&read_buf[..n]),
                Err(err) => {
                    shared.fail(&XwireError::Io(err));
                    return;
                }
            },
            _ = shared.notify.notified() => {}
        }
    }
}

/// Pop queued messages into listeners while both are available, serving any
/// armed peek from the queue front first.
fn dispatch(state: &mut ReaderState, shared: &Shared) {
    loop {
        if let Some(Ok(msg)) = state.queue.front() {
            shared.peek.fulfill(msg.kind);
        }
        if !shared.listeners.has_work() {
            break;
        }
        let Some(item) = state.queue.pop_front() else {
            break;
        };
        match item {
            Ok(msg) => {
                if let Some(back) = shared.listeners.deliver(msg) {
                    state.queue.push_front(Ok(back));
                    break;
                }
            }
            // Request-level failure resolves only the current listener.
            Err(err) => {
                shared.listeners.deliver_error(err);
            }
        }
    }
    shared.queued.store(state.queue.len(), Ordering::Release);
}

/// Decode one step from the carry buffer. Returns whether a non-notice
/// message was queued (the halt trigger).
fn step_decode(state: &mut ReaderState, shared: &Shared) -> Result<bool> {
    let progress = state.decoder.feed(&state.carry)?;
    let _ = state.carry.split_to(progress.consumed);

    if let Some(header) = progress.header {
        // Expose the header via the pending-peek cell before the body is
        // consumed. Wrapper headers stay invisible; their inner frames are
        // peeked from the queue front once decoded.
        if header.message_type != SERVER_COMPRESSION_TAG {
            if let Ok(kind) = ServerKind::from_tag(header.message_type) {
                shared.peek.fulfill(kind);
            }
        }
    }

    let mut pushed_non_notice = false;
    if let Some(frame) = progress.frame {
        for item in ingest_frame(frame, shared)? {
            pushed_non_notice |= match &item {
                Ok(msg) => !msg.kind.is_notice(),
                Err(_) => true,
            };
            state.queue.push_back(item);
        }
        shared.queued.store(state.queue.len(), Ordering::Release);
    }
    Ok(pushed_non_notice)
}

/// Turn a wire frame into queued logical messages, unwrapping compression
/// wrappers when an engine is installed.
fn ingest_frame(frame: Frame, shared: &Shared) -> Result<Vec<QueueItem>> {
    if frame.message_type() == SERVER_COMPRESSION_TAG {
        let mut guard = lock(&shared.inflater);
        if let Some(engine) = guard.as_mut() {
            let (_original_type, size, blob) = decode_wrapper_payload(&frame.payload)?;
            if size == 0 || blob.is_empty() {
                return Err(XwireError::Framing(
                    "empty compression wrapper frame".to_string(),
                ));
            }
            let data = engine.inflate(blob, size as usize)?;
            drop(guard);
            let frames = decode_all(&data)?;
            return frames
                .into_iter()
                .map(|inner| to_item(ServerMessage::from_frame(inner)))
                .collect();
        }
    }
    Ok(vec![to_item(ServerMessage::from_frame(frame))?])
}

/// Classify a decoded message: fatal errors abort the loop, request-level
/// errors ride the queue to the listener they belong to.
fn to_item(result: Result<ServerMessage>) -> Result<QueueItem> {
    match result {
        Ok(msg) => Ok(Ok(msg)),
        Err(err) if err.is_fatal() => Err(err),
        Err(err) => Ok(Err(err)),
    }
}

/// Hand the reader state back through the suspension channel.
fn suspend(state: ReaderState, shared: &Shared) {
    shared.halt.store(false, Ordering::Release);
    shared.queued.store(state.queue.len(), Ordering::Release);
    match lock(&shared.suspend).take() {
        Some(tx) => {
            let suspended = SuspendedReader {
                stream: state.stream,
                leftover: state.carry.freeze(),
                queue: state.queue,
            };
            if tx.send(suspended).is_err() {
                tracing::warn!("suspension receiver dropped; reader state lost");
            } else {
                tracing::debug!("read loop suspended after delivering frame");
            }
        }
        None => tracing::warn!("read loop halted with no suspension receiver"),
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use tokio::io::{AsyncWriteExt, duplex};

    use super::*;
    use crate::protocol::{ClientKind, build_frame};

    fn test_config() -> TransportConfig {
        TransportConfig::new().read_timeout(Duration::from_secs(5))
    }

    #[tokio::test]
    async fn execute_roundtrip() {
        let (client, server) = duplex(64 * 1024);
        let (client_read, client_write) = tokio::io::split(client);
        let (mut server_read, mut server_write) = tokio::io::split(server);
        let channel = AsyncChannel::new(client_read, client_write, test_config());

        let exchange = tokio::spawn(async move {
            server_write
                .write_all(&build_frame(17, b"exec ok"))
                .await
                .unwrap();
            let mut buf = vec![0u8; 64];
            let n = server_read.read(&mut buf).await.unwrap();
            buf.truncate(n);
            buf
        });

        let msg = channel
            .execute(
                &ClientMessage::new(ClientKind::StmtExecute, &b"select 1"[..]),
                ServerKind::StmtExecuteOk,
            )
            .await
            .unwrap();
        assert_eq!(&msg.payload[..], b"exec ok");

        let written = exchange.await.unwrap();
        assert_eq!(written, build_frame(12, b"select 1"));
    }

    #[tokio::test]
    async fn notices_flow_to_listener() {
        let (client, server) = duplex(64 * 1024);
        let (client_read, client_write) = tokio::io::split(client);
        let (_server_read, mut server_write) = tokio::io::split(server);
        let channel = AsyncChannel::new(client_read, client_write, test_config());

        let (listener, future) = ResponseListener::channel(ServerKind::Ok);
        channel.push_listener(Box::new(listener));

        server_write.write_all(&build_frame(11, b"n1")).await.unwrap();
        server_write.write_all(&build_frame(11, b"n2")).await.unwrap();
        server_write.write_all(&build_frame(0, b"done")).await.unwrap();

        let msg = future.wait(Some(Duration::from_secs(5))).await.unwrap();
        assert_eq!(msg.kind, ServerKind::Ok);
        assert_eq!(msg.notices.len(), 2);
    }

    #[tokio::test]
    async fn peek_does_not_consume() {
        let (client, server) = duplex(64 * 1024);
        let (client_read, client_write) = tokio::io::split(client);
        let (_server_read, mut server_write) = tokio::io::split(server);
        let channel = AsyncChannel::new(client_read, client_write, test_config());

        server_write
            .write_all(&build_frame(12, b"column meta"))
            .await
            .unwrap();

        let kind = channel.peek_kind().await.unwrap();
        assert_eq!(kind, ServerKind::ColumnMetaData);

        // The peeked message is still deliverable in full.
        let (listener, future) = ResponseListener::channel(ServerKind::ColumnMetaData);
        channel.push_listener(Box::new(listener));
        let msg = future.wait(Some(Duration::from_secs(5))).await.unwrap();
        assert_eq!(&msg.payload[..], b"column meta");
    }

    #[tokio::test]
    async fn fatal_error_fans_out_to_all_listeners() {
        let (client, server) = duplex(64 * 1024);
        let (client_read, client_write) = tokio::io::split(client);
        let channel = AsyncChannel::new(client_read, client_write, test_config());

        let mut futures = Vec::new();
        for _ in 0..4 {
            let (listener, future) = ResponseListener::channel(ServerKind::Ok);
            channel.push_listener(Box::new(listener));
            futures.push(future);
        }

        drop(server);

        for future in futures {
            let err = future.wait(Some(Duration::from_secs(5))).await.unwrap_err();
            assert!(err.is_fatal());
        }
        assert!(channel.is_closed());
    }

    #[tokio::test]
    async fn backpressure_caps_decoded_messages() {
        let config = TransportConfig::new()
            .read_ahead_depth(2)
            .read_timeout(Duration::from_secs(5));
        let (client, server) = duplex(64 * 1024);
        let (client_read, client_write) = tokio::io::split(client);
        let (_server_read, mut server_write) = tokio::io::split(server);
        let channel = AsyncChannel::new(client_read, client_write, config);

        for i in 0u8..5 {
            server_write
                .write_all(&build_frame(13, &[i]))
                .await
                .unwrap();
        }
        tokio::time::sleep(Duration::from_millis(50)).await;

        // Five frames written, at most two decoded ahead.
        assert!(channel.pending_reads() <= 2);

        // Consuming one frees exactly one slot, letting the next decode.
        let (listener, future) = ResponseListener::channel(ServerKind::Row);
        channel.push_listener(Box::new(listener));
        let msg = future.wait(Some(Duration::from_secs(5))).await.unwrap();
        assert_eq!(&msg.payload[..], &[0]);

        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(channel.pending_reads() <= 2);
    }

    #[tokio::test]
    async fn stop_after_next_skips_notices() {
        let (client, server) = duplex(64 * 1024);
        let (client_read, client_write) = tokio::io::split(client);
        let (_server_read, mut server_write) = tokio::io::split(server);
        let channel = AsyncChannel::new(client_read, client_write, test_config());

        let suspension = channel.stop_after_next();

        let (listener, future) = ResponseListener::channel(ServerKind::AuthenticateOk);
        channel.push_listener(Box::new(listener));

        // Notices must keep flowing while the halt is armed.
        server_write.write_all(&build_frame(11, b"notice")).await.unwrap();
        server_write.write_all(&build_frame(4, b"auth ok")).await.unwrap();
        // This frame arrives after the halt point and must stay unread.
        server_write.write_all(&build_frame(0, b"later")).await.unwrap();

        let msg = future.wait(Some(Duration::from_secs(5))).await.unwrap();
        assert_eq!(msg.kind, ServerKind::AuthenticateOk);
        assert_eq!(msg.notices.len(), 1);

        let suspended = suspension.await.unwrap();
        // The loop may have read the trailing frame's bytes, but nothing
        // decoded past the halt point was lost: resuming delivers it.
        channel.resume(suspended).unwrap();
        let (listener, future) = ResponseListener::channel(ServerKind::Ok);
        channel.push_listener(Box::new(listener));
        let msg = future.wait(Some(Duration::from_secs(5))).await.unwrap();
        assert_eq!(&msg.payload[..], b"later");
    }

    #[tokio::test]
    async fn compressed_frames_are_unwrapped() {
        use crate::compress::{DeflateEngine as _, encode_wrapper_payload};

        let (client, server) = duplex(64 * 1024);
        let (client_read, client_write) = tokio::io::split(client);
        let (_server_read, mut server_write) = tokio::io::split(server);
        let channel = AsyncChannel::new(client_read, client_write, test_config());
        channel
            .enable_compression(CompressionAlgorithm::Zlib)
            .await
            .unwrap();

        // Compress an inner Row frame the way the server would.
        let inner = build_frame(13, &vec![0x66u8; 1000]);
        let mut deflater = CompressionAlgorithm::Zlib.deflater();
        deflater.begin().unwrap();
        deflater.write(&inner).unwrap();
        let blob = deflater.finish().unwrap();
        let payload = encode_wrapper_payload(13, inner.len() as u64, &blob);
        server_write
            .write_all(&build_frame(SERVER_COMPRESSION_TAG, &payload))
            .await
            .unwrap();

        let (listener, future) = ResponseListener::channel(ServerKind::Row);
        channel.push_listener(Box::new(listener));
        let msg = future.wait(Some(Duration::from_secs(5))).await.unwrap();
        assert_eq!(msg.payload.len(), 1000);
        assert!(msg.payload.iter().all(|&b| b == 0x66));
    }
}
