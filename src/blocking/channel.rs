//! Blocking channel: the synchronous discipline plus a background dispatch
//! worker for queued listeners.
//!
//! The single duplex stream is the one shared mutable resource. The read
//! mutex is the connection-wide lock: it is held for the duration of any
//! synchronous read and by the dispatch worker for a whole drain, so the two
//! paths can never race on the wire. The worker thread is spawned lazily on
//! the first listener push and terminates itself after an idle timeout, so a
//! purely-synchronous connection never holds a live thread.

use std::io::{Read, Write};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Condvar, Mutex};

use crate::compress::{CompressionAlgorithm, DeflatingWriter, InflatingReader};
use crate::config::TransportConfig;
use crate::dispatch::{ListenerQueue, MessageListener, lock};
use crate::error::{Result, XwireError};
use crate::protocol::{ClientMessage, ServerKind, ServerMessage};

use super::reader::SyncReader;
use super::writer::SyncWriter;

/// Boxed read half of the duplex stream.
pub type BoxedReader = Box<dyn Read + Send>;
/// Boxed write half of the duplex stream.
pub type BoxedWriter = Box<dyn Write + Send>;

#[derive(Default)]
struct WorkerState {
    running: bool,
}

struct ChannelInner {
    reader: Mutex<SyncReader<BoxedReader>>,
    writer: Mutex<SyncWriter<BoxedWriter>>,
    listeners: ListenerQueue,
    worker: Mutex<WorkerState>,
    wake: Condvar,
    closed: AtomicBool,
    config: TransportConfig,
}

impl ChannelInner {
    /// Close the channel and fan the error out to every listener. Idempotent.
    fn fail(&self, err: &XwireError) {
        if self.closed.swap(true, Ordering::AcqRel) {
            return;
        }
        tracing::error!(error = %err, "channel closed by fatal error");
        self.listeners.fail_all(err);
        // Notify under the worker mutex so a worker between its wake-up
        // check and its wait cannot miss the signal.
        let _guard = lock(&self.worker);
        self.wake.notify_all();
    }
}

/// A blocking connection over one duplex stream.
pub struct Channel {
    inner: Arc<ChannelInner>,
}

impl Channel {
    /// Create a channel from the two halves of an already-connected stream.
    pub fn new(
        reader: impl Read + Send + 'static,
        writer: impl Write + Send + 'static,
        config: TransportConfig,
    ) -> Self {
        Self {
            inner: Arc::new(ChannelInner {
                reader: Mutex::new(SyncReader::new(Box::new(reader))),
                writer: Mutex::new(SyncWriter::new(Box::new(writer))),
                listeners: ListenerQueue::new(),
                worker: Mutex::new(WorkerState::default()),
                wake: Condvar::new(),
                closed: AtomicBool::new(false),
                config,
            }),
        }
    }

    pub fn config(&self) -> &TransportConfig {
        &self.inner.config
    }

    pub fn is_closed(&self) -> bool {
        self.inner.closed.load(Ordering::Acquire)
    }

    fn ensure_open(&self) -> Result<()> {
        if self.is_closed() {
            return Err(XwireError::ConnectionClosed);
        }
        Ok(())
    }

    /// Send one message, blocking until it is written and flushed.
    pub fn send_message(&self, msg: &ClientMessage) -> Result<()> {
        self.ensure_open()?;
        let result = {
            let mut writer = lock(&self.inner.writer);
            writer.send(msg)
        };
        if let Err(err) = &result {
            if err.is_fatal() {
                self.inner.fail(err);
            }
        }
        result
    }

    /// Read the next message of `expected` kind, blocking. Leading notices
    /// are skipped and attached to the result.
    pub fn read_message(&self, expected: ServerKind) -> Result<ServerMessage> {
        self.ensure_open()?;
        let result = {
            let mut reader = lock(&self.inner.reader);
            reader.read_message(expected)
        };
        if let Err(err) = &result {
            if err.is_fatal() {
                self.inner.fail(err);
            }
        }
        result
    }

    /// Kind of the next non-notice message, blocking, without consuming it.
    pub fn peek_kind(&self) -> Result<ServerKind> {
        self.ensure_open()?;
        let result = {
            let mut reader = lock(&self.inner.reader);
            reader.peek_kind()
        };
        if let Err(err) = &result {
            if err.is_fatal() {
                self.inner.fail(err);
            }
        }
        result
    }

    /// Send a request and block for its response.
    pub fn exchange(&self, msg: &ClientMessage, expected: ServerKind) -> Result<ServerMessage> {
        self.send_message(msg)?;
        self.read_message(expected)
    }

    /// Queue a listener for the next logical exchange and make sure the
    /// dispatch worker is alive to feed it.
    pub fn push_listener(&self, listener: Box<dyn MessageListener>) {
        if !self.inner.listeners.push(listener) {
            // Closed queue: the listener was already failed.
            return;
        }
        self.ensure_worker();
    }

    fn ensure_worker(&self) {
        let mut worker = lock(&self.inner.worker);
        if !worker.running && !self.is_closed() {
            let inner = Arc::clone(&self.inner);
            let spawned = std::thread::Builder::new()
                .name("xwire-dispatch".to_string())
                .spawn(move || dispatch_worker(inner));
            match spawned {
                Ok(_) => worker.running = true,
                Err(err) => {
                    tracing::error!(error = %err, "failed to spawn dispatch worker");
                }
            }
        }
        // Still holding the worker mutex: an already-running worker between
        // its wake-up check and its wait cannot miss this.
        self.inner.wake.notify_one();
    }

    /// Swap the underlying stream halves, e.g. for TLS substitution.
    ///
    /// Takes both locks, so no read or write can be in flight while the swap
    /// runs; buffered peeked messages survive the swap. If `swap` fails the
    /// channel is closed.
    pub fn replace_stream<F>(&self, swap: F) -> Result<()>
    where
        F: FnOnce(BoxedReader, BoxedWriter) -> std::io::Result<(BoxedReader, BoxedWriter)>,
    {
        self.ensure_open()?;
        let mut reader = lock(&self.inner.reader);
        let mut writer = lock(&self.inner.writer);

        let placeholder_reader: BoxedReader = Box::new(std::io::empty());
        let placeholder_writer: BoxedWriter = Box::new(std::io::sink());
        let (old_reader, pending) =
            std::mem::replace(&mut *reader, SyncReader::new(placeholder_reader)).into_parts();
        let old_writer =
            std::mem::replace(&mut *writer, SyncWriter::new(placeholder_writer)).into_inner();

        match swap(old_reader, old_writer) {
            Ok((new_reader, new_writer)) => {
                *reader = SyncReader::from_parts(new_reader, pending);
                *writer = SyncWriter::new(new_writer);
                Ok(())
            }
            Err(err) => {
                let err = XwireError::Io(err);
                drop(reader);
                drop(writer);
                self.inner.fail(&err);
                Err(err)
            }
        }
    }

    /// Splice per-frame compression into both directions.
    pub fn enable_compression(&self, algorithm: CompressionAlgorithm) -> Result<()> {
        let threshold = self.inner.config.compression_threshold;
        tracing::debug!(algorithm = algorithm.as_str(), "enabling compression");
        self.replace_stream(move |reader, writer| {
            Ok((
                Box::new(InflatingReader::new(reader, algorithm.inflater())) as BoxedReader,
                Box::new(DeflatingWriter::new(writer, algorithm.deflater(), threshold))
                    as BoxedWriter,
            ))
        })
    }

    /// Close the channel, failing any queued listeners.
    pub fn close(&self) {
        self.inner.fail(&XwireError::ConnectionClosed);
    }
}

impl Drop for Channel {
    fn drop(&mut self) {
        self.close();
    }
}

/// Dispatch worker body: wait for listeners, drain the wire into them,
/// self-terminate when idle.
fn dispatch_worker(inner: Arc<ChannelInner>) {
    tracing::debug!("dispatch worker started");
    loop {
        // Wait for work, or exit after the idle timeout.
        {
            let mut worker = lock(&inner.worker);
            loop {
                if inner.closed.load(Ordering::Acquire) {
                    worker.running = false;
                    tracing::debug!("dispatch worker exiting: channel closed");
                    return;
                }
                if inner.listeners.has_work() {
                    break;
                }
                let (guard, timeout) = inner
                    .wake
                    .wait_timeout(worker, inner.config.worker_idle_timeout)
                    .unwrap_or_else(|e| e.into_inner());
                worker = guard;
                if timeout.timed_out() && !inner.listeners.has_work() {
                    worker.running = false;
                    tracing::debug!("dispatch worker exiting: idle");
                    return;
                }
            }
        }

        // Drain: hold the read lock for the whole listener sequence.
        let mut reader = lock(&inner.reader);
        while inner.listeners.has_work() && !inner.closed.load(Ordering::Acquire) {
            match reader.next_message() {
                Ok(msg) => {
                    if let Some(msg) = inner.listeners.deliver(msg) {
                        // No listener after all; leave the message for the
                        // next synchronous read.
                        reader.unread(msg);
                        break;
                    }
                }
                Err(err) if err.is_fatal() => {
                    drop(reader);
                    inner.fail(&err);
                    let mut worker = lock(&inner.worker);
                    worker.running = false;
                    return;
                }
                Err(err) => {
                    // Request-level failure resolves only the current listener.
                    inner.listeners.deliver_error(err);
                }
            }
        }
        drop(reader);
    }
}
