//! Transport configuration.
//!
//! A [`TransportConfig`] is handed to a channel at construction and never
//! changes afterwards. Defaults match the protocol's reference values.

use std::time::Duration;

/// Default depth of the async read-ahead queue.
pub const DEFAULT_READ_AHEAD_DEPTH: usize = 10;

/// Default payload size (bytes) at which outgoing frames are compressed.
pub const DEFAULT_COMPRESSION_THRESHOLD: usize = 250;

/// Default idle time after which the dispatch worker thread exits.
pub const DEFAULT_WORKER_IDLE_TIMEOUT: Duration = Duration::from_secs(5);

/// Configuration for a transport channel.
#[derive(Debug, Clone)]
pub struct TransportConfig {
    /// Decoded messages buffered ahead of dispatch before low-level reads
    /// pause. Caps memory growth when the consumer lags.
    pub read_ahead_depth: usize,
    /// Payloads at or above this size (bytes) are compressed once a
    /// compression engine is installed. Smaller frames pass through.
    pub compression_threshold: usize,
    /// Bounded wait applied to response futures. `None` waits forever.
    /// This is not I/O cancellation: a started frame read always completes
    /// or the connection is torn down.
    pub read_timeout: Option<Duration>,
    /// How long the dispatch worker lingers with no queued listeners before
    /// terminating itself. It is respawned on the next listener push.
    pub worker_idle_timeout: Duration,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            read_ahead_depth: DEFAULT_READ_AHEAD_DEPTH,
            compression_threshold: DEFAULT_COMPRESSION_THRESHOLD,
            read_timeout: None,
            worker_idle_timeout: DEFAULT_WORKER_IDLE_TIMEOUT,
        }
    }
}

impl TransportConfig {
    /// Create a configuration with all defaults.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the read-ahead queue depth.
    pub fn read_ahead_depth(mut self, depth: usize) -> Self {
        self.read_ahead_depth = depth.max(1);
        self
    }

    /// Set the compression threshold in bytes.
    pub fn compression_threshold(mut self, threshold: usize) -> Self {
        self.compression_threshold = threshold;
        self
    }

    /// Set the bounded wait for response futures.
    pub fn read_timeout(mut self, timeout: Duration) -> Self {
        self.read_timeout = Some(timeout);
        self
    }

    /// Set the dispatch worker idle timeout.
    pub fn worker_idle_timeout(mut self, timeout: Duration) -> Self {
        self.worker_idle_timeout = timeout;
        self
    }
}
