//! Pending-peek rendezvous cell.
//!
//! Lets a caller learn the next frame's type without consuming its body: the
//! caller arms the cell and awaits the receiver; the read loop fulfills it
//! as soon as a header completes (or from the read-ahead queue front). A
//! single-slot one-shot cell rather than ad hoc wait/notify.

use std::sync::Mutex;

use tokio::sync::oneshot;

use crate::protocol::ServerKind;

use super::lock;

/// Single-slot cell for observing the next message kind.
pub struct PendingPeek {
    slot: Mutex<Option<oneshot::Sender<ServerKind>>>,
}

impl PendingPeek {
    pub fn new() -> Self {
        Self {
            slot: Mutex::new(None),
        }
    }

    /// Arm the cell and return the receiver for the next message kind.
    ///
    /// Re-arming replaces a previous waiter, whose receiver then observes a
    /// closed channel.
    pub fn arm(&self) -> oneshot::Receiver<ServerKind> {
        let (tx, rx) = oneshot::channel();
        *lock(&self.slot) = Some(tx);
        rx
    }

    /// Whether a peek caller is currently waiting.
    pub fn is_armed(&self) -> bool {
        lock(&self.slot).is_some()
    }

    /// Complete the armed peek, if any. Returns whether a waiter was served.
    pub fn fulfill(&self, kind: ServerKind) -> bool {
        match lock(&self.slot).take() {
            Some(tx) => tx.send(kind).is_ok(),
            None => false,
        }
    }

    /// Drop any armed waiter so it observes a closed channel.
    pub fn abort(&self) {
        lock(&self.slot).take();
    }
}

impl Default for PendingPeek {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fulfill_without_waiter_is_noop() {
        let peek = PendingPeek::new();
        assert!(!peek.is_armed());
        assert!(!peek.fulfill(ServerKind::Ok));
    }

    #[tokio::test]
    async fn armed_peek_receives_kind() {
        let peek = PendingPeek::new();
        let rx = peek.arm();
        assert!(peek.is_armed());
        assert!(peek.fulfill(ServerKind::Row));
        assert!(!peek.is_armed());
        assert_eq!(rx.await.unwrap(), ServerKind::Row);
    }

    #[tokio::test]
    async fn rearm_replaces_previous_waiter() {
        let peek = PendingPeek::new();
        let first = peek.arm();
        let second = peek.arm();
        peek.fulfill(ServerKind::Notice);

        assert!(first.await.is_err());
        assert_eq!(second.await.unwrap(), ServerKind::Notice);
    }

    #[tokio::test]
    async fn abort_closes_waiter() {
        let peek = PendingPeek::new();
        let rx = peek.arm();
        peek.abort();
        assert!(rx.await.is_err());
    }
}
