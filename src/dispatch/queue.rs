//! FIFO listener queue shared by the dispatch worker and the async read loop.

use std::collections::VecDeque;
use std::sync::Mutex;

use crate::error::XwireError;
use crate::protocol::ServerMessage;

use super::listener::MessageListener;
use super::lock;

struct QueueState {
    /// The listener currently receiving frames, if any.
    current: Option<Box<dyn MessageListener>>,
    /// Listeners waiting their turn, strictly FIFO.
    waiting: VecDeque<Box<dyn MessageListener>>,
    /// Set after a fatal error; the queue accepts no more listeners.
    closed: bool,
}

/// Queue of listeners awaiting frames.
///
/// At most one listener is current at a time; the next waiting listener is
/// promoted when the current one signals completion. A fatal error fans out
/// to every listener exactly once and closes the queue.
pub struct ListenerQueue {
    state: Mutex<QueueState>,
}

impl ListenerQueue {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(QueueState {
                current: None,
                waiting: VecDeque::new(),
                closed: false,
            }),
        }
    }

    /// Enqueue a listener.
    ///
    /// If the queue is closed the listener is failed immediately and `false`
    /// is returned; no listener is ever left unresolved.
    pub fn push(&self, mut listener: Box<dyn MessageListener>) -> bool {
        {
            let mut state = lock(&self.state);
            if !state.closed {
                state.waiting.push_back(listener);
                return true;
            }
        }
        listener.on_error(XwireError::ConnectionClosed);
        false
    }

    /// Whether any listener is current or waiting.
    pub fn has_work(&self) -> bool {
        let state = lock(&self.state);
        state.current.is_some() || !state.waiting.is_empty()
    }

    /// Whether the queue has been closed by a fatal error.
    pub fn is_closed(&self) -> bool {
        lock(&self.state).closed
    }

    /// Number of listeners waiting behind the current one.
    pub fn waiting_len(&self) -> usize {
        lock(&self.state).waiting.len()
    }

    /// Hand a message to the current listener, promoting the next waiting
    /// listener first if none is current.
    ///
    /// Returns the message back if no listener is available to take it.
    pub fn deliver(&self, msg: ServerMessage) -> Option<ServerMessage> {
        let mut state = lock(&self.state);
        if state.current.is_none() {
            state.current = state.waiting.pop_front();
        }
        let Some(listener) = state.current.as_mut() else {
            return Some(msg);
        };
        if listener.on_message(msg) {
            state.current = None;
        }
        None
    }

    /// Deliver a request-level failure to the current listener only.
    ///
    /// Returns `false` if no listener was available to receive it.
    pub fn deliver_error(&self, err: XwireError) -> bool {
        let listener = {
            let mut state = lock(&self.state);
            if state.current.is_none() {
                state.current = state.waiting.pop_front();
            }
            state.current.take()
        };
        match listener {
            Some(mut listener) => {
                listener.on_error(err);
                true
            }
            None => false,
        }
    }

    /// Fan a fatal error out to the current and every waiting listener
    /// exactly once, then close the queue.
    pub fn fail_all(&self, err: &XwireError) {
        let (current, waiting) = {
            let mut state = lock(&self.state);
            state.closed = true;
            (
                state.current.take(),
                std::mem::take(&mut state.waiting),
            )
        };
        let mut failed = 0usize;
        if let Some(mut listener) = current {
            listener.on_error(err.replicate());
            failed += 1;
        }
        for mut listener in waiting {
            listener.on_error(err.replicate());
            failed += 1;
        }
        if failed > 0 {
            tracing::debug!(listeners = failed, error = %err, "failed all queued listeners");
        }
    }
}

impl Default for ListenerQueue {
    fn default() -> Self {
        Self::new()
    }
}
