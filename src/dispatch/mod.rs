//! Listener dispatch and request correlation.
//!
//! A logical exchange is "push a listener, then send the request". Listeners
//! are served strictly FIFO per connection, matching the protocol's
//! in-order-response guarantee.

mod listener;
mod peek;
mod queue;

pub use listener::{
    MessageListener, ResponseFuture, ResponseListener, StreamFuture, StreamResult,
    StreamingListener,
};
pub use peek::PendingPeek;
pub use queue::ListenerQueue;

use std::sync::{Mutex, MutexGuard, PoisonError};

/// Poison-tolerant mutex lock. A poisoned lock here only means a listener
/// callback panicked; the protected state is still coherent.
pub(crate) fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}
