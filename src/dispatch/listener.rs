//! Message listeners: queued consumers representing one logical exchange.

use std::time::Duration;

use tokio::sync::oneshot;

use crate::error::{Result, XwireError};
use crate::protocol::{Notice, ServerKind, ServerMessage};

/// A queued consumer for one logical request awaiting response frame(s).
///
/// Listeners are served strictly FIFO per connection. A listener stays
/// current until `on_message` returns `true`, which is how multi-frame
/// exchanges (row streams, notice accumulation) are expressed without the
/// transport understanding result-set semantics.
pub trait MessageListener: Send + 'static {
    /// Deliver one message. Return `true` when the exchange is complete,
    /// `false` to receive more frames.
    fn on_message(&mut self, msg: ServerMessage) -> bool;

    /// Deliver a failure. Called at most once; the listener is dropped
    /// afterwards.
    fn on_error(&mut self, err: XwireError);
}

/// Listener for a single request/response exchange.
///
/// Buffers any leading notices, checks the terminal message kind and
/// completes a oneshot with the result.
pub struct ResponseListener {
    expected: ServerKind,
    notices: Vec<Notice>,
    tx: Option<oneshot::Sender<Result<ServerMessage>>>,
}

impl ResponseListener {
    /// Create a listener expecting `expected` and the future for its result.
    pub fn channel(expected: ServerKind) -> (Self, ResponseFuture) {
        let (tx, rx) = oneshot::channel();
        (
            Self {
                expected,
                notices: Vec::new(),
                tx: Some(tx),
            },
            ResponseFuture { rx },
        )
    }

    fn complete(&mut self, result: Result<ServerMessage>) {
        if let Some(tx) = self.tx.take() {
            let _ = tx.send(result);
        }
    }
}

impl MessageListener for ResponseListener {
    fn on_message(&mut self, mut msg: ServerMessage) -> bool {
        if msg.kind.is_notice() {
            self.notices.push(Notice::from(msg));
            return false;
        }
        if msg.kind == self.expected {
            let mut notices = std::mem::take(&mut self.notices);
            notices.append(&mut msg.notices);
            msg.notices = notices;
            self.complete(Ok(msg));
        } else {
            self.complete(Err(XwireError::UnexpectedMessage {
                expected: self.expected,
                actual: msg.kind,
            }));
        }
        true
    }

    fn on_error(&mut self, err: XwireError) {
        self.complete(Err(err));
    }
}

/// The pending result of a [`ResponseListener`] exchange.
pub struct ResponseFuture {
    rx: oneshot::Receiver<Result<ServerMessage>>,
}

impl ResponseFuture {
    /// Await the response, optionally bounded by `timeout`.
    pub async fn wait(self, timeout: Option<Duration>) -> Result<ServerMessage> {
        match timeout {
            Some(limit) => match tokio::time::timeout(limit, self.rx).await {
                Ok(Ok(result)) => result,
                Ok(Err(_)) => Err(XwireError::ConnectionClosed),
                Err(_) => Err(XwireError::Timeout),
            },
            None => self.rx.await.map_err(|_| XwireError::ConnectionClosed)?,
        }
    }

    /// Block the current thread until the response arrives. Must not be
    /// called from inside an async runtime.
    pub fn wait_blocking(self) -> Result<ServerMessage> {
        self.rx
            .blocking_recv()
            .map_err(|_| XwireError::ConnectionClosed)?
    }
}

/// Everything a streaming exchange produced.
#[derive(Debug)]
pub struct StreamResult {
    /// Data frames received before the terminal message, in arrival order.
    pub messages: Vec<ServerMessage>,
    /// The terminal message, with accumulated notices attached.
    pub terminal: ServerMessage,
}

/// Listener that collects data frames until one of a set of terminal kinds
/// arrives.
pub struct StreamingListener {
    terminal: Vec<ServerKind>,
    messages: Vec<ServerMessage>,
    notices: Vec<Notice>,
    tx: Option<oneshot::Sender<Result<StreamResult>>>,
}

impl StreamingListener {
    /// Create a listener that completes on any kind in `terminal`.
    pub fn channel(terminal: impl Into<Vec<ServerKind>>) -> (Self, StreamFuture) {
        let (tx, rx) = oneshot::channel();
        (
            Self {
                terminal: terminal.into(),
                messages: Vec::new(),
                notices: Vec::new(),
                tx: Some(tx),
            },
            StreamFuture { rx },
        )
    }

    fn complete(&mut self, result: Result<StreamResult>) {
        if let Some(tx) = self.tx.take() {
            let _ = tx.send(result);
        }
    }
}

impl MessageListener for StreamingListener {
    fn on_message(&mut self, mut msg: ServerMessage) -> bool {
        if msg.kind.is_notice() {
            self.notices.push(Notice::from(msg));
            return false;
        }
        if self.terminal.contains(&msg.kind) {
            let mut notices = std::mem::take(&mut self.notices);
            notices.append(&mut msg.notices);
            msg.notices = notices;
            let messages = std::mem::take(&mut self.messages);
            self.complete(Ok(StreamResult {
                messages,
                terminal: msg,
            }));
            return true;
        }
        self.messages.push(msg);
        false
    }

    fn on_error(&mut self, err: XwireError) {
        self.complete(Err(err));
    }
}

/// The pending result of a [`StreamingListener`] exchange.
pub struct StreamFuture {
    rx: oneshot::Receiver<Result<StreamResult>>,
}

impl StreamFuture {
    /// Await the stream result, optionally bounded by `timeout`.
    pub async fn wait(self, timeout: Option<Duration>) -> Result<StreamResult> {
        match timeout {
            Some(limit) => match tokio::time::timeout(limit, self.rx).await {
                Ok(Ok(result)) => result,
                Ok(Err(_)) => Err(XwireError::ConnectionClosed),
                Err(_) => Err(XwireError::Timeout),
            },
            None => self.rx.await.map_err(|_| XwireError::ConnectionClosed)?,
        }
    }

    /// Block the current thread until the stream completes.
    pub fn wait_blocking(self) -> Result<StreamResult> {
        self.rx
            .blocking_recv()
            .map_err(|_| XwireError::ConnectionClosed)?
    }
}

#[cfg(test)]
mod tests {
    use bytes::Bytes;

    use super::*;

    fn msg(kind: ServerKind, payload: &'static [u8]) -> ServerMessage {
        ServerMessage {
            kind,
            payload: Bytes::from_static(payload),
            notices: Vec::new(),
        }
    }

    #[test]
    fn response_listener_completes_on_expected() {
        let (mut listener, future) = ResponseListener::channel(ServerKind::StmtExecuteOk);
        assert!(listener.on_message(msg(ServerKind::StmtExecuteOk, b"ok")));

        let result = future.wait_blocking().unwrap();
        assert_eq!(result.kind, ServerKind::StmtExecuteOk);
        assert!(result.notices.is_empty());
    }

    #[test]
    fn response_listener_attaches_notices() {
        let (mut listener, future) = ResponseListener::channel(ServerKind::Ok);
        assert!(!listener.on_message(msg(ServerKind::Notice, b"n1")));
        assert!(!listener.on_message(msg(ServerKind::Notice, b"n2")));
        assert!(listener.on_message(msg(ServerKind::Ok, b"done")));

        let result = future.wait_blocking().unwrap();
        assert_eq!(result.notices.len(), 2);
        assert_eq!(&result.notices[0].payload[..], b"n1");
        assert_eq!(&result.notices[1].payload[..], b"n2");
    }

    #[test]
    fn response_listener_rejects_wrong_kind() {
        let (mut listener, future) = ResponseListener::channel(ServerKind::Ok);
        assert!(listener.on_message(msg(ServerKind::Row, b"row")));

        let err = future.wait_blocking().unwrap_err();
        assert!(matches!(
            err,
            XwireError::UnexpectedMessage {
                expected: ServerKind::Ok,
                actual: ServerKind::Row,
            }
        ));
    }

    #[test]
    fn response_listener_propagates_error() {
        let (mut listener, future) = ResponseListener::channel(ServerKind::Ok);
        listener.on_error(XwireError::ConnectionClosed);
        assert!(matches!(
            future.wait_blocking(),
            Err(XwireError::ConnectionClosed)
        ));
    }

    #[test]
    fn dropped_listener_closes_future() {
        let (listener, future) = ResponseListener::channel(ServerKind::Ok);
        drop(listener);
        assert!(matches!(
            future.wait_blocking(),
            Err(XwireError::ConnectionClosed)
        ));
    }

    #[test]
    fn streaming_listener_collects_until_terminal() {
        let (mut listener, future) =
            StreamingListener::channel(vec![ServerKind::FetchDone, ServerKind::StmtExecuteOk]);
        assert!(!listener.on_message(msg(ServerKind::ColumnMetaData, b"meta")));
        assert!(!listener.on_message(msg(ServerKind::Row, b"r1")));
        assert!(!listener.on_message(msg(ServerKind::Notice, b"warn")));
        assert!(!listener.on_message(msg(ServerKind::Row, b"r2")));
        assert!(listener.on_message(msg(ServerKind::FetchDone, b"")));

        let result = future.wait_blocking().unwrap();
        assert_eq!(result.messages.len(), 3);
        assert_eq!(result.messages[1].kind, ServerKind::Row);
        assert_eq!(result.terminal.kind, ServerKind::FetchDone);
        assert_eq!(result.terminal.notices.len(), 1);
    }

    #[tokio::test]
    async fn response_future_times_out() {
        let (_listener, future) = ResponseListener::channel(ServerKind::Ok);
        let err = future
            .wait(Some(Duration::from_millis(10)))
            .await
            .unwrap_err();
        assert!(matches!(err, XwireError::Timeout));
    }
}
