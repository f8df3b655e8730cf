//! Blocking message reader.
//!
//! Reads one frame per call from any `Read` stream (the compression splice
//! composes underneath). Error frames are raised as typed errors the moment
//! they are decoded, and peeked-ahead messages are buffered in a FIFO that is
//! always served before the stream is touched again.

use std::collections::VecDeque;
use std::io::Read;

use crate::error::{Result, XwireError};
use crate::protocol::{Frame, FrameHeader, HEADER_SIZE, Notice, ServerKind, ServerMessage};

/// Blocking frame reader over any byte stream.
pub struct SyncReader<R> {
    inner: R,
    /// Messages read ahead by a peek, served before the stream.
    pending: VecDeque<ServerMessage>,
}

impl<R: Read> SyncReader<R> {
    pub fn new(inner: R) -> Self {
        Self {
            inner,
            pending: VecDeque::new(),
        }
    }

    /// Rebuild a reader around a new stream, keeping buffered messages.
    pub(crate) fn from_parts(inner: R, pending: VecDeque<ServerMessage>) -> Self {
        Self { inner, pending }
    }

    /// Split into the stream and any buffered messages.
    pub(crate) fn into_parts(self) -> (R, VecDeque<ServerMessage>) {
        (self.inner, self.pending)
    }

    pub fn get_ref(&self) -> &R {
        &self.inner
    }

    pub fn into_inner(self) -> R {
        self.inner
    }

    /// Push a message back; it is served before the stream is touched again.
    pub(crate) fn unread(&mut self, msg: ServerMessage) {
        self.pending.push_front(msg);
    }

    /// Read one raw frame, blocking until it is complete.
    ///
    /// A clean EOF at a frame boundary is `ConnectionClosed`; EOF mid-frame
    /// is an I/O error.
    fn read_frame(&mut self) -> Result<Frame> {
        let mut header = [0u8; HEADER_SIZE];
        let n = self.inner.read(&mut header[..1])?;
        if n == 0 {
            return Err(XwireError::ConnectionClosed);
        }
        self.inner.read_exact(&mut header[1..])?;

        let parsed = FrameHeader::decode(&header)
            .ok_or_else(|| XwireError::Framing("frame header truncated".to_string()))?;
        let payload_len = parsed.payload_length()?;
        let mut payload = vec![0u8; payload_len];
        self.inner.read_exact(&mut payload)?;
        Ok(Frame {
            header: parsed,
            payload: payload.into(),
        })
    }

    /// Next logical message, serving the peek FIFO first.
    ///
    /// Error frames are raised here, so callers never see them as messages.
    pub(crate) fn next_message(&mut self) -> Result<ServerMessage> {
        if let Some(msg) = self.pending.pop_front() {
            return Ok(msg);
        }
        ServerMessage::from_frame(self.read_frame()?)
    }

    /// Read the next message of `expected` kind, transparently skipping and
    /// attaching any number of leading notices.
    pub fn read_message(&mut self, expected: ServerKind) -> Result<ServerMessage> {
        let mut notices = Vec::new();
        loop {
            let mut msg = self.next_message()?;
            if msg.kind.is_notice() {
                notices.push(Notice::from(msg));
                continue;
            }
            return if msg.kind == expected {
                notices.append(&mut msg.notices);
                msg.notices = notices;
                Ok(msg)
            } else {
                Err(XwireError::UnexpectedMessage {
                    expected,
                    actual: msg.kind,
                })
            };
        }
    }

    /// Kind of the next non-notice message, without consuming anything.
    ///
    /// Everything read while looking ahead is buffered and served by later
    /// reads in arrival order.
    pub fn peek_kind(&mut self) -> Result<ServerKind> {
        if let Some(kind) = self
            .pending
            .iter()
            .find(|m| !m.kind.is_notice())
            .map(|m| m.kind)
        {
            return Ok(kind);
        }
        loop {
            let msg = ServerMessage::from_frame(self.read_frame()?)?;
            let kind = msg.kind;
            self.pending.push_back(msg);
            if !kind.is_notice() {
                return Ok(kind);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::io::Cursor;

    use super::*;
    use crate::codec::MsgPackCodec;
    use crate::protocol::{PeerError, Severity, build_frame};

    fn wire(frames: &[(u8, &[u8])]) -> Cursor<Vec<u8>> {
        let mut bytes = Vec::new();
        for (tag, payload) in frames {
            bytes.extend_from_slice(&build_frame(*tag, payload));
        }
        Cursor::new(bytes)
    }

    #[test]
    fn read_single_message() {
        let mut reader = SyncReader::new(wire(&[(13, b"row")]));
        let msg = reader.read_message(ServerKind::Row).unwrap();
        assert_eq!(msg.kind, ServerKind::Row);
        assert_eq!(&msg.payload[..], b"row");
    }

    #[test]
    fn notices_are_skipped_and_attached() {
        let mut reader = SyncReader::new(wire(&[
            (11, b"warn one"),
            (11, b"warn two"),
            (17, b"exec ok"),
        ]));
        let msg = reader.read_message(ServerKind::StmtExecuteOk).unwrap();
        assert_eq!(msg.kind, ServerKind::StmtExecuteOk);
        assert_eq!(msg.notices.len(), 2);
        assert_eq!(&msg.notices[0].payload[..], b"warn one");
        assert_eq!(&msg.notices[1].payload[..], b"warn two");

        // All three frames were consumed.
        assert!(matches!(
            reader.read_message(ServerKind::Ok),
            Err(XwireError::ConnectionClosed)
        ));
    }

    #[test]
    fn wrong_kind_is_argument_error() {
        let mut reader = SyncReader::new(wire(&[(13, b"row")]));
        let err = reader.read_message(ServerKind::Ok).unwrap_err();
        assert!(matches!(err, XwireError::UnexpectedMessage { .. }));
        assert!(!err.is_fatal());
    }

    #[test]
    fn error_frame_is_raised_eagerly() {
        let details = PeerError {
            severity: Severity::Error,
            code: 1045,
            sql_state: "28000".to_string(),
            message: "access denied".to_string(),
        };
        let payload = MsgPackCodec::encode(&details).unwrap();
        let mut reader = SyncReader::new(wire(&[(1, &payload)]));

        let err = reader.read_message(ServerKind::Ok).unwrap_err();
        match err {
            XwireError::Server(peer) => assert_eq!(peer.code, 1045),
            other => panic!("expected Server error, got {other:?}"),
        }
    }

    #[test]
    fn peek_buffers_without_consuming() {
        let mut reader = SyncReader::new(wire(&[
            (11, b"notice"),
            (12, b"column meta"),
            (13, b"row"),
        ]));

        assert_eq!(reader.peek_kind().unwrap(), ServerKind::ColumnMetaData);
        // Peeking again touches only the buffer.
        assert_eq!(reader.peek_kind().unwrap(), ServerKind::ColumnMetaData);

        // The buffered notice and metadata are both still deliverable.
        let msg = reader.read_message(ServerKind::ColumnMetaData).unwrap();
        assert_eq!(msg.notices.len(), 1);
        let row = reader.read_message(ServerKind::Row).unwrap();
        assert_eq!(&row.payload[..], b"row");
    }

    #[test]
    fn clean_eof_is_connection_closed() {
        let mut reader = SyncReader::new(Cursor::new(Vec::new()));
        assert!(matches!(
            reader.read_message(ServerKind::Ok),
            Err(XwireError::ConnectionClosed)
        ));
    }

    #[test]
    fn eof_mid_frame_is_io_error() {
        let bytes = build_frame(13, b"row data");
        let mut reader = SyncReader::new(Cursor::new(bytes[..bytes.len() - 2].to_vec()));
        assert!(matches!(
            reader.read_message(ServerKind::Row),
            Err(XwireError::Io(_))
        ));
    }

    #[test]
    fn unknown_tag_is_fatal_framing() {
        let mut reader = SyncReader::new(wire(&[(250, b"")]));
        let err = reader.read_message(ServerKind::Ok).unwrap_err();
        assert!(err.is_fatal());
        assert!(matches!(err, XwireError::Framing(_)));
    }

    #[test]
    fn unread_is_served_first() {
        let mut reader = SyncReader::new(wire(&[(13, b"second")]));
        reader.unread(ServerMessage {
            kind: ServerKind::Row,
            payload: bytes::Bytes::from_static(b"first"),
            notices: Vec::new(),
        });

        let first = reader.read_message(ServerKind::Row).unwrap();
        assert_eq!(&first.payload[..], b"first");
        let second = reader.read_message(ServerKind::Row).unwrap();
        assert_eq!(&second.payload[..], b"second");
    }
}
