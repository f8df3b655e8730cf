//! Logical messages exchanged with the peer.
//!
//! A logical message is the decoded form of one frame: its kind (via the
//! registry) plus the schema-encoded payload, which stays opaque to the
//! transport. Notices accumulated while waiting for a response are attached
//! to the terminal message.

use bytes::Bytes;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use super::frame::Frame;
use super::registry::{ClientKind, ServerKind};
use crate::codec::MsgPackCodec;
use crate::error::{Result, XwireError};

/// A client-outbound message.
#[derive(Debug, Clone)]
pub struct ClientMessage {
    pub kind: ClientKind,
    pub payload: Bytes,
}

impl ClientMessage {
    /// Create a message from an already-encoded payload.
    pub fn new(kind: ClientKind, payload: impl Into<Bytes>) -> Self {
        Self {
            kind,
            payload: payload.into(),
        }
    }

    /// Encode `value` with the schema codec as the message payload.
    pub fn encode<T: Serialize>(kind: ClientKind, value: &T) -> Result<Self> {
        Ok(Self {
            kind,
            payload: Bytes::from(MsgPackCodec::encode(value)?),
        })
    }

    /// Build the wire frame for this message.
    ///
    /// Fails with an argument error for kinds with no caller-visible tag.
    pub fn to_frame(&self) -> Result<Frame> {
        Ok(Frame::new(self.kind.tag()?, self.payload.clone()))
    }
}

/// A server-inbound message with any notices that preceded it.
#[derive(Debug, Clone)]
pub struct ServerMessage {
    pub kind: ServerKind,
    pub payload: Bytes,
    /// Unsolicited notices received while waiting for this message.
    pub notices: Vec<Notice>,
}

impl ServerMessage {
    /// Decode a frame into a logical message.
    ///
    /// An Error-kind frame is raised here as [`XwireError::Server`], so
    /// callers never special-case error frames themselves. A malformed Error
    /// payload is a framing violation (version skew), not a decode error.
    pub(crate) fn from_frame(frame: Frame) -> Result<Self> {
        let kind = ServerKind::from_tag(frame.message_type())?;
        if kind == ServerKind::Error {
            let details: PeerError = MsgPackCodec::decode(&frame.payload).map_err(|e| {
                XwireError::Framing(format!("malformed Error payload: {e}"))
            })?;
            return Err(XwireError::Server(details));
        }
        Ok(Self {
            kind,
            payload: frame.payload,
            notices: Vec::new(),
        })
    }

    /// Decode the payload with the schema codec.
    pub fn decode_as<T: DeserializeOwned>(&self) -> Result<T> {
        MsgPackCodec::decode(&self.payload)
    }

    /// Take the attached notices, leaving the message without any.
    pub fn take_notices(&mut self) -> Vec<Notice> {
        std::mem::take(&mut self.notices)
    }
}

/// An unsolicited server-to-client notice.
#[derive(Debug, Clone)]
pub struct Notice {
    pub payload: Bytes,
}

impl Notice {
    pub fn new(payload: impl Into<Bytes>) -> Self {
        Self {
            payload: payload.into(),
        }
    }

    /// Decode the notice body with the schema codec.
    pub fn decode_as<T: DeserializeOwned>(&self) -> Result<T> {
        MsgPackCodec::decode(&self.payload)
    }
}

impl From<ServerMessage> for Notice {
    fn from(msg: ServerMessage) -> Self {
        Self {
            payload: msg.payload,
        }
    }
}

/// Severity of a peer-reported error.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Severity {
    Error,
    Fatal,
}

/// The decoded body of an Error frame: the peer's code, state and message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PeerError {
    pub severity: Severity,
    pub code: u32,
    pub sql_state: String,
    pub message: String,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::build_frame;

    fn error_frame(code: u32, message: &str) -> Frame {
        let details = PeerError {
            severity: Severity::Error,
            code,
            sql_state: "HY000".to_string(),
            message: message.to_string(),
        };
        Frame::new(
            ServerKind::Error.tag(),
            Bytes::from(MsgPackCodec::encode(&details).unwrap()),
        )
    }

    #[test]
    fn client_message_to_frame() {
        let msg = ClientMessage::new(ClientKind::CrudFind, &b"find body"[..]);
        let frame = msg.to_frame().unwrap();
        assert_eq!(frame.message_type(), 17);
        assert_eq!(frame.payload(), b"find body");
    }

    #[test]
    fn compression_kind_rejected_at_frame_build() {
        let msg = ClientMessage::new(ClientKind::Compression, Bytes::new());
        assert!(matches!(
            msg.to_frame(),
            Err(XwireError::UnmappedKind(ClientKind::Compression))
        ));
    }

    #[test]
    fn from_frame_resolves_kind() {
        let frame = Frame::from_parts(ServerKind::Row.tag(), b"row data");
        let msg = ServerMessage::from_frame(frame).unwrap();
        assert_eq!(msg.kind, ServerKind::Row);
        assert_eq!(&msg.payload[..], b"row data");
        assert!(msg.notices.is_empty());
    }

    #[test]
    fn error_frame_raises_server_error() {
        let err = ServerMessage::from_frame(error_frame(1064, "syntax error")).unwrap_err();
        match err {
            XwireError::Server(details) => {
                assert_eq!(details.code, 1064);
                assert_eq!(details.sql_state, "HY000");
                assert_eq!(details.message, "syntax error");
            }
            other => panic!("expected Server error, got {other:?}"),
        }
    }

    #[test]
    fn server_error_is_not_fatal() {
        let err = ServerMessage::from_frame(error_frame(5, "nope")).unwrap_err();
        assert!(!err.is_fatal());
    }

    #[test]
    fn malformed_error_payload_is_framing() {
        let frame = Frame::from_parts(ServerKind::Error.tag(), &[0xC1]);
        let err = ServerMessage::from_frame(frame).unwrap_err();
        assert!(matches!(err, XwireError::Framing(_)));
    }

    #[test]
    fn unknown_tag_is_framing() {
        let wire = build_frame(200, b"");
        let frame = Frame::from_parts(200, &wire[crate::protocol::HEADER_SIZE..]);
        assert!(matches!(
            ServerMessage::from_frame(frame),
            Err(XwireError::Framing(_))
        ));
    }

    #[test]
    fn peer_error_codec_roundtrip() {
        let details = PeerError {
            severity: Severity::Fatal,
            code: 3168,
            sql_state: "08S01".to_string(),
            message: "session was killed".to_string(),
        };
        let bytes = MsgPackCodec::encode(&details).unwrap();
        let decoded: PeerError = MsgPackCodec::decode(&bytes).unwrap();
        assert_eq!(decoded, details);
    }

    #[test]
    fn take_notices_empties_message() {
        let frame = Frame::from_parts(ServerKind::Ok.tag(), b"");
        let mut msg = ServerMessage::from_frame(frame).unwrap();
        msg.notices.push(Notice::new(&b"warning"[..]));
        let notices = msg.take_notices();
        assert_eq!(notices.len(), 1);
        assert!(msg.notices.is_empty());
    }
}
