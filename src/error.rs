//! Error types for xwire.

use thiserror::Error;

use crate::protocol::{ClientKind, PeerError, ServerKind};

/// Main error type for all transport operations.
///
/// Variants fall into four classes with different blast radii:
/// communications errors ([`Io`](Self::Io), [`ConnectionClosed`](Self::ConnectionClosed))
/// and framing errors ([`Framing`](Self::Framing)) are fatal and close the
/// connection; server errors ([`Server`](Self::Server)) fail one exchange and
/// leave the connection usable; the rest are argument errors surfaced to the
/// immediate caller only.
#[derive(Debug, Error)]
pub enum XwireError {
    /// I/O error on the underlying stream.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Error frame decoded from the peer. Request-level; the connection
    /// remains usable.
    #[error("server error {} ({}): {}", .0.code, .0.sql_state, .0.message)]
    Server(PeerError),

    /// Framing violation: unknown type tag, size mismatch, decompressor
    /// overrun. Signals version skew or an internal bug.
    #[error("framing error: {0}")]
    Framing(String),

    /// MsgPack serialization error.
    #[error("MsgPack encode error: {0}")]
    Encode(#[from] rmp_serde::encode::Error),

    /// MsgPack deserialization error.
    #[error("MsgPack decode error: {0}")]
    Decode(#[from] rmp_serde::decode::Error),

    /// Received a well-formed message of the wrong kind.
    #[error("unexpected {actual:?} while waiting for {expected:?}")]
    UnexpectedMessage {
        expected: ServerKind,
        actual: ServerKind,
    },

    /// Message kind with no caller-visible wire tag.
    #[error("client message kind {0:?} cannot be sent directly")]
    UnmappedKind(ClientKind),

    /// Bounded wait on a response expired. The exchange is abandoned but the
    /// connection itself is not torn down here.
    #[error("timed out waiting for a response")]
    Timeout,

    /// Connection closed.
    #[error("connection closed")]
    ConnectionClosed,
}

/// Result type alias using XwireError.
pub type Result<T> = std::result::Result<T, XwireError>;

impl XwireError {
    /// Whether this error leaves the connection unusable.
    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::Io(_) | Self::Framing(_) | Self::ConnectionClosed)
    }

    /// Duplicate a fatal error so it can be delivered to every queued
    /// listener. Non-fatal variants collapse to
    /// [`ConnectionClosed`](Self::ConnectionClosed).
    pub(crate) fn replicate(&self) -> Self {
        match self {
            Self::Io(e) => Self::Io(std::io::Error::new(e.kind(), e.to_string())),
            Self::Framing(s) => Self::Framing(s.clone()),
            _ => Self::ConnectionClosed,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fatal_classification() {
        assert!(XwireError::ConnectionClosed.is_fatal());
        assert!(XwireError::Framing("bad tag".into()).is_fatal());
        assert!(XwireError::Io(std::io::Error::other("boom")).is_fatal());
        assert!(
            !XwireError::UnexpectedMessage {
                expected: ServerKind::Ok,
                actual: ServerKind::Row,
            }
            .is_fatal()
        );
    }

    #[test]
    fn replicate_preserves_io_kind() {
        let original = XwireError::Io(std::io::Error::new(
            std::io::ErrorKind::BrokenPipe,
            "pipe gone",
        ));
        match original.replicate() {
            XwireError::Io(e) => assert_eq!(e.kind(), std::io::ErrorKind::BrokenPipe),
            other => panic!("expected Io, got {other:?}"),
        }
    }

    #[test]
    fn replicate_collapses_non_fatal() {
        let err = XwireError::UnmappedKind(ClientKind::Compression);
        assert!(matches!(err.replicate(), XwireError::ConnectionClosed));
    }
}
