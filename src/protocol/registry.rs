//! Message type registry.
//!
//! Bidirectional maps between the closed sets of message kinds and their
//! numeric wire tags. The client-outbound and server-inbound tag spaces are
//! independent; numbers may overlap (and do: client `CrudUpdate` and server
//! `Compression` both use 19).
//!
//! An unknown server tag means the peer speaks a newer protocol revision or
//! the stream is desynchronized; either way the connection cannot continue,
//! so the lookup fails fatally. The client-side lookup only fails for the
//! reserved compression kind, which the splice layer owns.

use crate::error::{Result, XwireError};

/// Reserved outer-frame tag for server-to-client compression wrappers.
pub const SERVER_COMPRESSION_TAG: u8 = 19;

/// Reserved outer-frame tag for client-to-server compression wrappers.
pub const CLIENT_COMPRESSION_TAG: u8 = 46;

/// Client-outbound message kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ClientKind {
    CapabilitiesGet,
    CapabilitiesSet,
    ConnectionClose,
    AuthenticateStart,
    AuthenticateContinue,
    SessionReset,
    SessionClose,
    StmtExecute,
    CrudFind,
    CrudInsert,
    CrudUpdate,
    CrudDelete,
    ExpectOpen,
    ExpectClose,
    PreparePrepare,
    PrepareExecute,
    PrepareDeallocate,
    CursorOpen,
    CursorClose,
    CursorFetch,
    /// Reserved for the compression splice; not directly sendable.
    Compression,
}

impl ClientKind {
    /// All kinds with a caller-visible wire tag.
    pub const SENDABLE: [ClientKind; 20] = [
        ClientKind::CapabilitiesGet,
        ClientKind::CapabilitiesSet,
        ClientKind::ConnectionClose,
        ClientKind::AuthenticateStart,
        ClientKind::AuthenticateContinue,
        ClientKind::SessionReset,
        ClientKind::SessionClose,
        ClientKind::StmtExecute,
        ClientKind::CrudFind,
        ClientKind::CrudInsert,
        ClientKind::CrudUpdate,
        ClientKind::CrudDelete,
        ClientKind::ExpectOpen,
        ClientKind::ExpectClose,
        ClientKind::PreparePrepare,
        ClientKind::PrepareExecute,
        ClientKind::PrepareDeallocate,
        ClientKind::CursorOpen,
        ClientKind::CursorClose,
        ClientKind::CursorFetch,
    ];

    /// Wire tag for this kind.
    ///
    /// Fails for [`ClientKind::Compression`]: wrapper frames are emitted by
    /// the splice layer only, and asking for the tag is a programming error.
    pub fn tag(self) -> Result<u8> {
        match self {
            ClientKind::CapabilitiesGet => Ok(1),
            ClientKind::CapabilitiesSet => Ok(2),
            ClientKind::ConnectionClose => Ok(3),
            ClientKind::AuthenticateStart => Ok(4),
            ClientKind::AuthenticateContinue => Ok(5),
            ClientKind::SessionReset => Ok(6),
            ClientKind::SessionClose => Ok(7),
            ClientKind::StmtExecute => Ok(12),
            ClientKind::CrudFind => Ok(17),
            ClientKind::CrudInsert => Ok(18),
            ClientKind::CrudUpdate => Ok(19),
            ClientKind::CrudDelete => Ok(20),
            ClientKind::ExpectOpen => Ok(24),
            ClientKind::ExpectClose => Ok(25),
            ClientKind::PreparePrepare => Ok(40),
            ClientKind::PrepareExecute => Ok(41),
            ClientKind::PrepareDeallocate => Ok(42),
            ClientKind::CursorOpen => Ok(43),
            ClientKind::CursorClose => Ok(44),
            ClientKind::CursorFetch => Ok(45),
            ClientKind::Compression => Err(XwireError::UnmappedKind(self)),
        }
    }

    /// Kind for a client-outbound wire tag.
    pub fn from_tag(tag: u8) -> Result<Self> {
        match tag {
            1 => Ok(ClientKind::CapabilitiesGet),
            2 => Ok(ClientKind::CapabilitiesSet),
            3 => Ok(ClientKind::ConnectionClose),
            4 => Ok(ClientKind::AuthenticateStart),
            5 => Ok(ClientKind::AuthenticateContinue),
            6 => Ok(ClientKind::SessionReset),
            7 => Ok(ClientKind::SessionClose),
            12 => Ok(ClientKind::StmtExecute),
            17 => Ok(ClientKind::CrudFind),
            18 => Ok(ClientKind::CrudInsert),
            19 => Ok(ClientKind::CrudUpdate),
            20 => Ok(ClientKind::CrudDelete),
            24 => Ok(ClientKind::ExpectOpen),
            25 => Ok(ClientKind::ExpectClose),
            40 => Ok(ClientKind::PreparePrepare),
            41 => Ok(ClientKind::PrepareExecute),
            42 => Ok(ClientKind::PrepareDeallocate),
            43 => Ok(ClientKind::CursorOpen),
            44 => Ok(ClientKind::CursorClose),
            45 => Ok(ClientKind::CursorFetch),
            CLIENT_COMPRESSION_TAG => Ok(ClientKind::Compression),
            _ => Err(XwireError::Framing(format!(
                "unknown client message tag {tag}"
            ))),
        }
    }
}

/// Server-inbound message kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ServerKind {
    Ok,
    Error,
    Capabilities,
    AuthenticateContinue,
    AuthenticateOk,
    Notice,
    ColumnMetaData,
    Row,
    FetchDone,
    FetchSuspended,
    FetchDoneMoreResultsets,
    StmtExecuteOk,
    FetchDoneMoreOutParams,
    /// Compression wrapper; normally consumed by the splice layer before the
    /// reader ever sees it.
    Compression,
}

impl ServerKind {
    /// Every registered server kind.
    pub const ALL: [ServerKind; 14] = [
        ServerKind::Ok,
        ServerKind::Error,
        ServerKind::Capabilities,
        ServerKind::AuthenticateContinue,
        ServerKind::AuthenticateOk,
        ServerKind::Notice,
        ServerKind::ColumnMetaData,
        ServerKind::Row,
        ServerKind::FetchDone,
        ServerKind::FetchSuspended,
        ServerKind::FetchDoneMoreResultsets,
        ServerKind::StmtExecuteOk,
        ServerKind::FetchDoneMoreOutParams,
        ServerKind::Compression,
    ];

    /// Kind for a server-inbound wire tag.
    ///
    /// Unknown tags are fatal: registry/version mismatch, unrecoverable.
    pub fn from_tag(tag: u8) -> Result<Self> {
        match tag {
            0 => Ok(ServerKind::Ok),
            1 => Ok(ServerKind::Error),
            2 => Ok(ServerKind::Capabilities),
            3 => Ok(ServerKind::AuthenticateContinue),
            4 => Ok(ServerKind::AuthenticateOk),
            11 => Ok(ServerKind::Notice),
            12 => Ok(ServerKind::ColumnMetaData),
            13 => Ok(ServerKind::Row),
            14 => Ok(ServerKind::FetchDone),
            15 => Ok(ServerKind::FetchSuspended),
            16 => Ok(ServerKind::FetchDoneMoreResultsets),
            17 => Ok(ServerKind::StmtExecuteOk),
            18 => Ok(ServerKind::FetchDoneMoreOutParams),
            SERVER_COMPRESSION_TAG => Ok(ServerKind::Compression),
            _ => Err(XwireError::Framing(format!(
                "unknown server message tag {tag}"
            ))),
        }
    }

    /// Wire tag for this kind.
    pub fn tag(self) -> u8 {
        match self {
            ServerKind::Ok => 0,
            ServerKind::Error => 1,
            ServerKind::Capabilities => 2,
            ServerKind::AuthenticateContinue => 3,
            ServerKind::AuthenticateOk => 4,
            ServerKind::Notice => 11,
            ServerKind::ColumnMetaData => 12,
            ServerKind::Row => 13,
            ServerKind::FetchDone => 14,
            ServerKind::FetchSuspended => 15,
            ServerKind::FetchDoneMoreResultsets => 16,
            ServerKind::StmtExecuteOk => 17,
            ServerKind::FetchDoneMoreOutParams => 18,
            ServerKind::Compression => SERVER_COMPRESSION_TAG,
        }
    }

    /// Whether this kind is an unsolicited notice.
    #[inline]
    pub fn is_notice(self) -> bool {
        matches!(self, ServerKind::Notice)
    }
}
