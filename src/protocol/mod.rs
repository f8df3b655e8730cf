//! Wire protocol primitives: frame header codec, frames, the message type
//! registry and logical messages.

mod frame;
mod header;
mod message;
mod registry;

pub use frame::{Frame, build_frame};
pub use header::{FrameHeader, HEADER_SIZE, MAX_PAYLOAD_SIZE};
pub use message::{ClientMessage, Notice, PeerError, ServerMessage, Severity};
pub use registry::{
    CLIENT_COMPRESSION_TAG, ClientKind, SERVER_COMPRESSION_TAG, ServerKind,
};
