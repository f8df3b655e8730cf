//! # xwire
//!
//! Framed wire transport for the X protocol: turns a raw byte stream into
//! typed protocol messages and back.
//!
//! Two consumption disciplines share the same wire format without ever
//! racing on the socket:
//!
//! - **Blocking** ([`blocking::Channel`]): one frame per call, plus a
//!   lazily-spawned dispatch worker that feeds queued listeners and
//!   terminates itself when idle.
//! - **Asynchronous** ([`aio::AsyncChannel`]): an event-driven read loop with
//!   a bounded read-ahead queue and a dedicated writer task; requests are
//!   FIFO-queued listeners and no caller thread blocks on the socket.
//!
//! Unsolicited notice frames interleave with any response and are attached
//! to the message that completes the exchange. Per-frame compression splices
//! into either discipline invisibly once negotiated.
//!
//! ## Example
//!
//! ```ignore
//! use xwire::aio::AsyncChannel;
//! use xwire::{ClientKind, ClientMessage, ServerKind, TransportConfig};
//!
//! #[tokio::main]
//! async fn main() -> xwire::Result<()> {
//!     let stream = tokio::net::TcpStream::connect("127.0.0.1:33060").await?;
//!     let (read, write) = stream.into_split();
//!     let channel = AsyncChannel::new(read, write, TransportConfig::default());
//!
//!     let request = ClientMessage::new(ClientKind::StmtExecute, payload);
//!     let reply = channel.execute(&request, ServerKind::StmtExecuteOk).await?;
//!     println!("{} notices", reply.notices.len());
//!     Ok(())
//! }
//! ```

pub mod aio;
pub mod blocking;
pub mod codec;
pub mod compress;
pub mod config;
pub mod dispatch;
pub mod error;
pub mod protocol;

pub use config::TransportConfig;
pub use error::{Result, XwireError};
pub use protocol::{
    ClientKind, ClientMessage, Notice, PeerError, ServerKind, ServerMessage, Severity,
};
