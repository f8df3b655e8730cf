//! Asynchronous transport: incremental frame decoder, read loop with bounded
//! read-ahead, and the dedicated writer task.

mod channel;
mod decoder;
mod writer;

pub use channel::{AsyncChannel, BoxedAsyncReader, SuspendedReader};
pub use decoder::{FeedProgress, FrameDecoder, decode_all};
pub use writer::{OutboundFrame, WriterHandle, spawn_writer_task};
