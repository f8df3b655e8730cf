//! Blocking transport: synchronous reader/writer and the channel with its
//! lazily-spawned dispatch worker.

mod channel;
mod reader;
mod writer;

pub use channel::{BoxedReader, BoxedWriter, Channel};
pub use reader::SyncReader;
pub use writer::SyncWriter;
