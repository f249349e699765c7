//! Connection runtime.
//!
//! Accepted connections are handed to a fixed pool of worker threads. Each
//! worker owns:
//! - its own `Processor`, built once when the worker starts
//! - a `ConnectionHandler` with a reusable read buffer and `FrameBuffer`
//!
//! A worker serves one connection at a time from start to close, so a slow
//! or failing connection only ever ties up its own worker.

mod buffer;
mod connection;
mod pool;

pub(crate) use buffer::FrameBuffer;
pub use connection::{Connection, ConnectionError, ConnectionHandler};
pub use pool::WorkerPool;
