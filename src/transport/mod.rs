//! Transport adapters layered on top of the engine.
//!
//! The engine itself is transport-agnostic: it copies bytes into any
//! [`crate::Sink`]. These adapters cover the common cases of streaming a file
//! by path into an arbitrary writer and serving files over raw TCP.

/// Stream a file by path into any writer.
pub mod raw;
/// Raw TCP file streaming server.
pub mod tcp;

pub use raw::stream_file;
pub use tcp::{ShutdownHandle, TcpStreamServer};
