//! # tailstream - continuous multi-listener file tailing
//!
//! tailstream streams newly appended bytes of watched files to any number of
//! independent listeners in near real time. Changes are detected through
//! filesystem notifications rather than polling.
//!
//! ## Core Concepts
//!
//! - **Listener**: one byte source, one buffered sink and a private wake signal
//! - **Router**: a single worker owning every subscription; it coalesces change
//!   notifications into at most one pending wake per listener
//! - **Session**: [`Streamer::stream_to`], a blocking loop that reads from the
//!   listener's cursor to the current end of the source on every wake
//!
//! Wakes are coalesced, not counted. A slow listener may miss intermediate
//! notifications but never data: every wake catches up to the current end.
//!
//! ## Usage
//!
//! ```rust,no_run
//! use std::io::{stdout, BufWriter};
//! use std::time::Duration;
//!
//! use tailstream::{FileSource, Listener, Streamer, StreamerConfig};
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let streamer = Streamer::new(StreamerConfig::default());
//! streamer.start()?;
//!
//! let listener = Listener::new(FileSource::open("app.log")?, BufWriter::new(stdout()));
//! // Follow until nothing has changed for 30 seconds.
//! streamer.stream_to(&listener, Duration::from_secs(30))?;
//!
//! streamer.stop()?;
//! # Ok(())
//! # }
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

pub mod config;
pub mod diagnostics;
pub mod error;
pub mod listener;
pub mod source;
pub mod stats;
pub mod streamer;
pub mod watch;

pub mod transport;

mod router;

// Re-export primary types at crate root for convenience
pub use config::StreamerConfig;
pub use diagnostics::{Diagnostic, DiagnosticKind};
pub use error::{StreamerError, StreamerResult, WatchError};
pub use listener::{Listener, ListenerId};
pub use source::{FileSource, Sink, Source};
pub use stats::StreamerStats;
pub use streamer::{EngineState, SessionEnd, Streamer};
pub use watch::{ManualWatch, NotifyWatch, WatchBackend, WatchBackendFactory, WatchStreams};
