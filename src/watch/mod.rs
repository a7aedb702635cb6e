//! Watch backends: the source of "path changed" notifications.
//!
//! A backend is opened once per engine start. It hands back a pair of streams
//! (changed paths and asynchronous errors) and accepts add/remove requests from
//! the router. Closing the backend must disconnect both streams; that
//! disconnect is what drives the engine's shutdown cascade.

use std::path::Path;

use crossbeam_channel::Receiver;

use crate::error::WatchError;

/// Coalescing, non-blocking change hand-off.
pub mod feed;
/// Deterministic in-process backend.
pub mod manual;
/// OS notification backend built on the `notify` crate.
pub mod native;

pub use feed::{change_feed, ChangeFeed, ChangeNotifier};
pub use manual::{ManualBackend, ManualWatch};
pub use native::{NotifyBackend, NotifyWatch};

/// Streams produced by an opened backend.
#[derive(Debug)]
pub struct WatchStreams {
    /// Paths that changed. Disconnects when the backend is closed.
    pub changes: ChangeFeed,
    /// Asynchronous backend errors. Disconnects when the backend is closed.
    pub errors: Receiver<WatchError>,
}

/// An opened watch backend.
pub trait WatchBackend: Send + 'static {
    /// Start watching `path`.
    fn add(&mut self, path: &Path) -> Result<(), WatchError>;

    /// Stop watching `path`.
    fn remove(&mut self, path: &Path) -> Result<(), WatchError>;

    /// Tear the backend down. Must disconnect both streams. Idempotent.
    fn close(&mut self);
}

/// Opens a fresh backend for every engine start.
pub trait WatchBackendFactory: Send + Sync + 'static {
    /// Backend type produced by this factory.
    type Backend: WatchBackend;

    /// Open a backend whose error queue holds up to `error_capacity` items.
    ///
    /// Backends must report changes through a [`ChangeNotifier`] and must
    /// never block while doing so.
    fn open(&self, error_capacity: usize) -> Result<(Self::Backend, WatchStreams), WatchError>;
}
