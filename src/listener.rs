//! Listeners: one source, one sink, one private wake signal.
//!
//! A listener is the unit of subscription. It is handed to exactly one stream
//! session and is not reusable once closed.

use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, PoisonError};

use crossbeam_channel::{bounded, Receiver, Sender, TrySendError};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::source::{Sink, Source};

/// Unique identifier for a listener.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ListenerId(Uuid);

impl ListenerId {
    /// Create a new random listener id.
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for ListenerId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for ListenerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// Result of notifying a wake signal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum WakeOutcome {
    Delivered,
    /// A wake was already pending; this one collapsed into it.
    Coalesced,
    Closed,
}

/// Single-slot wake: at most one pending "changed" token.
///
/// The only sender lives here; closing drops it so the receiving session sees
/// a disconnect once any pending token has been consumed.
#[derive(Debug)]
pub(crate) struct WakeSignal {
    id: ListenerId,
    tx: Mutex<Option<Sender<()>>>,
}

impl WakeSignal {
    fn new(id: ListenerId) -> (Arc<Self>, Receiver<()>) {
        let (tx, rx) = bounded(1);
        let signal = Arc::new(Self {
            id,
            tx: Mutex::new(Some(tx)),
        });
        (signal, rx)
    }

    pub(crate) const fn id(&self) -> ListenerId {
        self.id
    }

    /// Non-blocking notify.
    pub(crate) fn notify(&self) -> WakeOutcome {
        let guard = self.tx.lock().unwrap_or_else(PoisonError::into_inner);
        let Some(tx) = guard.as_ref() else {
            return WakeOutcome::Closed;
        };
        match tx.try_send(()) {
            Ok(()) => WakeOutcome::Delivered,
            Err(TrySendError::Full(())) => WakeOutcome::Coalesced,
            Err(TrySendError::Disconnected(())) => WakeOutcome::Closed,
        }
    }

    /// Returns true if this call performed the close.
    fn close(&self) -> bool {
        self.tx
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
            .is_some()
    }

    fn is_closed(&self) -> bool {
        self.tx.lock().unwrap_or_else(PoisonError::into_inner).is_none()
    }
}

#[derive(Debug)]
pub(crate) struct ListenerIo<S, K> {
    pub(crate) source: S,
    pub(crate) sink: K,
}

/// Binds a byte source to a buffered sink.
///
/// Construction pre-arms one wake, so a listener closed before it is ever
/// streamed still gets exactly one read-to-end pass (a `cat`, not a `tail -f`):
///
/// ```rust,ignore
/// let listener = Listener::new(FileSource::open("app.log")?, BufWriter::new(stdout()));
/// listener.close();
/// streamer.stream_to(&listener, Duration::ZERO)?;
/// ```
#[derive(Debug)]
pub struct Listener<S: Source, K: Sink> {
    id: ListenerId,
    path: PathBuf,
    wake: Arc<WakeSignal>,
    wake_rx: Receiver<()>,
    io: Mutex<ListenerIo<S, K>>,
}

impl<S: Source, K: Sink> Listener<S, K> {
    /// Create a listener streaming `source` into `sink`.
    pub fn new(source: S, sink: K) -> Self {
        let id = ListenerId::new();
        let (wake, wake_rx) = WakeSignal::new(id);
        // Force the initial read even if nobody ever touches the file.
        let _ = wake.notify();
        Self {
            id,
            path: source.path().to_path_buf(),
            wake,
            wake_rx,
            io: Mutex::new(ListenerIo { source, sink }),
        }
    }

    /// Stop streaming to this listener. Idempotent.
    ///
    /// Observed by the session at its next wait, never mid-copy.
    pub fn close(&self) {
        if self.wake.close() {
            tracing::debug!(listener = %self.id, path = %self.path.display(), "listener closed");
        }
    }

    /// True once [`Listener::close`] has been called.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.wake.is_closed()
    }

    /// Listener identity.
    #[must_use]
    pub const fn id(&self) -> ListenerId {
        self.id
    }

    /// Watched path of the source.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Recover the source and sink.
    pub fn into_parts(self) -> (S, K) {
        let io = self.io.into_inner().unwrap_or_else(PoisonError::into_inner);
        (io.source, io.sink)
    }

    pub(crate) fn wake_signal(&self) -> Arc<WakeSignal> {
        Arc::clone(&self.wake)
    }

    pub(crate) const fn wake_receiver(&self) -> &Receiver<()> {
        &self.wake_rx
    }

    pub(crate) const fn io(&self) -> &Mutex<ListenerIo<S, K>> {
        &self.io
    }
}
