//! Background workers between the watch backend and the router.

use std::path::PathBuf;
use std::thread::{self, JoinHandle};

use crossbeam_channel::{Receiver, Sender};

use crate::diagnostics::{DiagnosticKind, DiagnosticsHub};
use crate::error::{StreamerError, StreamerResult, WatchError};
use crate::watch::ChangeFeed;

pub(crate) fn spawn_worker<F>(name: &str, f: F) -> StreamerResult<JoinHandle<()>>
where
    F: FnOnce() + Send + 'static,
{
    thread::Builder::new()
        .name(name.to_string())
        .spawn(f)
        .map_err(|e| StreamerError::internal(format!("failed to spawn {name}: {e}")))
}

/// Moves changed paths from the backend to the router.
///
/// Exits when the backend closes; dropping `changes_tx` then tells the router
/// to stop dispatching. Blocking on a full `changes_tx` is fine here: the
/// backend never waits on this worker.
pub(crate) fn forward_changes(changes: ChangeFeed, changes_tx: Sender<PathBuf>) {
    'feed: while let Some(batch) = changes.recv() {
        for path in batch {
            if changes_tx.send(path).is_err() {
                break 'feed;
            }
        }
    }
    tracing::debug!("change forwarder stopped");
}

/// Backend errors are diagnostics only; they never stop routing.
///
/// The backend drops errors once its queue is full, so drain them promptly.
pub(crate) fn drain_errors(errors: Receiver<WatchError>, diagnostics: DiagnosticsHub) {
    for err in errors {
        tracing::warn!(error = %err, "filesystem notification error");
        diagnostics.publish(DiagnosticKind::BackendError {
            message: err.to_string(),
        });
    }
    tracing::debug!("watch error drain stopped");
}
