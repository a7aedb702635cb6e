//! Structured diagnostics for best-effort failures.
//!
//! Watch registration failures and backend errors never fail a caller, so they
//! are published here (and logged through `tracing`) instead of being returned.
//! Publishing never blocks: when the queue is full the event is dropped and
//! counted.

use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use crossbeam_channel::{bounded, Receiver, Sender, TrySendError};
use serde::Serialize;

/// What went wrong.
#[allow(missing_docs)]
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum DiagnosticKind {
    /// The backend refused to watch a path; automatic wake-ups are degraded.
    WatchRegistrationFailed { path: PathBuf, message: String },
    /// The backend refused to stop watching a path.
    WatchRemovalFailed { path: PathBuf, message: String },
    /// Asynchronous error reported by the backend.
    BackendError { message: String },
    /// A stream session ended with a copy or flush failure.
    SessionFailed { path: PathBuf, message: String },
}

/// A timestamped diagnostic event.
#[allow(missing_docs)]
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Diagnostic {
    pub at: DateTime<Utc>,
    pub kind: DiagnosticKind,
}

/// Bounded diagnostics queue shared by the engine's workers.
#[derive(Debug, Clone)]
pub(crate) struct DiagnosticsHub {
    tx: Sender<Diagnostic>,
    rx: Receiver<Diagnostic>,
    dropped: Arc<AtomicU64>,
}

impl DiagnosticsHub {
    pub(crate) fn new(capacity: usize) -> Self {
        let (tx, rx) = bounded(capacity.max(1));
        Self {
            tx,
            rx,
            dropped: Arc::new(AtomicU64::new(0)),
        }
    }

    pub(crate) fn publish(&self, kind: DiagnosticKind) {
        let diagnostic = Diagnostic { at: Utc::now(), kind };
        match self.tx.try_send(diagnostic) {
            Ok(()) => {}
            Err(TrySendError::Full(_)) | Err(TrySendError::Disconnected(_)) => {
                self.dropped.fetch_add(1, Ordering::Relaxed);
            }
        }
    }

    pub(crate) fn receiver(&self) -> Receiver<Diagnostic> {
        self.rx.clone()
    }

    pub(crate) fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn publish_is_non_blocking_and_counts_drops() {
        let hub = DiagnosticsHub::new(1);
        hub.publish(DiagnosticKind::BackendError { message: "a".into() });
        hub.publish(DiagnosticKind::BackendError { message: "b".into() });
        assert_eq!(hub.dropped(), 1);

        let rx = hub.receiver();
        let first = rx.try_recv().unwrap();
        assert_eq!(first.kind, DiagnosticKind::BackendError { message: "a".into() });
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn diagnostics_serialize_with_type_tag() {
        let kind = DiagnosticKind::WatchRegistrationFailed {
            path: PathBuf::from("/tmp/f"),
            message: "denied".into(),
        };
        let json = serde_json::to_value(&kind).unwrap();
        assert_eq!(json["type"], "watch_registration_failed");
        assert_eq!(json["message"], "denied");
    }
}
