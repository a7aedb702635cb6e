//! Engine counters.

use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};

use serde::{Deserialize, Serialize};

/// Point-in-time snapshot of engine activity.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StreamerStats {
    /// Sessions currently inside `stream_to`.
    pub active_sessions: usize,
    /// Wake tokens handed to listeners by the router.
    pub wakes_delivered: u64,
    /// Notifications collapsed into an already pending wake.
    pub coalesced_wakes: u64,
    /// Change events for paths nobody is subscribed to.
    pub unrouted_changes: u64,
    /// Diagnostics dropped because nobody drained the queue.
    pub dropped_diagnostics: u64,
}

#[derive(Debug, Default)]
pub(crate) struct Counters {
    pub(crate) active_sessions: AtomicUsize,
    pub(crate) wakes_delivered: AtomicU64,
    pub(crate) coalesced_wakes: AtomicU64,
    pub(crate) unrouted_changes: AtomicU64,
}

impl Counters {
    pub(crate) fn snapshot(&self, dropped_diagnostics: u64) -> StreamerStats {
        StreamerStats {
            active_sessions: self.active_sessions.load(Ordering::Relaxed),
            wakes_delivered: self.wakes_delivered.load(Ordering::Relaxed),
            coalesced_wakes: self.coalesced_wakes.load(Ordering::Relaxed),
            unrouted_changes: self.unrouted_changes.load(Ordering::Relaxed),
            dropped_diagnostics,
        }
    }
}
