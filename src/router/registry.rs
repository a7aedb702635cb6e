use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::listener::{ListenerId, WakeOutcome, WakeSignal};

/// Outcome of fanning one change out to a path's subscribers.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub(crate) struct DispatchReport {
    pub(crate) delivered: u64,
    pub(crate) coalesced: u64,
}

/// Watched path → subscribed wake signals, keyed by listener identity.
///
/// An entry exists for a path iff at least one listener is subscribed to it.
#[derive(Debug, Default)]
pub(crate) struct Registry {
    paths: HashMap<PathBuf, HashMap<ListenerId, Arc<WakeSignal>>>,
}

impl Registry {
    /// Returns true if this created the path's entry.
    pub(crate) fn insert(&mut self, path: &Path, signal: Arc<WakeSignal>) -> bool {
        let mut created = false;
        let subscribers = self.paths.entry(path.to_path_buf()).or_insert_with(|| {
            created = true;
            HashMap::new()
        });
        subscribers.insert(signal.id(), signal);
        created
    }

    /// Returns true if this removed the path's last subscriber (and its entry).
    pub(crate) fn remove(&mut self, path: &Path, id: ListenerId) -> bool {
        let Some(subscribers) = self.paths.get_mut(path) else {
            return false;
        };
        subscribers.remove(&id);
        if subscribers.is_empty() {
            self.paths.remove(path);
            return true;
        }
        false
    }

    /// Non-blocking fan-out. `None` if nobody is subscribed to `path`.
    pub(crate) fn dispatch(&self, path: &Path) -> Option<DispatchReport> {
        let subscribers = self.paths.get(path)?;
        let mut report = DispatchReport::default();
        for signal in subscribers.values() {
            match signal.notify() {
                WakeOutcome::Delivered => report.delivered += 1,
                WakeOutcome::Coalesced => report.coalesced += 1,
                // Closed listeners stay until their session unsubscribes.
                WakeOutcome::Closed => {}
            }
        }
        Some(report)
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.paths.is_empty()
    }

    #[cfg(test)]
    pub(crate) fn subscriber_count(&self, path: &Path) -> usize {
        self.paths.get(path).map_or(0, HashMap::len)
    }
}
