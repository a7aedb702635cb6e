use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use crossbeam_channel::{bounded, Sender};

use crate::error::WatchError;

use super::{change_feed, ChangeNotifier, WatchBackend, WatchBackendFactory, WatchStreams};

#[derive(Debug, Default)]
struct ManualState {
    watched: HashSet<PathBuf>,
    adds: usize,
    removes: usize,
    opens: usize,
    fail_adds: bool,
    notifier: Option<ChangeNotifier>,
    errors_tx: Option<Sender<WatchError>>,
}

/// Backend driven by hand: changes are injected with [`ManualWatch::emit`].
///
/// Useful for embedding (e.g. when another component already knows when a
/// file grows) and for deterministic tests. Clones share state, so keep one
/// clone as a handle and give another to the engine.
#[derive(Debug, Clone, Default)]
pub struct ManualWatch {
    state: Arc<Mutex<ManualState>>,
}

/// Backend half of a [`ManualWatch`].
#[derive(Debug)]
pub struct ManualBackend {
    state: Arc<Mutex<ManualState>>,
}

fn lock(state: &Mutex<ManualState>) -> MutexGuard<'_, ManualState> {
    state.lock().unwrap_or_else(PoisonError::into_inner)
}

impl ManualWatch {
    /// Create an unopened manual backend.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Report a change to `path`. Never blocks; returns false if the backend
    /// is not open.
    pub fn emit(&self, path: impl AsRef<Path>) -> bool {
        let notifier = lock(&self.state).notifier.clone();
        match notifier {
            Some(notifier) => notifier.notify(path.as_ref().to_path_buf()),
            None => false,
        }
    }

    /// Report an asynchronous backend error. Returns false if it was dropped.
    pub fn emit_error(&self, message: impl Into<String>) -> bool {
        let tx = lock(&self.state).errors_tx.clone();
        match tx {
            Some(tx) => tx
                .try_send(WatchError::Backend {
                    message: message.into(),
                })
                .is_ok(),
            None => false,
        }
    }

    /// Make subsequent `add` calls fail.
    pub fn fail_adds(&self, fail: bool) {
        lock(&self.state).fail_adds = fail;
    }

    /// Whether `path` is currently registered.
    #[must_use]
    pub fn is_watched(&self, path: impl AsRef<Path>) -> bool {
        lock(&self.state).watched.contains(path.as_ref())
    }

    /// Number of currently registered paths.
    #[must_use]
    pub fn watched_count(&self) -> usize {
        lock(&self.state).watched.len()
    }

    /// Total successful `add` calls.
    #[must_use]
    pub fn add_count(&self) -> usize {
        lock(&self.state).adds
    }

    /// Total successful `remove` calls.
    #[must_use]
    pub fn remove_count(&self) -> usize {
        lock(&self.state).removes
    }

    /// Total times a backend was opened.
    #[must_use]
    pub fn open_count(&self) -> usize {
        lock(&self.state).opens
    }

    /// Whether a backend is currently open.
    #[must_use]
    pub fn is_open(&self) -> bool {
        lock(&self.state).notifier.is_some()
    }
}

impl WatchBackendFactory for ManualWatch {
    type Backend = ManualBackend;

    fn open(&self, error_capacity: usize) -> Result<(ManualBackend, WatchStreams), WatchError> {
        let (notifier, changes) = change_feed();
        let (errors_tx, errors_rx) = bounded(error_capacity.max(1));

        let mut state = lock(&self.state);
        if state.notifier.is_some() {
            return Err(WatchError::Init {
                message: "manual backend is already open".to_string(),
            });
        }
        state.notifier = Some(notifier);
        state.errors_tx = Some(errors_tx);
        state.watched.clear();
        state.opens += 1;

        Ok((
            ManualBackend {
                state: Arc::clone(&self.state),
            },
            WatchStreams {
                changes,
                errors: errors_rx,
            },
        ))
    }
}

impl WatchBackend for ManualBackend {
    fn add(&mut self, path: &Path) -> Result<(), WatchError> {
        let mut state = lock(&self.state);
        if state.notifier.is_none() {
            return Err(WatchError::Closed);
        }
        if state.fail_adds {
            return Err(WatchError::Registration {
                path: path.to_path_buf(),
                message: "registration refused".to_string(),
            });
        }
        state.watched.insert(path.to_path_buf());
        state.adds += 1;
        Ok(())
    }

    fn remove(&mut self, path: &Path) -> Result<(), WatchError> {
        let mut state = lock(&self.state);
        if state.notifier.is_none() {
            return Err(WatchError::Closed);
        }
        if !state.watched.remove(path) {
            return Err(WatchError::Removal {
                path: path.to_path_buf(),
                message: "path is not watched".to_string(),
            });
        }
        state.removes += 1;
        Ok(())
    }

    fn close(&mut self) {
        let mut state = lock(&self.state);
        state.notifier = None;
        state.errors_tx = None;
        state.watched.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn add_remove_track_registrations() {
        let watch = ManualWatch::new();
        let (mut backend, _streams) = watch.open(4).unwrap();

        backend.add(Path::new("/a")).unwrap();
        assert!(watch.is_watched("/a"));
        backend.remove(Path::new("/a")).unwrap();
        assert!(!watch.is_watched("/a"));
        assert!(backend.remove(Path::new("/a")).is_err());
        assert_eq!((watch.add_count(), watch.remove_count()), (1, 1));
    }

    #[test]
    fn emit_reaches_event_stream() {
        let watch = ManualWatch::new();
        assert!(!watch.emit("/a"));
        let (_backend, streams) = watch.open(4).unwrap();
        assert!(watch.emit("/a"));
        assert_eq!(streams.changes.recv().unwrap(), vec![PathBuf::from("/a")]);
    }

    #[test]
    fn close_disconnects_and_allows_reopen() {
        let watch = ManualWatch::new();
        let (mut backend, streams) = watch.open(4).unwrap();
        assert!(watch.open(4).is_err());

        backend.close();
        assert!(streams.changes.recv().is_none());
        assert!(streams.errors.recv().is_err());
        assert!(matches!(backend.add(Path::new("/a")), Err(WatchError::Closed)));

        let (_backend, _streams) = watch.open(4).unwrap();
        assert_eq!(watch.open_count(), 2);
    }

    #[test]
    fn failing_adds_are_reported() {
        let watch = ManualWatch::new();
        let (mut backend, _streams) = watch.open(4).unwrap();
        watch.fail_adds(true);
        assert!(matches!(
            backend.add(Path::new("/a")),
            Err(WatchError::Registration { .. })
        ));
        assert_eq!(watch.watched_count(), 0);
    }
}
