use std::path::Path;

use crossbeam_channel::{bounded, Sender, TrySendError};
use notify::event::{AccessKind, AccessMode};
use notify::{Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};

use crate::error::WatchError;

use super::{change_feed, ChangeNotifier, WatchBackend, WatchBackendFactory, WatchStreams};

/// Factory for the platform's recommended `notify` watcher.
#[derive(Debug, Default, Clone, Copy)]
pub struct NotifyWatch;

/// Opened `notify` watcher. Dropping the inner watcher disconnects the streams.
pub struct NotifyBackend {
    watcher: Option<RecommendedWatcher>,
}

impl std::fmt::Debug for NotifyBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NotifyBackend")
            .field("open", &self.watcher.is_some())
            .finish()
    }
}

/// Reads never signal new data; skip them so a session's own reads don't wake it.
fn is_change(kind: &EventKind) -> bool {
    match kind {
        EventKind::Access(AccessKind::Close(AccessMode::Write)) => true,
        EventKind::Access(_) => false,
        _ => true,
    }
}

/// Runs on the notify event loop, which also services `watch`/`unwatch`, so
/// nothing here may block.
fn forward(res: notify::Result<Event>, changes: &ChangeNotifier, errors: &Sender<WatchError>) {
    match res {
        Ok(event) => {
            if !is_change(&event.kind) {
                return;
            }
            for path in event.paths {
                // Feed gone means the engine is stopping.
                if !changes.notify(path) {
                    return;
                }
            }
        }
        Err(e) => {
            if let Err(TrySendError::Full(err)) = errors.try_send(WatchError::Backend { message: e.to_string() }) {
                tracing::debug!(error = %err, "backend error queue full, dropping error");
            }
        }
    }
}

impl WatchBackendFactory for NotifyWatch {
    type Backend = NotifyBackend;

    fn open(&self, error_capacity: usize) -> Result<(NotifyBackend, WatchStreams), WatchError> {
        let (notifier, changes) = change_feed();
        let (errors_tx, errors_rx) = bounded::<WatchError>(error_capacity.max(1));

        let watcher = notify::recommended_watcher(move |res: notify::Result<Event>| {
            forward(res, &notifier, &errors_tx);
        })
        .map_err(|e| WatchError::Init { message: e.to_string() })?;

        Ok((
            NotifyBackend { watcher: Some(watcher) },
            WatchStreams {
                changes,
                errors: errors_rx,
            },
        ))
    }
}

impl WatchBackend for NotifyBackend {
    fn add(&mut self, path: &Path) -> Result<(), WatchError> {
        let watcher = self.watcher.as_mut().ok_or(WatchError::Closed)?;
        watcher
            .watch(path, RecursiveMode::NonRecursive)
            .map_err(|e| WatchError::Registration {
                path: path.to_path_buf(),
                message: e.to_string(),
            })
    }

    fn remove(&mut self, path: &Path) -> Result<(), WatchError> {
        let watcher = self.watcher.as_mut().ok_or(WatchError::Closed)?;
        watcher.unwatch(path).map_err(|e| WatchError::Removal {
            path: path.to_path_buf(),
            message: e.to_string(),
        })
    }

    fn close(&mut self) {
        drop(self.watcher.take());
    }
}

#[cfg(test)]
mod tests {
    use std::path::PathBuf;

    use notify::event::{CreateKind, ModifyKind, RemoveKind};

    use super::*;

    #[test]
    fn access_events_are_not_changes() {
        assert!(!is_change(&EventKind::Access(AccessKind::Read)));
        assert!(!is_change(&EventKind::Access(AccessKind::Close(AccessMode::Read))));
        assert!(is_change(&EventKind::Access(AccessKind::Close(AccessMode::Write))));
        assert!(is_change(&EventKind::Modify(ModifyKind::Any)));
        assert!(is_change(&EventKind::Create(CreateKind::File)));
        assert!(is_change(&EventKind::Remove(RemoveKind::File)));
    }

    #[test]
    fn forward_splits_paths_and_errors() {
        let (notifier, changes) = change_feed();
        let (xtx, xrx) = bounded(8);
        let event = Event {
            kind: EventKind::Modify(ModifyKind::Any),
            paths: vec![PathBuf::from("/a"), PathBuf::from("/b")],
            attrs: Default::default(),
        };
        forward(Ok(event), &notifier, &xtx);
        forward(Err(notify::Error::generic("boom")), &notifier, &xtx);

        assert_eq!(changes.recv().unwrap(), vec![PathBuf::from("/a"), PathBuf::from("/b")]);
        assert!(matches!(xrx.try_recv().unwrap(), WatchError::Backend { message } if message.contains("boom")));
    }

    #[test]
    fn forward_never_blocks_on_a_backlog() {
        let (notifier, changes) = change_feed();
        let (xtx, xrx) = bounded(1);
        for i in 0..10_000 {
            let event = Event {
                kind: EventKind::Modify(ModifyKind::Any),
                paths: vec![PathBuf::from(format!("/f{}", i % 4))],
                attrs: Default::default(),
            };
            forward(Ok(event), &notifier, &xtx);
            forward(Err(notify::Error::generic("overflow")), &notifier, &xtx);
        }
        assert_eq!(changes.recv().unwrap().len(), 4);
        assert_eq!(xrx.len(), 1);
    }

    #[test]
    fn closing_disconnects_streams() {
        let (mut backend, streams) = NotifyWatch.open(16).unwrap();
        backend.close();
        backend.close();
        assert!(matches!(backend.add(Path::new("/tmp")), Err(WatchError::Closed)));
        // The handler (and its notifier) is dropped with the watcher.
        let deadline = std::time::Instant::now() + std::time::Duration::from_secs(5);
        loop {
            if streams.changes.recv_timeout(std::time::Duration::from_millis(50))
                == Err(crossbeam_channel::RecvTimeoutError::Disconnected)
            {
                break;
            }
            assert!(std::time::Instant::now() < deadline, "change feed never disconnected");
        }
    }
}
