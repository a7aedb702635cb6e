//! Non-blocking hand-off of changed paths out of a backend.
//!
//! Backends often report changes from a thread they do not own (the `notify`
//! event loop, for one) that must also service `add`/`remove`. Blocking that
//! thread on a full queue while the router waits on `add` wedges the engine,
//! so the hand-off never blocks. Instead of queueing every event it keeps a
//! set of paths changed since the last drain: a path already pending absorbs
//! further changes. Memory is bounded by the number of distinct watched paths.

use std::collections::{HashSet, VecDeque};
use std::path::PathBuf;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use crossbeam_channel::{bounded, Receiver, RecvTimeoutError, Sender, TrySendError};

#[derive(Debug, Default)]
struct Pending {
    order: VecDeque<PathBuf>,
    queued: HashSet<PathBuf>,
}

fn lock(pending: &Mutex<Pending>) -> MutexGuard<'_, Pending> {
    pending.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Create a connected notifier/feed pair.
#[must_use]
pub fn change_feed() -> (ChangeNotifier, ChangeFeed) {
    let pending = Arc::new(Mutex::new(Pending::default()));
    let (ready_tx, ready_rx) = bounded(1);
    (
        ChangeNotifier {
            pending: Arc::clone(&pending),
            ready: ready_tx,
        },
        ChangeFeed {
            pending,
            ready: ready_rx,
        },
    )
}

/// Backend side of the hand-off. Dropping every clone disconnects the feed.
#[derive(Debug, Clone)]
pub struct ChangeNotifier {
    pending: Arc<Mutex<Pending>>,
    ready: Sender<()>,
}

impl ChangeNotifier {
    /// Record a change to `path`. Never blocks.
    ///
    /// Returns false once the feed has been dropped.
    pub fn notify(&self, path: PathBuf) -> bool {
        {
            let mut pending = lock(&self.pending);
            if pending.queued.insert(path.clone()) {
                pending.order.push_back(path);
            }
        }
        match self.ready.try_send(()) {
            Ok(()) | Err(TrySendError::Full(())) => true,
            Err(TrySendError::Disconnected(())) => false,
        }
    }
}

/// Engine side of the hand-off.
#[derive(Debug)]
pub struct ChangeFeed {
    pending: Arc<Mutex<Pending>>,
    ready: Receiver<()>,
}

impl ChangeFeed {
    /// Block until paths are pending and take all of them, oldest first.
    ///
    /// Returns `None` once every notifier is gone and nothing is left.
    pub fn recv(&self) -> Option<Vec<PathBuf>> {
        loop {
            let connected = self.ready.recv().is_ok();
            let batch = self.take();
            if !batch.is_empty() {
                return Some(batch);
            }
            if !connected {
                return None;
            }
        }
    }

    /// Like [`ChangeFeed::recv`] with a deadline. The batch may be empty if
    /// an earlier call already took it.
    pub fn recv_timeout(&self, timeout: Duration) -> Result<Vec<PathBuf>, RecvTimeoutError> {
        match self.ready.recv_timeout(timeout) {
            Ok(()) => Ok(self.take()),
            Err(RecvTimeoutError::Disconnected) => {
                let batch = self.take();
                if batch.is_empty() {
                    Err(RecvTimeoutError::Disconnected)
                } else {
                    Ok(batch)
                }
            }
            Err(RecvTimeoutError::Timeout) => Err(RecvTimeoutError::Timeout),
        }
    }

    fn take(&self) -> Vec<PathBuf> {
        let mut pending = lock(&self.pending);
        pending.queued.clear();
        pending.order.drain(..).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn repeated_changes_to_one_path_coalesce() {
        let (notifier, feed) = change_feed();
        for _ in 0..10_000 {
            assert!(notifier.notify(PathBuf::from("/hot")));
        }
        assert!(notifier.notify(PathBuf::from("/cold")));
        assert_eq!(feed.recv().unwrap(), vec![PathBuf::from("/hot"), PathBuf::from("/cold")]);

        // Drained paths queue again.
        notifier.notify(PathBuf::from("/hot"));
        assert_eq!(feed.recv().unwrap(), vec![PathBuf::from("/hot")]);
    }

    #[test]
    fn nothing_pending_times_out() {
        let (_notifier, feed) = change_feed();
        assert_eq!(
            feed.recv_timeout(Duration::from_millis(10)),
            Err(RecvTimeoutError::Timeout)
        );
    }

    #[test]
    fn disconnect_is_seen_after_the_last_batch() {
        let (notifier, feed) = change_feed();
        notifier.notify(PathBuf::from("/a"));
        drop(notifier);
        assert_eq!(feed.recv().unwrap(), vec![PathBuf::from("/a")]);
        assert!(feed.recv().is_none());
    }

    #[test]
    fn notify_after_feed_dropped_reports_false() {
        let (notifier, feed) = change_feed();
        drop(feed);
        assert!(!notifier.notify(PathBuf::from("/a")));
    }
}
