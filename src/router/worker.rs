use std::path::{Path, PathBuf};
use std::sync::atomic::Ordering;
use std::sync::{Arc, Mutex, PoisonError};

use crossbeam_channel::{never, select, Receiver, Sender};

use crate::diagnostics::{DiagnosticKind, DiagnosticsHub};
use crate::error::WatchError;
use crate::listener::{ListenerId, WakeSignal};
use crate::stats::Counters;
use crate::watch::WatchBackend;

use super::registry::Registry;

#[derive(Debug)]
pub(crate) enum ControlMsg {
    Subscribe {
        path: PathBuf,
        signal: Arc<WakeSignal>,
        /// Acked once the signal is registered (and the watch requested).
        reply: Sender<()>,
    },
    Unsubscribe {
        path: PathBuf,
        id: ListenerId,
    },
}

/// Everything the router shares with the engine.
pub(crate) struct RouterContext<B: WatchBackend> {
    pub(crate) backend: Arc<Mutex<B>>,
    pub(crate) diagnostics: DiagnosticsHub,
    pub(crate) counters: Arc<Counters>,
}

impl<B: WatchBackend> RouterContext<B> {
    fn subscribe(&self, registry: &mut Registry, path: &Path, signal: Arc<WakeSignal>) {
        let id = signal.id();
        if registry.insert(path, signal) {
            let res = self
                .backend
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .add(path);
            // Best-effort: a later wake still reads everything, only automatic wake-ups suffer.
            if let Err(e) = res {
                tracing::warn!(path = %path.display(), error = %e, "failed to register watch");
                self.diagnostics.publish(DiagnosticKind::WatchRegistrationFailed {
                    path: path.to_path_buf(),
                    message: e.to_string(),
                });
            }
        }
        tracing::debug!(path = %path.display(), listener = %id, "listener subscribed");
    }

    fn unsubscribe(&self, registry: &mut Registry, path: &Path, id: ListenerId) {
        let emptied = registry.remove(path, id);
        tracing::debug!(path = %path.display(), listener = %id, "listener unsubscribed");
        if emptied {
            let res = self
                .backend
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .remove(path);
            match res {
                // Watches die with the backend during shutdown.
                Ok(()) | Err(WatchError::Closed) => {}
                Err(e) => {
                    tracing::warn!(path = %path.display(), error = %e, "failed to remove watch");
                    self.diagnostics.publish(DiagnosticKind::WatchRemovalFailed {
                        path: path.to_path_buf(),
                        message: e.to_string(),
                    });
                }
            }
        }
    }

    fn apply(&self, registry: &mut Registry, msg: ControlMsg) {
        match msg {
            ControlMsg::Subscribe { path, signal, reply } => {
                self.subscribe(registry, &path, signal);
                let _ = reply.send(());
            }
            ControlMsg::Unsubscribe { path, id } => self.unsubscribe(registry, &path, id),
        }
    }

    fn dispatch(&self, registry: &Registry, path: &Path) {
        match registry.dispatch(path) {
            Some(report) => {
                self.counters
                    .wakes_delivered
                    .fetch_add(report.delivered, Ordering::Relaxed);
                self.counters
                    .coalesced_wakes
                    .fetch_add(report.coalesced, Ordering::Relaxed);
            }
            None => {
                self.counters.unrouted_changes.fetch_add(1, Ordering::Relaxed);
                tracing::trace!(path = %path.display(), "no listeners subscribed for change");
            }
        }
    }
}

/// Router worker.
///
/// Services control messages and change events in whatever order they become
/// ready. Once the change stream disconnects it stops dispatching but keeps
/// applying control messages until the registry is empty, so every in-flight
/// session can unsubscribe before the router goes away.
pub(crate) fn router_loop<B: WatchBackend>(
    ctx: RouterContext<B>,
    control_rx: Receiver<ControlMsg>,
    changes_rx: Receiver<PathBuf>,
) {
    let mut registry = Registry::default();
    let closed = never::<ControlMsg>();
    let mut control_open = true;

    loop {
        let control = if control_open { &control_rx } else { &closed };
        select! {
            recv(control) -> msg => match msg {
                Ok(msg) => ctx.apply(&mut registry, msg),
                // Engine handle dropped; keep routing until the backend closes.
                Err(_) => control_open = false,
            },
            recv(changes_rx) -> msg => match msg {
                Ok(path) => ctx.dispatch(&registry, &path),
                Err(_) => break,
            },
        }
    }

    tracing::debug!("change stream closed, draining subscriptions");
    while !registry.is_empty() {
        match control_rx.recv() {
            Ok(msg) => ctx.apply(&mut registry, msg),
            Err(_) => break,
        }
    }
    tracing::debug!("router stopped");
}

#[cfg(test)]
mod tests {
    use std::io::{BufWriter, Read};
    use std::thread;
    use std::time::Duration;

    use crossbeam_channel::bounded;

    use super::*;
    use crate::listener::Listener;
    use crate::source::Source;
    use crate::watch::{ManualWatch, WatchBackendFactory};

    struct Empty(PathBuf);

    impl Read for Empty {
        fn read(&mut self, _buf: &mut [u8]) -> std::io::Result<usize> {
            Ok(0)
        }
    }

    impl Source for Empty {
        fn path(&self) -> &Path {
            &self.0
        }
        fn resume(&mut self) -> std::io::Result<()> {
            Ok(())
        }
        fn still_exists(&self) -> bool {
            true
        }
    }

    type TestListener = Listener<Empty, BufWriter<Vec<u8>>>;

    fn listener(path: &str) -> TestListener {
        Listener::new(Empty(PathBuf::from(path)), BufWriter::new(Vec::new()))
    }

    struct Harness {
        watch: ManualWatch,
        control_tx: Sender<ControlMsg>,
        changes_tx: Option<Sender<PathBuf>>,
        counters: Arc<Counters>,
        diagnostics: DiagnosticsHub,
        join: thread::JoinHandle<()>,
    }

    fn start() -> Harness {
        let watch = ManualWatch::new();
        let (backend, _streams) = watch.open(16).unwrap();
        let (control_tx, control_rx) = bounded(16);
        let (changes_tx, changes_rx) = bounded(16);
        let counters = Arc::new(Counters::default());
        let diagnostics = DiagnosticsHub::new(16);
        let ctx = RouterContext {
            backend: Arc::new(Mutex::new(backend)),
            diagnostics: diagnostics.clone(),
            counters: Arc::clone(&counters),
        };
        let join = thread::spawn(move || router_loop(ctx, control_rx, changes_rx));
        Harness {
            watch,
            control_tx,
            changes_tx: Some(changes_tx),
            counters,
            diagnostics,
            join,
        }
    }

    fn subscribe(h: &Harness, l: &TestListener) {
        let (reply, ack) = bounded(1);
        h.control_tx
            .send(ControlMsg::Subscribe {
                path: l.path().to_path_buf(),
                signal: l.wake_signal(),
                reply,
            })
            .unwrap();
        ack.recv_timeout(Duration::from_secs(1)).unwrap();
    }

    fn unsubscribe(h: &Harness, l: &TestListener) {
        h.control_tx
            .send(ControlMsg::Unsubscribe {
                path: l.path().to_path_buf(),
                id: l.id(),
            })
            .unwrap();
    }

    #[test]
    fn first_subscribe_registers_last_unsubscribe_removes() {
        let h = start();
        let a = listener("/f");
        let b = listener("/f");

        subscribe(&h, &a);
        subscribe(&h, &b);
        assert!(h.watch.is_watched("/f"));
        assert_eq!(h.watch.add_count(), 1);

        unsubscribe(&h, &a);
        unsubscribe(&h, &b);
        // Synchronise on a subscribe ack to know the unsubscribes were applied.
        let c = listener("/g");
        subscribe(&h, &c);
        assert!(!h.watch.is_watched("/f"));
        assert_eq!(h.watch.remove_count(), 1);
    }

    #[test]
    fn changes_wake_subscribers() {
        let h = start();
        let a = listener("/f");
        subscribe(&h, &a);
        a.wake_receiver().recv().unwrap();

        h.changes_tx.as_ref().unwrap().send(PathBuf::from("/f")).unwrap();
        a.wake_receiver().recv_timeout(Duration::from_secs(1)).unwrap();
        assert_eq!(h.counters.wakes_delivered.load(Ordering::Relaxed), 1);
    }

    #[test]
    fn registration_failure_is_a_diagnostic_not_an_error() {
        let h = start();
        h.watch.fail_adds(true);
        let a = listener("/f");
        subscribe(&h, &a);

        let diag = h.diagnostics.receiver().recv_timeout(Duration::from_secs(1)).unwrap();
        assert!(matches!(diag.kind, DiagnosticKind::WatchRegistrationFailed { .. }));

        // Still routed: the subscription exists even without a watch.
        a.wake_receiver().recv().unwrap();
        h.changes_tx.as_ref().unwrap().send(PathBuf::from("/f")).unwrap();
        a.wake_receiver().recv_timeout(Duration::from_secs(1)).unwrap();
    }

    #[test]
    fn drains_subscriptions_after_change_stream_closes() {
        let mut h = start();
        let a = listener("/f");
        subscribe(&h, &a);

        drop(h.changes_tx.take());
        thread::sleep(Duration::from_millis(50));
        assert!(!h.join.is_finished());

        unsubscribe(&h, &a);
        h.join.join().unwrap();
        assert_eq!(h.watch.watched_count(), 0);
    }

    #[test]
    fn exits_immediately_when_nothing_is_subscribed() {
        let mut h = start();
        drop(h.changes_tx.take());
        h.join.join().unwrap();
    }
}
