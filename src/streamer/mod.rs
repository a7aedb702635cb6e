//! The streaming engine.
//!
//! A [`Streamer`] owns its watch backend and three background workers
//! (error drain, change forwarder, router). Instances are independent values;
//! several can run side by side.
//!
//! Shutdown cascades: closing the backend disconnects its streams, the
//! forwarder exits and drops the router's change channel, and the router
//! drains outstanding subscriptions before exiting. [`Streamer::stop`] joins
//! all three.

use std::path::PathBuf;
use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError};
use std::thread::JoinHandle;

use crossbeam_channel::{bounded, Receiver, Sender};
use serde::{Deserialize, Serialize};

use crate::config::StreamerConfig;
use crate::diagnostics::{Diagnostic, DiagnosticsHub};
use crate::error::{StreamerError, StreamerResult};
use crate::router::{router_loop, ControlMsg, RouterContext};
use crate::stats::{Counters, StreamerStats};
use crate::watch::{NotifyWatch, WatchBackend, WatchBackendFactory};

mod session;
mod workers;

pub use session::SessionEnd;

/// Engine lifecycle state.
///
/// Transitions only along `Stopped → Starting → Running → Stopping → Stopped`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EngineState {
    /// Initial and terminal state.
    Stopped,
    /// Backend and workers are being brought up.
    Starting,
    /// Accepting stream sessions.
    Running,
    /// Waiting for workers to drain and exit.
    Stopping,
}

struct Running<B: WatchBackend> {
    control_tx: Sender<ControlMsg>,
    backend: Arc<Mutex<B>>,
    workers: Vec<JoinHandle<()>>,
}

impl<B: WatchBackend> Running<B> {
    fn shutdown(self) {
        self.backend
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .close();
        drop(self.control_tx);
        for handle in self.workers {
            let _ = handle.join();
        }
    }
}

struct Inner<B: WatchBackend> {
    state: EngineState,
    running: Option<Running<B>>,
    /// Sessions admitted while running whose subscribe is not yet acked.
    admitting: usize,
}

/// Streams appended file data to any number of listeners.
pub struct Streamer<F: WatchBackendFactory = NotifyWatch> {
    cfg: StreamerConfig,
    factory: F,
    inner: Mutex<Inner<F::Backend>>,
    admitted: Condvar,
    diagnostics: DiagnosticsHub,
    counters: Arc<Counters>,
}

impl Streamer<NotifyWatch> {
    /// Create a stopped streamer backed by OS filesystem notifications.
    #[must_use]
    pub fn new(cfg: StreamerConfig) -> Self {
        Self::with_backend(cfg, NotifyWatch)
    }
}

impl Default for Streamer<NotifyWatch> {
    fn default() -> Self {
        Self::new(StreamerConfig::default())
    }
}

impl<F: WatchBackendFactory> Streamer<F> {
    /// Create a stopped streamer over a custom watch backend.
    pub fn with_backend(cfg: StreamerConfig, factory: F) -> Self {
        let diagnostics = DiagnosticsHub::new(cfg.diagnostics_capacity);
        Self {
            cfg,
            factory,
            inner: Mutex::new(Inner {
                state: EngineState::Stopped,
                running: None,
                admitting: 0,
            }),
            admitted: Condvar::new(),
            diagnostics,
            counters: Arc::new(Counters::default()),
        }
    }

    fn lock(&self) -> MutexGuard<'_, Inner<F::Backend>> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Start the backend and background workers.
    ///
    /// Fails with `AlreadyRunning` unless the engine is stopped.
    pub fn start(&self) -> StreamerResult<()> {
        {
            let mut inner = self.lock();
            if inner.state != EngineState::Stopped {
                return Err(StreamerError::AlreadyRunning);
            }
            inner.state = EngineState::Starting;
        }

        match self.launch() {
            Ok(running) => {
                let mut inner = self.lock();
                inner.running = Some(running);
                inner.state = EngineState::Running;
                tracing::info!("streamer started");
                Ok(())
            }
            Err(e) => {
                self.lock().state = EngineState::Stopped;
                tracing::warn!(error = %e, "streamer failed to start");
                Err(e)
            }
        }
    }

    fn launch(&self) -> StreamerResult<Running<F::Backend>> {
        let (backend, streams) = self.factory.open(self.cfg.error_queue_capacity.max(1))?;
        let backend = Arc::new(Mutex::new(backend));
        let (changes_tx, changes_rx) = bounded::<PathBuf>(self.cfg.change_queue_capacity.max(1));
        let (control_tx, control_rx) = bounded::<ControlMsg>(self.cfg.control_queue_capacity.max(1));

        let mut starting = Running {
            control_tx,
            backend: Arc::clone(&backend),
            workers: Vec::with_capacity(3),
        };

        let diagnostics = self.diagnostics.clone();
        let errors = streams.errors;
        match workers::spawn_worker("tailstream-watch-errors", move || {
            workers::drain_errors(errors, diagnostics);
        }) {
            Ok(handle) => starting.workers.push(handle),
            Err(e) => {
                starting.shutdown();
                return Err(e);
            }
        }

        let changes = streams.changes;
        match workers::spawn_worker("tailstream-forward", move || {
            workers::forward_changes(changes, changes_tx);
        }) {
            Ok(handle) => starting.workers.push(handle),
            Err(e) => {
                starting.shutdown();
                return Err(e);
            }
        }

        let ctx = RouterContext {
            backend,
            diagnostics: self.diagnostics.clone(),
            counters: Arc::clone(&self.counters),
        };
        match workers::spawn_worker("tailstream-router", move || {
            router_loop(ctx, control_rx, changes_rx);
        }) {
            Ok(handle) => starting.workers.push(handle),
            Err(e) => {
                starting.shutdown();
                return Err(e);
            }
        }

        Ok(starting)
    }

    /// Stop the engine.
    ///
    /// Blocks until in-flight subscriptions are acknowledged, every session
    /// has unsubscribed and all workers have exited. Sessions are not interrupted: one with no idle timeout keeps
    /// this call waiting until its listener is closed or its source vanishes.
    /// Fails with `NotRunning` unless the engine is running.
    pub fn stop(&self) -> StreamerResult<()> {
        let running = {
            let mut inner = self.lock();
            if inner.state != EngineState::Running {
                return Err(StreamerError::NotRunning);
            }
            inner.state = EngineState::Stopping;
            let mut inner = self
                .admitted
                .wait_while(inner, |inner| inner.admitting > 0)
                .unwrap_or_else(PoisonError::into_inner);
            inner.running.take()
        };

        tracing::info!("streamer stopping");
        if let Some(running) = running {
            running.shutdown();
        }

        self.lock().state = EngineState::Stopped;
        tracing::info!("streamer stopped");
        Ok(())
    }

    /// True while the engine accepts stream sessions.
    #[must_use]
    pub fn is_running(&self) -> bool {
        self.lock().state == EngineState::Running
    }

    /// Current lifecycle state.
    #[must_use]
    pub fn state(&self) -> EngineState {
        self.lock().state
    }

    /// Engine configuration.
    #[must_use]
    pub const fn config(&self) -> &StreamerConfig {
        &self.cfg
    }

    /// Receiver of best-effort failure diagnostics.
    ///
    /// All receivers share one bounded queue; undrained diagnostics are dropped
    /// and counted in [`StreamerStats::dropped_diagnostics`].
    #[must_use]
    pub fn diagnostics(&self) -> Receiver<Diagnostic> {
        self.diagnostics.receiver()
    }

    /// Activity counters.
    #[must_use]
    pub fn stats(&self) -> StreamerStats {
        self.counters.snapshot(self.diagnostics.dropped())
    }
}

impl<F: WatchBackendFactory> Drop for Streamer<F> {
    fn drop(&mut self) {
        // Sessions borrow the streamer, so none can be in flight here and the
        // router exits as soon as the backend closes.
        let running = self.lock().running.take();
        if let Some(running) = running {
            running.shutdown();
        }
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::watch::ManualWatch;

    fn manual() -> (Streamer<ManualWatch>, ManualWatch) {
        let watch = ManualWatch::new();
        (Streamer::with_backend(StreamerConfig::default(), watch.clone()), watch)
    }

    #[test]
    fn lifecycle_transitions() {
        let (streamer, watch) = manual();
        assert_eq!(streamer.state(), EngineState::Stopped);
        assert!(!streamer.is_running());

        streamer.start().unwrap();
        assert_eq!(streamer.state(), EngineState::Running);
        assert!(watch.is_open());

        streamer.stop().unwrap();
        assert_eq!(streamer.state(), EngineState::Stopped);
        assert!(!watch.is_open());
    }

    #[test]
    fn double_start_is_rejected() {
        let (streamer, _watch) = manual();
        streamer.start().unwrap();
        assert!(matches!(streamer.start(), Err(StreamerError::AlreadyRunning)));
        streamer.stop().unwrap();
    }

    #[test]
    fn stop_when_stopped_is_rejected() {
        let (streamer, _watch) = manual();
        assert!(matches!(streamer.stop(), Err(StreamerError::NotRunning)));
        streamer.start().unwrap();
        streamer.stop().unwrap();
        assert!(matches!(streamer.stop(), Err(StreamerError::NotRunning)));
    }

    #[test]
    fn restart_opens_a_fresh_backend() {
        let (streamer, watch) = manual();
        streamer.start().unwrap();
        streamer.stop().unwrap();
        streamer.start().unwrap();
        assert_eq!(watch.open_count(), 2);
        streamer.stop().unwrap();
    }

    #[test]
    fn failed_backend_open_leaves_engine_stopped() {
        let (streamer, watch) = manual();
        // Occupy the manual backend so the engine's open fails.
        let (_backend, _streams) = watch.open(1).unwrap();
        assert!(matches!(streamer.start(), Err(StreamerError::Watch(_))));
        assert_eq!(streamer.state(), EngineState::Stopped);
    }

    #[test]
    fn backend_errors_become_diagnostics() {
        let (streamer, watch) = manual();
        streamer.start().unwrap();
        assert!(watch.emit_error("overflow"));
        let diag = streamer.diagnostics().recv_timeout(Duration::from_secs(1)).unwrap();
        assert!(matches!(diag.kind, crate::DiagnosticKind::BackendError { .. }));
        streamer.stop().unwrap();
    }

    #[test]
    fn drop_while_running_shuts_down() {
        let (streamer, watch) = manual();
        streamer.start().unwrap();
        drop(streamer);
        assert!(!watch.is_open());
    }

    #[test]
    fn independent_instances_coexist() {
        let (a, _wa) = manual();
        let (b, _wb) = manual();
        a.start().unwrap();
        b.start().unwrap();
        a.stop().unwrap();
        assert!(b.is_running());
        b.stop().unwrap();
    }
}
