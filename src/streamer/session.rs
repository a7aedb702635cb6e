//! Per-listener stream sessions.

use std::io::{self, ErrorKind, Write};
use std::path::PathBuf;
use std::sync::atomic::Ordering;
use std::sync::{Arc, TryLockError};
use std::time::{Duration, Instant};

use crossbeam_channel::{after, bounded, never, select, Receiver, Sender};
use serde::{Deserialize, Serialize};

use crate::diagnostics::DiagnosticKind;
use crate::error::{StreamerError, StreamerResult};
use crate::listener::{Listener, ListenerId, ListenerIo};
use crate::router::ControlMsg;
use crate::source::{Sink, Source};
use crate::stats::Counters;
use crate::watch::WatchBackendFactory;

use super::{EngineState, Streamer};

/// Why a session ended without error.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionEnd {
    /// The listener was closed.
    Closed,
    /// No wake arrived within the idle timeout.
    IdleTimeout,
    /// The source was deleted or rotated away after a read.
    SourceVanished,
}

/// Unsubscribes on every exit path.
struct Subscription {
    control_tx: Sender<ControlMsg>,
    path: PathBuf,
    id: ListenerId,
    counters: Arc<Counters>,
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.counters.active_sessions.fetch_sub(1, Ordering::Relaxed);
        // The router outlives every registered subscription, so this only
        // fails if it is already gone.
        let _ = self.control_tx.send(ControlMsg::Unsubscribe {
            path: std::mem::take(&mut self.path),
            id: self.id,
        });
    }
}

fn idle_timer(idle_timeout: Duration) -> Receiver<Instant> {
    if idle_timeout.is_zero() {
        never()
    } else {
        after(idle_timeout)
    }
}

/// Copy everything between the source's cursor and its current end.
fn copy_available<S: Source, W: Write>(source: &mut S, sink: &mut W, buf: &mut [u8]) -> io::Result<u64> {
    source.resume()?;
    let mut total = 0u64;
    loop {
        let n = match source.read(buf) {
            Ok(0) => return Ok(total),
            Ok(n) => n,
            Err(e) if e.kind() == ErrorKind::Interrupted => continue,
            Err(e) => return Err(e),
        };
        sink.write_all(&buf[..n])?;
        total += n as u64;
    }
}

impl<F: WatchBackendFactory> Streamer<F> {
    /// Stream `listener`'s source into its sink until the session ends.
    ///
    /// Blocks. Returns when the listener is closed, when no wake arrives for
    /// `idle_timeout` (`Duration::ZERO` waits forever), or when the source
    /// disappears after a read. A copy or flush failure ends only this
    /// session: a short message is written into the sink and the error is
    /// returned.
    ///
    /// Fails with `NotRunning` unless the engine is running. A session admitted
    /// before [`Streamer::stop`] is always subscribed; `stop` waits for it.
    pub fn stream_to<S: Source, K: Sink>(
        &self,
        listener: &Listener<S, K>,
        idle_timeout: Duration,
    ) -> StreamerResult<SessionEnd> {
        let mut io = match listener.io().try_lock() {
            Ok(guard) => guard,
            Err(TryLockError::Poisoned(poisoned)) => poisoned.into_inner(),
            Err(TryLockError::WouldBlock) => {
                return Err(StreamerError::internal(format!(
                    "listener {} is already being streamed",
                    listener.id()
                )));
            }
        };

        let _subscription = self.subscribe(listener)?;
        let end = self.run_session(&mut io, listener.wake_receiver(), idle_timeout);
        match &end {
            Ok(reason) => {
                tracing::debug!(path = %listener.path().display(), listener = %listener.id(), ?reason, "session ended");
            }
            Err(e) => {
                tracing::warn!(path = %listener.path().display(), listener = %listener.id(), error = %e, "session failed");
                self.diagnostics.publish(DiagnosticKind::SessionFailed {
                    path: listener.path().to_path_buf(),
                    message: e.to_string(),
                });
            }
        }
        end
    }

    /// Admit under the engine lock, then subscribe without holding it.
    ///
    /// `stop` waits for `admitting` to drain before tearing the router down,
    /// so an admitted session always reaches a live router.
    fn subscribe<S: Source, K: Sink>(&self, listener: &Listener<S, K>) -> StreamerResult<Subscription> {
        let control_tx = {
            let mut inner = self.lock();
            if inner.state != EngineState::Running {
                return Err(StreamerError::NotRunning);
            }
            let control_tx = inner
                .running
                .as_ref()
                .map(|running| running.control_tx.clone())
                .ok_or(StreamerError::NotRunning)?;
            inner.admitting += 1;
            control_tx
        };

        let acked = Self::request_subscribe(&control_tx, listener);
        {
            let mut inner = self.lock();
            inner.admitting -= 1;
        }
        self.admitted.notify_all();
        acked?;

        self.counters.active_sessions.fetch_add(1, Ordering::Relaxed);
        Ok(Subscription {
            control_tx,
            path: listener.path().to_path_buf(),
            id: listener.id(),
            counters: Arc::clone(&self.counters),
        })
    }

    fn request_subscribe<S: Source, K: Sink>(
        control_tx: &Sender<ControlMsg>,
        listener: &Listener<S, K>,
    ) -> StreamerResult<()> {
        let (reply, ack) = bounded::<()>(1);
        control_tx
            .send(ControlMsg::Subscribe {
                path: listener.path().to_path_buf(),
                signal: listener.wake_signal(),
                reply,
            })
            .map_err(|_| StreamerError::NotRunning)?;
        ack.recv().map_err(|_| StreamerError::NotRunning)
    }

    fn run_session<S: Source, K: Sink>(
        &self,
        io: &mut ListenerIo<S, K>,
        wake_rx: &Receiver<()>,
        idle_timeout: Duration,
    ) -> StreamerResult<SessionEnd> {
        let capacity = match io.sink.buffer_capacity() {
            0 => self.cfg.fallback_buffer_size.max(1),
            n => n,
        };
        let mut buf = vec![0u8; capacity];
        let mut idle = idle_timer(idle_timeout);

        loop {
            select! {
                recv(wake_rx) -> msg => {
                    if msg.is_err() {
                        return Ok(SessionEnd::Closed);
                    }
                }
                recv(idle) -> _ => return Ok(SessionEnd::IdleTimeout),
            }

            Self::catch_up(io, &mut buf)?;

            if !io.source.still_exists() {
                return Ok(SessionEnd::SourceVanished);
            }
            idle = idle_timer(idle_timeout);
        }
    }

    fn catch_up<S: Source, K: Sink>(io: &mut ListenerIo<S, K>, buf: &mut [u8]) -> StreamerResult<()> {
        if let Err(source) = copy_available(&mut io.source, &mut io.sink, buf) {
            let _ = write!(io.sink, "Could not stream file data: {source}");
            let _ = io.sink.flush();
            return Err(StreamerError::CopyFailed {
                path: io.source.path().to_path_buf(),
                source,
            });
        }

        if let Err(source) = io.sink.flush() {
            let _ = write!(io.sink, "Could not flush file data: {source}");
            let _ = io.sink.flush();
            return Err(StreamerError::FlushFailed {
                path: io.source.path().to_path_buf(),
                source,
            });
        }
        Ok(())
    }
}
