//! Raw TCP streaming.
//!
//! A client connects and sends one request line:
//!
//! ```text
//! <path relative to the served root> [offset]\n
//! ```
//!
//! The server then writes the file's bytes from `offset` onwards and keeps
//! following it until the idle timeout elapses, the file vanishes, or the
//! client goes away (observed as a failed write).

use std::io::{BufRead, BufReader, Read, Write};
use std::net::{SocketAddr, TcpListener, TcpStream, ToSocketAddrs};
use std::path::{Component, Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use crate::error::{StreamerError, StreamerResult};
use crate::streamer::Streamer;
use crate::watch::WatchBackendFactory;

use super::raw::stream_file;

const MAX_REQUEST_LINE: u64 = 4096;

/// Stops a running [`TcpStreamServer::serve`] loop.
#[derive(Debug, Clone)]
pub struct ShutdownHandle {
    flag: Arc<AtomicBool>,
    addr: SocketAddr,
}

impl ShutdownHandle {
    /// Stop accepting connections. Connections already being served finish
    /// on their own terms.
    pub fn shutdown(&self) {
        self.flag.store(true, Ordering::SeqCst);
        // Unblock the accept call.
        let _ = TcpStream::connect(self.addr);
    }
}

/// Serves files under a root directory over raw TCP.
#[derive(Debug)]
pub struct TcpStreamServer {
    listener: TcpListener,
    root: PathBuf,
    idle_timeout: Duration,
    shutdown: Arc<AtomicBool>,
}

/// Parse `<path> [offset]`.
fn parse_request(line: &str) -> Result<(PathBuf, u64), String> {
    let mut parts = line.split_whitespace();
    let path = parts.next().ok_or_else(|| "empty request".to_string())?;
    let offset = match parts.next() {
        Some(raw) => raw
            .parse::<u64>()
            .map_err(|e| format!("incorrect offset '{raw}': {e}"))?,
        None => 0,
    };
    if parts.next().is_some() {
        return Err("expected '<path> [offset]'".to_string());
    }
    Ok((PathBuf::from(path), offset))
}

/// Join `requested` onto `root`, refusing anything that could escape it.
fn resolve_under(root: &Path, requested: &Path) -> Result<PathBuf, String> {
    let mut resolved = root.to_path_buf();
    for component in requested.components() {
        match component {
            Component::Normal(part) => resolved.push(part),
            Component::CurDir => {}
            Component::ParentDir | Component::RootDir | Component::Prefix(_) => {
                return Err(format!("path '{}' is outside the served root", requested.display()));
            }
        }
    }
    if resolved == root {
        return Err("no file requested".to_string());
    }
    Ok(resolved)
}

/// Resolve symlinks and require the target to still live below `root`.
///
/// `root` must already be canonical.
fn confine(root: &Path, resolved: &Path) -> Result<PathBuf, String> {
    let real = std::fs::canonicalize(resolved).map_err(|e| format!("can't open '{}': {e}", resolved.display()))?;
    if !real.starts_with(root) {
        return Err(format!("path '{}' is outside the served root", resolved.display()));
    }
    Ok(real)
}

impl TcpStreamServer {
    /// Bind to `addr`, serving files below `root`.
    pub fn bind(addr: impl ToSocketAddrs, root: impl AsRef<Path>, idle_timeout: Duration) -> StreamerResult<Self> {
        let root = std::fs::canonicalize(root.as_ref()).map_err(|e| {
            StreamerError::io(format!("invalid serve root '{}'", root.as_ref().display()), e)
        })?;
        let listener = TcpListener::bind(addr).map_err(|e| StreamerError::io("failed to bind", e))?;
        Ok(Self {
            listener,
            root,
            idle_timeout,
            shutdown: Arc::new(AtomicBool::new(false)),
        })
    }

    /// Bound address.
    pub fn local_addr(&self) -> StreamerResult<SocketAddr> {
        self.listener
            .local_addr()
            .map_err(|e| StreamerError::io("failed to read local address", e))
    }

    /// Handle for stopping [`TcpStreamServer::serve`] from another thread.
    pub fn shutdown_handle(&self) -> StreamerResult<ShutdownHandle> {
        Ok(ShutdownHandle {
            flag: Arc::clone(&self.shutdown),
            addr: self.local_addr()?,
        })
    }

    /// Accept connections until shut down, one thread per connection.
    ///
    /// Returns after shutdown once every connection has finished.
    pub fn serve<F: WatchBackendFactory>(&self, streamer: &Streamer<F>) -> StreamerResult<()> {
        tracing::info!(root = %self.root.display(), "tcp stream server listening");
        thread::scope(|scope| {
            for conn in self.listener.incoming() {
                if self.shutdown.load(Ordering::SeqCst) {
                    break;
                }
                match conn {
                    Ok(stream) => {
                        scope.spawn(move || self.handle(streamer, stream));
                    }
                    Err(e) => tracing::warn!(error = %e, "failed to accept connection"),
                }
            }
        });
        tracing::info!("tcp stream server stopped");
        Ok(())
    }

    fn handle<F: WatchBackendFactory>(&self, streamer: &Streamer<F>, mut stream: TcpStream) {
        let peer = stream
            .peer_addr()
            .map_or_else(|_| "unknown".to_string(), |a| a.to_string());

        let request = match stream.try_clone() {
            Ok(read_half) => {
                let mut line = String::new();
                match BufReader::new(read_half).take(MAX_REQUEST_LINE).read_line(&mut line) {
                    Ok(_) => parse_request(&line).and_then(|(path, offset)| {
                        let resolved = resolve_under(&self.root, &path)?;
                        Ok((confine(&self.root, &resolved)?, offset))
                    }),
                    Err(e) => Err(format!("failed to read request: {e}")),
                }
            }
            Err(e) => Err(format!("failed to read request: {e}")),
        };

        let (path, offset) = match request {
            Ok(request) => request,
            Err(message) => {
                tracing::debug!(%peer, %message, "rejected stream request");
                let _ = writeln!(stream, "bad request: {message}");
                return;
            }
        };

        tracing::debug!(%peer, path = %path.display(), offset, "streaming file");
        match stream_file(streamer, &path, offset, stream, self.idle_timeout) {
            Ok(reason) => tracing::debug!(%peer, ?reason, "stream finished"),
            Err(e) => tracing::debug!(%peer, error = %e, "stream ended with error"),
        }
    }
}
