//! Error types for tailstream.
//!
//! Errors are strongly typed using thiserror. Lifecycle misuse and per-session
//! I/O failures are returned to callers; watch-backend failures are mostly
//! best-effort and surface as diagnostics instead (see `crate::diagnostics`).

use std::io;
use std::path::PathBuf;

use thiserror::Error;

/// Errors raised by a watch backend.
#[derive(Debug, Error)]
pub enum WatchError {
    #[error("Failed to initialise watch backend: {message}")]
    Init {
        message: String,
    },

    #[error("Failed to watch '{}': {message}", path.display())]
    Registration {
        path: PathBuf,
        message: String,
    },

    #[error("Failed to stop watching '{}': {message}", path.display())]
    Removal {
        path: PathBuf,
        message: String,
    },

    #[error("Watch backend error: {message}")]
    Backend {
        message: String,
    },

    #[error("Watch backend is closed")]
    Closed,
}

/// Top-level error type for tailstream.
#[derive(Debug, Error)]
pub enum StreamerError {
    #[error("streamer is already running")]
    AlreadyRunning,

    #[error("streamer is not running")]
    NotRunning,

    #[error("Watch error: {0}")]
    Watch(#[from] WatchError),

    #[error("Could not stream file data from '{}': {source}", path.display())]
    CopyFailed {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("Could not flush streamed data from '{}': {source}", path.display())]
    FlushFailed {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("{context}: {source}")]
    Io {
        context: String,
        #[source]
        source: io::Error,
    },

    #[error("Internal error: {message}")]
    Internal {
        message: String,
    },
}

impl StreamerError {
    /// Creates an internal error.
    #[must_use]
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal {
            message: message.into(),
        }
    }

    /// Wraps an I/O error with a short description of what was attempted.
    #[must_use]
    pub fn io(context: impl Into<String>, source: io::Error) -> Self {
        Self::Io {
            context: context.into(),
            source,
        }
    }

    /// Returns true for `AlreadyRunning` / `NotRunning`.
    #[must_use]
    pub const fn is_lifecycle(&self) -> bool {
        matches!(self, Self::AlreadyRunning | Self::NotRunning)
    }

    /// Returns true if the error ended a single stream session.
    #[must_use]
    pub const fn is_session(&self) -> bool {
        matches!(self, Self::CopyFailed { .. } | Self::FlushFailed { .. })
    }
}

/// Result type alias for tailstream operations.
pub type StreamerResult<T> = Result<T, StreamerError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_lifecycle_errors() {
        assert!(StreamerError::AlreadyRunning.is_lifecycle());
        assert!(StreamerError::NotRunning.is_lifecycle());
        assert!(!StreamerError::NotRunning.is_session());
        assert_eq!(StreamerError::NotRunning.to_string(), "streamer is not running");
    }

    #[test]
    fn test_copy_failed_message() {
        let err = StreamerError::CopyFailed {
            path: PathBuf::from("/var/log/app.log"),
            source: io::Error::new(io::ErrorKind::BrokenPipe, "pipe closed"),
        };
        assert!(err.is_session());
        let msg = err.to_string();
        assert!(msg.contains("/var/log/app.log"));
        assert!(msg.contains("pipe closed"));
    }

    #[test]
    fn test_watch_error_converts() {
        let err: StreamerError = WatchError::Init {
            message: "inotify limit".to_string(),
        }
        .into();
        assert!(matches!(err, StreamerError::Watch(WatchError::Init { .. })));
        assert!(err.to_string().contains("inotify limit"));
    }

    #[test]
    fn test_registration_error_names_path() {
        let err = WatchError::Registration {
            path: PathBuf::from("/tmp/x"),
            message: "no such file".to_string(),
        };
        let msg = format!("{err}");
        assert!(msg.contains("/tmp/x"));
        assert!(msg.contains("no such file"));
    }

    #[test]
    fn test_internal_error() {
        let err = StreamerError::internal("spawn failed");
        assert!(!err.is_lifecycle());
        assert!(err.to_string().contains("spawn failed"));
    }
}
