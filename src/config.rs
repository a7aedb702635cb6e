//! Engine configuration.

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::{StreamerError, StreamerResult};

/// Queue and buffer sizing for a [`crate::Streamer`].
///
/// Every capacity is clamped to at least 1 when used.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct StreamerConfig {
    /// Max queued change paths between the forwarder and the router.
    pub change_queue_capacity: usize,
    /// Max queued subscribe/unsubscribe requests.
    pub control_queue_capacity: usize,
    /// Max queued asynchronous backend errors; further errors are dropped.
    pub error_queue_capacity: usize,
    /// Max queued diagnostics before new ones are dropped.
    pub diagnostics_capacity: usize,
    /// Copy buffer size used when a sink reports no buffering capacity.
    pub fallback_buffer_size: usize,
}

impl Default for StreamerConfig {
    fn default() -> Self {
        Self {
            change_queue_capacity: 1000,
            control_queue_capacity: 1024,
            error_queue_capacity: 1024,
            diagnostics_capacity: 256,
            fallback_buffer_size: 8 * 1024,
        }
    }
}

impl StreamerConfig {
    /// Parse a JSON document. Missing fields take their defaults.
    pub fn from_json_str(json: &str) -> StreamerResult<Self> {
        serde_json::from_str(json).map_err(|e| StreamerError::io("invalid streamer config", e.into()))
    }

    /// Load a JSON config file.
    pub fn from_json_file(path: &Path) -> StreamerResult<Self> {
        let raw = std::fs::read_to_string(path)
            .map_err(|e| StreamerError::io(format!("failed to read config '{}'", path.display()), e))?;
        Self::from_json_str(&raw)
    }
}
