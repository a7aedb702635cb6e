use std::io::{BufWriter, Write};
use std::path::Path;
use std::time::Duration;

use crate::error::{StreamerError, StreamerResult};
use crate::listener::Listener;
use crate::source::FileSource;
use crate::streamer::{SessionEnd, Streamer};
use crate::watch::WatchBackendFactory;

const SEPARATOR: &str = "--------------------------------";

/// Open `path` at `offset` and stream it into `writer`.
///
/// Writes raw file bytes only, no framing. Any protocol preamble must be sent
/// before calling this. When streaming cannot start or fails part way, a
/// short human-readable trailer is written into `writer` before the error is
/// returned, so the reader sees why the stream ended.
pub fn stream_file<F, W>(
    streamer: &Streamer<F>,
    path: &Path,
    offset: u64,
    mut writer: W,
    idle_timeout: Duration,
) -> StreamerResult<SessionEnd>
where
    F: WatchBackendFactory,
    W: Write + Send,
{
    if !streamer.is_running() {
        let _ = writeln!(writer, "Streaming service is not running");
        let _ = writer.flush();
        return Err(StreamerError::NotRunning);
    }

    let source = match FileSource::open_at(path, offset) {
        Ok(source) => source,
        Err(e) => {
            let _ = writeln!(writer, "Can't open file for streaming: {e}");
            let _ = writer.flush();
            return Err(StreamerError::io(
                format!("failed to open '{}' for streaming", path.display()),
                e,
            ));
        }
    };

    let listener = Listener::new(source, BufWriter::new(writer));
    let result = streamer.stream_to(&listener, idle_timeout);

    if let Err(err) = &result {
        let (_source, mut sink) = listener.into_parts();
        let _ = writeln!(sink, "\n{SEPARATOR}");
        match err {
            StreamerError::NotRunning => {
                let _ = writeln!(sink, "Streaming service is not running");
            }
            other => {
                let _ = writeln!(sink, "file streaming error: {other}");
            }
        }
        let _ = sink.flush();
    }

    result
}
