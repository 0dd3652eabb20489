//! Forwards a child's output stream into the log sink, one entry per line.

use crate::logsink::LogSink;
use crate::model::Severity;
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::task::JoinHandle;

/// Spawn a task that reads `reader` to EOF and logs every non-blank line.
///
/// The task ends by itself when the stream closes, which happens when the child exits.
pub fn spawn_relay<R>(reader: R, sink: LogSink, source: &str, severity: Severity) -> JoinHandle<()>
where
    R: AsyncRead + Unpin + Send + 'static,
{
    let source = source.to_string();
    tokio::spawn(async move { relay_lines(reader, &sink, &source, severity).await })
}

async fn relay_lines<R>(reader: R, sink: &LogSink, source: &str, severity: Severity)
where
    R: AsyncRead + Unpin,
{
    let mut reader = BufReader::new(reader);
    let mut buf = Vec::new();
    loop {
        buf.clear();
        match reader.read_until(b'\n', &mut buf).await {
            Ok(0) => break,
            Ok(_) => {
                // Server output is not guaranteed to be UTF-8; keep reading past bad bytes.
                let line = String::from_utf8_lossy(&buf);
                if !line.trim().is_empty() {
                    sink.log(severity, source, line.trim_end());
                }
            }
            Err(e) => {
                tracing::debug!(source, "output relay stopped: {e}");
                break;
            }
        }
    }
}
