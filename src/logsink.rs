//! In-memory ring buffer of user-visible log entries, mirrored to an append-only file.
//!
//! The buffer is authoritative for the dashboard. The file mirror is written by a
//! dedicated thread so callers never block on disk I/O, and write failures are dropped.

use crate::model::{LogEntry, Severity};
use std::collections::VecDeque;
use std::fs::OpenOptions;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::mpsc as std_mpsc;
use std::sync::{Arc, RwLock};
use std::time::Duration;

/// Number of entries kept in memory.
pub const MAX_ENTRIES: usize = 500;

enum MirrorMsg {
    Entry(LogEntry),
    Flush(std_mpsc::Sender<()>),
}

struct Inner {
    entries: RwLock<VecDeque<LogEntry>>,
    mirror: Option<std_mpsc::Sender<MirrorMsg>>,
}

/// Cheaply cloneable handle to the shared log.
#[derive(Clone)]
pub struct LogSink {
    inner: Arc<Inner>,
}

impl LogSink {
    /// Memory-only sink.
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Inner {
                entries: RwLock::new(VecDeque::with_capacity(MAX_ENTRIES)),
                mirror: None,
            }),
        }
    }

    /// Sink that also appends every entry to `path`.
    ///
    /// The parent directory is created up front; later write failures are ignored.
    pub fn with_mirror(path: impl Into<PathBuf>) -> std::io::Result<Self> {
        let path = path.into();
        if let Some(dir) = path.parent() {
            if !dir.as_os_str().is_empty() {
                std::fs::create_dir_all(dir)?;
            }
        }
        let (tx, rx) = std_mpsc::channel::<MirrorMsg>();
        std::thread::Builder::new()
            .name("log-mirror".into())
            .spawn(move || run_mirror(&path, rx))?;
        Ok(Self {
            inner: Arc::new(Inner {
                entries: RwLock::new(VecDeque::with_capacity(MAX_ENTRIES)),
                mirror: Some(tx),
            }),
        })
    }

    pub fn log(&self, severity: Severity, source: &str, message: impl AsRef<str>) {
        let entry = LogEntry::new(severity, source, message.as_ref());

        {
            let mut entries = match self.inner.entries.write() {
                Ok(g) => g,
                Err(poisoned) => poisoned.into_inner(),
            };
            if entries.len() >= MAX_ENTRIES {
                entries.pop_front();
            }
            entries.push_back(entry.clone());
        }

        if let Some(tx) = &self.inner.mirror {
            let _ = tx.send(MirrorMsg::Entry(entry));
        }
    }

    /// The last `limit` entries, oldest first. A `limit` of 0 returns everything.
    pub fn recent(&self, limit: usize) -> Vec<LogEntry> {
        let entries = match self.inner.entries.read() {
            Ok(g) => g,
            Err(poisoned) => poisoned.into_inner(),
        };
        let take = if limit == 0 {
            entries.len()
        } else {
            limit.min(entries.len())
        };
        entries.iter().skip(entries.len() - take).cloned().collect()
    }

    /// Entries whose source tag equals `source`, oldest first, capped to the last `limit`
    /// when `limit` is non-zero.
    pub fn by_source(&self, source: &str, limit: usize) -> Vec<LogEntry> {
        let entries = match self.inner.entries.read() {
            Ok(g) => g,
            Err(poisoned) => poisoned.into_inner(),
        };
        let mut filtered: Vec<LogEntry> = entries
            .iter()
            .filter(|e| e.source == source)
            .cloned()
            .collect();
        if limit > 0 && filtered.len() > limit {
            let _ = filtered.drain(0..(filtered.len() - limit));
        }
        filtered
    }

    /// Block until everything logged so far has reached the mirror file, or `timeout` passes.
    pub fn flush(&self, timeout: Duration) -> bool {
        let Some(tx) = &self.inner.mirror else {
            return true;
        };
        let (done_tx, done_rx) = std_mpsc::channel();
        if tx.send(MirrorMsg::Flush(done_tx)).is_err() {
            return false;
        }
        done_rx.recv_timeout(timeout).is_ok()
    }
}

impl Default for LogSink {
    fn default() -> Self {
        Self::new()
    }
}

fn run_mirror(path: &Path, rx: std_mpsc::Receiver<MirrorMsg>) {
    let mut file = None;
    while let Ok(msg) = rx.recv() {
        match msg {
            MirrorMsg::Entry(entry) => {
                if file.is_none() {
                    file = OpenOptions::new().create(true).append(true).open(path).ok();
                }
                if let Some(f) = file.as_mut() {
                    if writeln!(f, "{}", entry.mirror_line()).is_err() {
                        // Reopen on the next entry.
                        file = None;
                    }
                }
            }
            MirrorMsg::Flush(done) => {
                if let Some(f) = file.as_mut() {
                    let _ = f.flush();
                }
                let _ = done.send(());
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn keeps_only_the_most_recent_entries() {
        let sink = LogSink::new();
        for i in 0..(MAX_ENTRIES + 37) {
            sink.log(Severity::Info, "server", format!("line {i}"));
        }

        let all = sink.recent(0);
        assert_eq!(all.len(), MAX_ENTRIES);
        assert_eq!(all.first().unwrap().message, "line 37");
        assert_eq!(all.last().unwrap().message, format!("line {}", MAX_ENTRIES + 36));

        let last10 = sink.recent(10);
        assert_eq!(last10.len(), 10);
        let expected: Vec<String> = (MAX_ENTRIES + 27..MAX_ENTRIES + 37)
            .map(|i| format!("line {i}"))
            .collect();
        let got: Vec<String> = last10.into_iter().map(|e| e.message).collect();
        assert_eq!(got, expected);
    }

    #[test]
    fn limit_larger_than_buffer_returns_everything() {
        let sink = LogSink::new();
        sink.log(Severity::Info, "a", "one");
        sink.log(Severity::Info, "a", "two");
        assert_eq!(sink.recent(50).len(), 2);
        assert!(LogSink::new().recent(5).is_empty());
    }

    #[test]
    fn round_trip_preserves_fields() {
        let sink = LogSink::new();
        sink.log(Severity::Warning, "supervisor", "  SIGTERM failed, using SIGKILL  ");
        let e = &sink.recent(1)[0];
        assert_eq!(e.severity, Severity::Warning);
        assert_eq!(e.source, "supervisor");
        assert_eq!(e.message, "SIGTERM failed, using SIGKILL");
    }

    #[test]
    fn by_source_only_returns_matching_tags() {
        let sink = LogSink::new();
        for i in 0..30 {
            let src = if i % 3 == 0 { "server" } else { "supervisor" };
            sink.log(Severity::Info, src, format!("{i}"));
        }
        let server = sink.by_source("server", 0);
        assert_eq!(server.len(), 10);
        assert!(server.iter().all(|e| e.source == "server"));

        let capped = sink.by_source("server", 3);
        let msgs: Vec<&str> = capped.iter().map(|e| e.message.as_str()).collect();
        assert_eq!(msgs, vec!["21", "24", "27"]);

        assert!(sink.by_source("nobody", 0).is_empty());
    }

    #[test]
    fn concurrent_writers_never_exceed_capacity() {
        let sink = LogSink::new();
        let handles: Vec<_> = (0..4)
            .map(|t| {
                let sink = sink.clone();
                std::thread::spawn(move || {
                    for i in 0..300 {
                        sink.log(Severity::Info, &format!("w{t}"), format!("{i}"));
                    }
                })
            })
            .collect();
        for h in handles {
            h.join().unwrap();
        }
        assert_eq!(sink.recent(0).len(), MAX_ENTRIES);
    }

    #[test]
    fn mirror_file_receives_every_entry() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("logs").join("cli.log");
        let sink = LogSink::with_mirror(&path).unwrap();
        for i in 0..(MAX_ENTRIES + 5) {
            sink.log(Severity::System, "supervisor", format!("entry {i}"));
        }
        assert!(sink.flush(Duration::from_secs(5)));

        let contents = std::fs::read_to_string(&path).unwrap();
        let lines: Vec<&str> = contents.lines().collect();
        assert_eq!(lines.len(), MAX_ENTRIES + 5);
        assert!(lines[0].ends_with("SYSTEM [supervisor] entry 0"));
        assert!(lines[0].starts_with('['));
    }
}
