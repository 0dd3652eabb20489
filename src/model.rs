use serde::{Deserialize, Serialize};
use std::fmt;
use time::OffsetDateTime;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum ServerStatus {
    #[default]
    Stopped,
    Starting,
    Running,
    Stopping,
}

impl ServerStatus {
    /// Label shown on the Server tab.
    pub fn label(self) -> &'static str {
        match self {
            ServerStatus::Stopped => "Stopped",
            ServerStatus::Starting => "Starting...",
            ServerStatus::Running => "Running",
            ServerStatus::Stopping => "Stopping...",
        }
    }
}

impl fmt::Display for ServerStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Severity {
    Info,
    Warning,
    Error,
    Debug,
    System,
}

impl Severity {
    pub fn as_str(self) -> &'static str {
        match self {
            Severity::Info => "INFO",
            Severity::Warning => "WARN",
            Severity::Error => "ERROR",
            Severity::Debug => "DEBUG",
            Severity::System => "SYSTEM",
        }
    }
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One line of the user-visible log.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LogEntry {
    #[serde(with = "time::serde::rfc3339")]
    pub timestamp: OffsetDateTime,
    pub severity: Severity,
    pub source: String,
    pub message: String,
}

impl LogEntry {
    pub fn new(severity: Severity, source: impl Into<String>, message: &str) -> Self {
        Self {
            timestamp: now_local(),
            severity,
            source: source.into(),
            message: single_line(message),
        }
    }

    /// `HH:MM:SS` wall-clock time of the entry.
    pub fn clock(&self) -> String {
        format_clock(self.timestamp)
    }

    /// Line written to the append-only mirror file.
    pub fn mirror_line(&self) -> String {
        format!(
            "[{}] {} [{}] {}",
            self.clock(),
            self.severity,
            self.source,
            self.message
        )
    }
}

/// One request recorded by the dev server's request middleware.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RequestLogEntry {
    #[serde(with = "time::serde::rfc3339")]
    pub timestamp: OffsetDateTime,
    pub method: String,
    pub path: String,
    pub status: u16,
    pub duration_ms: u64,
}

/// Outcome of a supervisor operation or a ground-truth status check.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StatusReport {
    pub status: ServerStatus,
    pub pid: Option<u32>,
    pub error: Option<String>,
}

impl StatusReport {
    pub fn running(pid: Option<u32>) -> Self {
        Self {
            status: ServerStatus::Running,
            pid,
            error: None,
        }
    }

    pub fn stopped() -> Self {
        Self {
            status: ServerStatus::Stopped,
            pid: None,
            error: None,
        }
    }

    pub fn transition(status: ServerStatus, pid: Option<u32>) -> Self {
        Self {
            status,
            pid,
            error: None,
        }
    }

    /// A failed operation leaves the server stopped and carries the error for display.
    pub fn failed(error: impl fmt::Display) -> Self {
        Self {
            status: ServerStatus::Stopped,
            pid: None,
            error: Some(error.to_string()),
        }
    }
}

/// Events delivered to the dashboard thread.
#[derive(Debug, Clone)]
pub enum DashEvent {
    Status(StatusReport),
    Requests(Vec<RequestLogEntry>),
    Info(String),
}

pub fn now_local() -> OffsetDateTime {
    OffsetDateTime::now_local().unwrap_or_else(|_| OffsetDateTime::now_utc())
}

pub fn format_clock(ts: OffsetDateTime) -> String {
    format!("{:02}:{:02}:{:02}", ts.hour(), ts.minute(), ts.second())
}

fn single_line(message: &str) -> String {
    let trimmed = message.trim();
    if trimmed.contains(['\n', '\r']) {
        trimmed
            .lines()
            .map(str::trim)
            .filter(|l| !l.is_empty())
            .collect::<Vec<_>>()
            .join(" ")
    } else {
        trimmed.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn log_entry_message_is_trimmed_and_flattened() {
        let e = LogEntry::new(Severity::Info, "server", "  first\r\n  second \n");
        assert_eq!(e.message, "first second");
        assert_eq!(e.source, "server");
    }

    #[test]
    fn mirror_line_format() {
        let mut e = LogEntry::new(Severity::System, "supervisor", "Server stopped");
        e.timestamp = time::macros::datetime!(2024-03-01 09:05:07 UTC);
        assert_eq!(e.mirror_line(), "[09:05:07] SYSTEM [supervisor] Server stopped");
    }

    #[test]
    fn request_entry_parses_go_style_timestamps() {
        let line = r#"{"timestamp":"2024-03-01T10:15:30.123456789+01:00","method":"GET","path":"/api/stats","status":200,"duration_ms":4,"user_agent":"curl"}"#;
        let r: RequestLogEntry = serde_json::from_str(line).unwrap();
        assert_eq!(r.method, "GET");
        assert_eq!(r.status, 200);
        assert_eq!(r.duration_ms, 4);
        assert_eq!(format_clock(r.timestamp), "10:15:30");
    }

    #[test]
    fn failed_report_is_stopped_with_error() {
        let r = StatusReport::failed("boom");
        assert_eq!(r.status, ServerStatus::Stopped);
        assert_eq!(r.error.as_deref(), Some("boom"));
    }
}
