//! Status summary for the non-interactive `--text` and `--json` modes.
//!
//! This module gathers the snapshot fields and formats human-readable lines for text mode.

use crate::config::Settings;
use crate::metrics::{self, RequestStats};
use crate::model::{format_clock, RequestLogEntry, ServerStatus, StatusReport};
use anyhow::{Context, Result};
use serde::Serialize;
use std::collections::VecDeque;
use std::io::{BufRead, BufReader};
use std::path::Path;

/// Requests listed individually in text mode.
const TEXT_REQUEST_ROWS: usize = 5;

/// Point-in-time view of the server, printed as text or JSON.
#[derive(Debug, Clone, Serialize)]
pub(crate) struct StatusSnapshot {
    pub status: ServerStatus,
    pub pid: Option<u32>,
    pub port: u16,
    pub url: String,
    pub request_stats: RequestStats,
    pub recent_requests: Vec<RequestLogEntry>,
    pub recent_logs: Vec<String>,
}

impl StatusSnapshot {
    pub fn new(
        settings: &Settings,
        report: StatusReport,
        requests: Vec<RequestLogEntry>,
        logs: Vec<String>,
    ) -> Self {
        Self {
            status: report.status,
            pid: report.pid,
            port: settings.server.port,
            url: settings.url(),
            request_stats: metrics::compute_request_stats(&requests),
            recent_requests: requests,
            recent_logs: logs,
        }
    }
}

/// Pre-formatted lines for text output.
pub(crate) struct TextSummary {
    pub lines: Vec<String>,
}

pub(crate) fn build_text_summary(snap: &StatusSnapshot) -> TextSummary {
    let mut lines = Vec::new();

    match (snap.status, snap.pid) {
        (ServerStatus::Running, Some(pid)) => {
            lines.push(format!("Server: {} (PID {pid})", snap.status.label()))
        }
        _ => lines.push(format!("Server: {}", snap.status.label())),
    }
    lines.push(format!("Port: {}", snap.port));
    if snap.status == ServerStatus::Running {
        lines.push(format!("URL: {}", snap.url));
    }

    let s = &snap.request_stats;
    lines.push(format!(
        "Requests: {} (avg {} ms) 2xx {} / 3xx {} / 4xx {} / 5xx {}",
        s.total, s.avg_ms, s.status_2xx, s.status_3xx, s.status_4xx, s.status_5xx
    ));
    let start = snap.recent_requests.len().saturating_sub(TEXT_REQUEST_ROWS);
    for r in &snap.recent_requests[start..] {
        lines.push(format!(
            "  {} {} {} {} {}ms",
            format_clock(r.timestamp),
            r.method,
            r.path,
            r.status,
            r.duration_ms
        ));
    }

    if !snap.recent_logs.is_empty() {
        lines.push("Recent log:".to_string());
        lines.extend(snap.recent_logs.iter().map(|l| format!("  {l}")));
    }

    TextSummary { lines }
}

/// Last `n` lines of a text file. A missing file has no lines.
pub(crate) fn tail_lines(path: &Path, n: usize) -> Result<Vec<String>> {
    let file = match std::fs::File::open(path) {
        Ok(f) => f,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(e) => return Err(e).with_context(|| format!("open {}", path.display())),
    };
    let mut tail = VecDeque::with_capacity(n);
    for line in BufReader::new(file).lines() {
        let line = line.with_context(|| format!("read {}", path.display()))?;
        if tail.len() == n {
            tail.pop_front();
        }
        if n > 0 {
            tail.push_back(line);
        }
    }
    Ok(tail.into())
}
