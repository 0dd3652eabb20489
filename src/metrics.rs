use crate::model::{LogEntry, RequestLogEntry, Severity};
use serde::Serialize;

/// Aggregates shown under the request table.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct RequestStats {
    pub total: usize,
    pub avg_ms: u64,
    pub status_2xx: usize,
    pub status_3xx: usize,
    pub status_4xx: usize,
    pub status_5xx: usize,
}

/// Compute request counts by status class and the average duration
pub fn compute_request_stats(requests: &[RequestLogEntry]) -> RequestStats {
    if requests.is_empty() {
        return RequestStats::default();
    }
    let mut stats = RequestStats {
        total: requests.len(),
        ..Default::default()
    };
    let mut total_ms = 0u64;
    for r in requests {
        total_ms = total_ms.saturating_add(r.duration_ms);
        match r.status / 100 {
            2 => stats.status_2xx += 1,
            3 => stats.status_3xx += 1,
            4 => stats.status_4xx += 1,
            5 => stats.status_5xx += 1,
            _ => {}
        }
    }
    stats.avg_ms = total_ms / requests.len() as u64;
    stats
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LogStats {
    pub total: usize,
    pub system: usize,
    pub info: usize,
    pub warning: usize,
    pub error: usize,
    pub debug: usize,
}

/// Count log entries per severity
pub fn compute_log_stats(entries: &[LogEntry]) -> LogStats {
    let mut stats = LogStats {
        total: entries.len(),
        ..Default::default()
    };
    for e in entries {
        match e.severity {
            Severity::System => stats.system += 1,
            Severity::Info => stats.info += 1,
            Severity::Warning => stats.warning += 1,
            Severity::Error => stats.error += 1,
            Severity::Debug => stats.debug += 1,
        }
    }
    stats
}
