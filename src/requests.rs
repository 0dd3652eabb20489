//! Reader for the request log written by the dev server's HTTP middleware.
//!
//! The file is line-delimited JSON, appended by another process. Only the tail is
//! parsed and malformed lines are skipped.

use crate::model::RequestLogEntry;
use anyhow::{Context, Result};
use std::path::Path;

/// File name inside the state directory.
pub const REQUEST_LOG_FILE: &str = "requests.jsonl";

/// Parse the last `window` lines of the request log. A missing file is an empty log.
pub fn load_recent(path: &Path, window: usize) -> Result<Vec<RequestLogEntry>> {
    let data = match std::fs::read(path) {
        Ok(d) => d,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(e) => {
            return Err(e).with_context(|| format!("read request log {}", path.display()))
        }
    };
    Ok(parse_tail(&data, window))
}

/// Lines are split on raw bytes, so a line that is not UTF-8 is skipped like any other bad line.
pub(crate) fn parse_tail(data: &[u8], window: usize) -> Vec<RequestLogEntry> {
    let lines: Vec<&[u8]> = data
        .split(|b| *b == b'\n')
        .map(<[u8]>::trim_ascii)
        .filter(|l| !l.is_empty())
        .collect();
    let start = lines.len().saturating_sub(window);
    lines[start..]
        .iter()
        .filter_map(|l| serde_json::from_slice::<RequestLogEntry>(l).ok())
        .collect()
}
