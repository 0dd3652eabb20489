//! Port ownership queries against the OS.
//!
//! Answers come from `lsof`. Any failure to run or parse it is treated as
//! "nobody listening" so callers never stall on an inspection.

use async_trait::async_trait;
use std::time::Duration;
use tokio::process::Command;
use tracing::debug;

#[async_trait]
pub trait PortInspector: Send + Sync {
    /// One OS query: the PID listening on `port`, or `None` when the port is free.
    async fn listener(&self, port: u16) -> Option<u32>;

    /// Whether any process is listening on `port`.
    async fn is_port_occupied(&self, port: u16) -> bool {
        self.listener(port).await.is_some()
    }

    /// PID of the process listening on `port`, if one can be found.
    async fn owner_pid(&self, port: u16) -> Option<u32> {
        self.listener(port).await
    }
}

/// Inspector backed by `lsof -t -iTCP:<port> -sTCP:LISTEN`.
#[derive(Debug, Clone)]
pub struct LsofInspector {
    program: String,
    timeout: Duration,
}

impl Default for LsofInspector {
    fn default() -> Self {
        Self {
            program: "lsof".into(),
            timeout: Duration::from_secs(2),
        }
    }
}

impl LsofInspector {
    async fn listening_pids(&self, port: u16) -> Vec<u32> {
        let mut cmd = Command::new(&self.program);
        cmd.args(["-n", "-P", "-t"])
            .arg(format!("-iTCP:{port}"))
            .arg("-sTCP:LISTEN")
            .stdin(std::process::Stdio::null())
            .kill_on_drop(true);

        let output = match tokio::time::timeout(self.timeout, cmd.output()).await {
            Ok(Ok(out)) => out,
            Ok(Err(e)) => {
                debug!(port, "port inspection failed: {e}");
                return Vec::new();
            }
            Err(_) => {
                debug!(port, "port inspection timed out after {:?}", self.timeout);
                return Vec::new();
            }
        };

        // lsof exits 1 when nothing matches; that is an answer, not a failure.
        if !output.status.success() {
            return Vec::new();
        }
        parse_pids(&String::from_utf8_lossy(&output.stdout))
    }
}

#[async_trait]
impl PortInspector for LsofInspector {
    async fn listener(&self, port: u16) -> Option<u32> {
        self.listening_pids(port).await.into_iter().next()
    }
}

/// Parse `lsof -t` output: one PID per line, duplicates removed, order kept.
pub(crate) fn parse_pids(stdout: &str) -> Vec<u32> {
    let mut pids = Vec::new();
    for pid in stdout.lines().filter_map(|l| l.trim().parse::<u32>().ok()) {
        if pid != 0 && !pids.contains(&pid) {
            pids.push(pid);
        }
    }
    pids
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_pid_lists() {
        assert_eq!(parse_pids("1234\n"), vec![1234]);
        assert_eq!(parse_pids("1234\n5678\n1234\n"), vec![1234, 5678]);
        assert!(parse_pids("").is_empty());
        assert!(parse_pids("  \nnot-a-pid\n").is_empty());
    }

    #[tokio::test]
    async fn free_port_is_not_occupied() {
        let port = {
            let l = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
            l.local_addr().unwrap().port()
        };
        let inspector = LsofInspector::default();
        assert!(!inspector.is_port_occupied(port).await);
        assert_eq!(inspector.owner_pid(port).await, None);
    }

    #[tokio::test]
    async fn missing_tool_reads_as_free() {
        let inspector = LsofInspector {
            program: "/nonexistent/lsof".into(),
            timeout: Duration::from_millis(200),
        };
        assert!(!inspector.is_port_occupied(8080).await);
        assert_eq!(inspector.owner_pid(8080).await, None);
    }

    #[tokio::test]
    async fn listening_socket_reports_an_owner() {
        let l = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let port = l.local_addr().unwrap().port();
        let inspector = LsofInspector::default();
        // Environments without lsof read every port as free.
        if inspector.listener(port).await.is_none() {
            return;
        }
        assert!(inspector.is_port_occupied(port).await);
        assert_eq!(inspector.owner_pid(port).await, Some(std::process::id()));
    }
}
