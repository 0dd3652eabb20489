//! The one child process owned by the supervisor.

use super::error::SupervisorError;
use super::{SERVER_SOURCE, SUPERVISOR_SOURCE};
use crate::logsink::LogSink;
use crate::model::Severity;
use crate::relay::spawn_relay;
use std::path::Path;
use std::process::Stdio;
use tokio::process::{Child, Command};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::debug;

/// Handle to a spawned server.
///
/// The child itself lives inside the exit watcher task, which reaps it and
/// records how it ended. The token is cancelled before any supervisor-initiated
/// termination so the watcher can tell a stop from a crash.
pub(crate) struct SupervisedProcess {
    pub pid: u32,
    pub pgid: u32,
    cancel: CancellationToken,
    watcher: JoinHandle<()>,
}

impl SupervisedProcess {
    /// Spawn `program` in its own process group with both output streams relayed
    /// into `sink`.
    pub fn spawn(
        program: &Path,
        args: &[String],
        workdir: &Path,
        sink: &LogSink,
    ) -> Result<Self, SupervisorError> {
        let name = program.display().to_string();
        let mut cmd = Command::new(program);
        cmd.args(args)
            .current_dir(workdir)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());
        #[cfg(unix)]
        cmd.process_group(0);

        let mut child = cmd.spawn().map_err(|source| SupervisorError::Spawn {
            program: name.clone(),
            source,
        })?;

        let Some(pid) = child.id() else {
            return Err(SupervisorError::Spawn {
                program: name,
                source: std::io::Error::other("process exited before reporting a pid"),
            });
        };
        let stdout = match child.stdout.take() {
            Some(pipe) => pipe,
            None => return Err(missing_pipe(&mut child, name, "stdout")),
        };
        let stderr = match child.stderr.take() {
            Some(pipe) => pipe,
            None => return Err(missing_pipe(&mut child, name, "stderr")),
        };

        spawn_relay(stdout, sink.clone(), SERVER_SOURCE, Severity::Info);
        spawn_relay(stderr, sink.clone(), SERVER_SOURCE, Severity::Error);

        let cancel = CancellationToken::new();
        let watcher = tokio::spawn(watch_exit(child, cancel.clone(), sink.clone()));

        Ok(Self {
            pid,
            pgid: process_group_of(pid),
            cancel,
            watcher,
        })
    }

    /// Whether the child has already exited and been reaped.
    pub fn is_finished(&self) -> bool {
        self.watcher.is_finished()
    }

    /// Signal the whole process group. Returns as soon as the signal is sent;
    /// the watcher records the actual exit.
    pub fn terminate(self, sink: &LogSink) -> Result<(), SupervisorError> {
        self.cancel.cancel();
        send_termination(self.pgid, Target::Group, sink)
    }
}

/// Kill the child when a requested pipe is missing so it does not outlive the failed start.
fn missing_pipe(child: &mut Child, program: String, stream: &'static str) -> SupervisorError {
    if let Err(e) = child.start_kill() {
        debug!(%program, "killing server after missing pipe failed: {e}");
    }
    SupervisorError::Pipe { program, stream }
}

async fn watch_exit(mut child: Child, cancel: CancellationToken, sink: LogSink) {
    match child.wait().await {
        Ok(status) if cancel.is_cancelled() => {
            debug!(%status, "server exited after stop");
            sink.log(Severity::System, SUPERVISOR_SOURCE, "Server process has exited");
        }
        Ok(status) => sink.log(
            Severity::Error,
            SUPERVISOR_SOURCE,
            format!("Server process exited unexpectedly ({status})"),
        ),
        Err(e) => debug!("waiting for server failed: {e}"),
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Target {
    Group,
    Process,
}

/// Graceful signal first, one forced signal if that fails. A target that is
/// already gone counts as terminated.
#[cfg(unix)]
pub(crate) fn send_termination(
    pid: u32,
    target: Target,
    sink: &LogSink,
) -> Result<(), SupervisorError> {
    use nix::errno::Errno;
    use nix::sys::signal::{kill, killpg, Signal};
    use nix::unistd::Pid;

    let raw = i32::try_from(pid).map_err(|_| SupervisorError::Termination {
        pid,
        reason: "pid out of range".into(),
    })?;
    let nix_pid = Pid::from_raw(raw);
    let send = |sig: Signal| match target {
        Target::Group => killpg(nix_pid, sig),
        Target::Process => kill(nix_pid, sig),
    };

    match send(Signal::SIGTERM) {
        Ok(()) | Err(Errno::ESRCH) => return Ok(()),
        Err(e) => sink.log(
            Severity::Warning,
            SUPERVISOR_SOURCE,
            format!("SIGTERM to {pid} failed ({e}), sending SIGKILL"),
        ),
    }
    match send(Signal::SIGKILL) {
        Ok(()) | Err(Errno::ESRCH) => Ok(()),
        Err(e) => Err(SupervisorError::Termination {
            pid,
            reason: e.to_string(),
        }),
    }
}

#[cfg(not(unix))]
pub(crate) fn send_termination(
    pid: u32,
    _target: Target,
    _sink: &LogSink,
) -> Result<(), SupervisorError> {
    Err(SupervisorError::Termination {
        pid,
        reason: "process signals are not supported on this platform".into(),
    })
}

#[cfg(unix)]
fn process_group_of(pid: u32) -> u32 {
    use nix::unistd::{getpgid, Pid};
    i32::try_from(pid)
        .ok()
        .and_then(|raw| getpgid(Some(Pid::from_raw(raw))).ok())
        .and_then(|pgid| u32::try_from(pgid.as_raw()).ok())
        .unwrap_or(pid)
}

#[cfg(not(unix))]
fn process_group_of(pid: u32) -> u32 {
    pid
}
