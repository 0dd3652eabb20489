//! Lifecycle of the one supervised dev server.
//!
//! The supervisor owns the process handle behind an async mutex, so start and stop
//! never interleave with each other. Every state transition it makes is published
//! on the event channel as it happens; status checks are read-only and report
//! what the OS says about the port, regardless of the held handle.

mod builder;
mod error;
mod process;

pub use builder::{Builder, MakeBuilder};
pub use error::{FailureKind, SupervisorError};

use crate::config::Settings;
use crate::logsink::LogSink;
use crate::model::{DashEvent, ServerStatus, Severity, StatusReport};
use crate::port::PortInspector;
use process::{send_termination, SupervisedProcess, Target};
use std::net::Ipv4Addr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpStream;
use tokio::sync::{mpsc, Mutex};
use tracing::{debug, info, warn};

/// Source tag for entries written by the supervisor.
pub const SUPERVISOR_SOURCE: &str = "supervisor";
/// Source tag for lines relayed from the server's output.
pub const SERVER_SOURCE: &str = "server";

const READINESS_POLL: Duration = Duration::from_millis(100);

#[derive(Debug, Clone)]
pub struct SupervisorConfig {
    pub port: u16,
    pub program: PathBuf,
    /// Full argument list, including `-dev` and `-port`.
    pub args: Vec<String>,
    pub workdir: PathBuf,
    pub build_targets: Vec<String>,
    pub settle_delay: Duration,
    pub restart_cooldown: Duration,
    pub readiness_timeout: Option<Duration>,
}

impl SupervisorConfig {
    pub fn from_settings(settings: &Settings) -> Self {
        Self {
            port: settings.server.port,
            program: settings.server.binary.clone(),
            args: settings.server_args(),
            workdir: settings.server.workdir.clone(),
            build_targets: settings.build.targets.clone(),
            settle_delay: settings.server.settle_delay,
            restart_cooldown: settings.server.restart_cooldown,
            readiness_timeout: settings.server.readiness_timeout,
        }
    }
}

pub struct Supervisor {
    config: SupervisorConfig,
    inspector: Arc<dyn PortInspector>,
    builder: Arc<dyn Builder>,
    sink: LogSink,
    event_tx: mpsc::UnboundedSender<DashEvent>,
    process: Mutex<Option<SupervisedProcess>>,
}

impl Supervisor {
    pub fn new(
        config: SupervisorConfig,
        inspector: Arc<dyn PortInspector>,
        builder: Arc<dyn Builder>,
        sink: LogSink,
        event_tx: mpsc::UnboundedSender<DashEvent>,
    ) -> Self {
        Self {
            config,
            inspector,
            builder,
            sink,
            event_tx,
            process: Mutex::new(None),
        }
    }

    /// PID of the held child, if one is held and still alive.
    pub async fn held_pid(&self) -> Option<u32> {
        let guard = self.process.lock().await;
        guard.as_ref().filter(|p| !p.is_finished()).map(|p| p.pid)
    }

    /// Build and launch the server.
    ///
    /// A live held child, or any process already listening on the port, is reported
    /// as running without building or spawning anything.
    pub async fn start(&self) -> Result<StatusReport, SupervisorError> {
        let mut guard = self.process.lock().await;

        if let Some(existing) = guard.take() {
            if !existing.is_finished() {
                let pid = existing.pid;
                *guard = Some(existing);
                self.log(Severity::Info, format!("Server already running (PID {pid})"));
                return Ok(StatusReport::running(Some(pid)));
            }
            debug!(pid = existing.pid, "discarding handle of exited server");
        }

        let port = self.config.port;
        if let Some(owner) = self.inspector.listener(port).await {
            self.log(
                Severity::Warning,
                format!("Port {port} is already in use by PID {owner}, not starting a new server"),
            );
            return Ok(self.publish(StatusReport::running(Some(owner))));
        }

        self.publish(StatusReport::transition(ServerStatus::Starting, None));
        self.log(Severity::System, format!("Starting server on port {port}..."));

        for target in &self.config.build_targets {
            self.log(Severity::System, format!("Building {target}..."));
            if let Err(e) = self.builder.build(target).await {
                let err = SupervisorError::Build {
                    target: target.clone(),
                    reason: format!("{e:#}"),
                };
                return Err(self.abort_start(err));
            }
        }

        let child = match SupervisedProcess::spawn(
            &self.config.program,
            &self.config.args,
            &self.config.workdir,
            &self.sink,
        ) {
            Ok(child) => child,
            Err(err) => return Err(self.abort_start(err)),
        };
        let pid = child.pid;
        info!(pid, pgid = child.pgid, "server spawned");
        *guard = Some(child);
        self.log(Severity::System, format!("Server started with PID {pid}"));
        self.publish(StatusReport::transition(ServerStatus::Starting, Some(pid)));

        tokio::time::sleep(self.config.settle_delay).await;
        if let Some(timeout) = self.config.readiness_timeout {
            if self.wait_until_ready(timeout).await {
                self.log(Severity::Info, "Server is accepting connections");
            } else {
                self.log(
                    Severity::Warning,
                    format!("Server did not accept connections within {timeout:?}"),
                );
            }
        }

        self.log(Severity::System, "Server startup completed");
        Ok(self.publish(StatusReport::running(Some(pid))))
    }

    /// Terminate the server.
    ///
    /// Returns once the signal is sent; the exit itself is recorded by the watcher.
    /// Termination failures are logged, never returned.
    pub async fn stop(&self) -> StatusReport {
        let mut guard = self.process.lock().await;
        let held = guard.take().filter(|p| !p.is_finished());

        self.publish(StatusReport::transition(
            ServerStatus::Stopping,
            held.as_ref().map(|p| p.pid),
        ));
        self.log(Severity::System, "Stopping server...");

        match held {
            Some(child) => {
                let pid = child.pid;
                if let Err(e) = child.terminate(&self.sink) {
                    warn!(pid, "termination failed: {e}");
                    self.log(Severity::Error, e.display_message());
                }
            }
            None => self.stop_port_owner().await,
        }

        self.log(Severity::System, "Server stopped");
        self.publish(StatusReport::stopped())
    }

    /// Stop, wait out the cooldown, then start again.
    ///
    /// The two halves lock separately; a command issued during the cooldown runs
    /// between them.
    pub async fn restart(&self) -> Result<StatusReport, SupervisorError> {
        self.log(Severity::System, "Restarting server...");
        self.stop().await;
        self.log(Severity::System, "Waiting for cleanup...");
        tokio::time::sleep(self.config.restart_cooldown).await;
        self.start().await
    }

    /// Ground truth from the OS: running if anything listens on the port.
    pub async fn status_check(&self) -> StatusReport {
        match self.inspector.listener(self.config.port).await {
            Some(pid) => StatusReport::running(Some(pid)),
            None => StatusReport::stopped(),
        }
    }

    async fn stop_port_owner(&self) {
        let port = self.config.port;
        self.log(
            Severity::System,
            "No active server process, checking port...",
        );
        let Some(pid) = self.inspector.owner_pid(port).await else {
            self.log(Severity::System, format!("No process found on port {port}"));
            return;
        };
        if pid == std::process::id() {
            self.log(
                Severity::Warning,
                format!("Port {port} is owned by the dashboard itself, not signalling it"),
            );
            return;
        }
        self.log(Severity::System, format!("Found process {pid} on port {port}"));
        if let Err(e) = send_termination(pid, Target::Process, &self.sink) {
            warn!(pid, "termination failed: {e}");
            self.log(Severity::Error, e.display_message());
        }
    }

    async fn wait_until_ready(&self, timeout: Duration) -> bool {
        let addr = (Ipv4Addr::LOCALHOST, self.config.port);
        let probe = async {
            loop {
                if TcpStream::connect(addr).await.is_ok() {
                    return;
                }
                tokio::time::sleep(READINESS_POLL).await;
            }
        };
        tokio::time::timeout(timeout, probe).await.is_ok()
    }

    fn abort_start(&self, err: SupervisorError) -> SupervisorError {
        self.log(Severity::System, format!("Start aborted: {}", err.display_message()));
        self.publish(StatusReport::stopped());
        err
    }

    fn publish(&self, report: StatusReport) -> StatusReport {
        let _ = self.event_tx.send(DashEvent::Status(report.clone()));
        report
    }

    fn log(&self, severity: Severity, message: impl AsRef<str>) {
        self.sink.log(severity, SUPERVISOR_SOURCE, message);
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::os::unix::process::ExitStatusExt;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex as StdMutex;

    #[derive(Default)]
    struct FakeInspector {
        owner: StdMutex<Option<u32>>,
        queries: AtomicUsize,
    }

    impl FakeInspector {
        fn owned_by(pid: u32) -> Self {
            Self {
                owner: StdMutex::new(Some(pid)),
                ..Self::default()
            }
        }
    }

    #[async_trait]
    impl PortInspector for FakeInspector {
        async fn listener(&self, _port: u16) -> Option<u32> {
            self.queries.fetch_add(1, Ordering::SeqCst);
            *self.owner.lock().unwrap()
        }
    }

    #[derive(Default)]
    struct FakeBuilder {
        calls: StdMutex<Vec<String>>,
        fail_on: Option<&'static str>,
    }

    #[async_trait]
    impl Builder for FakeBuilder {
        async fn build(&self, target: &str) -> anyhow::Result<()> {
            self.calls.lock().unwrap().push(target.to_string());
            if self.fail_on == Some(target) {
                anyhow::bail!("exit status: 2");
            }
            Ok(())
        }
    }

    struct Harness {
        supervisor: Supervisor,
        inspector: Arc<FakeInspector>,
        builder: Arc<FakeBuilder>,
        sink: LogSink,
        events: mpsc::UnboundedReceiver<DashEvent>,
    }

    fn harness(program: &str, args: &[&str], inspector: FakeInspector, builder: FakeBuilder) -> Harness {
        let config = SupervisorConfig {
            port: 18080,
            program: PathBuf::from(program),
            args: args.iter().map(|a| a.to_string()).collect(),
            workdir: PathBuf::from("."),
            build_targets: vec!["wasm".into(), "server".into()],
            settle_delay: Duration::from_millis(20),
            restart_cooldown: Duration::from_millis(50),
            readiness_timeout: None,
        };
        let inspector = Arc::new(inspector);
        let builder = Arc::new(builder);
        let sink = LogSink::new();
        let (tx, rx) = mpsc::unbounded_channel();
        let supervisor = Supervisor::new(
            config,
            inspector.clone(),
            builder.clone(),
            sink.clone(),
            tx,
        );
        Harness {
            supervisor,
            inspector,
            builder,
            sink,
            events: rx,
        }
    }

    fn drain(rx: &mut mpsc::UnboundedReceiver<DashEvent>) -> Vec<StatusReport> {
        let mut out = Vec::new();
        while let Ok(ev) = rx.try_recv() {
            if let DashEvent::Status(r) = ev {
                out.push(r);
            }
        }
        out
    }

    async fn wait_for_log(sink: &LogSink, needle: &str) -> bool {
        for _ in 0..100 {
            if sink.recent(0).iter().any(|e| e.message.contains(needle)) {
                return true;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        false
    }

    #[tokio::test]
    async fn start_is_idempotent_while_running() {
        let mut h = harness("sleep", &["30"], FakeInspector::default(), FakeBuilder::default());

        let first = h.supervisor.start().await.unwrap();
        assert_eq!(first.status, ServerStatus::Running);
        let pid = first.pid.unwrap();

        for _ in 0..3 {
            let again = h.supervisor.start().await.unwrap();
            assert_eq!(again, StatusReport::running(Some(pid)));
        }
        assert_eq!(*h.builder.calls.lock().unwrap(), vec!["wasm", "server"]);
        assert_eq!(h.supervisor.held_pid().await, Some(pid));

        let statuses: Vec<ServerStatus> = drain(&mut h.events).iter().map(|r| r.status).collect();
        assert_eq!(
            statuses,
            vec![ServerStatus::Starting, ServerStatus::Starting, ServerStatus::Running]
        );

        h.supervisor.stop().await;
        assert!(wait_for_log(&h.sink, "Server process has exited").await);
    }

    #[tokio::test]
    async fn failing_first_build_aborts_start() {
        let builder = FakeBuilder {
            fail_on: Some("wasm"),
            ..Default::default()
        };
        let mut h = harness("sleep", &["30"], FakeInspector::default(), builder);

        let err = h.supervisor.start().await.unwrap_err();
        assert_eq!(err.kind(), FailureKind::BuildFailure);
        assert_eq!(*h.builder.calls.lock().unwrap(), vec!["wasm"]);
        assert_eq!(h.supervisor.held_pid().await, None);

        let last = drain(&mut h.events).pop().unwrap();
        assert_eq!(last.status, ServerStatus::Stopped);
        assert!(h
            .sink
            .recent(0)
            .iter()
            .any(|e| e.severity == Severity::System && e.message.contains("BuildFailure")));
    }

    #[tokio::test]
    async fn occupied_port_reports_external_owner() {
        let h = harness("sleep", &["30"], FakeInspector::owned_by(4242), FakeBuilder::default());

        let report = h.supervisor.start().await.unwrap();
        assert_eq!(report, StatusReport::running(Some(4242)));
        assert_eq!(h.inspector.queries.load(Ordering::SeqCst), 1);
        assert!(h.builder.calls.lock().unwrap().is_empty());
        assert_eq!(h.supervisor.held_pid().await, None);
    }

    #[tokio::test]
    async fn restart_stops_before_starting_again() {
        let mut h = harness("sleep", &["30"], FakeInspector::default(), FakeBuilder::default());
        let old = h.supervisor.start().await.unwrap().pid.unwrap();
        drain(&mut h.events);

        let report = h.supervisor.restart().await.unwrap();
        let new = report.pid.unwrap();
        assert_ne!(old, new);

        let statuses: Vec<ServerStatus> = drain(&mut h.events).iter().map(|r| r.status).collect();
        let stopped = statuses.iter().position(|s| *s == ServerStatus::Stopped).unwrap();
        let running = statuses.iter().rposition(|s| *s == ServerStatus::Running).unwrap();
        assert!(stopped < running, "{statuses:?}");

        h.supervisor.stop().await;
    }

    #[tokio::test]
    async fn status_check_follows_the_port_not_the_handle() {
        let h = harness("sleep", &["30"], FakeInspector::default(), FakeBuilder::default());
        h.supervisor.start().await.unwrap();

        // The fake reports a free port even though a child is held.
        assert_eq!(h.supervisor.status_check().await, StatusReport::stopped());

        *h.inspector.owner.lock().unwrap() = Some(777);
        let before = h.inspector.queries.load(Ordering::SeqCst);
        assert_eq!(h.supervisor.status_check().await, StatusReport::running(Some(777)));
        assert_eq!(h.inspector.queries.load(Ordering::SeqCst), before + 1);

        *h.inspector.owner.lock().unwrap() = None;
        let stopped = h.supervisor.stop().await;
        assert_eq!(stopped.status, ServerStatus::Stopped);
        assert_eq!(h.supervisor.status_check().await.status, ServerStatus::Stopped);
    }

    /// True once `pid` no longer runs: either reaped or a zombie awaiting its new parent.
    #[cfg(target_os = "linux")]
    fn gone_or_zombie(pid: u32) -> bool {
        let Ok(stat) = std::fs::read_to_string(format!("/proc/{pid}/stat")) else {
            return true;
        };
        let state = stat.rsplit_once(')').and_then(|(_, rest)| rest.trim_start().chars().next());
        state == Some('Z')
    }

    #[cfg(target_os = "linux")]
    #[tokio::test]
    async fn stop_reaches_the_whole_process_group() {
        let h = harness(
            "sh",
            &["-c", "sleep 300 & echo $!; wait"],
            FakeInspector::default(),
            FakeBuilder::default(),
        );
        h.supervisor.start().await.unwrap();

        let mut grandchild = None;
        for _ in 0..100 {
            grandchild = h
                .sink
                .by_source(SERVER_SOURCE, 0)
                .iter()
                .find_map(|e| e.message.parse::<u32>().ok());
            if grandchild.is_some() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        let grandchild = grandchild.expect("shell never printed the background pid");
        assert!(!gone_or_zombie(grandchild));

        h.supervisor.stop().await;

        let mut dead = false;
        for _ in 0..100 {
            if gone_or_zombie(grandchild) {
                dead = true;
                break;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        assert!(dead, "background child {grandchild} survived stop");
        assert!(wait_for_log(&h.sink, "Server process has exited").await);
    }

    #[tokio::test]
    async fn stop_without_handle_signals_port_owner() {
        let mut external = std::process::Command::new("sleep").arg("30").spawn().unwrap();
        let h = harness(
            "sleep",
            &["30"],
            FakeInspector::owned_by(external.id()),
            FakeBuilder::default(),
        );

        let report = h.supervisor.stop().await;
        assert_eq!(report.status, ServerStatus::Stopped);

        let mut status = None;
        for _ in 0..100 {
            if let Some(s) = external.try_wait().unwrap() {
                status = Some(s);
                break;
            }
            std::thread::sleep(Duration::from_millis(20));
        }
        assert_eq!(status.and_then(|s| s.signal()), Some(15));
    }

    #[tokio::test]
    async fn stop_never_signals_the_dashboard_itself() {
        let h = harness(
            "sleep",
            &["30"],
            FakeInspector::owned_by(std::process::id()),
            FakeBuilder::default(),
        );
        h.supervisor.stop().await;
        assert!(h
            .sink
            .recent(0)
            .iter()
            .any(|e| e.message.contains("not signalling it")));
    }

    #[tokio::test]
    async fn stop_with_nothing_running_reports_stopped() {
        let h = harness("sleep", &["30"], FakeInspector::default(), FakeBuilder::default());
        assert_eq!(h.supervisor.stop().await, StatusReport::stopped());
        assert!(h
            .sink
            .recent(0)
            .iter()
            .any(|e| e.message.starts_with("No process found on port")));
    }

    #[tokio::test]
    async fn missing_binary_is_a_spawn_failure() {
        let mut h = harness(
            "/nonexistent/bin/server",
            &[],
            FakeInspector::default(),
            FakeBuilder::default(),
        );
        let err = h.supervisor.start().await.unwrap_err();
        assert_eq!(err.kind(), FailureKind::SpawnFailure);
        assert_eq!(h.supervisor.held_pid().await, None);
        assert_eq!(drain(&mut h.events).pop().unwrap().status, ServerStatus::Stopped);
    }

    #[tokio::test]
    async fn crashed_child_is_replaced_on_next_start() {
        let h = harness("sh", &["-c", "echo booting; exit 3"], FakeInspector::default(), FakeBuilder::default());
        let first = h.supervisor.start().await.unwrap().pid.unwrap();
        assert!(wait_for_log(&h.sink, "exited unexpectedly").await);
        assert!(h
            .sink
            .by_source(SERVER_SOURCE, 0)
            .iter()
            .any(|e| e.message == "booting"));
        for _ in 0..100 {
            if h.supervisor.held_pid().await.is_none() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }

        let second = h.supervisor.start().await.unwrap().pid.unwrap();
        assert_ne!(first, second);
        assert_eq!(h.builder.calls.lock().unwrap().len(), 4);
    }

    #[tokio::test]
    async fn readiness_probe_times_out_but_still_reports_running() {
        let mut h = harness("sleep", &["30"], FakeInspector::default(), FakeBuilder::default());
        // Nothing listens on a freshly released port.
        let port = {
            let l = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
            l.local_addr().unwrap().port()
        };
        h.supervisor.config.port = port;
        h.supervisor.config.readiness_timeout = Some(Duration::from_millis(250));

        let report = h.supervisor.start().await.unwrap();
        assert_eq!(report.status, ServerStatus::Running);
        assert!(h
            .sink
            .recent(0)
            .iter()
            .any(|e| e.severity == Severity::Warning && e.message.contains("did not accept")));
        h.supervisor.stop().await;
        drain(&mut h.events);
    }
}
