use crate::config::Settings;
use crate::logsink::LogSink;
use crate::model::DashEvent;
use crate::orchestrator::ControllerOptions;
use crate::port::LsofInspector;
use crate::supervisor::{MakeBuilder, Supervisor, SupervisorConfig};
use crate::text_summary::{self, StatusSnapshot};
use anyhow::{Context, Result};
use clap::Parser;
use std::io::Write;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::mpsc;

/// Number of mirrored log lines shown by `--text` / `--json`.
const STATUS_LOG_LINES: usize = 10;

/// Output line routing for stdout/stderr writer.
enum OutputLine {
    Stdout(String),
    Stderr(String),
}

/// Spawn a blocking writer for stdout/stderr to avoid blocking async tasks.
fn spawn_output_writer() -> (
    mpsc::UnboundedSender<OutputLine>,
    tokio::task::JoinHandle<()>,
) {
    let (tx, mut rx) = mpsc::unbounded_channel::<OutputLine>();
    let handle = tokio::task::spawn_blocking(move || {
        let stdout = std::io::stdout();
        let stderr = std::io::stderr();
        let mut out = std::io::LineWriter::new(stdout.lock());
        let mut err = std::io::LineWriter::new(stderr.lock());

        while let Some(line) = rx.blocking_recv() {
            match line {
                OutputLine::Stdout(msg) => {
                    let _ = writeln!(out, "{}", msg);
                }
                OutputLine::Stderr(msg) => {
                    let _ = writeln!(err, "{}", msg);
                }
            }
        }

        let _ = out.flush();
        let _ = err.flush();
    });
    (tx, handle)
}

#[derive(Debug, Parser, Clone)]
#[command(
    name = "local-first",
    version,
    about = "Dev server supervisor with a terminal dashboard"
)]
pub struct Cli {
    /// Config file (defaults to ./local.toml, then the user config directory)
    #[arg(long)]
    pub config: Option<PathBuf>,

    /// Port the dev server listens on
    #[arg(long)]
    pub port: Option<u16>,

    /// Server binary to launch
    #[arg(long)]
    pub binary: Option<PathBuf>,

    /// Do not pass -dev to the server
    #[arg(long)]
    pub no_dev: bool,

    /// Dashboard refresh interval
    #[arg(long)]
    pub refresh: Option<humantime::Duration>,

    /// Pause after spawning before the server is reported as running
    #[arg(long)]
    pub settle_delay: Option<humantime::Duration>,

    /// Pause between stop and start on restart
    #[arg(long)]
    pub restart_cooldown: Option<humantime::Duration>,

    /// Wait up to this long for the server to accept TCP connections after start
    #[arg(long)]
    pub readiness_timeout: Option<humantime::Duration>,

    /// Directory for cli.log, trace logs and the request log
    #[arg(long)]
    pub state_dir: Option<PathBuf>,

    /// Stop the server when the dashboard quits
    #[arg(long)]
    pub stop_on_quit: bool,

    /// Print JSON status and exit (no TUI)
    #[arg(long, conflicts_with = "text")]
    pub json: bool,

    /// Print text status and exit (no TUI)
    #[arg(long)]
    pub text: bool,
}

pub async fn run(args: Cli, settings: Settings, sink: LogSink) -> Result<()> {
    if !args.json && !args.text {
        #[cfg(feature = "tui")]
        {
            return crate::tui::run(settings, sink).await;
        }
        #[cfg(not(feature = "tui"))]
        {
            // Fallback when built without TUI support.
            return run_status(&settings, sink, false).await;
        }
    }

    run_status(&settings, sink, args.json).await
}

/// Wire a supervisor to the real OS collaborators.
pub fn build_supervisor(
    settings: &Settings,
    sink: LogSink,
    event_tx: mpsc::UnboundedSender<DashEvent>,
) -> Arc<Supervisor> {
    let builder = MakeBuilder::new(
        settings.build.tool.clone(),
        settings.server.workdir.clone(),
    );
    Arc::new(Supervisor::new(
        SupervisorConfig::from_settings(settings),
        Arc::new(LsofInspector::default()),
        Arc::new(builder),
        sink,
        event_tx,
    ))
}

pub(crate) fn controller_options(settings: &Settings) -> ControllerOptions {
    ControllerOptions {
        request_log: settings.request_log_file(),
        request_window: settings.dashboard.request_window,
        stop_on_quit: settings.server.stop_on_quit,
    }
}

/// One-shot status report: a single status check and request-log read.
async fn run_status(settings: &Settings, sink: LogSink, json: bool) -> Result<()> {
    let (out_tx, out_handle) = spawn_output_writer();
    // Status checks publish nothing; the receiver is not needed.
    let (event_tx, _event_rx) = mpsc::unbounded_channel::<DashEvent>();
    let supervisor = build_supervisor(settings, sink, event_tx);

    if let Some(source) = settings.source.as_ref() {
        let _ = out_tx.send(OutputLine::Stderr(format!("Config: {}", source.display())));
    }

    let report = supervisor.status_check().await;
    let path = settings.request_log_file();
    let window = settings.dashboard.request_window;
    let requests = tokio::task::spawn_blocking(move || crate::requests::load_recent(&path, window))
        .await
        .context("request log reader failed")??;
    let logs = text_summary::tail_lines(&settings.log_file(), STATUS_LOG_LINES)?;

    let snapshot = StatusSnapshot::new(settings, report, requests, logs);
    if json {
        let out = serde_json::to_string_pretty(&snapshot)?;
        let _ = out_tx.send(OutputLine::Stdout(out));
    } else {
        for line in text_summary::build_text_summary(&snapshot).lines {
            let _ = out_tx.send(OutputLine::Stdout(line));
        }
    }

    drop(out_tx);
    let _ = out_handle.await;
    Ok(())
}
