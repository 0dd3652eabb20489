mod cli;
mod config;
mod logsink;
mod metrics;
mod model;
mod orchestrator;
mod port;
mod relay;
mod requests;
mod supervisor;
mod text_summary;
#[cfg(feature = "tui")]
mod tui;

use anyhow::{Context, Result};
use clap::Parser;
use std::path::Path;
use std::time::Duration;
use tracing_appender::non_blocking::WorkerGuard;

#[tokio::main]
async fn main() -> Result<()> {
    let args = cli::Cli::parse();
    let is_non_tui = args.json || args.text || !cfg!(feature = "tui");

    let settings = config::Settings::load(&args)?;
    let guard = init_tracing(&settings.dashboard.state_dir)?;

    // Status modes only read; they never write the user-visible log.
    let sink = if is_non_tui {
        logsink::LogSink::new()
    } else {
        logsink::LogSink::with_mirror(settings.log_file())
            .with_context(|| format!("open log {}", settings.log_file().display()))?
    };

    let res = cli::run(args, settings, sink.clone()).await;
    sink.flush(Duration::from_secs(1));
    if let Err(e) = &res {
        tracing::error!("{e:#}");
    }
    drop(guard);

    match res {
        Ok(()) => {
            // Explicitly exit with code 0 on success, especially for non-TUI modes
            if is_non_tui {
                std::process::exit(0);
            }
            Ok(())
        }
        Err(e) => Err(e),
    }
}

/// Diagnostics go to a daily file under the state directory; the terminal belongs to the TUI.
fn init_tracing(state_dir: &Path) -> Result<WorkerGuard> {
    std::fs::create_dir_all(state_dir)
        .with_context(|| format!("create state dir {}", state_dir.display()))?;
    let file_appender = tracing_appender::rolling::daily(state_dir, "trace.log");
    let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(non_blocking)
        .with_ansi(false)
        .init();
    Ok(guard)
}
