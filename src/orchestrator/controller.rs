//! Server lifecycle controller.
//!
//! Turns UI commands into supervisor operations running as independent tasks and
//! emits their results as events for presentation layers. The UI never waits on
//! an operation; it applies results in whatever order they arrive.

use crate::model::{DashEvent, StatusReport};
use crate::requests;
use crate::supervisor::Supervisor;
use anyhow::Result;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::mpsc::{UnboundedReceiver, UnboundedSender};
use tokio::task::JoinSet;
use tracing::{debug, info, warn};

/// Commands emitted by UI layers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum UiCommand {
    Start,
    Stop,
    Restart,
    /// User-requested refresh of status and request log.
    Refresh,
    /// Periodic refresh from the UI's tick.
    Tick,
    Quit,
}

#[derive(Debug, Clone)]
pub(crate) struct ControllerOptions {
    pub request_log: PathBuf,
    pub request_window: usize,
    pub stop_on_quit: bool,
}

/// Dispatch UI commands until Quit (or the UI hangs up).
pub(crate) async fn run_controller(
    supervisor: Arc<Supervisor>,
    opts: ControllerOptions,
    event_tx: UnboundedSender<DashEvent>,
    mut cmd_rx: UnboundedReceiver<UiCommand>,
) -> Result<()> {
    let mut tasks: JoinSet<()> = JoinSet::new();

    loop {
        tokio::select! {
            cmd = cmd_rx.recv() => {
                let Some(cmd) = cmd else { break };
                debug!(?cmd, "ui command");
                match cmd {
                    UiCommand::Start => {
                        let sup = supervisor.clone();
                        let tx = event_tx.clone();
                        tasks.spawn(async move {
                            if let Err(e) = sup.start().await {
                                warn!("start failed: {e}");
                                let _ = tx.send(DashEvent::Status(StatusReport::failed(e.display_message())));
                            }
                        });
                    }
                    UiCommand::Stop => {
                        let sup = supervisor.clone();
                        tasks.spawn(async move {
                            sup.stop().await;
                        });
                    }
                    UiCommand::Restart => {
                        let sup = supervisor.clone();
                        let tx = event_tx.clone();
                        tasks.spawn(async move {
                            if let Err(e) = sup.restart().await {
                                warn!("restart failed: {e}");
                                let _ = tx.send(DashEvent::Status(StatusReport::failed(e.display_message())));
                            }
                        });
                    }
                    UiCommand::Refresh | UiCommand::Tick => {
                        if cmd == UiCommand::Refresh {
                            let _ = event_tx.send(DashEvent::Info("Refreshing…".into()));
                        }
                        spawn_refresh(&mut tasks, supervisor.clone(), &opts, event_tx.clone());
                    }
                    UiCommand::Quit => {
                        if opts.stop_on_quit {
                            let _ = event_tx.send(DashEvent::Info("Stopping server…".into()));
                            supervisor.stop().await;
                        } else if let Some(pid) = supervisor.held_pid().await {
                            info!(pid, "leaving server running");
                        }
                        break;
                    }
                }
            }
            // Reap finished tasks so a panicking operation is noticed and the set stays small.
            Some(joined) = tasks.join_next(), if !tasks.is_empty() => {
                if let Err(e) = joined {
                    if e.is_panic() {
                        warn!("supervisor task panicked: {e}");
                        let _ = event_tx.send(DashEvent::Info(format!("Operation failed: {e}")));
                    }
                }
            }
        }
    }

    tasks.abort_all();
    Ok(())
}

/// Status check and request-log read, each reported as soon as it completes.
fn spawn_refresh(
    tasks: &mut JoinSet<()>,
    supervisor: Arc<Supervisor>,
    opts: &ControllerOptions,
    event_tx: UnboundedSender<DashEvent>,
) {
    let tx = event_tx.clone();
    tasks.spawn(async move {
        let report = supervisor.status_check().await;
        let _ = tx.send(DashEvent::Status(report));
    });

    let path = opts.request_log.clone();
    let window = opts.request_window;
    tasks.spawn(async move {
        let loaded =
            tokio::task::spawn_blocking(move || requests::load_recent(&path, window)).await;
        match loaded {
            Ok(Ok(entries)) => {
                let _ = event_tx.send(DashEvent::Requests(entries));
            }
            Ok(Err(e)) => debug!("request log unavailable: {e:#}"),
            Err(e) => debug!("request log reader failed: {e}"),
        }
    });
}
