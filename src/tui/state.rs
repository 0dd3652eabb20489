use crate::model::{DashEvent, LogEntry, RequestLogEntry, ServerStatus};
use crate::orchestrator::UiCommand;
use crate::supervisor::{SERVER_SOURCE, SUPERVISOR_SOURCE};
use crossterm::event::{KeyCode, KeyModifiers};
use std::time::{Duration, Instant};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Tab {
    #[default]
    Server,
    Requests,
    Logs,
}

impl Tab {
    pub const ALL: [Tab; 3] = [Tab::Server, Tab::Requests, Tab::Logs];

    pub fn title(self) -> &'static str {
        match self {
            Tab::Server => "Server",
            Tab::Requests => "Requests",
            Tab::Logs => "Logs",
        }
    }

    pub fn index(self) -> usize {
        match self {
            Tab::Server => 0,
            Tab::Requests => 1,
            Tab::Logs => 2,
        }
    }

    pub fn next(self) -> Tab {
        Tab::ALL[(self.index() + 1) % Tab::ALL.len()]
    }

    pub fn prev(self) -> Tab {
        Tab::ALL[(self.index() + Tab::ALL.len() - 1) % Tab::ALL.len()]
    }
}

/// Source filters the Logs tab cycles through; `None` shows every entry.
const LOG_FILTERS: [Option<&str>; 3] = [None, Some(SERVER_SOURCE), Some(SUPERVISOR_SOURCE)];

/// What the UI loop should do after a key press.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeyAction {
    None,
    Dispatch(UiCommand),
    Quit,
}

/// Everything the dashboard renders. Owned by the UI thread only.
pub struct DashboardState {
    pub tab: Tab,
    pub show_help: bool,
    pub log_filter: Option<&'static str>,
    pub status: ServerStatus,
    pub port: u16,
    pub pid: Option<u32>,
    pub running_since: Option<Instant>,
    pub last_error: Option<String>,
    pub info: String,
    pub requests: Vec<RequestLogEntry>,
    pub logs: Vec<LogEntry>,
}

impl DashboardState {
    pub fn new(port: u16) -> Self {
        Self {
            tab: Tab::Server,
            show_help: false,
            log_filter: None,
            status: ServerStatus::Stopped,
            port,
            pid: None,
            running_since: None,
            last_error: None,
            info: String::new(),
            requests: Vec::new(),
            logs: Vec::new(),
        }
    }

    pub fn url(&self) -> String {
        format!("http://localhost:{}", self.port)
    }

    pub fn uptime(&self) -> Option<Duration> {
        self.running_since.map(|t| t.elapsed())
    }

    pub fn handle_key(&mut self, modifiers: KeyModifiers, code: KeyCode) -> KeyAction {
        match (modifiers, code) {
            (_, KeyCode::Char('q')) | (KeyModifiers::CONTROL, KeyCode::Char('c')) => {
                KeyAction::Quit
            }
            (KeyModifiers::CONTROL, KeyCode::Char('r')) | (_, KeyCode::F(5)) => {
                KeyAction::Dispatch(UiCommand::Refresh)
            }
            (_, KeyCode::Char('s')) => {
                self.guarded(ServerStatus::Stopped, UiCommand::Start, "Starting server…")
            }
            (_, KeyCode::Char('x')) => {
                self.guarded(ServerStatus::Running, UiCommand::Stop, "Stopping server…")
            }
            (_, KeyCode::Char('r')) => {
                self.guarded(ServerStatus::Running, UiCommand::Restart, "Restarting server…")
            }
            (_, KeyCode::Tab) | (_, KeyCode::Right) => {
                self.tab = self.tab.next();
                KeyAction::None
            }
            (_, KeyCode::BackTab) | (_, KeyCode::Left) => {
                self.tab = self.tab.prev();
                KeyAction::None
            }
            (_, KeyCode::Char('c')) | (_, KeyCode::Esc) => {
                self.last_error = None;
                KeyAction::None
            }
            (_, KeyCode::Char('f')) if self.tab == Tab::Logs => {
                let pos = LOG_FILTERS
                    .iter()
                    .position(|f| *f == self.log_filter)
                    .unwrap_or(0);
                self.log_filter = LOG_FILTERS[(pos + 1) % LOG_FILTERS.len()];
                KeyAction::None
            }
            (_, KeyCode::Char('?')) => {
                self.show_help = !self.show_help;
                KeyAction::None
            }
            _ => KeyAction::None,
        }
    }

    fn guarded(&mut self, required: ServerStatus, cmd: UiCommand, info: &str) -> KeyAction {
        if self.status != required {
            self.info = format!("Server is {}", self.status.label().trim_end_matches("..."));
            return KeyAction::None;
        }
        self.info = info.to_string();
        KeyAction::Dispatch(cmd)
    }

    pub fn apply_event(&mut self, ev: DashEvent) {
        match ev {
            DashEvent::Status(report) => {
                self.set_status(report.status, report.pid);
                if let Some(err) = report.error {
                    self.last_error = Some(err);
                }
            }
            DashEvent::Requests(requests) => self.requests = requests,
            DashEvent::Info(info) => self.info = info,
        }
    }

    /// Replace the log window with a fresh snapshot from the sink.
    pub fn on_tick(&mut self, logs: Vec<LogEntry>) {
        self.logs = logs;
    }

    fn set_status(&mut self, status: ServerStatus, pid: Option<u32>) {
        match status {
            ServerStatus::Running => {
                if self.running_since.is_none() {
                    self.running_since = Some(Instant::now());
                }
                self.pid = pid;
            }
            ServerStatus::Stopped => {
                self.running_since = None;
                self.pid = None;
            }
            ServerStatus::Starting | ServerStatus::Stopping => {
                if pid.is_some() {
                    self.pid = pid;
                }
            }
        }
        self.status = status;
    }
}
