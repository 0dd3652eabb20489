mod help;
mod state;

use crate::config::Settings;
use crate::logsink::LogSink;
use crate::metrics;
use crate::model::{format_clock, DashEvent, LogEntry, ServerStatus, Severity};
use crate::orchestrator::{self, UiCommand};
use anyhow::{Context, Result};
use crossterm::{
    event::{self, Event, KeyEventKind},
    execute,
    terminal::{disable_raw_mode, enable_raw_mode, EnterAlternateScreen, LeaveAlternateScreen},
};
use ratatui::{
    backend::CrosstermBackend,
    layout::{Constraint, Direction, Layout, Rect},
    style::{Color, Modifier, Style},
    text::{Line, Span},
    widgets::{Block, Borders, Paragraph, Tabs},
    Terminal,
};
use state::{DashboardState, KeyAction, Tab};
use std::{io, time::Duration, time::Instant};
use tokio::sync::mpsc;
use tokio::sync::mpsc::{UnboundedReceiver, UnboundedSender};

const REQUEST_ROWS: usize = 15;
const LOG_ROWS: usize = 20;
const PATH_WIDTH: usize = 24;

pub async fn run(settings: Settings, sink: LogSink) -> Result<()> {
    // Unbounded channels keep supervisor tasks from ever waiting on the UI.
    let (event_tx, event_rx) = mpsc::unbounded_channel::<DashEvent>();
    let (cmd_tx, cmd_rx) = mpsc::unbounded_channel::<UiCommand>();

    let supervisor = crate::cli::build_supervisor(&settings, sink.clone(), event_tx.clone());
    let opts = crate::cli::controller_options(&settings);

    // TUI runs in a dedicated thread to keep all blocking I/O out of the Tokio runtime.
    let ui_settings = settings.clone();
    let ui_sink = sink.clone();
    let ui_handle =
        std::thread::spawn(move || run_threaded(ui_settings, ui_sink, event_rx, cmd_tx));

    let res = orchestrator::run_controller(supervisor, opts, event_tx, cmd_rx).await;

    let join_res = tokio::task::spawn_blocking(move || ui_handle.join()).await;
    if let Ok(joined) = join_res {
        match joined {
            Ok(Ok(())) => {}
            Ok(Err(e)) => return Err(e),
            Err(_) => return Err(anyhow::anyhow!("TUI thread panicked")),
        }
    }

    res
}

/// Run the TUI loop on a dedicated thread.
pub fn run_threaded(
    settings: Settings,
    sink: LogSink,
    mut event_rx: UnboundedReceiver<DashEvent>,
    cmd_tx: UnboundedSender<UiCommand>,
) -> Result<()> {
    enable_raw_mode().context("enable raw mode")?;
    let mut stdout = io::stdout();
    execute!(stdout, EnterAlternateScreen).ok();

    let backend = CrosstermBackend::new(stdout);
    let mut terminal = Terminal::new(backend).context("create terminal")?;
    terminal.clear().ok();

    let mut state = DashboardState::new(settings.server.port);
    sink.log(Severity::System, "dashboard", "Dashboard started");
    let _ = cmd_tx.send(UiCommand::Refresh);
    state.on_tick(log_window(&sink, &state, settings.dashboard.log_window));

    let draw_rate = Duration::from_millis(100);
    let refresh_rate = settings.dashboard.refresh_interval;
    let mut last_draw = Instant::now();
    let mut redraw = true;
    let mut last_refresh = Instant::now();

    let res = loop {
        // Drain events without blocking to keep UI responsive.
        while let Ok(ev) = event_rx.try_recv() {
            state.apply_event(ev);
        }

        if last_refresh.elapsed() >= refresh_rate {
            state.on_tick(log_window(&sink, &state, settings.dashboard.log_window));
            let _ = cmd_tx.send(UiCommand::Tick);
            last_refresh = Instant::now();
        }

        if redraw || last_draw.elapsed() >= draw_rate {
            terminal.draw(|f| draw(f.area(), f, &state)).ok();
            last_draw = Instant::now();
            redraw = false;
        }

        // Poll input with a short timeout to avoid blocking the render loop.
        if event::poll(Duration::from_millis(10)).unwrap_or(false) {
            if let Ok(Event::Key(k)) = event::read() {
                if k.kind != KeyEventKind::Press {
                    continue;
                }
                match state.handle_key(k.modifiers, k.code) {
                    KeyAction::Quit => {
                        let _ = cmd_tx.send(UiCommand::Quit);
                        break Ok(());
                    }
                    KeyAction::Dispatch(cmd) => {
                        let _ = cmd_tx.send(cmd);
                    }
                    KeyAction::None => {}
                }
                if state.tab == Tab::Logs {
                    state.on_tick(log_window(&sink, &state, settings.dashboard.log_window));
                }
                redraw = true;
            }
        }
    };

    disable_raw_mode().ok();
    let mut stdout = io::stdout();
    execute!(stdout, LeaveAlternateScreen).ok();
    res
}

fn log_window(sink: &LogSink, state: &DashboardState, limit: usize) -> Vec<LogEntry> {
    match state.log_filter {
        Some(source) => sink.by_source(source, limit),
        None => sink.recent(limit),
    }
}

fn draw(area: Rect, f: &mut ratatui::Frame, state: &DashboardState) {
    let banner_height = if state.last_error.is_some() { 3 } else { 0 };
    let chunks = Layout::default()
        .direction(Direction::Vertical)
        .constraints(
            [
                Constraint::Length(3),
                Constraint::Length(banner_height),
                Constraint::Min(0),
                Constraint::Length(4),
            ]
            .as_ref(),
        )
        .split(area);

    let titles: Vec<Line> = Tab::ALL.iter().map(|t| Line::from(t.title())).collect();
    let tabs = Tabs::new(titles)
        .select(state.tab.index())
        .block(
            Block::default()
                .borders(Borders::ALL)
                .title("local-first dashboard"),
        )
        .highlight_style(Style::default().fg(Color::Yellow));
    f.render_widget(tabs, chunks[0]);

    if let Some(err) = state.last_error.as_deref() {
        draw_error_banner(chunks[1], f, err);
    }

    if state.show_help {
        help::draw_help(chunks[2], f);
    } else {
        match state.tab {
            Tab::Server => draw_server(chunks[2], f, state),
            Tab::Requests => draw_requests(chunks[2], f, state),
            Tab::Logs => draw_logs(chunks[2], f, state),
        }
    }

    let footer = Paragraph::new(vec![Line::from(state.info.clone()), help::shortcuts_line()])
        .block(Block::default().borders(Borders::ALL));
    f.render_widget(footer, chunks[3]);
}

fn draw_error_banner(area: Rect, f: &mut ratatui::Frame, err: &str) {
    let width = (area.width as usize).saturating_sub(2);
    let p = Paragraph::new(Line::from(vec![Span::styled(
        truncate(&format!("Error: {err}  (c to clear)"), width),
        Style::default().fg(Color::Red).add_modifier(Modifier::BOLD),
    )]))
    .block(
        Block::default()
            .borders(Borders::ALL)
            .border_style(Style::default().fg(Color::Red)),
    );
    f.render_widget(p, area);
}

fn draw_server(area: Rect, f: &mut ratatui::Frame, state: &DashboardState) {
    let label = |s: &str| Span::styled(format!("{s:<8}"), Style::default().fg(Color::Gray));
    let mut lines = vec![
        Line::from(vec![
            label("Status:"),
            Span::styled(
                state.status.label(),
                Style::default()
                    .fg(status_color(state.status))
                    .add_modifier(Modifier::BOLD),
            ),
        ]),
        Line::from(vec![label("Port:"), Span::raw(state.port.to_string())]),
    ];

    if state.status == ServerStatus::Running {
        let pid = state
            .pid
            .map_or_else(|| "unknown".to_string(), |p| p.to_string());
        lines.push(Line::from(vec![label("PID:"), Span::raw(pid)]));
        if let Some(up) = state.uptime() {
            lines.push(Line::from(vec![
                label("Uptime:"),
                Span::raw(humantime::format_duration(Duration::from_secs(up.as_secs())).to_string()),
            ]));
        }
        lines.push(Line::from(vec![
            label("URL:"),
            Span::styled(state.url(), Style::default().fg(Color::Cyan)),
        ]));
    }

    let p = Paragraph::new(lines).block(Block::default().borders(Borders::ALL).title("Server"));
    f.render_widget(p, area);
}

fn draw_requests(area: Rect, f: &mut ratatui::Frame, state: &DashboardState) {
    let mut lines: Vec<Line> = Vec::new();

    if state.requests.is_empty() {
        lines.push(Line::from("No requests yet"));
    } else {
        lines.push(Line::from(Span::styled(
            format!(
                "{:<8}  {:<6} {:<width$} {:>6} {:>8}",
                "Time",
                "Method",
                "Path",
                "Status",
                "Duration",
                width = PATH_WIDTH
            ),
            Style::default().add_modifier(Modifier::BOLD),
        )));
        let start = state.requests.len().saturating_sub(REQUEST_ROWS);
        for r in &state.requests[start..] {
            lines.push(Line::from(vec![
                Span::raw(format!(
                    "{:<8}  {:<6} {:<width$} ",
                    format_clock(r.timestamp),
                    r.method,
                    truncate(&r.path, PATH_WIDTH),
                    width = PATH_WIDTH
                )),
                Span::styled(
                    format!("{:>6}", r.status),
                    Style::default().fg(status_code_color(r.status)),
                ),
                Span::styled(
                    format!(" {:>6}ms", r.duration_ms),
                    Style::default().fg(duration_color(r.duration_ms)),
                ),
            ]));
        }
    }

    let stats = metrics::compute_request_stats(&state.requests);
    lines.push(Line::from(""));
    lines.push(Line::from(vec![
        Span::raw(format!("Total: {}  Avg: {}ms  ", stats.total, stats.avg_ms)),
        Span::styled(format!("2xx: {}", stats.status_2xx), Style::default().fg(Color::Green)),
        Span::raw("  "),
        Span::styled(format!("3xx: {}", stats.status_3xx), Style::default().fg(Color::Cyan)),
        Span::raw("  "),
        Span::styled(format!("4xx: {}", stats.status_4xx), Style::default().fg(Color::Yellow)),
        Span::raw("  "),
        Span::styled(format!("5xx: {}", stats.status_5xx), Style::default().fg(Color::Red)),
    ]));

    let p = Paragraph::new(lines).block(Block::default().borders(Borders::ALL).title("Requests"));
    f.render_widget(p, area);
}

fn draw_logs(area: Rect, f: &mut ratatui::Frame, state: &DashboardState) {
    let inner_width = (area.width as usize).saturating_sub(2);
    let mut lines: Vec<Line> = Vec::new();

    let start = state.logs.len().saturating_sub(LOG_ROWS);
    for e in &state.logs[start..] {
        let prefix = format!("[{}] ", e.clock());
        let level = format!("{:<6} ", e.severity.as_str());
        let source = format!("[{}] ", e.source);
        let used = prefix.chars().count() + level.chars().count() + source.chars().count();
        lines.push(Line::from(vec![
            Span::styled(prefix, Style::default().fg(Color::DarkGray)),
            Span::styled(level, Style::default().fg(severity_color(e.severity))),
            Span::styled(source, Style::default().fg(Color::Gray)),
            Span::raw(truncate(&e.message, inner_width.saturating_sub(used))),
        ]));
    }
    if lines.is_empty() {
        lines.push(Line::from("No log entries"));
    }

    let stats = metrics::compute_log_stats(&state.logs);
    lines.push(Line::from(""));
    lines.push(Line::from(format!(
        "Total: {}  System: {}  Info: {}  Warn: {}  Error: {}  Debug: {}",
        stats.total, stats.system, stats.info, stats.warning, stats.error, stats.debug
    )));

    let title = match state.log_filter {
        Some(source) => format!("Logs [{source}] (f to change)"),
        None => "Logs (f to filter)".to_string(),
    };
    let p = Paragraph::new(lines).block(Block::default().borders(Borders::ALL).title(title));
    f.render_widget(p, area);
}

fn status_color(status: ServerStatus) -> Color {
    match status {
        ServerStatus::Running => Color::Green,
        ServerStatus::Starting | ServerStatus::Stopping => Color::Yellow,
        ServerStatus::Stopped => Color::Red,
    }
}

fn status_code_color(code: u16) -> Color {
    match code / 100 {
        2 => Color::Green,
        3 => Color::Cyan,
        4 => Color::Yellow,
        5 => Color::Red,
        _ => Color::White,
    }
}

fn duration_color(ms: u64) -> Color {
    if ms < 10 {
        Color::Green
    } else if ms < 100 {
        Color::Yellow
    } else {
        Color::Red
    }
}

fn severity_color(severity: Severity) -> Color {
    match severity {
        Severity::System => Color::Cyan,
        Severity::Info => Color::White,
        Severity::Warning => Color::Yellow,
        Severity::Error => Color::Red,
        Severity::Debug => Color::DarkGray,
    }
}

/// Cut `s` to at most `max` characters, marking the cut with "...".
fn truncate(s: &str, max: usize) -> String {
    if s.chars().count() <= max {
        return s.to_string();
    }
    if max <= 3 {
        return s.chars().take(max).collect();
    }
    let mut out: String = s.chars().take(max - 3).collect();
    out.push_str("...");
    out
}
