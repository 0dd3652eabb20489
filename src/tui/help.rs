use ratatui::{
    layout::Rect,
    style::Color,
    style::Style,
    text::{Line, Span},
    widgets::{Block, Borders, Paragraph},
    Frame,
};

const KEYS: &[(&str, &str)] = &[
    ("s", "Start server (when stopped)"),
    ("x", "Stop server (when running)"),
    ("r", "Restart server (when running)"),
    ("F5 / Ctrl-R", "Refresh status"),
    ("tab / →", "Next tab"),
    ("shift-tab / ←", "Previous tab"),
    ("c / Esc", "Clear error"),
    ("f", "Cycle log source filter (Logs tab)"),
    ("?", "Toggle this help"),
    ("q / Ctrl-C", "Quit"),
];

pub fn draw_help(area: Rect, f: &mut Frame) {
    let mut lines = vec![Line::from("Keybinds:")];
    for (key, what) in KEYS {
        lines.push(Line::from(vec![
            Span::raw("  "),
            Span::styled(format!("{key:<14}"), Style::default().fg(Color::Magenta)),
            Span::raw(*what),
        ]));
    }
    lines.push(Line::from(""));
    lines.push(Line::from(
        "Quitting leaves the server running unless stop_on_quit is set.",
    ));

    let p = Paragraph::new(lines).block(Block::default().borders(Borders::ALL).title("Help"));
    f.render_widget(p, area);
}

/// One-line key summary shown at the bottom of every tab.
pub fn shortcuts_line() -> Line<'static> {
    let key = |k: &'static str| Span::styled(k, Style::default().fg(Color::Magenta));
    Line::from(vec![
        key("s"),
        Span::raw(" start  "),
        key("x"),
        Span::raw(" stop  "),
        key("r"),
        Span::raw(" restart  "),
        key("F5"),
        Span::raw(" refresh  "),
        key("tab"),
        Span::raw(" switch  "),
        key("c"),
        Span::raw(" clear error  "),
        key("?"),
        Span::raw(" help  "),
        key("q"),
        Span::raw(" quit"),
    ])
}
