//! Terminal rendering of a [`DisplayState`].
//!
//! Drawing is a pure function of the published state, so the UI never
//! mutates anything the control loop owns.

use crate::dashboard::{DisplayState, Phase};
use crate::history::HistoryBuffer;
use chrono::Local;
use crossterm::event::KeyCode;
use ratatui::{
    layout::{Alignment, Constraint, Direction, Layout, Rect},
    style::{Color, Modifier, Style},
    symbols,
    text::{Line, Span},
    widgets::{Axis, Block, Borders, Chart, Dataset, GraphType, Paragraph},
    Frame,
};

/// Settings the renderer needs that are not part of the state.
#[derive(Debug, Clone)]
pub struct ViewOptions {
    pub api_base: String,
    pub chart_headroom: f64,
}

/// What a key press asks for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeyAction {
    Quit,
    Toggle,
    Ignore,
}

pub fn key_action(key: KeyCode) -> KeyAction {
    match key {
        KeyCode::Char('q') | KeyCode::Char('Q') | KeyCode::Esc => KeyAction::Quit,
        KeyCode::Char('s') | KeyCode::Char('S') | KeyCode::Char(' ') | KeyCode::Enter => {
            KeyAction::Toggle
        }
        _ => KeyAction::Ignore,
    }
}

pub fn button_label(state: &DisplayState) -> &'static str {
    if state.pending() {
        "Processing..."
    } else if state.current.is_mining {
        "Stop Mining"
    } else {
        "Start Mining"
    }
}

pub fn format_rate(rate: f64) -> String {
    format!("{:.2} blocks/s", rate)
}

/// Chart points: x is the sample's position in the window.
pub fn chart_points(history: &HistoryBuffer) -> Vec<(f64, f64)> {
    history
        .snapshot()
        .enumerate()
        .map(|(i, sample)| (i as f64, sample.rate))
        .collect()
}

pub fn draw(f: &mut Frame, state: &DisplayState, view: &ViewOptions) {
    f.render_widget(
        Block::default().style(Style::default().bg(Color::Black)),
        f.size(),
    );

    let chunks = Layout::default()
        .direction(Direction::Vertical)
        .constraints([
            Constraint::Length(3), // Title
            Constraint::Length(5), // Stat cards
            Constraint::Min(8),    // Chart
            Constraint::Length(3), // Footer
        ])
        .split(f.size());

    render_title(f, chunks[0], state, view);
    render_cards(f, chunks[1], state);
    render_chart(f, chunks[2], state, view);
    render_footer(f, chunks[3], state);
}

fn render_title(f: &mut Frame, area: Rect, state: &DisplayState, view: &ViewOptions) {
    let updated = match (&state.updated_at, state.is_loading()) {
        (_, true) => "waiting for worker...".to_string(),
        (Some(at), false) => format!("updated {}", at.format("%H:%M:%S")),
        (None, false) => "no data yet".to_string(),
    };

    let title = Paragraph::new(Line::from(vec![
        Span::styled(
            " CryptoSim Dashboard ",
            Style::default()
                .fg(Color::White)
                .add_modifier(Modifier::BOLD),
        ),
        Span::styled(
            format!(" {} ", view.api_base),
            Style::default().fg(Color::Rgb(120, 120, 120)),
        ),
        Span::styled(
            format!(" {} ", updated),
            Style::default().fg(Color::Rgb(0, 200, 200)),
        ),
    ]))
    .block(
        Block::default()
            .borders(Borders::ALL)
            .border_style(Style::default().fg(Color::Rgb(100, 100, 100))),
    )
    .style(Style::default().bg(Color::Black));
    f.render_widget(title, area);
}

fn render_cards(f: &mut Frame, area: Rect, state: &DisplayState) {
    let cards = Layout::default()
        .direction(Direction::Horizontal)
        .constraints([
            Constraint::Percentage(34),
            Constraint::Percentage(33),
            Constraint::Percentage(33),
        ])
        .split(area);

    let blocks = stat_card(
        "Total Blocks Mined",
        state.current.total_blocks.to_string(),
        Color::Rgb(120, 100, 255),
    );
    f.render_widget(blocks, cards[0]);

    let rate = stat_card(
        "Current Mining Rate",
        format_rate(state.current.mining_rate),
        Color::Rgb(0, 220, 100),
    );
    f.render_widget(rate, cards[1]);

    let button_color = match state.phase {
        Phase::Toggling(_) => Color::Rgb(130, 130, 130),
        _ if state.current.is_mining => Color::Rgb(230, 60, 60),
        _ => Color::Rgb(40, 190, 80),
    };
    let button = Paragraph::new(vec![
        Line::from(""),
        Line::from(Span::styled(
            format!("[ {} ]", button_label(state)),
            Style::default()
                .fg(Color::White)
                .bg(button_color)
                .add_modifier(Modifier::BOLD),
        )),
    ])
    .alignment(Alignment::Center)
    .block(card_block("Mining Status"))
    .style(Style::default().bg(Color::Black));
    f.render_widget(button, cards[2]);
}

fn card_block(title: &str) -> Block<'_> {
    Block::default()
        .title(format!(" {} ", title))
        .borders(Borders::ALL)
        .border_style(Style::default().fg(Color::Rgb(100, 200, 255)))
}

fn stat_card(title: &str, value: String, color: Color) -> Paragraph<'_> {
    Paragraph::new(vec![
        Line::from(""),
        Line::from(Span::styled(
            value,
            Style::default().fg(color).add_modifier(Modifier::BOLD),
        )),
    ])
    .alignment(Alignment::Center)
    .block(card_block(title))
    .style(Style::default().bg(Color::Black))
}

fn render_chart(f: &mut Frame, area: Rect, state: &DisplayState, view: &ViewOptions) {
    let points = chart_points(&state.history);
    let y_max = state.history.y_axis_upper_bound(view.chart_headroom);
    let x_max = (state.history.capacity().saturating_sub(1)).max(1) as f64;

    let first = state
        .history
        .snapshot()
        .next()
        .map(|s| s.timestamp.clone())
        .unwrap_or_default();
    let last = state
        .history
        .latest()
        .map(|s| s.timestamp.clone())
        .unwrap_or_default();

    let label_style = Style::default().fg(Color::Rgb(150, 150, 150));
    let dataset = Dataset::default()
        .name("Mining Rate (blocks/s)")
        .marker(symbols::Marker::Braille)
        .graph_type(GraphType::Line)
        .style(Style::default().fg(Color::Rgb(75, 192, 192)))
        .data(&points);

    let chart = Chart::new(vec![dataset])
        .block(
            Block::default()
                .title(" Mining Performance ")
                .borders(Borders::ALL)
                .border_style(Style::default().fg(Color::Rgb(100, 200, 255))),
        )
        .x_axis(
            Axis::default()
                .style(label_style)
                .bounds([0.0, x_max])
                .labels(vec![Span::raw(first), Span::raw(last)]),
        )
        .y_axis(
            Axis::default()
                .style(label_style)
                .bounds([0.0, y_max])
                .labels(vec![
                    Span::raw("0"),
                    Span::raw(format!("{:.1}", y_max / 2.0)),
                    Span::raw(format!("{:.1}", y_max)),
                ]),
        )
        .style(Style::default().bg(Color::Black));
    f.render_widget(chart, area);
}

fn render_footer(f: &mut Frame, area: Rect, state: &DisplayState) {
    let line = match &state.last_error {
        Some(error) => Line::from(vec![
            Span::styled(
                " ⚠ ERROR: ",
                Style::default()
                    .fg(Color::Red)
                    .bg(Color::Rgb(50, 0, 0))
                    .add_modifier(Modifier::BOLD),
            ),
            Span::styled(
                error.to_string(),
                Style::default().fg(Color::Rgb(255, 100, 100)),
            ),
        ]),
        None => Line::from(vec![
            Span::styled(
                format!(" [{}] ", Local::now().format("%H:%M:%S")),
                Style::default()
                    .fg(Color::Rgb(100, 255, 100))
                    .add_modifier(Modifier::BOLD),
            ),
            Span::styled(
                "[s]",
                Style::default()
                    .fg(Color::Cyan)
                    .add_modifier(Modifier::BOLD),
            ),
            Span::styled(" start/stop  ", Style::default().fg(Color::White)),
            Span::styled(
                "[q]",
                Style::default()
                    .fg(Color::Yellow)
                    .add_modifier(Modifier::BOLD),
            ),
            Span::styled(" quit", Style::default().fg(Color::White)),
        ]),
    };

    let border = if state.last_error.is_some() {
        Color::Red
    } else {
        Color::Rgb(0, 200, 100)
    };
    let footer = Paragraph::new(line)
        .block(
            Block::default()
                .borders(Borders::ALL)
                .border_style(Style::default().fg(border)),
        )
        .style(Style::default().bg(Color::Black));
    f.render_widget(footer, area);
}
