use ratatui::{
    layout::Rect,
    style::{Color, Modifier, Style},
    text::{Line, Span},
    widgets::{Block, Borders, Tabs},
    Frame,
};

use crate::core::session::ConnectionState;
use crate::tui::state::AppState;

pub fn state_color(state: ConnectionState) -> Color {
    match state {
        ConnectionState::Connected => Color::Green,
        ConnectionState::Connecting | ConnectionState::Reconnecting { .. } => Color::Yellow,
        ConnectionState::Disconnected | ConnectionState::Closed => Color::Red,
    }
}

/// One tab per printer; the active printer is highlighted
pub fn render_printer_tabs(f: &mut Frame, area: Rect, state: &AppState) {
    let printers = &state.render.printers;

    let titles: Vec<Line> = printers
        .iter()
        .map(|printer| {
            let icon = if printer.state.is_connected() { "●" } else { "○" };
            Line::from(vec![
                Span::styled(icon, Style::default().fg(state_color(printer.state))),
                Span::raw(" "),
                Span::raw(printer.name.clone()),
            ])
        })
        .collect();

    let selected = state
        .render
        .active
        .as_deref()
        .and_then(|active| printers.iter().position(|printer| printer.name == active))
        .unwrap_or(0);

    let title = match state.render.active.as_deref() {
        Some(active) => format!("Moonriver - {}", active),
        None => "Moonriver - no active printer".to_string(),
    };

    let tabs = Tabs::new(titles)
        .block(Block::default().borders(Borders::ALL).title(title))
        .select(selected)
        .style(Style::default().fg(Color::Cyan))
        .highlight_style(
            Style::default()
                .add_modifier(Modifier::BOLD)
                .bg(Color::Blue)
                .fg(Color::White),
        );

    f.render_widget(tabs, area);
}
