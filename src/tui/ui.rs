use ratatui::{
    layout::{Constraint, Direction, Layout, Rect},
    Frame,
};

use super::{
    state::{AppState, View},
    widgets::{
        console::render_console_panel,
        help::render_help_popup,
        jobs::render_jobs_panel,
        sessions::render_printer_tabs,
        status::{render_status_bar, render_status_panel},
    },
};

pub fn draw_ui(f: &mut Frame, state: &mut AppState) {
    let size = f.size();
    state.terminal_size = (size.width, size.height);

    // Main layout
    let chunks = Layout::default()
        .direction(Direction::Vertical)
        .constraints([
            Constraint::Length(3), // Printer tabs
            Constraint::Length(2), // Temperatures and position
            Constraint::Min(0),    // Main content
            Constraint::Length(1), // Status bar
        ])
        .split(size);

    render_printer_tabs(f, chunks[0], state);
    render_status_panel(f, chunks[1], state);

    match state.view {
        View::Console | View::Help => render_console_panel(f, chunks[2], state),
        View::Jobs => render_jobs_panel(f, chunks[2], state),
    }

    render_status_bar(f, chunks[3], state);

    if state.view == View::Help {
        render_help_popup(f, size);
    }
}

pub fn centered_rect(percent_x: u16, percent_y: u16, r: Rect) -> Rect {
    let popup_layout = Layout::default()
        .direction(Direction::Vertical)
        .constraints([
            Constraint::Percentage((100 - percent_y) / 2),
            Constraint::Percentage(percent_y),
            Constraint::Percentage((100 - percent_y) / 2),
        ])
        .split(r);

    Layout::default()
        .direction(Direction::Horizontal)
        .constraints([
            Constraint::Percentage((100 - percent_x) / 2),
            Constraint::Percentage(percent_x),
            Constraint::Percentage((100 - percent_x) / 2),
        ])
        .split(popup_layout[1])[1]
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::console::{ConsoleLine, LineKind, PrinterTab, RenderState};
    use crate::core::session::ConnectionState;
    use ratatui::{backend::TestBackend, Terminal};

    fn buffer_text(terminal: &Terminal<TestBackend>) -> String {
        let buffer = terminal.backend().buffer();
        buffer.content.iter().map(|cell| cell.symbol.as_str()).collect()
    }

    #[test]
    fn test_draws_tabs_output_and_input() {
        let mut terminal = Terminal::new(TestBackend::new(80, 20)).unwrap();
        let mut state = AppState::new();
        state.update(RenderState {
            active: Some("voron".to_string()),
            printers: vec![PrinterTab {
                name: "voron".to_string(),
                state: ConnectionState::Connected,
            }],
            lines: vec![ConsoleLine {
                kind: LineKind::Response,
                printer: Some("voron".to_string()),
                text: "B:60.0 /60.0".to_string(),
            }],
            ..Default::default()
        });
        state.input.set("M105");

        terminal.draw(|f| draw_ui(f, &mut state)).unwrap();
        let text = buffer_text(&terminal);
        assert!(text.contains("Moonriver - voron"));
        assert!(text.contains("B:60.0 /60.0"));
        assert!(text.contains("voron> M105"));
        assert!(text.contains("Printer status unavailable"));
    }

    #[test]
    fn test_help_overlay() {
        let mut terminal = Terminal::new(TestBackend::new(100, 40)).unwrap();
        let mut state = AppState::new();
        state.view = View::Help;

        terminal.draw(|f| draw_ui(f, &mut state)).unwrap();
        assert!(buffer_text(&terminal).contains("EMERGENCY STOP the active printer"));
    }
}
