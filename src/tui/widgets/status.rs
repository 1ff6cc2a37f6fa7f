use ratatui::{
    layout::Rect,
    style::{Color, Modifier, Style},
    text::{Line, Span},
    widgets::{Block, Borders, Paragraph},
    Frame,
};

use crate::core::printer::{HeaterView, PrinterStatus};
use crate::tui::state::AppState;

const UNAVAILABLE: &str = "--";

fn label(text: &str) -> Span<'static> {
    Span::styled(text.to_string(), Style::default().add_modifier(Modifier::BOLD))
}

fn heater_span(heater: Option<&HeaterView>) -> Span<'static> {
    match heater {
        Some(heater) => {
            let color = if heater.target > 0.0 { Color::LightRed } else { Color::Gray };
            Span::styled(
                format!("{:.1}/{:.0}°C ", heater.temperature, heater.target),
                Style::default().fg(color),
            )
        }
        None => Span::styled(format!("{} ", UNAVAILABLE), Style::default().fg(Color::DarkGray)),
    }
}

/// Temperatures on the first line; position and job on the second
pub fn status_lines(status: &PrinterStatus) -> Vec<Line<'static>> {
    let mut temperatures = vec![
        label("E "),
        heater_span(status.extruder.as_ref()),
        label("Bed "),
        heater_span(status.bed.as_ref()),
    ];
    for sensor in &status.sensors {
        temperatures.push(label(&format!("{} ", sensor.name)));
        temperatures.push(Span::raw(format!("{:.1}°C ", sensor.temperature)));
    }
    for fan in &status.fans {
        temperatures.push(label(&format!("{} ", fan.name)));
        temperatures.push(Span::raw(format!("{:.0}% ", fan.speed * 100.0)));
    }

    let mut motion = Vec::new();
    match &status.toolhead {
        Some(toolhead) => {
            for (axis, value) in ['X', 'Y', 'Z'].iter().zip(toolhead.position.iter()) {
                let color = if toolhead.is_homed(*axis) { Color::Green } else { Color::Yellow };
                motion.push(Span::styled(format!("{}", axis), Style::default().fg(color)));
                motion.push(Span::raw(format!(" {:.2} ", value)));
            }
        }
        None => motion.push(Span::raw(format!("Position {} ", UNAVAILABLE))),
    }
    if let Some(stats) = &status.print_stats {
        motion.push(label("| "));
        motion.push(Span::raw(stats.state.clone()));
        if !stats.filename.is_empty() {
            motion.push(Span::raw(format!(" {}", stats.filename)));
        }
    }
    if let Some(klippy) = &status.klippy {
        let color = if klippy == "ready" { Color::Green } else { Color::Red };
        motion.push(label(" | Klippy "));
        motion.push(Span::styled(klippy.clone(), Style::default().fg(color)));
    }

    vec![Line::from(temperatures), Line::from(motion)]
}

/// Temperature and position bars for the active printer
pub fn render_status_panel(f: &mut Frame, area: Rect, state: &AppState) {
    let content = match &state.render.status {
        Some(status) => status_lines(status),
        None => vec![Line::from(Span::styled(
            "Printer status unavailable",
            Style::default().fg(Color::DarkGray),
        ))],
    };

    let panel = Paragraph::new(content).block(Block::default().borders(Borders::LEFT | Borders::RIGHT));
    f.render_widget(panel, area);
}

pub fn render_status_bar(f: &mut Frame, area: Rect, state: &AppState) {
    let (text, style) = if let Some(record) = &state.render.last_emergency_stop {
        (
            format!("EMERGENCY STOP sent to '{}' | F1 help | Ctrl+C quit", record.printer),
            Style::default().fg(Color::White).bg(Color::Red),
        )
    } else if state.render.busy {
        (
            "Waiting for the printer... Ctrl+X emergency stop".to_string(),
            Style::default().fg(Color::Yellow),
        )
    } else if let Some(message) = &state.status_message {
        (message.clone(), Style::default().fg(Color::Yellow))
    } else {
        (
            format!(
                "View: {} | Tab complete | F2 jobs | F1 help | Ctrl+X e-stop | Ctrl+C quit",
                state.view
            ),
            Style::default().fg(Color::Gray),
        )
    };

    f.render_widget(Paragraph::new(Line::from(Span::styled(text, style))), area);
}
