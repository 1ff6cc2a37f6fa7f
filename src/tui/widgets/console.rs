use ratatui::{
    layout::{Constraint, Direction, Layout, Rect},
    style::{Color, Modifier, Style},
    text::{Line, Span},
    widgets::{Block, Borders, Clear, List, ListItem, Paragraph},
    Frame,
};

use crate::core::assist::{CandidateSource, Token, TokenKind};
use crate::core::console::{ConsoleLine, LineKind};
use crate::tui::state::AppState;

const MAX_POPUP_ROWS: usize = 8;

fn token_style(kind: TokenKind) -> Style {
    match kind {
        TokenKind::Command => Style::default().fg(Color::Cyan).add_modifier(Modifier::BOLD),
        TokenKind::Parameter => Style::default().fg(Color::Yellow),
        TokenKind::Value => Style::default().fg(Color::White),
        TokenKind::Comment => Style::default().fg(Color::DarkGray),
        TokenKind::Unknown => Style::default().fg(Color::Red),
    }
}

/// The input line as styled spans; text between tokens is left plain
pub fn highlighted_input(input: &str, tokens: &[Token]) -> Line<'static> {
    let mut spans = Vec::new();
    let mut position = 0;
    for token in tokens {
        if token.span.start > position {
            spans.push(Span::raw(input[position..token.span.start].to_string()));
        }
        spans.push(Span::styled(
            input[token.span.clone()].to_string(),
            token_style(token.kind),
        ));
        position = token.span.end;
    }
    if position < input.len() {
        spans.push(Span::raw(input[position..].to_string()));
    }
    Line::from(spans)
}

fn line_item(line: &ConsoleLine) -> ListItem<'static> {
    let (prefix, style) = match line.kind {
        LineKind::Command => ("> ", Style::default().fg(Color::Cyan)),
        LineKind::Response => ("", Style::default().fg(Color::Green)),
        LineKind::Gcode => ("", Style::default().fg(Color::Gray)),
        LineKind::Info => ("", Style::default().fg(Color::Blue)),
        LineKind::Error => ("! ", Style::default().fg(Color::Red)),
        LineKind::EmergencyStop => (
            "!! ",
            Style::default()
                .fg(Color::White)
                .bg(Color::Red)
                .add_modifier(Modifier::BOLD),
        ),
    };

    let mut spans = Vec::new();
    if let Some(printer) = &line.printer {
        spans.push(Span::styled(format!("[{}] ", printer), Style::default().fg(Color::DarkGray)));
    }
    spans.push(Span::styled(format!("{}{}", prefix, line.text), style));
    ListItem::new(Line::from(spans))
}

pub fn render_console_panel(f: &mut Frame, area: Rect, state: &AppState) {
    let chunks = Layout::default()
        .direction(Direction::Vertical)
        .constraints([
            Constraint::Min(0),    // Output
            Constraint::Length(3), // Input
        ])
        .split(area);

    render_output(f, chunks[0], state);
    render_input(f, chunks[1], state);
    render_completion_popup(f, chunks[1], state);
}

fn render_output(f: &mut Frame, area: Rect, state: &AppState) {
    let lines = &state.render.lines;
    let height = area.height.saturating_sub(2) as usize;
    let end = lines.len().saturating_sub(state.scroll);
    let start = end.saturating_sub(height);

    let items: Vec<ListItem> = lines[start..end].iter().map(line_item).collect();
    let title = if state.scroll > 0 {
        format!("Console (scrolled back {} lines)", state.scroll)
    } else {
        "Console".to_string()
    };

    let output = List::new(items).block(Block::default().borders(Borders::ALL).title(title));
    f.render_widget(output, area);
}

fn render_input(f: &mut Frame, area: Rect, state: &AppState) {
    let prompt = match state.render.active.as_deref() {
        Some(active) => format!("{}> ", active),
        None => "> ".to_string(),
    };

    let mut line = highlighted_input(state.input.content(), &state.render.tokens);
    line.spans.insert(0, Span::styled(prompt.clone(), Style::default().fg(Color::DarkGray)));

    let border = if state.render.busy {
        Style::default().fg(Color::Yellow)
    } else {
        Style::default().fg(Color::Cyan)
    };
    let input = Paragraph::new(line).block(Block::default().borders(Borders::ALL).border_style(border));
    f.render_widget(input, area);

    let column = (prompt.chars().count() + state.input.cursor_column()) as u16;
    f.set_cursor(
        area.x + 1 + column.min(area.width.saturating_sub(3)),
        area.y + 1,
    );
}

/// Candidates drawn just above the input line
fn render_completion_popup(f: &mut Frame, input_area: Rect, state: &AppState) {
    let Some(popup) = &state.render.completion else {
        return;
    };
    let candidates = &popup.completion.candidates;
    if candidates.is_empty() {
        return;
    }

    let first = popup.selected.saturating_sub(MAX_POPUP_ROWS - 1);
    let visible = &candidates[first..candidates.len().min(first + MAX_POPUP_ROWS)];
    let width = visible
        .iter()
        .map(|candidate| candidate.text.chars().count())
        .max()
        .unwrap_or(0) as u16
        + 4;
    let height = visible.len() as u16 + 2;

    let area = Rect {
        x: input_area.x + 2,
        y: input_area.y.saturating_sub(height),
        width: width.min(input_area.width),
        height: height.min(input_area.y),
    };

    let items: Vec<ListItem> = visible
        .iter()
        .enumerate()
        .map(|(offset, candidate)| {
            let mut style = match candidate.source {
                CandidateSource::Grammar => Style::default().fg(Color::White),
                CandidateSource::Dynamic => Style::default().fg(Color::LightMagenta),
            };
            if first + offset == popup.selected {
                style = style.bg(Color::Blue).add_modifier(Modifier::BOLD);
            }
            ListItem::new(Span::styled(candidate.text.clone(), style))
        })
        .collect();

    f.render_widget(Clear, area);
    f.render_widget(List::new(items).block(Block::default().borders(Borders::ALL)), area);
}
