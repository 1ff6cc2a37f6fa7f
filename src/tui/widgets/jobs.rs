use ratatui::{
    layout::Rect,
    style::{Color, Modifier, Style},
    text::{Line, Span},
    widgets::{Block, Borders, Paragraph},
    Frame,
};

use crate::core::jobs::{format_duration, JobPage, JobRecord};
use crate::tui::state::AppState;

fn status_color(status: &str) -> Color {
    match status {
        "completed" => Color::Green,
        "in_progress" | "printing" => Color::Cyan,
        "cancelled" => Color::Yellow,
        _ => Color::Red,
    }
}

fn job_line(row: usize, job: &JobRecord, selected: bool) -> Line<'static> {
    let marker = if selected { '>' } else { ' ' };
    let mut line = Line::from(vec![
        Span::raw(format!("{}{:>3} ", marker, row + 1)),
        Span::styled(format!("{:<8} ", job.job_id), Style::default().fg(Color::DarkGray)),
        Span::styled(
            format!("{:<12} ", job.status),
            Style::default().fg(status_color(&job.status)),
        ),
        Span::raw(format!("{:>9} ", format_duration(job.print_duration))),
        Span::raw(format!("{:>8.2}m  ", job.filament_used / 1000.0)),
        Span::raw(job.filename.clone()),
    ]);
    if selected {
        for span in &mut line.spans {
            span.style = span.style.add_modifier(Modifier::REVERSED);
        }
    }
    line
}

pub fn job_lines(page: &JobPage, selected: usize) -> Vec<Line<'static>> {
    let mut lines = vec![Line::from(Span::styled(
        format!("{:>4} {:<8} {:<12} {:>9} {:>9}  {}", "#", "ID", "STATUS", "TIME", "FILAMENT", "FILE"),
        Style::default().add_modifier(Modifier::BOLD),
    ))];
    if page.jobs.is_empty() {
        lines.push(Line::from("No jobs recorded"));
    }
    lines.extend(
        page.jobs
            .iter()
            .enumerate()
            .map(|(row, job)| job_line(row, job, row == selected)),
    );
    lines
}

pub fn render_jobs_panel(f: &mut Frame, area: Rect, state: &AppState) {
    let (title, content) = match &state.render.jobs {
        Some((printer, page)) => {
            let more = if page.next.is_some() { " | n: next page" } else { "" };
            (
                format!(
                    "Jobs - {} ({} total){} | r: first page | Enter: print again | Esc: back",
                    printer, page.total, more
                ),
                job_lines(page, state.job_selected),
            )
        }
        None if state.render.busy => ("Jobs".to_string(), vec![Line::from("Loading...")]),
        None => ("Jobs".to_string(), vec![Line::from("No job history loaded")]),
    };

    let panel = Paragraph::new(content).block(
        Block::default()
            .borders(Borders::ALL)
            .title(title)
            .border_style(Style::default().fg(Color::Cyan)),
    );
    f.render_widget(panel, area);
}
