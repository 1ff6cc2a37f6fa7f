use ratatui::{
    layout::Rect,
    style::{Color, Modifier, Style},
    text::{Line, Span},
    widgets::{Block, Borders, Clear, Paragraph},
    Frame,
};

use crate::core::pipeline::BUILTIN_HELP;
use crate::tui::ui::centered_rect;

const KEY_HELP: &[(&str, &str)] = &[
    ("Enter", "Send the line, or accept a completion"),
    ("Tab", "Complete the word at the cursor"),
    ("Up / Down", "Walk command history"),
    ("PgUp / PgDn", "Scroll console output"),
    ("Ctrl+X", "EMERGENCY STOP the active printer"),
    ("F2", "Job history"),
    ("Enter / p", "Print the selected job again (job history)"),
    ("F1", "Toggle this help"),
    ("Esc", "Close popup or view"),
    ("Ctrl+C", "Quit"),
];

pub fn render_help_popup(f: &mut Frame, area: Rect) {
    let popup_area = centered_rect(70, 80, area);

    // Clear the background
    f.render_widget(Clear, popup_area);

    let heading = Style::default().add_modifier(Modifier::BOLD);
    let mut help_content = vec![Line::from(Span::styled("Keys", heading))];
    help_content.extend(
        KEY_HELP
            .iter()
            .map(|(key, text)| Line::from(format!("  {:<14} {}", key, text))),
    );
    help_content.push(Line::from(""));
    help_content.push(Line::from(Span::styled("Built-in commands", heading)));
    help_content.extend(
        BUILTIN_HELP
            .iter()
            .map(|(usage, text)| Line::from(format!("  {:<26} {}", usage, text))),
    );
    help_content.push(Line::from(""));
    help_content.push(Line::from(
        "Anything else is sent to the active printer; separate commands with ','",
    ));

    let help = Paragraph::new(help_content)
        .block(
            Block::default()
                .borders(Borders::ALL)
                .title("Help")
                .border_style(Style::default().fg(Color::Yellow)),
        )
        .wrap(ratatui::widgets::Wrap { trim: false });

    f.render_widget(help, popup_area);
}
