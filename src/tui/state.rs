use crate::core::console::RenderState;

use super::input::InputBuffer;

/// What fills the main area
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum View {
    Console,
    Jobs,
    Help,
}

impl std::fmt::Display for View {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            View::Console => write!(f, "Console"),
            View::Jobs => write!(f, "Jobs"),
            View::Help => write!(f, "Help"),
        }
    }
}

/// Front end state layered over the console's [`RenderState`]
#[derive(Debug)]
pub struct AppState {
    pub view: View,
    pub input: InputBuffer,
    pub render: RenderState,
    /// Lines scrolled back from the newest output
    pub scroll: usize,
    /// Row of the shown job page that Enter prints again
    pub job_selected: usize,
    pub terminal_size: (u16, u16),
    pub status_message: Option<String>,
}

impl AppState {
    pub fn new() -> Self {
        Self {
            view: View::Console,
            input: InputBuffer::new(),
            render: RenderState::default(),
            scroll: 0,
            job_selected: 0,
            terminal_size: (80, 24),
            status_message: Some("Welcome to Moonriver! F1 for help, Ctrl+X for emergency stop.".to_string()),
        }
    }

    pub fn set_status_message(&mut self, message: String) {
        self.status_message = Some(message);
    }

    pub fn toggle_help(&mut self) {
        self.view = match self.view {
            View::Help => View::Console,
            _ => View::Help,
        };
    }

    pub fn scroll_up(&mut self, lines: usize) {
        let max = self.render.lines.len().saturating_sub(1);
        self.scroll = (self.scroll + lines).min(max);
    }

    pub fn scroll_down(&mut self, lines: usize) {
        self.scroll = self.scroll.saturating_sub(lines);
    }

    /// Move the job selection, staying on the shown page
    pub fn select_job(&mut self, up: bool) {
        let rows = self.render.jobs.as_ref().map(|(_, page)| page.jobs.len()).unwrap_or(0);
        self.job_selected = if up {
            self.job_selected.saturating_sub(1)
        } else {
            (self.job_selected + 1).min(rows.saturating_sub(1))
        };
    }

    /// Take a new frame from the console, keeping a scrolled-back view
    /// anchored to the same output
    pub fn update(&mut self, render: RenderState) {
        if self.scroll > 0 {
            let added = render.lines.len().saturating_sub(self.render.lines.len());
            self.scroll += added;
        }
        self.render = render;
    }
}

impl Default for AppState {
    fn default() -> Self {
        Self::new()
    }
}
