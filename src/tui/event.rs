use crossterm::event::{KeyCode, KeyEvent, KeyEventKind, KeyModifiers};

use crate::core::history::CommandHistory;

use super::state::{AppState, View};

const PAGE: usize = 10;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AppEvent {
    Quit,
    EmergencyStop,
    Submit(String),
    /// The input line was edited
    InputChanged,
    Complete,
    AcceptCompletion,
    DismissCompletion,
    /// Run a built-in without recording it in history
    Request(String),
}

/// Maps keys to console actions. Editing keys are applied to the input
/// buffer here; everything else is returned as an [`AppEvent`].
pub struct EventHandler;

impl EventHandler {
    pub fn new() -> Self {
        Self
    }

    pub fn handle_key_event(
        &self,
        key: KeyEvent,
        state: &mut AppState,
        history: &CommandHistory,
    ) -> Option<AppEvent> {
        if key.kind == KeyEventKind::Release {
            return None;
        }

        // Global bindings work in every view
        if key.modifiers.contains(KeyModifiers::CONTROL) {
            match key.code {
                KeyCode::Char('x') => return Some(AppEvent::EmergencyStop),
                KeyCode::Char('c') | KeyCode::Char('d') => return Some(AppEvent::Quit),
                _ => {}
            }
        }
        match key.code {
            KeyCode::F(1) => {
                state.toggle_help();
                return None;
            }
            KeyCode::F(2) => {
                state.view = View::Jobs;
                return Some(AppEvent::Request(":jobs".to_string()));
            }
            _ => {}
        }

        match state.view {
            View::Help => {
                if matches!(key.code, KeyCode::Esc | KeyCode::Char('q')) {
                    state.view = View::Console;
                }
                None
            }
            View::Jobs => self.handle_jobs_view(key, state),
            View::Console => self.handle_console_view(key, state, history),
        }
    }

    fn handle_jobs_view(&self, key: KeyEvent, state: &mut AppState) -> Option<AppEvent> {
        match key.code {
            KeyCode::Esc | KeyCode::Char('q') => {
                state.view = View::Console;
                None
            }
            KeyCode::Char('n') | KeyCode::Right | KeyCode::PageDown => {
                state.job_selected = 0;
                Some(AppEvent::Request(":jobs next".to_string()))
            }
            KeyCode::Char('r') | KeyCode::Home => {
                state.job_selected = 0;
                Some(AppEvent::Request(":jobs reset".to_string()))
            }
            KeyCode::Up | KeyCode::Down => {
                state.select_job(key.code == KeyCode::Up);
                None
            }
            KeyCode::Enter | KeyCode::Char('p') => {
                let has_jobs = state.render.jobs.as_ref().is_some_and(|(_, page)| !page.jobs.is_empty());
                has_jobs.then(|| AppEvent::Request(format!(":reprint {}", state.job_selected + 1)))
            }
            _ => None,
        }
    }

    fn handle_console_view(&self, key: KeyEvent, state: &mut AppState, history: &CommandHistory) -> Option<AppEvent> {
        let completing = state.render.completion.is_some();
        match key.code {
            KeyCode::Enter if completing => Some(AppEvent::AcceptCompletion),
            KeyCode::Enter => {
                state.scroll = 0;
                Some(AppEvent::Submit(state.input.take()))
            }
            KeyCode::Tab => Some(AppEvent::Complete),
            KeyCode::Up | KeyCode::Down if completing => Some(AppEvent::Complete),
            KeyCode::Esc if completing => Some(AppEvent::DismissCompletion),
            KeyCode::Esc => {
                state.input.clear();
                Some(AppEvent::InputChanged)
            }
            KeyCode::Up => state
                .input
                .recall_older(history)
                .then_some(AppEvent::InputChanged),
            KeyCode::Down => state
                .input
                .recall_newer(history)
                .then_some(AppEvent::InputChanged),
            KeyCode::PageUp => {
                state.scroll_up(PAGE);
                None
            }
            KeyCode::PageDown => {
                state.scroll_down(PAGE);
                None
            }
            _ => state.input.handle_key(key).then_some(AppEvent::InputChanged),
        }
    }
}

impl Default for EventHandler {
    fn default() -> Self {
        Self::new()
    }
}
