use crossterm::event::{KeyCode, KeyEvent, KeyModifiers};

use crate::core::history::CommandHistory;

/// The console input line.
///
/// The cursor is a byte offset that always sits on a char boundary. Up/Down
/// walk the command history; the line being typed is kept as a draft and
/// restored when walking back past the newest entry.
#[derive(Debug, Clone, Default)]
pub struct InputBuffer {
    content: String,
    cursor_position: usize,
    history_age: Option<usize>,
    draft: String,
}

impl InputBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Apply an editing key. Returns true if the content changed.
    pub fn handle_key(&mut self, key: KeyEvent) -> bool {
        let before = self.content.clone();
        match key.code {
            KeyCode::Char('u') if key.modifiers.contains(KeyModifiers::CONTROL) => {
                self.content.drain(..self.cursor_position);
                self.cursor_position = 0;
            }
            KeyCode::Char('a') if key.modifiers.contains(KeyModifiers::CONTROL) => self.move_to_start(),
            KeyCode::Char('e') if key.modifiers.contains(KeyModifiers::CONTROL) => self.move_to_end(),
            KeyCode::Char(_) if key.modifiers.contains(KeyModifiers::CONTROL) => return false,
            KeyCode::Char(c) => self.insert_char(c),
            KeyCode::Backspace => self.delete_char(),
            KeyCode::Delete => self.delete_char_forward(),
            KeyCode::Left => self.move_cursor_left(),
            KeyCode::Right => self.move_cursor_right(),
            KeyCode::Home => self.move_to_start(),
            KeyCode::End => self.move_to_end(),
            _ => return false,
        }
        let changed = self.content != before;
        if changed {
            self.history_age = None;
        }
        changed
    }

    pub fn content(&self) -> &str {
        &self.content
    }

    pub fn cursor_position(&self) -> usize {
        self.cursor_position
    }

    /// Cursor column in characters, for placing the terminal cursor
    pub fn cursor_column(&self) -> usize {
        self.content[..self.cursor_position].chars().count()
    }

    /// Replace the content and put the cursor at the end
    pub fn set(&mut self, text: &str) {
        self.content = text.to_string();
        self.cursor_position = self.content.len();
    }

    pub fn clear(&mut self) {
        self.content.clear();
        self.cursor_position = 0;
        self.history_age = None;
        self.draft.clear();
    }

    /// Take the line for submission, leaving the buffer empty
    pub fn take(&mut self) -> String {
        let line = std::mem::take(&mut self.content);
        self.clear();
        line
    }

    pub fn is_empty(&self) -> bool {
        self.content.is_empty()
    }

    /// Up: show the next older history entry
    pub fn recall_older(&mut self, history: &CommandHistory) -> bool {
        let age = self.history_age.map_or(0, |age| age + 1);
        let Some(entry) = history.recent(age) else {
            return false;
        };
        if self.history_age.is_none() {
            self.draft = self.content.clone();
        }
        self.history_age = Some(age);
        self.set(entry);
        true
    }

    /// Down: show the next newer entry, then the draft
    pub fn recall_newer(&mut self, history: &CommandHistory) -> bool {
        match self.history_age {
            None => false,
            Some(0) => {
                self.history_age = None;
                let draft = std::mem::take(&mut self.draft);
                self.set(&draft);
                true
            }
            Some(age) => match history.recent(age - 1) {
                Some(entry) => {
                    self.history_age = Some(age - 1);
                    self.set(entry);
                    true
                }
                None => false,
            },
        }
    }

    fn insert_char(&mut self, c: char) {
        self.content.insert(self.cursor_position, c);
        self.cursor_position += c.len_utf8();
    }

    fn delete_char(&mut self) {
        if let Some(c) = self.content[..self.cursor_position].chars().next_back() {
            self.cursor_position -= c.len_utf8();
            self.content.remove(self.cursor_position);
        }
    }

    fn delete_char_forward(&mut self) {
        if self.cursor_position < self.content.len() {
            self.content.remove(self.cursor_position);
        }
    }

    fn move_cursor_left(&mut self) {
        if let Some(c) = self.content[..self.cursor_position].chars().next_back() {
            self.cursor_position -= c.len_utf8();
        }
    }

    fn move_cursor_right(&mut self) {
        if let Some(c) = self.content[self.cursor_position..].chars().next() {
            self.cursor_position += c.len_utf8();
        }
    }

    fn move_to_start(&mut self) {
        self.cursor_position = 0;
    }

    fn move_to_end(&mut self) {
        self.cursor_position = self.content.len();
    }
}

impl std::fmt::Display for InputBuffer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.content)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn key(code: KeyCode) -> KeyEvent {
        KeyEvent::new(code, KeyModifiers::NONE)
    }

    fn type_text(input: &mut InputBuffer, text: &str) {
        for c in text.chars() {
            input.handle_key(key(KeyCode::Char(c)));
        }
    }

    #[test]
    fn test_editing_keeps_char_boundaries() {
        let mut input = InputBuffer::new();
        type_text(&mut input, "M117 °C");
        input.handle_key(key(KeyCode::Left));
        input.handle_key(key(KeyCode::Left));
        input.handle_key(key(KeyCode::Backspace));
        assert_eq!(input.content(), "M117°C");
        assert_eq!(input.cursor_column(), 4);

        input.handle_key(key(KeyCode::Delete));
        assert_eq!(input.content(), "M117C");
    }

    #[test]
    fn test_ctrl_u_clears_to_start() {
        let mut input = InputBuffer::new();
        type_text(&mut input, "G1 X10");
        input.handle_key(key(KeyCode::Left));
        input.handle_key(KeyEvent::new(KeyCode::Char('u'), KeyModifiers::CONTROL));
        assert_eq!(input.content(), "0");
        assert_eq!(input.cursor_position(), 0);
    }

    #[test]
    fn test_history_walk_restores_draft() {
        let mut history = CommandHistory::new(10);
        history.append("G28");
        history.append("M105");

        let mut input = InputBuffer::new();
        type_text(&mut input, "G1");

        assert!(input.recall_older(&history));
        assert_eq!(input.content(), "M105");
        assert!(input.recall_older(&history));
        assert_eq!(input.content(), "G28");
        assert!(!input.recall_older(&history));
        assert_eq!(input.content(), "G28");

        assert!(input.recall_newer(&history));
        assert_eq!(input.content(), "M105");
        assert!(input.recall_newer(&history));
        assert_eq!(input.content(), "G1");
        assert!(!input.recall_newer(&history));
    }

    #[test]
    fn test_take_empties_buffer() {
        let mut input = InputBuffer::new();
        type_text(&mut input, "M105");
        assert_eq!(input.take(), "M105");
        assert!(input.is_empty());
        assert_eq!(input.cursor_position(), 0);
    }
}
