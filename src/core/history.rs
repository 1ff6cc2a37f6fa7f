//! Command history.
//!
//! An ordered list of submitted lines. Identical adjacent lines are stored
//! once, and the oldest line is evicted when the list is full. Loading and
//! saving live in `infrastructure::history_store`.

use std::collections::VecDeque;

#[derive(Debug, Clone, PartialEq)]
pub struct CommandHistory {
    entries: VecDeque<String>,
    capacity: usize,
}

impl CommandHistory {
    pub fn new(capacity: usize) -> Self {
        Self {
            entries: VecDeque::new(),
            capacity,
        }
    }

    /// Restore persisted lines, oldest first, keeping the newest `capacity`
    pub fn from_entries<I>(capacity: usize, lines: I) -> Self
    where
        I: IntoIterator<Item = String>,
    {
        let mut history = Self::new(capacity);
        for line in lines {
            history.append(line);
        }
        history
    }

    /// Record a submitted line. Returns false if nothing was stored.
    pub fn append(&mut self, line: impl Into<String>) -> bool {
        let line = line.into();
        if self.capacity == 0 || line.trim().is_empty() {
            return false;
        }
        if self.entries.back() == Some(&line) {
            return false;
        }

        self.entries.push_back(line);
        while self.entries.len() > self.capacity {
            self.entries.pop_front();
        }
        true
    }

    /// Lines containing `query`, most recent first. Evaluated lazily.
    pub fn search<'a>(&'a self, query: &'a str) -> impl Iterator<Item = &'a str> + 'a {
        self.entries
            .iter()
            .rev()
            .map(String::as_str)
            .filter(move |line| line.contains(query))
    }

    /// Entry `age` steps back from the newest (0 is the newest)
    pub fn recent(&self, age: usize) -> Option<&str> {
        let index = self.entries.len().checked_sub(age + 1)?;
        self.entries.get(index).map(String::as_str)
    }

    /// Oldest first
    pub fn entries(&self) -> impl Iterator<Item = &str> {
        self.entries.iter().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }
}
