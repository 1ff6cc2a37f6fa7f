//! Command history persistence: a JSON array of strings, oldest first.
//!
//! Files that are not a JSON array are read as one entry per line, which
//! covers plain-text history left by line editors (including a `#V2`
//! header line).

use crate::core::history::CommandHistory;
use crate::domain::config::GlobalConfig;
use crate::domain::error::MoonriverResult;
use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

const HISTORY_FILE: &str = ".moonriver_history.json";
const LINE_EDITOR_HEADER: &str = "#V2";

/// Where history lives: the configured file, else `~/.moonriver_history.json`
pub fn history_path(global: &GlobalConfig) -> Option<PathBuf> {
    global
        .history_file
        .clone()
        .or_else(|| dirs::home_dir().map(|home| home.join(HISTORY_FILE)))
}

/// Load history from `path`.
///
/// A missing file gives an empty history. So does a corrupt one, which is
/// logged and otherwise ignored.
pub fn load_history(path: &Path, capacity: usize) -> CommandHistory {
    let content = match fs::read_to_string(path) {
        Ok(content) => content,
        Err(e) if e.kind() == ErrorKind::NotFound => return CommandHistory::new(capacity),
        Err(e) => {
            warn!("Could not read history file {}: {}", path.display(), e);
            return CommandHistory::new(capacity);
        }
    };

    if !content.trim_start().starts_with('[') {
        let lines = plain_lines(&content);
        debug!("Loaded {} plain history lines from {}", lines.len(), path.display());
        return CommandHistory::from_entries(capacity, lines);
    }

    match serde_json::from_str::<Vec<String>>(&content) {
        Ok(lines) => {
            debug!("Loaded {} history entries from {}", lines.len(), path.display());
            CommandHistory::from_entries(capacity, lines)
        }
        Err(e) => {
            warn!("Discarding corrupt history file {}: {}", path.display(), e);
            CommandHistory::new(capacity)
        }
    }
}

fn plain_lines(content: &str) -> Vec<String> {
    content
        .lines()
        .filter(|line| *line != LINE_EDITOR_HEADER && !line.trim().is_empty())
        .map(str::to_string)
        .collect()
}

/// Save `history` to `path`, replacing the file in one rename
pub fn save_history(path: &Path, history: &CommandHistory) -> MoonriverResult<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    let lines: Vec<&str> = history.entries().collect();
    let content = serde_json::to_string_pretty(&lines).map_err(|e| std::io::Error::new(ErrorKind::InvalidData, e))?;

    let tmp = path.with_extension("tmp");
    fs::write(&tmp, content)?;
    fs::rename(&tmp, path)?;
    Ok(())
}
