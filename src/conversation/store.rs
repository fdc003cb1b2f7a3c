//! JSON persistence of the conversation history.
//!
//! The store holds the user/assistant turns only; the persona is prepended
//! per request and never written to disk.  Each save keeps the newest
//! `max_history` turns so a reload can never blow the model's context.

use std::path::{Path, PathBuf};

use thiserror::Error;

use super::ConversationHistory;

// ---------------------------------------------------------------------------
// StoreError
// ---------------------------------------------------------------------------

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("history file I/O failed: {0}")]
    Io(#[from] std::io::Error),

    #[error("history file is not valid JSON: {0}")]
    Json(#[from] serde_json::Error),
}

// ---------------------------------------------------------------------------
// HistoryStore
// ---------------------------------------------------------------------------

/// Loads and saves a [`ConversationHistory`] as a pretty-printed JSON list.
///
/// # Example
/// ```rust
/// use voice_chat::conversation::{ConversationTurn, HistoryStore};
///
/// let dir = tempfile::tempdir().unwrap();
/// let store = HistoryStore::new(dir.path().join("memory.json"), 20);
///
/// assert!(store.load().unwrap().is_empty()); // first run
/// store.save(&[ConversationTurn::user("hi")]).unwrap();
/// assert_eq!(store.load().unwrap().len(), 1);
/// ```
#[derive(Debug, Clone)]
pub struct HistoryStore {
    path: PathBuf,
    max_history: usize,
}

impl HistoryStore {
    pub fn new(path: impl Into<PathBuf>, max_history: usize) -> Self {
        Self {
            path: path.into(),
            max_history,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Read the stored history.  A missing file is a first run and yields an
    /// empty history.
    pub fn load(&self) -> Result<ConversationHistory, StoreError> {
        if !self.path.exists() {
            return Ok(ConversationHistory::new());
        }
        let content = std::fs::read_to_string(&self.path)?;
        let history: ConversationHistory = serde_json::from_str(&content)?;
        log::debug!(
            "store: loaded {} turn(s) from {}",
            history.len(),
            self.path.display()
        );
        Ok(history)
    }

    /// Write the newest `max_history` turns, creating parent directories as
    /// needed.
    pub fn save(&self, history: &[super::ConversationTurn]) -> Result<(), StoreError> {
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let start = history.len().saturating_sub(self.max_history);
        let content = serde_json::to_string_pretty(&history[start..])?;
        std::fs::write(&self.path, content)?;
        Ok(())
    }

    /// Delete the history file.  Succeeds when there is nothing to delete.
    pub fn clear(&self) -> Result<(), StoreError> {
        match std::fs::remove_file(&self.path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
