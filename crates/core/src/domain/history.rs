//! Undo-history contract for chain edits

use std::sync::{Mutex, PoisonError};

/// Receives a record of every user-visible chain edit
///
/// Entries are appended to the current undo step; no new boundary is forced.
pub trait UndoHistory: Send + Sync {
    fn push_state(&self, description: &str, action: &str);
}

/// History sink that drops everything
#[derive(Debug, Default, Clone, Copy)]
pub struct NoHistory;

impl UndoHistory for NoHistory {
    fn push_state(&self, _description: &str, _action: &str) {}
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HistoryEntry {
    pub description: String,
    pub action: String,
}

/// In-memory history recorder
#[derive(Debug, Default)]
pub struct HistoryLog {
    entries: Mutex<Vec<HistoryEntry>>,
}

impl HistoryLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn entries(&self) -> Vec<HistoryEntry> {
        self.entries
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn len(&self) -> usize {
        self.entries
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl UndoHistory for HistoryLog {
    fn push_state(&self, description: &str, action: &str) {
        self.entries
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(HistoryEntry {
                description: description.to_string(),
                action: action.to_string(),
            });
    }
}
