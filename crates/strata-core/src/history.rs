//! History management for Undo/Redo
//!
//! The core does not keep history itself. Operations run through
//! [`Composition::recorded`](crate::Composition::recorded) hand an [`Edit`]
//! with immutable before/after snapshots to whatever [`HistorySink`] is
//! installed.

use crate::document::Document;
use crossbeam_channel::Sender;
use parking_lot::Mutex;
use std::sync::Arc;

/// One undoable operation
#[derive(Debug, Clone)]
pub struct Edit {
    /// Name shown in menus ("Add Smart Filter", ...)
    pub name: String,
    /// Document before the operation
    pub before: Arc<Document>,
    /// Document after the operation
    pub after: Arc<Document>,
}

/// Receiver of finished edits
pub trait HistorySink: Send {
    /// Take ownership of a finished edit
    fn record(&mut self, edit: Edit);
}

impl HistorySink for Sender<Edit> {
    fn record(&mut self, edit: Edit) {
        // A closed channel means nobody is tracking history any more
        let _ = self.send(edit);
    }
}

impl<H: HistorySink> HistorySink for Arc<Mutex<H>> {
    fn record(&mut self, edit: Edit) {
        self.lock().record(edit);
    }
}

/// Bounded undo/redo stacks of edits
#[derive(Debug)]
pub struct History {
    undo_stack: Vec<Edit>,
    redo_stack: Vec<Edit>,
    max_history: usize,
}

impl Default for History {
    fn default() -> Self {
        Self::new(50)
    }
}

impl History {
    /// Create a new history manager
    pub fn new(max_history: usize) -> Self {
        Self {
            undo_stack: Vec::new(),
            redo_stack: Vec::new(),
            max_history,
        }
    }

    /// Push a finished edit; clears the redo stack
    pub fn push(&mut self, edit: Edit) {
        self.undo_stack.push(edit);
        if self.undo_stack.len() > self.max_history {
            self.undo_stack.remove(0);
        }
        self.redo_stack.clear();
    }

    /// Undo the last edit.
    /// Returns the document to restore, if any.
    pub fn undo(&mut self) -> Option<Arc<Document>> {
        let edit = self.undo_stack.pop()?;
        let before = edit.before.clone();
        self.redo_stack.push(edit);
        Some(before)
    }

    /// Redo the last undone edit.
    /// Returns the document to restore, if any.
    pub fn redo(&mut self) -> Option<Arc<Document>> {
        let edit = self.redo_stack.pop()?;
        let after = edit.after.clone();
        self.undo_stack.push(edit);
        Some(after)
    }

    /// Name of the edit `undo` would revert
    pub fn undo_name(&self) -> Option<&str> {
        self.undo_stack.last().map(|e| e.name.as_str())
    }

    /// Name of the edit `redo` would reapply
    pub fn redo_name(&self) -> Option<&str> {
        self.redo_stack.last().map(|e| e.name.as_str())
    }

    /// Check if undo is available
    pub fn can_undo(&self) -> bool {
        !self.undo_stack.is_empty()
    }

    /// Check if redo is available
    pub fn can_redo(&self) -> bool {
        !self.redo_stack.is_empty()
    }

    /// Clear history
    pub fn clear(&mut self) {
        self.undo_stack.clear();
        self.redo_stack.clear();
    }
}

impl HistorySink for History {
    fn record(&mut self, edit: Edit) {
        self.push(edit);
    }
}
