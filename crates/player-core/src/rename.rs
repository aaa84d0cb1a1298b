//! Undo/redo log for file renames.
//!
//! The log only records names; performing the rename on disk is the
//! caller's job.  Undo and redo are two-phase: `take_*` pops the entry to
//! replay, then `finish_*` files it on the opposite stack once the disk
//! rename succeeded, or `restore_*` puts it back if it failed.

use player_proto::model::FileId;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RenameEntry {
    pub id: FileId,
    pub old_name: String,
    pub new_name: String,
}

#[derive(Debug, Default)]
pub struct RenameHistory {
    undo: Vec<RenameEntry>,
    redo: Vec<RenameEntry>,
}

impl RenameHistory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a fresh rename.  Any redo history is no longer reachable and
    /// is dropped.
    pub fn commit(&mut self, entry: RenameEntry) {
        self.undo.push(entry);
        self.redo.clear();
    }

    pub fn take_undo(&mut self) -> Option<RenameEntry> {
        self.undo.pop()
    }

    pub fn finish_undo(&mut self, entry: RenameEntry) {
        self.redo.push(entry);
    }

    pub fn restore_undo(&mut self, entry: RenameEntry) {
        self.undo.push(entry);
    }

    pub fn take_redo(&mut self) -> Option<RenameEntry> {
        self.redo.pop()
    }

    pub fn finish_redo(&mut self, entry: RenameEntry) {
        self.undo.push(entry);
    }

    pub fn restore_redo(&mut self, entry: RenameEntry) {
        self.redo.push(entry);
    }

    pub fn undo_stack(&self) -> &[RenameEntry] {
        &self.undo
    }

    pub fn redo_stack(&self) -> &[RenameEntry] {
        &self.redo
    }
}
