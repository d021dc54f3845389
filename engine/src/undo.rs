//! Undo and redo across interleaved remote edits.
//!
//! The stack records every change applied to a document, tagged by where it
//! came from. Undoing a local change reverts it and transforms the revert
//! past everything that happened since, so remote edits made in the meantime
//! are preserved.

use crate::change::{merge_opt, Change};
use crate::error::Result;
use crate::operation::Operation;
use crate::OperationId;
use std::collections::HashSet;

/// Origin of a stack entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Tag {
    Local,
    Remote,
    Undo,
    Redo,
}

#[derive(Debug, Clone)]
struct Entry {
    tag: Tag,
    change: Option<Change>,
}

/// A history of applied changes that can compute undo and redo changes.
#[derive(Debug, Clone, Default)]
pub struct UndoStack {
    entries: Vec<Entry>,
    seen: HashSet<OperationId>,
}

impl UndoStack {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Record an applied operation. Ids already recorded are ignored.
    pub fn push(&mut self, op: &Operation, local: bool) {
        let tag = if local { Tag::Local } else { Tag::Remote };
        self.push_tagged(op, tag);
    }

    /// Record an operation with an explicit tag. Ids already recorded are
    /// ignored.
    pub fn push_tagged(&mut self, op: &Operation, tag: Tag) {
        if !self.seen.insert(op.id.clone()) {
            return;
        }
        self.entries.push(Entry {
            tag,
            change: op.change.clone(),
        });
    }

    /// The change that undoes the most recent local change or redo still in
    /// effect, rebased onto the current state.
    pub fn undo(&self) -> Result<Option<Change>> {
        let mut skip = 0usize;
        for (i, entry) in self.entries.iter().enumerate().rev() {
            match entry.tag {
                Tag::Undo => skip += 1,
                Tag::Local | Tag::Redo if skip == 0 => return self.revert_forward(i),
                Tag::Local | Tag::Redo => skip -= 1,
                Tag::Remote => {}
            }
        }
        Ok(None)
    }

    /// The change that re-applies the most recent undo, rebased onto the
    /// current state. A fresh local change ends the redo history.
    pub fn redo(&self) -> Result<Option<Change>> {
        let mut skip = 0usize;
        for (i, entry) in self.entries.iter().enumerate().rev() {
            match entry.tag {
                Tag::Redo => skip += 1,
                Tag::Undo if skip == 0 => return self.revert_forward(i),
                Tag::Undo => skip -= 1,
                Tag::Local if skip == 0 => return Ok(None),
                Tag::Local | Tag::Remote => {}
            }
        }
        Ok(None)
    }

    fn revert_forward(&self, index: usize) -> Result<Option<Change>> {
        let Some(change) = &self.entries[index].change else {
            return Ok(None);
        };
        let mut result = Some(change.revert());
        for later in simplify(&self.entries[index + 1..]) {
            if result.is_none() {
                break;
            }
            result = merge_opt(later.change.as_ref(), result.as_ref())?.0;
        }
        Ok(result)
    }
}

/// Drop adjacent pairs that cancel out: a local change or redo followed by
/// its undo, and an undo followed by its redo.
fn simplify(entries: &[Entry]) -> Vec<&Entry> {
    let mut out: Vec<&Entry> = Vec::with_capacity(entries.len());
    for entry in entries {
        let cancels = match (out.last().map(|e| e.tag), entry.tag) {
            (Some(Tag::Local | Tag::Redo), Tag::Undo) => true,
            (Some(Tag::Undo), Tag::Redo) => true,
            _ => false,
        };
        if cancels {
            out.pop();
        } else {
            out.push(entry);
        }
    }
    out
}
