use super::{Stream, Streamer};
use crate::change::Change;
use crate::error::Result;
use crate::operation::Operation;
use crate::undo::{Tag, UndoStack};
use crate::value::Value;
use std::sync::{Arc, Mutex, PoisonError};

#[derive(Debug)]
struct History {
    stack: UndoStack,
    /// Every change up to this node has been recorded
    seen: Stream,
    counter: u64,
}

impl History {
    fn record(&mut self, change: Option<Change>, tag: Tag) {
        self.counter += 1;
        let op = Operation::new(format!("undo-{}", self.counter), None, None, change);
        self.stack.push_tagged(&op, tag);
    }

    /// Record changes appended by others up to `until`, or to the end.
    fn sync_until(&mut self, until: Option<&Stream>) {
        while until.map_or(true, |u| !self.seen.same_node(u)) {
            let Some((change, next)) = self.seen.next() else {
                break;
            };
            self.record(change, Tag::Remote);
            self.seen = next;
        }
    }

    /// Record the change published at `at` under `tag`.
    fn record_published(&mut self, at: Option<Stream>, tag: Tag) {
        let Some(at) = at else {
            return;
        };
        self.sync_until(Some(&at));
        if let Some((change, next)) = at.next() {
            self.record(change, tag);
            self.seen = next;
        }
    }
}

/// A stream that tracks local changes so they can be undone and redone.
///
/// Changes appended through this wrapper are recorded as local; changes
/// appended directly to the underlying stream are recorded as remote.
#[derive(Debug, Clone)]
pub struct UndoStream {
    node: Stream,
    history: Arc<Mutex<History>>,
}

impl UndoStream {
    pub fn new(base: Stream) -> Self {
        let history = History {
            stack: UndoStack::new(),
            seen: base.latest(),
            counter: 0,
        };
        Self {
            node: base,
            history: Arc::new(Mutex::new(history)),
        }
    }

    pub fn stream(&self) -> &Stream {
        &self.node
    }

    fn append_tagged(&self, change: Change, tag: Tag) -> Result<Self> {
        let mut history = self.history.lock().unwrap_or_else(PoisonError::into_inner);
        let linked = self.node.link(change, true)?;
        history.record_published(linked.published_at, tag);
        Ok(Self {
            node: linked.head,
            history: Arc::clone(&self.history),
        })
    }

    /// Undo the most recent local change still in effect. Returns `None` if
    /// there is nothing to undo.
    pub fn undo(&self) -> Result<Option<Self>> {
        self.reverse(Tag::Undo)
    }

    /// Redo the most recent undo. Returns `None` if there is nothing to redo.
    pub fn redo(&self) -> Result<Option<Self>> {
        self.reverse(Tag::Redo)
    }

    fn reverse(&self, tag: Tag) -> Result<Option<Self>> {
        let mut history = self.history.lock().unwrap_or_else(PoisonError::into_inner);
        history.sync_until(None);
        let change = match tag {
            Tag::Redo => history.stack.redo()?,
            _ => history.stack.undo()?,
        };
        let Some(change) = change else {
            return Ok(None);
        };
        let tail = history.seen.clone();
        let linked = tail.link(change, true)?;
        history.record_published(linked.published_at, tag);
        Ok(Some(Self {
            node: linked.head,
            history: Arc::clone(&self.history),
        }))
    }
}

impl Streamer for UndoStream {
    fn current(&self) -> Value {
        self.node.value().clone()
    }

    fn append(&self, change: Change) -> Result<Self> {
        self.append_tagged(change, Tag::Local)
    }

    fn next(&self) -> Option<(Option<Change>, Self)> {
        let (change, node) = self.node.next()?;
        Some((
            change,
            Self {
                node,
                history: Arc::clone(&self.history),
            },
        ))
    }
}
