//! Convergent streams of changes.
//!
//! A [`Stream`] is a node in an append-only chain of values. Appending to a
//! node that already has successors rebases the new change past them, so
//! every writer ends up on the same final value no matter which node it
//! appended to. Nodes are immutable once published and can be shared across
//! threads.
//!
//! All nodes of one stream share a [`Notifier`] through which subscribers
//! learn about appends.

mod branch;
mod fold;
mod substream;
mod undo;

pub use branch::Branch;
pub use fold::Fold;
pub use substream::Substream;
pub use undo::UndoStream;

use crate::change::Change;
use crate::error::{Error, Result};
use crate::value::Value;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, OnceLock, PoisonError};
use tracing::trace;

/// Identifies a registered change handler.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct HandlerId(u64);

type Handler = Arc<dyn Fn() + Send + Sync>;

/// Subscriber registry shared by every node of a stream.
#[derive(Default)]
pub struct Notifier {
    handlers: Mutex<Vec<(HandlerId, Handler)>>,
    next_id: AtomicU64,
}

impl Notifier {
    /// Register a handler, called after every append.
    pub fn on(&self, handler: impl Fn() + Send + Sync + 'static) -> HandlerId {
        let id = HandlerId(self.next_id.fetch_add(1, Ordering::Relaxed));
        self.handlers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push((id, Arc::new(handler)));
        id
    }

    /// Remove a handler. Returns false if it was not registered.
    pub fn off(&self, id: HandlerId) -> bool {
        let mut handlers = self.handlers.lock().unwrap_or_else(PoisonError::into_inner);
        let before = handlers.len();
        handlers.retain(|(h, _)| *h != id);
        handlers.len() != before
    }

    /// Call every registered handler. Handlers registered or removed while
    /// this runs take effect on the next notification.
    pub fn notify(&self) {
        let snapshot: Vec<Handler> = self
            .handlers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .map(|(_, h)| Arc::clone(h))
            .collect();
        for handler in snapshot {
            handler();
        }
    }
}

impl fmt::Debug for Notifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let count = self
            .handlers
            .lock()
            .map(|h| h.len())
            .unwrap_or_default();
        f.debug_struct("Notifier").field("handlers", &count).finish()
    }
}

struct Node {
    notifier: Arc<Notifier>,
    value: Value,
    next: OnceLock<(Option<Change>, Stream)>,
}

impl Drop for Node {
    // Unlink successors one at a time so long chains don't recurse.
    fn drop(&mut self) {
        let mut next = self.next.take();
        while let Some((_, Stream(node))) = next {
            next = match Arc::into_inner(node) {
                Some(mut node) => node.next.take(),
                None => None,
            };
        }
    }
}

/// A node of a convergent stream.
#[derive(Clone)]
pub struct Stream(Arc<Node>);

/// Result of linking a change into a stream.
pub(crate) struct Linked {
    /// Node holding the caller's change applied to the node it appended to
    pub head: Stream,
    /// The former tail the change was published at, or `None` if merging
    /// absorbed it into the existing chain
    pub published_at: Option<Stream>,
}

impl Stream {
    /// Start a new stream at `value`.
    pub fn new(value: Value) -> Self {
        Self::node(Arc::new(Notifier::default()), value)
    }

    fn node(notifier: Arc<Notifier>, value: Value) -> Self {
        Stream(Arc::new(Node {
            notifier,
            value,
            next: OnceLock::new(),
        }))
    }

    pub fn value(&self) -> &Value {
        &self.0.value
    }

    /// The change leading out of this node and the node it leads to.
    pub fn next(&self) -> Option<(Option<Change>, Stream)> {
        self.0.next.get().cloned()
    }

    /// Follow the chain to its current end.
    pub fn latest(&self) -> Stream {
        let mut node = self.clone();
        while let Some((_, next)) = node.next() {
            node = next;
        }
        node
    }

    /// Append a local change. Local changes win ties against changes already
    /// in the stream.
    pub fn append(&self, change: Change) -> Result<Stream> {
        Ok(self.link(change, true)?.head)
    }

    /// Append a change that came from elsewhere. Changes already in the
    /// stream win ties.
    pub fn reverse_append(&self, change: Change) -> Result<Stream> {
        Ok(self.link(change, false)?.head)
    }

    pub fn on(&self, handler: impl Fn() + Send + Sync + 'static) -> HandlerId {
        self.0.notifier.on(handler)
    }

    pub fn off(&self, id: HandlerId) -> bool {
        self.0.notifier.off(id)
    }

    pub fn notify(&self) {
        self.0.notifier.notify();
    }

    /// Whether two handles refer to the same node.
    pub fn same_node(&self, other: &Stream) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }

    fn set_next(&self, change: Option<Change>, next: Stream) -> bool {
        self.0.next.set((change, next)).is_ok()
    }

    pub(crate) fn link(&self, change: Change, local: bool) -> Result<Linked> {
        let notifier = Arc::clone(&self.0.notifier);
        let head = Stream::node(Arc::clone(&notifier), self.0.value.apply(&change)?);

        let mut base = self.clone();
        let mut current = head.clone();
        let mut pending = change;
        let published_at = loop {
            let Some((theirs, successor)) = base.next() else {
                if base.set_next(Some(pending.clone()), current.clone()) {
                    break Some(base);
                }
                // Lost the race for the tail; merge against the winner.
                continue;
            };

            let (theirs_after, pending_after) = match &theirs {
                None => (None, Some(pending.clone())),
                Some(theirs) if local => pending.merge(theirs)?,
                Some(theirs) => {
                    let (pending_after, theirs_after) = theirs.merge(&pending)?;
                    (theirs_after, pending_after)
                }
            };
            match pending_after {
                None => {
                    current.set_next(theirs_after, successor);
                    break None;
                }
                Some(next_pending) => {
                    let value = successor
                        .value()
                        .apply(&next_pending)
                        .map_err(Error::into_merge_error)?;
                    let node = Stream::node(Arc::clone(&notifier), value);
                    current.set_next(theirs_after, node.clone());
                    current = node;
                    base = successor;
                    pending = next_pending;
                }
            }
        };

        trace!(published = published_at.is_some(), "linked change into stream");
        notifier.notify();
        Ok(Linked { head, published_at })
    }
}

impl fmt::Debug for Stream {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Stream")
            .field("value", &self.0.value)
            .field("has_next", &self.0.next.get().is_some())
            .finish()
    }
}

/// The contract shared by [`Stream`] and the streams derived from it.
pub trait Streamer: Sized + Clone {
    /// Value at this node.
    fn current(&self) -> Value;

    /// Append a change made against [`Streamer::current`].
    fn append(&self, change: Change) -> Result<Self>;

    /// The change leading out of this node and its successor.
    fn next(&self) -> Option<(Option<Change>, Self)>;

    /// Follow the chain to its current end.
    fn latest(&self) -> Self {
        let mut node = self.clone();
        while let Some((_, next)) = node.next() {
            node = next;
        }
        node
    }
}

impl Streamer for Stream {
    fn current(&self) -> Value {
        self.0.value.clone()
    }

    fn append(&self, change: Change) -> Result<Self> {
        Stream::append(self, change)
    }

    fn next(&self) -> Option<(Option<Change>, Self)> {
        Stream::next(self)
    }

    fn latest(&self) -> Self {
        Stream::latest(self)
    }
}
