use super::{Stream, Streamer};
use crate::change::Change;
use crate::error::Result;
use crate::value::Value;
use std::sync::{Arc, Mutex, PoisonError};
use tracing::debug;

/// How far each side has been exchanged.
#[derive(Debug)]
struct Marks {
    master: Stream,
    local: Stream,
}

/// A private copy of a stream. Changes made on the branch stay local until
/// [`Branch::push`]; changes on the master arrive on [`Branch::pull`].
#[derive(Debug, Clone)]
pub struct Branch {
    node: Stream,
    marks: Arc<Mutex<Marks>>,
}

impl Branch {
    /// Branch off the given master node.
    pub fn new(master: &Stream) -> Self {
        let local = Stream::new(master.value().clone());
        Self {
            node: local.clone(),
            marks: Arc::new(Mutex::new(Marks {
                master: master.clone(),
                local,
            })),
        }
    }

    /// The branch-local stream node.
    pub fn stream(&self) -> &Stream {
        &self.node
    }

    /// Send branch changes made since the last push to the master.
    pub fn push(&self) -> Result<()> {
        let mut marks = self.marks.lock().unwrap_or_else(PoisonError::into_inner);
        let mut pushed = 0;
        while let Some((change, next)) = marks.local.next() {
            if let Some(change) = change {
                marks.master = marks.master.append(change)?;
                pushed += 1;
            }
            marks.local = next;
        }
        debug!(pushed, "pushed branch changes");
        Ok(())
    }

    /// Bring master changes made since the last pull into the branch.
    pub fn pull(&self) -> Result<()> {
        let mut marks = self.marks.lock().unwrap_or_else(PoisonError::into_inner);
        let mut pulled = 0;
        while let Some((change, next)) = marks.master.next() {
            if let Some(change) = change {
                marks.local = marks.local.reverse_append(change)?;
                pulled += 1;
            }
            marks.master = next;
        }
        debug!(pulled, "pulled master changes");
        Ok(())
    }
}

impl Streamer for Branch {
    fn current(&self) -> Value {
        self.node.value().clone()
    }

    fn append(&self, change: Change) -> Result<Self> {
        Ok(Self {
            node: self.node.append(change)?,
            marks: Arc::clone(&self.marks),
        })
    }

    fn next(&self) -> Option<(Option<Change>, Self)> {
        let (change, node) = self.node.next()?;
        Some((
            change,
            Self {
                node,
                marks: Arc::clone(&self.marks),
            },
        ))
    }
}
