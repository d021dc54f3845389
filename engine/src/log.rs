//! The server-side journal.
//!
//! Raw operations arrive tagged with a `basis` (last journal entry the author
//! had seen) and a `parent` (the author's previous operation). The log
//! rebases each one against everything committed since its basis, so the
//! rebased sequence can be applied in order starting from the empty
//! document.
//!
//! For every entry the log also keeps a merge chain: the concurrent journal
//! entries transformed past the new operation. A later operation whose
//! parent is that entry picks up its merge target from the chain.

use crate::error::{Error, Result};
use crate::operation::{merge_ops, Operation};
use crate::OperationId;
use std::collections::HashMap;
use tracing::{debug, trace};

/// A rebasing journal of operations.
#[derive(Debug, Clone, Default)]
pub struct Log {
    /// Journal index of the first retained entry
    min_index: usize,
    /// Rebased operations, starting at `min_index`
    rebased: Vec<Operation>,
    /// Merge chain of each retained entry
    merge_chains: Vec<Vec<Operation>>,
    /// Journal index of every id ever appended, including compacted ones
    index: HashMap<OperationId, usize>,
}

impl Log {
    /// Create an empty log.
    pub fn new() -> Self {
        Self::default()
    }

    /// Journal length, counting compacted entries.
    pub fn len(&self) -> usize {
        self.min_index + self.rebased.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Index of the first entry still held in memory.
    pub fn min_index(&self) -> usize {
        self.min_index
    }

    /// Journal index of an operation id.
    pub fn index_of(&self, id: &str) -> Option<usize> {
        self.index.get(id).copied()
    }

    pub fn contains(&self, id: &str) -> bool {
        self.index.contains_key(id)
    }

    /// Id of the last journal entry.
    pub fn tip(&self) -> Option<&OperationId> {
        self.rebased.last().map(|op| &op.id)
    }

    /// The rebased form and merge chain of an entry.
    pub fn get(&self, id: &str) -> Option<(&Operation, &[Operation])> {
        let index = self.index_of(id)?.checked_sub(self.min_index)?;
        Some((&self.rebased[index], &self.merge_chains[index]))
    }

    /// Retained rebased entries, starting at [`Log::min_index`].
    pub fn rebased(&self) -> &[Operation] {
        &self.rebased
    }

    /// Retained rebased entries from journal index `from` onwards.
    pub fn rebased_since(&self, from: usize) -> Result<&[Operation]> {
        if from < self.min_index {
            return Err(Error::LogNeedsBackfilling {
                index: from,
                min_index: self.min_index,
            });
        }
        Ok(self
            .rebased
            .get(from - self.min_index..)
            .unwrap_or_default())
    }

    fn lookup(&self, id: Option<&OperationId>) -> Result<Option<usize>> {
        match id {
            None => Ok(None),
            Some(id) => self
                .index_of(id)
                .map(Some)
                .ok_or_else(|| Error::MissingParentOrBasis(id.clone())),
        }
    }

    /// Journal entries an operation with this basis and parent has not
    /// seen, transformed so they apply after the author's own chain.
    pub fn merge_target(
        &self,
        basis: Option<&OperationId>,
        parent: Option<&OperationId>,
    ) -> Result<Vec<Operation>> {
        self.merge_target_until(basis, parent, self.len())
    }

    /// [`Log::merge_target`] restricted to journal entries before `end`.
    pub fn merge_target_until(
        &self,
        basis: Option<&OperationId>,
        parent: Option<&OperationId>,
        end: usize,
    ) -> Result<Vec<Operation>> {
        let basis_idx = self.lookup(basis)?;
        let parent_idx = self.lookup(parent)?;
        let start = basis_idx.map_or(0, |b| b + 1);
        if start < self.min_index {
            return Err(Error::LogNeedsBackfilling {
                index: start,
                min_index: self.min_index,
            });
        }
        let end = end.clamp(start, self.len()) - self.min_index;

        match parent_idx {
            Some(p) if basis_idx.map_or(true, |b| p > b) && p < end + self.min_index => {
                let offset = p - self.min_index;
                let mut target: Vec<Operation> = self.merge_chains[offset]
                    .iter()
                    .filter(|op| match (basis_idx, self.index_of(&op.id)) {
                        (Some(b), Some(i)) => i > b,
                        _ => true,
                    })
                    .cloned()
                    .collect();
                target.extend_from_slice(&self.rebased[offset + 1..end]);
                Ok(target)
            }
            _ => Ok(self.rebased[start - self.min_index..end].to_vec()),
        }
    }

    /// Rebase an operation against the journal without recording it.
    /// Returns the rebased operation and its merge chain.
    pub fn transform(&self, op: &Operation) -> Result<(Operation, Vec<Operation>)> {
        let target = self.merge_target(op.basis.as_ref(), op.parent.as_ref())?;
        trace!(op_id = %op.id, target = target.len(), "rebasing operation");
        let (mut rebased, chain) =
            merge_ops(&target, std::slice::from_ref(op)).map_err(Error::into_merge_error)?;
        let rebased = rebased
            .pop()
            .ok_or_else(|| Error::invalid_operation("merge dropped the operation"))?;
        Ok((rebased, chain))
    }

    /// Append an operation, returning its journal index. Appending a known
    /// id returns the existing index and changes nothing.
    pub fn append(&mut self, op: Operation) -> Result<usize> {
        if let Some(index) = self.index_of(&op.id) {
            trace!(op_id = %op.id, index, "operation already in log");
            return Ok(index);
        }
        let (rebased, chain) = self.transform(&op)?;
        let index = self.len();
        self.index.insert(op.id.clone(), index);
        self.rebased.push(rebased);
        self.merge_chains.push(chain);
        debug!(op_id = %op.id, index, "appended operation");
        Ok(index)
    }

    /// Drop in-memory entries before `min_index`. Their ids stay known so
    /// later references report [`Error::LogNeedsBackfilling`].
    pub fn compact(&mut self, min_index: usize) {
        let min_index = min_index.min(self.len());
        if min_index <= self.min_index {
            return;
        }
        let drop = min_index - self.min_index;
        self.rebased.drain(..drop);
        self.merge_chains.drain(..drop);
        self.min_index = min_index;
        debug!(min_index, "compacted log");
    }

    /// Iterate over retained rebased operations in journal order.
    pub fn iter(&self) -> impl Iterator<Item = &Operation> {
        self.rebased.iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::change::Change;
    use crate::value::Value;

    fn insert(
        id: &str,
        basis: Option<&str>,
        parent: Option<&str>,
        offset: usize,
        text: &str,
    ) -> Operation {
        Operation::new(
            id,
            basis.map(String::from),
            parent.map(String::from),
            Some(Change::splice(offset, Value::text(""), Value::text(text))),
        )
    }

    fn replay(log: &Log) -> Value {
        log.iter().fold(Value::text(""), |v, op| match &op.change {
            Some(c) => v.apply(c).unwrap(),
            None => v,
        })
    }

    #[test]
    fn overflowing_offset_is_rejected() {
        let mut log = Log::new();
        log.append(insert("a", None, None, 0, "x")).unwrap();
        let bad = Operation::new(
            "b",
            None,
            None,
            Some(Change::splice(usize::MAX, Value::text("y"), Value::text(""))),
        );
        assert!(matches!(log.append(bad), Err(Error::InvalidOperation(_))));
        assert_eq!(log.len(), 1);
        assert!(!log.contains("b"));
    }

    #[test]
    fn append_and_get() {
        let mut log = Log::new();
        assert!(log.is_empty());
        assert_eq!(log.append(insert("a", None, None, 0, "x")).unwrap(), 0);
        assert_eq!(log.len(), 1);
        assert_eq!(log.tip(), Some(&"a".to_string()));
        let (rebased, chain) = log.get("a").unwrap();
        assert_eq!(rebased.id, "a");
        assert!(chain.is_empty());
    }

    #[test]
    fn append_is_idempotent() {
        let mut log = Log::new();
        log.append(insert("a", None, None, 0, "x")).unwrap();
        log.append(insert("b", None, None, 0, "y")).unwrap();
        let before = replay(&log);
        assert_eq!(log.append(insert("a", None, None, 0, "x")).unwrap(), 0);
        assert_eq!(log.len(), 2);
        assert_eq!(replay(&log), before);
    }

    #[test]
    fn missing_basis_leaves_log_unchanged() {
        let mut log = Log::new();
        log.append(insert("a", None, None, 0, "x")).unwrap();
        let result = log.append(insert("b", Some("nope"), None, 0, "y"));
        assert_eq!(result, Err(Error::MissingParentOrBasis("nope".into())));
        let result = log.append(insert("b", None, Some("nope"), 0, "y"));
        assert_eq!(result, Err(Error::MissingParentOrBasis("nope".into())));
        assert_eq!(log.len(), 1);
        assert!(!log.contains("b"));
    }

    #[test]
    fn concurrent_ops_rebase() {
        let mut log = Log::new();
        log.append(insert("a", None, None, 0, "hello")).unwrap();
        log.append(insert("b", Some("a"), None, 5, " world")).unwrap();
        // Written against "hello" without seeing b.
        log.append(insert("c", Some("a"), None, 0, ">")).unwrap();
        assert_eq!(replay(&log), Value::text(">hello world"));
    }

    #[test]
    fn reordered_commit() {
        let mut log = Log::new();
        log.append(insert("op1", None, None, 0, "a")).unwrap();
        log.append(insert("op3", Some("op1"), None, 1, "c")).unwrap();
        log.append(insert("op2", Some("op1"), None, 1, "b")).unwrap();
        assert_eq!(replay(&log), Value::text("acb"));
    }

    #[test]
    fn parent_chain_uses_merge_chain() {
        let mut log = Log::new();
        log.append(insert("base", None, None, 0, "__")).unwrap();
        // Client A writes two ops without seeing B.
        log.append(insert("a1", Some("base"), None, 1, "x")).unwrap();
        log.append(insert("b1", Some("base"), None, 0, "z")).unwrap();
        // a2 inserts right after a1's "x" in A's local view "_x_".
        log.append(insert("a2", Some("base"), Some("a1"), 2, "y"))
            .unwrap();
        assert_eq!(replay(&log), Value::text("z_xy_"));
    }

    #[test]
    fn transform_does_not_mutate() {
        let mut log = Log::new();
        log.append(insert("a", None, None, 0, "x")).unwrap();
        let (rebased, chain) = log.transform(&insert("b", None, None, 0, "y")).unwrap();
        assert_eq!(
            rebased.change,
            Some(Change::splice(1, Value::text(""), Value::text("y")))
        );
        assert_eq!(chain.len(), 1);
        assert_eq!(log.len(), 1);
    }

    #[test]
    fn compacted_basis_needs_backfilling() {
        let mut log = Log::new();
        log.append(insert("a", None, None, 0, "x")).unwrap();
        log.append(insert("b", Some("a"), None, 1, "y")).unwrap();
        log.append(insert("c", Some("b"), None, 2, "z")).unwrap();
        log.compact(2);
        assert_eq!(log.min_index(), 2);
        assert_eq!(log.len(), 3);
        assert!(log.get("a").is_none());

        let result = log.append(insert("d", Some("a"), None, 0, "w"));
        assert_eq!(
            result,
            Err(Error::LogNeedsBackfilling {
                index: 1,
                min_index: 2
            })
        );
        // basis b: the next needed entry is retained
        assert_eq!(log.append(insert("e", Some("b"), None, 0, "w")).unwrap(), 3);
        assert!(log.rebased_since(0).is_err());
        assert_eq!(log.rebased_since(3).map(<[Operation]>::len), Ok(1));
    }

    #[test]
    fn invalid_merge_is_invalid_operation() {
        let mut log = Log::new();
        log.append(Operation::new(
            "a",
            None,
            None,
            Some(Change::set("k", Value::Nil, Value::Counter(1))),
        ))
        .unwrap();
        let result = log.append(insert("b", None, None, 0, "x"));
        assert!(matches!(result, Err(Error::InvalidOperation(_))));
        assert_eq!(log.len(), 1);
    }
}
