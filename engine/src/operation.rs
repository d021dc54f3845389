//! Operations: identified changes with causal metadata.
//!
//! An operation wraps a [`Change`] with the ids needed to place it in a
//! journal. `basis` is the last journal entry the author had seen and
//! `parent` is the author's own previous operation.

use crate::change::{merge_opt, Change};
use crate::error::{Error, Result};
use crate::OperationId;
use serde::{Deserialize, Serialize};

/// A change with an identity and causal position.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Operation {
    /// Globally unique id
    pub id: OperationId,
    /// Last journal entry seen by the author, `None` for the journal start
    pub basis: Option<OperationId>,
    /// Author's previous operation, if any
    pub parent: Option<OperationId>,
    /// The change; `None` once merging has cancelled it out
    pub change: Option<Change>,
}

impl Operation {
    /// Create a new operation.
    pub fn new(
        id: impl Into<OperationId>,
        basis: Option<OperationId>,
        parent: Option<OperationId>,
        change: Option<Change>,
    ) -> Self {
        Self {
            id: id.into(),
            basis,
            parent,
            change,
        }
    }

    /// The same operation carrying a different change.
    pub fn with_change(&self, change: Option<Change>) -> Self {
        Self {
            id: self.id.clone(),
            basis: self.basis.clone(),
            parent: self.parent.clone(),
            change,
        }
    }

    /// Merge two operations. Returns `(other', self')` like
    /// [`Change::merge`].
    pub fn merge(&self, other: &Operation) -> Result<(Operation, Operation)> {
        if self.id == other.id {
            return Err(Error::MergeWithSelf(self.id.clone()));
        }
        let (right, left) = merge_opt(self.change.as_ref(), other.change.as_ref())?;
        Ok((other.with_change(right), self.with_change(left)))
    }
}

/// Merge two concurrent operation sequences made against the same state.
///
/// Returns `(right', left')` where `right'` applies after all of `left` and
/// `left'` applies after all of `right`. Ids and causal metadata are kept;
/// only the changes are transformed.
pub fn merge_ops(
    left: &[Operation],
    right: &[Operation],
) -> Result<(Vec<Operation>, Vec<Operation>)> {
    let mut left = left.to_vec();
    let mut right_out = Vec::with_capacity(right.len());
    for op in right {
        let mut op = op.clone();
        for l in left.iter_mut() {
            let (r, l2) = l.merge(&op)?;
            op = r;
            *l = l2;
        }
        right_out.push(op);
    }
    Ok((right_out, left))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::value::Value;

    fn insert(id: &str, offset: usize, text: &str) -> Operation {
        Operation::new(
            id,
            None,
            None,
            Some(Change::splice(offset, Value::text(""), Value::text(text))),
        )
    }

    fn apply(v: &Value, ops: &[Operation]) -> Value {
        ops.iter().fold(v.clone(), |v, op| match &op.change {
            Some(c) => v.apply(c).unwrap(),
            None => v,
        })
    }

    #[test]
    fn merge_with_self_fails() {
        let op = insert("a", 0, "x");
        assert_eq!(op.merge(&op), Err(Error::MergeWithSelf("a".into())));
    }

    #[test]
    fn merge_keeps_ids() {
        let left = insert("l", 0, "x");
        let right = insert("r", 0, "y");
        let (r, l) = left.merge(&right).unwrap();
        assert_eq!(r.id, "r");
        assert_eq!(l.id, "l");
    }

    #[test]
    fn merge_ops_converges() {
        let v = Value::text("abc");
        let left = vec![insert("l1", 0, "x"), insert("l2", 4, "y")];
        let right = vec![insert("r1", 3, "z"), insert("r2", 0, "w")];
        let (right_after, left_after) = merge_ops(&left, &right).unwrap();
        let a = apply(&apply(&v, &left), &right_after);
        let b = apply(&apply(&v, &right), &left_after);
        assert_eq!(a, b);
    }

    #[test]
    fn merge_ops_empty_sides() {
        let ops = vec![insert("a", 0, "x")];
        let (r, l) = merge_ops(&ops, &[]).unwrap();
        assert!(r.is_empty());
        assert_eq!(l, ops);
        let (r, l) = merge_ops(&[], &ops).unwrap();
        assert_eq!(r, ops);
        assert!(l.is_empty());
    }

    #[test]
    fn null_change_passes_through() {
        let left = Operation::new("l", None, None, None);
        let right = insert("r", 0, "x");
        let (r, l) = left.merge(&right).unwrap();
        assert_eq!(r, right);
        assert_eq!(l.change, None);
    }
}
