//! The change algebra.
//!
//! A [`Change`] describes an edit to a [`Value`]. Every change can be applied,
//! reverted, and merged against a concurrent change. Merging is the core of
//! the engine: for changes `L` and `R` made against the same value,
//! `L.merge(&R)` returns `(R', L')` such that
//!
//! ```text
//! v.apply(L).apply(R') == v.apply(R).apply(L')
//! ```
//!
//! When both sides contend for the same slot the left argument wins.

mod path;
mod range;
mod sequence;

pub use path::PathKey;

use crate::error::{Error, Result};
use crate::value::Value;
use serde::{Deserialize, Serialize};

/// Result of merging two changes: `(right_after_left, left_after_right)`.
/// `None` means the transformed change has no effect.
pub type Merged = (Option<Change>, Option<Change>);

/// Replace a whole value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Replace {
    pub before: Value,
    pub after: Value,
}

/// Replace `before` at `offset` of a sequence with `after`.
///
/// When `before` and `after` are both counters the splice is an increment by
/// `after - before` and never conflicts with other increments.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Splice {
    pub offset: usize,
    pub before: Value,
    pub after: Value,
}

/// Move `count` items starting at `offset` by `distance` positions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Move {
    pub offset: usize,
    pub count: usize,
    pub distance: isize,
}

/// Set a map key. A nil `before` means the key was absent; a nil `after`
/// removes it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Set {
    pub key: String,
    pub before: Value,
    pub after: Value,
}

/// Apply a change to a descendant.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PathChange {
    pub path: Vec<PathKey>,
    pub change: Box<Change>,
}

/// Apply the same change to every list item in `[offset, offset + count)`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Range {
    pub offset: usize,
    pub count: usize,
    pub change: Box<Change>,
}

/// An edit to a [`Value`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "value", rename_all = "camelCase")]
pub enum Change {
    Replace(Replace),
    Splice(Splice),
    Move(Move),
    Set(Set),
    Path(PathChange),
    /// Changes applied in order.
    ChangeSet(Vec<Change>),
    Range(Range),
}

impl Change {
    pub fn replace(before: Value, after: Value) -> Self {
        Change::Replace(Replace { before, after })
    }

    pub fn splice(offset: usize, before: Value, after: Value) -> Self {
        Change::Splice(Splice {
            offset,
            before,
            after,
        })
    }

    /// Splice inserting the items of `items` at `offset`.
    pub fn insert(offset: usize, items: Value) -> Result<Self> {
        Ok(Change::splice(offset, items.empty_like()?, items))
    }

    /// Splice removing `items`, which must currently sit at `offset`.
    pub fn remove(offset: usize, items: Value) -> Result<Self> {
        Ok(Change::splice(offset, items.clone(), items.empty_like()?))
    }

    /// Counter increment expressed as a splice from `from` to `to`.
    pub fn increment(from: i64, to: i64) -> Self {
        Change::splice(0, Value::Counter(from), Value::Counter(to))
    }

    pub fn moving(offset: usize, count: usize, distance: isize) -> Self {
        Change::Move(Move {
            offset,
            count,
            distance,
        })
    }

    pub fn set(key: impl Into<String>, before: Value, after: Value) -> Self {
        Change::Set(Set {
            key: key.into(),
            before,
            after,
        })
    }

    /// Wrap `change` so it applies at `path`. An empty path returns the
    /// change itself.
    pub fn at(path: Vec<PathKey>, change: Change) -> Self {
        if path.is_empty() {
            return change;
        }
        Change::Path(PathChange {
            path,
            change: Box::new(change),
        })
    }

    pub fn range(offset: usize, count: usize, change: Change) -> Self {
        Change::Range(Range {
            offset,
            count,
            change: Box::new(change),
        })
    }

    /// Collapse a list of changes: empty is `None`, a single change is
    /// returned as-is.
    pub fn chain(mut changes: Vec<Change>) -> Option<Change> {
        match changes.len() {
            0 => None,
            1 => changes.pop(),
            _ => Some(Change::ChangeSet(changes)),
        }
    }

    /// The inverse change: `v.apply(c).apply(c.revert()) == v`.
    pub fn revert(&self) -> Change {
        match self {
            Change::Replace(r) => Change::replace(r.after.clone(), r.before.clone()),
            Change::Splice(s) => Change::splice(s.offset, s.after.clone(), s.before.clone()),
            Change::Move(m) => Change::Move(m.revert()),
            Change::Set(s) => Change::set(s.key.clone(), s.after.clone(), s.before.clone()),
            Change::Path(p) => Change::at(p.path.clone(), p.change.revert()),
            Change::ChangeSet(changes) => {
                Change::ChangeSet(changes.iter().rev().map(Change::revert).collect())
            }
            Change::Range(r) => Change::range(r.offset, r.count, r.change.revert()),
        }
    }

    /// Whether applying the change can never alter a value.
    pub fn is_noop(&self) -> bool {
        match self {
            Change::Replace(r) => r.before == r.after,
            Change::Splice(s) => s.before == s.after,
            Change::Move(m) => m.is_noop(),
            Change::Set(s) => s.before == s.after,
            Change::Path(p) => p.change.is_noop(),
            Change::ChangeSet(changes) => changes.iter().all(Change::is_noop),
            Change::Range(r) => r.count == 0 || r.change.is_noop(),
        }
    }

    /// Flatten nested change sets and drop no-ops.
    pub fn simplify(self) -> Option<Change> {
        match self {
            Change::ChangeSet(changes) => {
                let mut flat = Vec::with_capacity(changes.len());
                for change in changes {
                    match change.simplify() {
                        Some(Change::ChangeSet(inner)) => flat.extend(inner),
                        Some(other) => flat.push(other),
                        None => {}
                    }
                }
                Change::chain(flat)
            }
            Change::Path(p) => {
                let inner = p.change.simplify()?;
                Some(Change::at(p.path, inner))
            }
            Change::Range(r) => {
                if r.count == 0 {
                    return None;
                }
                let inner = r.change.simplify()?;
                Some(Change::range(r.offset, r.count, inner))
            }
            other if other.is_noop() => None,
            other => Some(other),
        }
    }

    /// Merge against a concurrent change. Returns `(other', self')`: `other'`
    /// applies after `self`, `self'` applies after `other`.
    pub fn merge(&self, other: &Change) -> Result<Merged> {
        match (self, other) {
            (Change::ChangeSet(left), _) => {
                let mut right = Some(other.clone());
                let mut out = Vec::with_capacity(left.len());
                for change in left {
                    let (r, l) = merge_opt(Some(change), right.as_ref())?;
                    right = r;
                    out.extend(l);
                }
                Ok((right, Change::chain(out)))
            }
            (_, Change::ChangeSet(right)) => {
                let mut left = Some(self.clone());
                let mut out = Vec::with_capacity(right.len());
                for change in right {
                    let (r, l) = merge_opt(left.as_ref(), Some(change))?;
                    left = l;
                    out.extend(r);
                }
                Ok((Change::chain(out), left))
            }
            (Change::Path(_), _) | (_, Change::Path(_)) => path::merge_paths(self, other),
            (Change::Replace(l), Change::Replace(r)) => Ok((
                None,
                Some(Change::replace(r.after.clone(), l.after.clone())),
            )),
            (Change::Replace(l), _) => {
                let before = l.before.apply(other).map_err(Error::into_merge_error)?;
                Ok((None, Some(Change::replace(before, l.after.clone()))))
            }
            (_, Change::Replace(r)) => {
                let before = r.before.apply(self).map_err(Error::into_merge_error)?;
                Ok((Some(Change::replace(before, r.after.clone())), None))
            }
            (Change::Splice(l), Change::Splice(r)) => sequence::merge_splices(l, r),
            (Change::Move(l), Change::Move(r)) => sequence::merge_moves(l, r),
            (Change::Move(m), Change::Splice(s)) => sequence::merge_move_splice(m, s),
            (Change::Splice(s), Change::Move(m)) => {
                let (splice, moved) = sequence::merge_move_splice(m, s)?;
                Ok((moved, splice))
            }
            (Change::Range(r), Change::Splice(s)) => range::merge_range_splice(r, s),
            (Change::Splice(s), Change::Range(r)) => {
                let (splice, ranged) = range::merge_range_splice(r, s)?;
                Ok((ranged, splice))
            }
            (Change::Range(r), Change::Move(m)) => range::merge_range_move(r, m),
            (Change::Move(m), Change::Range(r)) => {
                let (moved, ranged) = range::merge_range_move(r, m)?;
                Ok((ranged, moved))
            }
            (Change::Range(l), Change::Range(r)) => range::merge_ranges(l, r),
            (Change::Set(l), Change::Set(r)) => {
                if l.key != r.key {
                    return Ok((Some(other.clone()), Some(self.clone())));
                }
                Ok((
                    None,
                    Some(Change::set(l.key.clone(), r.after.clone(), l.after.clone())),
                ))
            }
            (l, r) => Err(Error::invalid_operation(format!(
                "cannot merge {} with {}",
                l.kind(),
                r.kind()
            ))),
        }
    }

    /// Name of the variant, used in error messages.
    pub fn kind(&self) -> &'static str {
        match self {
            Change::Replace(_) => "replace",
            Change::Splice(_) => "splice",
            Change::Move(_) => "move",
            Change::Set(_) => "set",
            Change::Path(_) => "path",
            Change::ChangeSet(_) => "change set",
            Change::Range(_) => "range",
        }
    }
}

/// [`Change::merge`] where either side may be absent.
pub fn merge_opt(left: Option<&Change>, right: Option<&Change>) -> Result<Merged> {
    match (left, right) {
        (Some(l), Some(r)) => l.merge(r),
        (l, r) => Ok((r.cloned(), l.cloned())),
    }
}

impl Move {
    pub fn is_noop(&self) -> bool {
        self.count == 0 || self.distance == 0
    }

    pub fn revert(&self) -> Move {
        Move {
            offset: self.offset.wrapping_add_signed(self.distance),
            count: self.count,
            distance: -self.distance,
        }
    }

    /// The touched region `[start, end)` together with the end of the moved
    /// block, as `(start, block_end, end)`. `None` if the bounds overflow.
    pub fn span(&self) -> Option<(usize, usize, usize)> {
        let block_end = self.offset.checked_add(self.count)?;
        let shift = self.distance.unsigned_abs();
        if self.distance >= 0 {
            Some((self.offset, block_end, block_end.checked_add(shift)?))
        } else {
            Some((self.offset.checked_sub(shift)?, block_end, block_end))
        }
    }

    /// The smallest sequence length this move touches.
    pub fn extent(&self) -> Option<usize> {
        self.span().map(|(_, _, end)| end)
    }

    /// Whether the move is in bounds for a sequence of `len` items.
    pub fn fits(&self, len: usize) -> bool {
        self.extent().is_some_and(|end| end <= len)
    }

    /// Where the item at `index` ends up after the move.
    pub fn map_index(&self, index: usize) -> usize {
        let Some((start, block_end, end)) = self.span() else {
            return index;
        };
        if (self.offset..block_end).contains(&index) {
            index.wrapping_add_signed(self.distance)
        } else if !(start..end).contains(&index) {
            index
        } else if self.distance > 0 {
            index - self.count
        } else {
            index + self.count
        }
    }

    /// Apply the move to a slice. Items are left in place unless the move
    /// [fits](Move::fits).
    pub fn permute<T: Clone>(&self, items: &[T]) -> Vec<T> {
        let mut out = items.to_vec();
        if self.is_noop() || !self.fits(out.len()) {
            return out;
        }
        if let Some((start, _, end)) = self.span() {
            if self.distance > 0 {
                out[start..end].rotate_left(self.count);
            } else {
                out[start..end].rotate_right(self.count);
            }
        }
        out
    }
}

/// `offset + len` for a merge, failing on overflow.
fn end_of(offset: usize, len: usize) -> Result<usize> {
    offset
        .checked_add(len)
        .ok_or_else(|| Error::invalid_operation(format!("offset {offset} + {len} overflows")))
}
