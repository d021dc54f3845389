//! Merging changes addressed at different depths of a value.

use super::{end_of, Change, Merged};
use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::fmt;

/// One step into a value: a map key or a list index.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(untagged)]
pub enum PathKey {
    Index(usize),
    Key(String),
}

impl PathKey {
    pub fn key(k: impl Into<String>) -> Self {
        PathKey::Key(k.into())
    }
}

impl fmt::Display for PathKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PathKey::Index(i) => write!(f, "{i}"),
            PathKey::Key(k) => f.write_str(k),
        }
    }
}

/// Strip nested path wrappers, returning the full path and the innermost
/// change.
fn flatten(change: &Change) -> (Vec<PathKey>, &Change) {
    let mut path = Vec::new();
    let mut inner = change;
    while let Change::Path(p) = inner {
        path.extend(p.path.iter().cloned());
        inner = &p.change;
    }
    (path, inner)
}

/// Push a path over every member of a change set so the set can be merged
/// member by member.
fn distribute(path: &[PathKey], inner: &Change) -> Change {
    match inner {
        Change::ChangeSet(changes) => Change::ChangeSet(
            changes
                .iter()
                .map(|c| Change::at(path.to_vec(), c.clone()))
                .collect(),
        ),
        other => Change::at(path.to_vec(), other.clone()),
    }
}

fn wrap(path: &[PathKey], change: Option<Change>) -> Option<Change> {
    change.map(|c| Change::at(path.to_vec(), c))
}

pub(super) fn merge_paths(left: &Change, right: &Change) -> Result<Merged> {
    let (lpath, linner) = flatten(left);
    let (rpath, rinner) = flatten(right);

    if matches!(linner, Change::ChangeSet(_)) || matches!(rinner, Change::ChangeSet(_)) {
        return distribute(&lpath, linner).merge(&distribute(&rpath, rinner));
    }

    let common = lpath
        .iter()
        .zip(&rpath)
        .take_while(|(l, r)| l == r)
        .count();
    if common < lpath.len() && common < rpath.len() {
        return Ok((Some(right.clone()), Some(left.clone())));
    }

    let prefix = &lpath[..common];
    if lpath.len() == rpath.len() {
        let (r, l) = linner.merge(rinner)?;
        return Ok((wrap(prefix, r), wrap(prefix, l)));
    }

    if lpath.len() < rpath.len() {
        let (nested, structural) =
            merge_nested(linner, &rpath[common], &rpath[common + 1..], rinner, true)?;
        Ok((wrap(prefix, nested), wrap(prefix, structural)))
    } else {
        let (nested, structural) =
            merge_nested(rinner, &lpath[common], &lpath[common + 1..], linner, false)?;
        Ok((wrap(prefix, structural), wrap(prefix, nested)))
    }
}

/// Merge a change at some node with a change to a descendant of that node
/// (`seg` then `rest` below it). Returns `(nested', structural')`, both
/// relative to the node.
fn merge_nested(
    structural: &Change,
    seg: &PathKey,
    rest: &[PathKey],
    inner: &Change,
    structural_is_left: bool,
) -> Result<Merged> {
    let below = || {
        let mut path = Vec::with_capacity(rest.len() + 1);
        path.push(seg.clone());
        path.extend_from_slice(rest);
        path
    };
    let unchanged = || Ok((Some(Change::at(below(), inner.clone())), Some(structural.clone())));

    match (structural, seg) {
        (Change::Replace(r), _) => {
            let nested = Change::at(below(), inner.clone());
            let before = r.before.apply(&nested).map_err(Error::into_merge_error)?;
            Ok((None, Some(Change::replace(before, r.after.clone()))))
        }
        (Change::Set(s), PathKey::Key(key)) => {
            if *key != s.key {
                return unchanged();
            }
            let before = s
                .before
                .apply_at(rest, inner)
                .map_err(Error::into_merge_error)?;
            Ok((None, Some(Change::set(s.key.clone(), before, s.after.clone()))))
        }
        (Change::Splice(s), PathKey::Index(i)) => {
            let end = end_of(s.offset, s.before.len())?;
            if (s.offset..end).contains(i) {
                let mut path = vec![PathKey::Index(i - s.offset)];
                path.extend_from_slice(rest);
                let before = s
                    .before
                    .apply_at(&path, inner)
                    .map_err(Error::into_merge_error)?;
                Ok((None, Some(Change::splice(s.offset, before, s.after.clone()))))
            } else if *i >= end {
                let shifted = end_of(i - s.before.len(), s.after.len())?;
                let mut path = vec![PathKey::Index(shifted)];
                path.extend_from_slice(rest);
                Ok((Some(Change::at(path, inner.clone())), Some(structural.clone())))
            } else {
                unchanged()
            }
        }
        (Change::Move(m), PathKey::Index(i)) => {
            let mut path = vec![PathKey::Index(m.map_index(*i))];
            path.extend_from_slice(rest);
            Ok((Some(Change::at(path, inner.clone())), Some(structural.clone())))
        }
        (Change::Range(r), PathKey::Index(i)) => {
            let end = end_of(r.offset, r.count)?;
            if !(r.offset..end).contains(i) {
                return unchanged();
            }
            let item_change = Change::at(rest.to_vec(), inner.clone());
            let (nested, applied) = if structural_is_left {
                r.change.merge(&item_change)?
            } else {
                let (applied, nested) = item_change.merge(&r.change)?;
                (nested, applied)
            };

            let mut split = Vec::with_capacity(3);
            if *i > r.offset {
                split.push(Change::range(r.offset, i - r.offset, (*r.change).clone()));
            }
            if let Some(applied) = applied {
                split.push(Change::at(vec![PathKey::Index(*i)], applied));
            }
            if end > i + 1 {
                split.push(Change::range(i + 1, end - i - 1, (*r.change).clone()));
            }
            Ok((
                nested.map(|n| Change::at(vec![PathKey::Index(*i)], n)),
                Change::chain(split),
            ))
        }
        (Change::Set(_), PathKey::Index(_)) | (_, PathKey::Key(_)) => {
            Err(Error::invalid_operation(format!(
                "{} cannot address child {seg}",
                structural.kind()
            )))
        }
        (Change::Path(_) | Change::ChangeSet(_), PathKey::Index(_)) => {
            unreachable!("merge_paths flattens paths and distributes change sets")
        }
    }
}
