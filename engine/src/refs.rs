//! References that follow the value they point at.
//!
//! A [`RefPath`] addresses a location inside a document: a map key, a list
//! element, or a caret between sequence items. Applying changes to a path
//! moves it along with the content it denotes, or reports that the content
//! was removed.

use crate::change::{Change, PathKey};
use crate::client_log::ClientLog;
use crate::error::{Error, Result};
use crate::log::Log;
use crate::value::Value;
use crate::OperationId;
use serde::{Deserialize, Serialize};
use std::fmt;

/// How an index segment behaves under edits.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum IndexKind {
    /// Tracks an element; deleted with it.
    Pointer,
    /// Left end of a selection; stays before text inserted at the caret.
    Start,
    /// Right end of a selection; moves past text inserted at the caret.
    End,
}

/// One step of a [`RefPath`].
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Segment {
    Key(String),
    Index(usize, IndexKind),
}

impl Segment {
    pub fn key(k: impl Into<String>) -> Self {
        Segment::Key(k.into())
    }

    pub fn pointer(i: usize) -> Self {
        Segment::Index(i, IndexKind::Pointer)
    }

    pub fn start(i: usize) -> Self {
        Segment::Index(i, IndexKind::Start)
    }

    pub fn end(i: usize) -> Self {
        Segment::Index(i, IndexKind::End)
    }

    /// Whether a change addressed at `key` addresses this segment.
    fn addressed_by(&self, key: &PathKey) -> bool {
        match (self, key) {
            (Segment::Key(a), PathKey::Key(b)) => a == b,
            (Segment::Index(a, IndexKind::Pointer), PathKey::Index(b)) => a == b,
            _ => false,
        }
    }

    fn encode(&self) -> String {
        match self {
            Segment::Key(k) => k.clone(),
            Segment::Index(i, IndexKind::Pointer) => i.to_string(),
            Segment::Index(i, IndexKind::Start) => format!("{i}+"),
            Segment::Index(i, IndexKind::End) => format!("{i}-"),
        }
    }

    fn decode(s: &str) -> Self {
        let (digits, kind) = match s.as_bytes().last() {
            Some(b'+') => (&s[..s.len() - 1], IndexKind::Start),
            Some(b'-') => (&s[..s.len() - 1], IndexKind::End),
            _ => (s, IndexKind::Pointer),
        };
        if !digits.is_empty() && digits.bytes().all(|b| b.is_ascii_digit()) {
            if let Ok(i) = digits.parse() {
                return Segment::Index(i, kind);
            }
        }
        Segment::Key(s.to_string())
    }
}

/// A path into a document that survives edits.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(from = "Vec<String>", into = "Vec<String>")]
pub struct RefPath(Vec<Segment>);

impl RefPath {
    pub fn new(segments: Vec<Segment>) -> Self {
        Self(segments)
    }

    pub fn segments(&self) -> &[Segment] {
        &self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// A new path with `segment` in front.
    pub fn prepend(&self, segment: Segment) -> Self {
        let mut segments = Vec::with_capacity(self.0.len() + 1);
        segments.push(segment);
        segments.extend(self.0.iter().cloned());
        Self(segments)
    }

    /// A new path with `segment` at the end.
    pub fn append(&self, segment: Segment) -> Self {
        let mut segments = self.0.clone();
        segments.push(segment);
        Self(segments)
    }

    /// String form of each segment: keys verbatim, indices as decimal digits
    /// with `+` for a start caret and `-` for an end caret.
    ///
    /// Map keys made only of digits decode as indices.
    pub fn encode(&self) -> Vec<String> {
        self.0.iter().map(Segment::encode).collect()
    }

    pub fn decode<S: AsRef<str>>(parts: &[S]) -> Self {
        Self(parts.iter().map(|p| Segment::decode(p.as_ref())).collect())
    }

    /// The value at this path. Carets sit between items and resolve to
    /// nothing.
    pub fn resolve<'a>(&self, value: &'a Value) -> Option<&'a Value> {
        self.0.iter().try_fold(value, |v, seg| match seg {
            Segment::Key(k) => v.get(k),
            Segment::Index(i, IndexKind::Pointer) => v.at(*i),
            Segment::Index(_, _) => None,
        })
    }

    /// The path as change-addressing keys. `None` if it ends in a caret.
    pub fn keys(&self) -> Option<Vec<PathKey>> {
        self.0
            .iter()
            .map(|seg| match seg {
                Segment::Key(k) => Some(PathKey::Key(k.clone())),
                Segment::Index(i, IndexKind::Pointer) => Some(PathKey::Index(*i)),
                Segment::Index(_, _) => None,
            })
            .collect()
    }

    /// Whether the location exists in `value`, carets included.
    pub fn locates(&self, value: &Value) -> bool {
        locates(&self.0, value)
    }

    /// Follow a sequence of changes. Returns `None` once the referenced
    /// location has been removed.
    pub fn apply<'a>(&self, changes: impl IntoIterator<Item = &'a Change>) -> Option<RefPath> {
        let mut segments = self.0.clone();
        for change in changes {
            segments = transform(&segments, change)?;
        }
        Some(Self(segments))
    }
}

impl From<Vec<String>> for RefPath {
    fn from(parts: Vec<String>) -> Self {
        Self::decode(&parts)
    }
}

impl From<RefPath> for Vec<String> {
    fn from(path: RefPath) -> Self {
        path.encode()
    }
}

impl fmt::Display for RefPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.encode().join("/"))
    }
}

fn locates(path: &[Segment], value: &Value) -> bool {
    match path.split_first() {
        None => true,
        Some((Segment::Key(k), rest)) => value.get(k).is_some_and(|v| locates(rest, v)),
        Some((Segment::Index(i, IndexKind::Pointer), rest)) => {
            value.at(*i).is_some_and(|v| locates(rest, v))
        }
        Some((Segment::Index(i, _), rest)) => {
            rest.is_empty() && value.is_sequence() && *i <= value.len()
        }
    }
}

fn transform(path: &[Segment], change: &Change) -> Option<Vec<Segment>> {
    match change {
        Change::ChangeSet(changes) => changes
            .iter()
            .try_fold(path.to_vec(), |p, c| transform(&p, c)),
        Change::Path(p) => {
            if p.path.len() > path.len() {
                // Below the referenced location, or on a different branch.
                return Some(path.to_vec());
            }
            if !path.iter().zip(&p.path).all(|(seg, key)| seg.addressed_by(key)) {
                return Some(path.to_vec());
            }
            let depth = p.path.len();
            let rest = transform(&path[depth..], &p.change)?;
            let mut out = path[..depth].to_vec();
            out.extend(rest);
            Some(out)
        }
        _ => transform_here(path, change),
    }
}

/// Transform a path by a change applied at the path's root.
fn transform_here(path: &[Segment], change: &Change) -> Option<Vec<Segment>> {
    let Some((seg, rest)) = path.split_first() else {
        return Some(Vec::new());
    };
    let with_index = |i: usize, kind: IndexKind| {
        let mut out = Vec::with_capacity(path.len());
        out.push(Segment::Index(i, kind));
        out.extend_from_slice(rest);
        out
    };

    match (change, seg) {
        (Change::Replace(_), _) => None,
        (Change::Set(s), Segment::Key(k)) if *k == s.key => {
            locates(rest, &s.after).then(|| path.to_vec())
        }
        (Change::Splice(s), Segment::Index(i, kind)) if s.before.is_sequence() => {
            let (o, removed, added) = (s.offset, s.before.len(), s.after.len());
            let end = o.saturating_add(removed);
            let i = *i;
            let moved = match kind {
                IndexKind::Pointer if (o..end).contains(&i) => return None,
                IndexKind::Pointer if i >= end => (i - removed).saturating_add(added),
                IndexKind::Pointer => i,
                IndexKind::Start if i <= o => i,
                IndexKind::Start if i < end => o,
                IndexKind::Start => (i - removed).saturating_add(added),
                IndexKind::End if i < o => i,
                IndexKind::End if i < end || (removed == 0 && i == o) => o.saturating_add(added),
                IndexKind::End => (i - removed).saturating_add(added),
            };
            Some(with_index(moved, *kind))
        }
        (Change::Move(m), Segment::Index(i, kind)) => {
            let moved = match kind {
                IndexKind::Pointer | IndexKind::Start => m.map_index(*i),
                IndexKind::End if *i == 0 => 0,
                IndexKind::End => m.map_index(i - 1).saturating_add(1),
            };
            Some(with_index(moved, *kind))
        }
        (Change::Range(r), Segment::Index(i, IndexKind::Pointer))
            if (r.offset..r.offset.saturating_add(r.count)).contains(i) =>
        {
            let inner = transform(rest, &r.change)?;
            let mut out = vec![seg.clone()];
            out.extend(inner);
            Some(out)
        }
        _ => Some(path.to_vec()),
    }
}

/// A path anchored at a journal position.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Ref {
    /// Last journal entry included in the view the path was taken from
    pub basis: Option<OperationId>,
    /// Author's last own operation included in that view
    pub parent: Option<OperationId>,
    pub path: RefPath,
}

impl Ref {
    pub fn new(basis: Option<OperationId>, parent: Option<OperationId>, path: RefPath) -> Self {
        Self {
            basis,
            parent,
            path,
        }
    }

    /// Bring the path up to the journal tip.
    pub fn update(&self, log: &Log) -> Result<Ref> {
        let target = log.merge_target(self.basis.as_ref(), self.parent.as_ref())?;
        let path = self
            .path
            .apply(target.iter().filter_map(|op| op.change.as_ref()))
            .ok_or(Error::PathInvalidated)?;
        Ok(Ref::new(log.tip().cloned(), None, path))
    }

    /// Bring the path up to a client's local view: the journal it has
    /// reconciled plus its pending operations.
    pub fn update_client(&self, log: &Log, client: &ClientLog) -> Result<Ref> {
        if client.server_index() != log.len() {
            return Err(Error::ClientLogNeedsReconcile {
                server_index: client.server_index(),
                log_len: log.len(),
            });
        }

        let pending = client.rebased();
        let own = self
            .parent
            .as_ref()
            .and_then(|parent| pending.iter().position(|op| op.id == *parent));
        let changes: Vec<&Change> = match own {
            Some(k) => {
                let basis_idx = match &self.basis {
                    Some(basis) => Some(
                        log.index_of(basis)
                            .ok_or_else(|| Error::MissingParentOrBasis(basis.clone()))?,
                    ),
                    None => None,
                };
                pending[k + 1..]
                    .iter()
                    .chain(client.merge_chain().iter().filter(|op| {
                        match (basis_idx, log.index_of(&op.id)) {
                            (Some(b), Some(i)) => i > b,
                            _ => true,
                        }
                    }))
                    .filter_map(|op| op.change.as_ref())
                    .collect()
            }
            None => {
                let path = self.update(log)?.path;
                return path
                    .apply(pending.iter().filter_map(|op| op.change.as_ref()))
                    .map(|path| {
                        Ref::new(
                            log.tip().cloned(),
                            pending.last().map(|op| op.id.clone()),
                            path,
                        )
                    })
                    .ok_or(Error::PathInvalidated);
            }
        };
        let path = self.path.apply(changes).ok_or(Error::PathInvalidated)?;
        Ok(Ref::new(
            log.tip().cloned(),
            pending.last().map(|op| op.id.clone()),
            path,
        ))
    }
}
