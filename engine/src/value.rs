//! Document values.
//!
//! A [`Value`] is immutable: every [`Value::apply`] returns a new value and
//! leaves the receiver untouched. Text is stored as UTF-16 code units so that
//! offsets line up with what browser clients report.

use crate::change::{Change, Move, PathKey, Range, Set, Splice};
use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// A sequence of UTF-16 code units.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Text(Vec<u16>);

impl Text {
    /// Wrap raw code units.
    pub fn from_units(units: Vec<u16>) -> Self {
        Self(units)
    }

    /// The raw code units.
    pub fn units(&self) -> &[u16] {
        &self.0
    }

    /// Length in code units.
    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Decode to a Rust string, replacing unpaired surrogates.
    pub fn to_string_lossy(&self) -> String {
        String::from_utf16_lossy(&self.0)
    }
}

impl From<&str> for Text {
    fn from(s: &str) -> Self {
        Self(s.encode_utf16().collect())
    }
}

impl From<String> for Text {
    fn from(s: String) -> Self {
        Self::from(s.as_str())
    }
}

impl fmt::Display for Text {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_string_lossy())
    }
}

/// A document value.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(tag = "type", content = "value", rename_all = "camelCase")]
pub enum Value {
    /// Absent value. Never stored inside a collection slot.
    #[default]
    Nil,
    /// Opaque payload; only `Replace` applies to it.
    Atomic(serde_json::Value),
    /// UTF-16 text.
    Text(Text),
    /// Ordered sequence of values.
    List(Vec<Value>),
    /// String-keyed mapping.
    Map(BTreeMap<String, Value>),
    /// Integer incremented through splices.
    Counter(i64),
}

impl Value {
    /// Text value from a Rust string.
    pub fn text(s: &str) -> Self {
        Value::Text(Text::from(s))
    }

    /// List value.
    pub fn list(items: impl IntoIterator<Item = Value>) -> Self {
        Value::List(items.into_iter().collect())
    }

    /// Map value.
    pub fn map<K: Into<String>>(entries: impl IntoIterator<Item = (K, Value)>) -> Self {
        Value::Map(entries.into_iter().map(|(k, v)| (k.into(), v)).collect())
    }

    /// Opaque atomic value.
    pub fn atomic(payload: serde_json::Value) -> Self {
        Value::Atomic(payload)
    }

    pub fn is_nil(&self) -> bool {
        matches!(self, Value::Nil)
    }

    /// Name of the variant, used in error messages.
    pub fn kind(&self) -> &'static str {
        match self {
            Value::Nil => "nil",
            Value::Atomic(_) => "atomic",
            Value::Text(_) => "text",
            Value::List(_) => "list",
            Value::Map(_) => "map",
            Value::Counter(_) => "counter",
        }
    }

    /// Whether the value is an indexable sequence (text or list).
    pub fn is_sequence(&self) -> bool {
        matches!(self, Value::Text(_) | Value::List(_))
    }

    /// Number of items in a sequence; zero for everything else.
    pub fn len(&self) -> usize {
        match self {
            Value::Text(t) => t.len(),
            Value::List(items) => items.len(),
            _ => 0,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// An empty sequence of the same kind.
    pub fn empty_like(&self) -> Result<Value> {
        match self {
            Value::Text(_) => Ok(Value::Text(Text::default())),
            Value::List(_) => Ok(Value::List(Vec::new())),
            other => Err(Error::invalid_change(format!(
                "{} is not a sequence",
                other.kind()
            ))),
        }
    }

    /// The items in `[start, end)` of a sequence.
    pub fn slice(&self, start: usize, end: usize) -> Result<Value> {
        if start > end || end > self.len() {
            return Err(Error::invalid_change(format!(
                "slice {start}..{end} out of bounds for length {}",
                self.len()
            )));
        }
        match self {
            Value::Text(t) => Ok(Value::Text(Text(t.0[start..end].to_vec()))),
            Value::List(items) => Ok(Value::List(items[start..end].to_vec())),
            other => Err(Error::invalid_change(format!(
                "cannot slice {}",
                other.kind()
            ))),
        }
    }

    /// Concatenate two sequences of the same kind.
    pub fn concat(&self, other: &Value) -> Result<Value> {
        match (self, other) {
            (Value::Text(a), Value::Text(b)) => {
                let mut units = a.0.clone();
                units.extend_from_slice(&b.0);
                Ok(Value::Text(Text(units)))
            }
            (Value::List(a), Value::List(b)) => {
                let mut items = a.clone();
                items.extend(b.iter().cloned());
                Ok(Value::List(items))
            }
            (a, b) => Err(Error::invalid_change(format!(
                "cannot concatenate {} with {}",
                a.kind(),
                b.kind()
            ))),
        }
    }

    /// Look up a map key.
    pub fn get(&self, key: &str) -> Option<&Value> {
        match self {
            Value::Map(entries) => entries.get(key),
            _ => None,
        }
    }

    /// Look up a list element.
    pub fn at(&self, index: usize) -> Option<&Value> {
        match self {
            Value::List(items) => items.get(index),
            _ => None,
        }
    }

    /// The child addressed by a single path key.
    pub fn child(&self, key: &PathKey) -> Option<&Value> {
        match key {
            PathKey::Key(k) => self.get(k),
            PathKey::Index(i) => self.at(*i),
        }
    }

    /// The descendant addressed by a path.
    pub fn descendant(&self, path: &[PathKey]) -> Option<&Value> {
        path.iter().try_fold(self, |value, key| value.child(key))
    }

    /// Replace the child at `key`. A nil child removes a map entry.
    fn with_child(&self, key: &PathKey, child: Value) -> Result<Value> {
        match (self, key) {
            (Value::Map(entries), PathKey::Key(k)) => {
                let mut entries = entries.clone();
                if child.is_nil() {
                    entries.remove(k);
                } else {
                    entries.insert(k.clone(), child);
                }
                Ok(Value::Map(entries))
            }
            (Value::List(items), PathKey::Index(i)) if *i < items.len() => {
                if child.is_nil() {
                    return Err(Error::invalid_change("nil cannot be stored in a list"));
                }
                let mut items = items.clone();
                items[*i] = child;
                Ok(Value::List(items))
            }
            (value, key) => Err(Error::invalid_change(format!(
                "cannot address {key} in {}",
                value.kind()
            ))),
        }
    }

    /// Apply a change, producing a new value.
    pub fn apply(&self, change: &Change) -> Result<Value> {
        match change {
            Change::Replace(r) => {
                if *self != r.before {
                    return Err(Error::invalid_change("replace: before does not match"));
                }
                Ok(r.after.clone())
            }
            Change::Splice(s) => self.apply_splice(s),
            Change::Move(m) => self.apply_move(m),
            Change::Set(s) => self.apply_set(s),
            Change::Path(p) => self.apply_at(&p.path, &p.change),
            Change::ChangeSet(changes) => changes
                .iter()
                .try_fold(self.clone(), |value, c| value.apply(c)),
            Change::Range(r) => self.apply_range(r),
        }
    }

    /// Apply a change to the descendant at `path`.
    pub fn apply_at(&self, path: &[PathKey], change: &Change) -> Result<Value> {
        match path.split_first() {
            None => self.apply(change),
            Some((key, rest)) => {
                let child = self
                    .child(key)
                    .ok_or_else(|| Error::invalid_change(format!("path {key} not found")))?;
                let updated = child.apply_at(rest, change)?;
                self.with_child(key, updated)
            }
        }
    }

    fn apply_splice(&self, s: &Splice) -> Result<Value> {
        if let (Value::Counter(n), Value::Counter(before), Value::Counter(after)) =
            (self, &s.before, &s.after)
        {
            if s.offset != 0 {
                return Err(Error::invalid_change("counter splice must start at 0"));
            }
            return after
                .checked_sub(*before)
                .and_then(|delta| n.checked_add(delta))
                .map(Value::Counter)
                .ok_or_else(|| Error::invalid_change("counter overflow"));
        }

        let end = checked_end(s.offset, s.before.len())?;
        if end > self.len() {
            return Err(Error::invalid_change(format!(
                "splice {}..{end} out of bounds for length {}",
                s.offset,
                self.len()
            )));
        }
        match (self, &s.before, &s.after) {
            (Value::Text(t), Value::Text(before), Value::Text(after)) => {
                if t.0[s.offset..end] != before.0[..] {
                    return Err(Error::invalid_change("splice: before does not match"));
                }
                let mut units = t.0.clone();
                units.splice(s.offset..end, after.0.iter().copied());
                Ok(Value::Text(Text(units)))
            }
            (Value::List(items), Value::List(before), Value::List(after)) => {
                if items[s.offset..end] != before[..] {
                    return Err(Error::invalid_change("splice: before does not match"));
                }
                if after.iter().any(Value::is_nil) {
                    return Err(Error::invalid_change("nil cannot be stored in a list"));
                }
                let mut items = items.clone();
                items.splice(s.offset..end, after.iter().cloned());
                Ok(Value::List(items))
            }
            (value, before, after) => Err(Error::invalid_change(format!(
                "cannot splice {} -> {} into {}",
                before.kind(),
                after.kind(),
                value.kind()
            ))),
        }
    }

    fn apply_move(&self, m: &Move) -> Result<Value> {
        if !m.is_noop() && !m.fits(self.len()) {
            return Err(Error::invalid_change(format!(
                "move {}+{} by {} out of bounds for length {}",
                m.offset,
                m.count,
                m.distance,
                self.len()
            )));
        }
        match self {
            Value::Text(t) => Ok(Value::Text(Text(m.permute(&t.0)))),
            Value::List(items) => Ok(Value::List(m.permute(items))),
            other => Err(Error::invalid_change(format!(
                "cannot move within {}",
                other.kind()
            ))),
        }
    }

    fn apply_set(&self, s: &Set) -> Result<Value> {
        let Value::Map(entries) = self else {
            return Err(Error::invalid_change(format!(
                "cannot set key {} on {}",
                s.key,
                self.kind()
            )));
        };
        let current = entries.get(&s.key).unwrap_or(&Value::Nil);
        if *current != s.before {
            return Err(Error::invalid_change(format!(
                "set {}: before does not match",
                s.key
            )));
        }
        let mut entries = entries.clone();
        if s.after.is_nil() {
            entries.remove(&s.key);
        } else {
            entries.insert(s.key.clone(), s.after.clone());
        }
        Ok(Value::Map(entries))
    }

    fn apply_range(&self, r: &Range) -> Result<Value> {
        let Value::List(items) = self else {
            return Err(Error::invalid_change(format!(
                "range applied to {}",
                self.kind()
            )));
        };
        let end = checked_end(r.offset, r.count)?;
        if end > items.len() {
            return Err(Error::invalid_change(format!(
                "range {}..{end} out of bounds for length {}",
                r.offset,
                items.len()
            )));
        }
        let mut items = items.clone();
        for item in &mut items[r.offset..end] {
            let updated = item.apply(&r.change)?;
            if updated.is_nil() {
                return Err(Error::invalid_change("nil cannot be stored in a list"));
            }
            *item = updated;
        }
        Ok(Value::List(items))
    }
}

fn checked_end(offset: usize, len: usize) -> Result<usize> {
    offset
        .checked_add(len)
        .ok_or_else(|| Error::invalid_change(format!("offset {offset} + {len} overflows")))
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::text(s)
    }
}

impl From<Text> for Value {
    fn from(t: Text) -> Self {
        Value::Text(t)
    }
}
