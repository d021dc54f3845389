use super::{Stream, Streamer};
use crate::change::Change;
use crate::error::{Error, Result};
use crate::refs::RefPath;
use crate::value::Value;
use tracing::debug;

/// A stream view of one location inside the values of another stream.
///
/// Upstream changes move the location along with them. Once the location is
/// removed the substream is detached: it reads as `Nil` and rejects appends.
#[derive(Debug, Clone)]
pub struct Substream {
    base: Stream,
    path: Option<RefPath>,
    value: Value,
}

impl Substream {
    /// View the value at `path` in `base`. The path must resolve to a value.
    pub fn new(base: Stream, path: RefPath) -> Result<Self> {
        if path.keys().is_none() {
            return Err(Error::invalid_operation(format!(
                "substream path {path} ends in a caret"
            )));
        }
        let value = path
            .resolve(base.value())
            .cloned()
            .ok_or(Error::PathInvalidated)?;
        Ok(Self {
            base,
            path: Some(path),
            value,
        })
    }

    /// Current location, or `None` once detached.
    pub fn path(&self) -> Option<&RefPath> {
        self.path.as_ref()
    }

    pub fn is_detached(&self) -> bool {
        self.path.is_none()
    }

    /// The underlying stream node.
    pub fn stream(&self) -> &Stream {
        &self.base
    }

    fn detached(base: Stream) -> Self {
        Self {
            base,
            path: None,
            value: Value::Nil,
        }
    }
}

/// Project an upstream change onto the value at `path`.
fn relative(upstream: &Change, path: &RefPath, before: &Value, after: &Value) -> Option<Change> {
    if let (Change::Path(p), Some(keys)) = (upstream, path.keys()) {
        if p.path.starts_with(&keys) {
            let inner = Change::at(p.path[keys.len()..].to_vec(), (*p.change).clone());
            if before.apply(&inner).is_ok_and(|v| v == *after) {
                return Some(inner);
            }
        }
    }
    (before != after).then(|| Change::replace(before.clone(), after.clone()))
}

impl Streamer for Substream {
    fn current(&self) -> Value {
        self.value.clone()
    }

    fn append(&self, change: Change) -> Result<Self> {
        let path = self.path.as_ref().ok_or(Error::PathInvalidated)?;
        let keys = path.keys().ok_or(Error::PathInvalidated)?;
        self.value.apply(&change)?;
        let base = self.base.append(Change::at(keys, change))?;
        let value = path
            .resolve(base.value())
            .cloned()
            .ok_or(Error::PathInvalidated)?;
        Ok(Self {
            base,
            path: Some(path.clone()),
            value,
        })
    }

    fn next(&self) -> Option<(Option<Change>, Self)> {
        let (upstream, base) = self.base.next()?;
        let Some(path) = &self.path else {
            return Some((None, Self::detached(base)));
        };
        let moved = match &upstream {
            Some(change) => path.apply([change]),
            None => Some(path.clone()),
        };
        let Some((moved, after)) =
            moved.and_then(|p| p.resolve(base.value()).cloned().map(|v| (p, v)))
        else {
            debug!(path = %path, "substream location removed");
            let removed = (!self.value.is_nil())
                .then(|| Change::replace(self.value.clone(), Value::Nil));
            return Some((removed, Self::detached(base)));
        };
        let change = upstream
            .as_ref()
            .and_then(|c| relative(c, path, &self.value, &after));
        Some((
            change,
            Self {
                base,
                path: Some(moved),
                value: after,
            },
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::change::PathKey;
    use crate::refs::Segment;

    fn doc() -> Value {
        Value::map([
            ("title", Value::text("draft")),
            ("items", Value::list([Value::text("a"), Value::text("b")])),
        ])
    }

    fn item(i: usize) -> RefPath {
        RefPath::new(vec![Segment::key("items"), Segment::pointer(i)])
    }

    #[test]
    fn appends_are_lifted_to_the_path() {
        let base = Stream::new(doc());
        let sub = Substream::new(base.clone(), item(1)).unwrap();
        assert_eq!(sub.current(), Value::text("b"));

        let sub = sub
            .append(Change::splice(1, Value::text(""), Value::text("!")))
            .unwrap();
        assert_eq!(sub.current(), Value::text("b!"));
        let items = base.latest().value().get("items").cloned().unwrap();
        assert_eq!(items.at(1), Some(&Value::text("b!")));
    }

    #[test]
    fn nested_upstream_change_is_stripped() {
        let base = Stream::new(doc());
        let sub = Substream::new(base.clone(), item(0)).unwrap();
        let edit = Change::splice(0, Value::text(""), Value::text(">"));
        base.append(Change::at(
            vec![PathKey::key("items"), PathKey::Index(0)],
            edit.clone(),
        ))
        .unwrap();

        let (change, next) = sub.next().unwrap();
        assert_eq!(change, Some(edit));
        assert_eq!(next.current(), Value::text(">a"));
    }

    #[test]
    fn sibling_changes_are_invisible() {
        let base = Stream::new(doc());
        let sub = Substream::new(base.clone(), item(1)).unwrap();
        base.append(Change::set("title", Value::text("draft"), Value::text("final")))
            .unwrap();
        // Inserting before the viewed item moves the path but not the value.
        base.latest()
            .append(Change::at(
                vec![PathKey::key("items")],
                Change::splice(0, Value::list([]), Value::list([Value::text("z")])),
            ))
            .unwrap();

        let latest = sub.latest();
        assert_eq!(latest.current(), Value::text("b"));
        assert_eq!(latest.path(), Some(&item(2)));
        let (change, _) = sub.next().unwrap();
        assert_eq!(change, None);
    }

    #[test]
    fn removal_detaches() {
        let base = Stream::new(doc());
        let sub = Substream::new(base.clone(), item(0)).unwrap();
        base.append(Change::at(
            vec![PathKey::key("items")],
            Change::splice(0, Value::list([Value::text("a")]), Value::list([])),
        ))
        .unwrap();

        let (change, next) = sub.next().unwrap();
        assert_eq!(change, Some(Change::replace(Value::text("a"), Value::Nil)));
        assert!(next.is_detached());
        assert_eq!(
            next.append(Change::replace(Value::Nil, Value::text("x")))
                .unwrap_err(),
            Error::PathInvalidated
        );
    }

    #[test]
    fn missing_path_is_rejected() {
        let base = Stream::new(doc());
        assert_eq!(
            Substream::new(base, item(5)).unwrap_err(),
            Error::PathInvalidated
        );
    }
}
