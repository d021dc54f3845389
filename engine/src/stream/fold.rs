use super::{Stream, Streamer};
use crate::change::{merge_opt, Change};
use crate::error::{Error, Result};
use crate::value::Value;
use tracing::warn;

/// A view of a stream with one change held back from upstream.
///
/// The folded change is visible in [`Fold::current`] but never appended to
/// the underlying stream. Upstream changes are transformed past it and
/// changes appended to the fold are transformed back before going upstream.
#[derive(Debug, Clone)]
pub struct Fold {
    base: Stream,
    folded: Option<Change>,
    value: Value,
}

impl Fold {
    /// Fold `change` over the given node.
    pub fn new(base: Stream, change: Change) -> Result<Self> {
        let value = base.value().apply(&change)?;
        Ok(Self {
            base,
            folded: Some(change),
            value,
        })
    }

    /// The folded change as of this node and the underlying stream.
    pub fn unfold(&self) -> (Option<Change>, Stream) {
        (self.folded.clone(), self.base.clone())
    }
}

impl Streamer for Fold {
    fn current(&self) -> Value {
        self.value.clone()
    }

    fn append(&self, change: Change) -> Result<Self> {
        // Validate against the folded view before anything goes upstream.
        self.value.apply(&change)?;
        let reverted = self.folded.as_ref().map(Change::revert);
        let (upstream, reverted_after) = merge_opt(reverted.as_ref(), Some(&change))?;
        let base = match upstream {
            Some(upstream) => self.base.append(upstream)?,
            // Only folded content was touched.
            None => self.base.clone(),
        };
        let folded = reverted_after.map(|c| c.revert());
        let value = Self::folded_value(&base, folded.as_ref())?;
        Ok(Self {
            base,
            folded,
            value,
        })
    }

    fn next(&self) -> Option<(Option<Change>, Self)> {
        let (upstream, base) = self.base.next()?;
        let transformed = merge_opt(self.folded.as_ref(), upstream.as_ref()).and_then(
            |(downstream, folded)| {
                let value = Self::folded_value(&base, folded.as_ref())?;
                Ok((downstream, folded, value))
            },
        );
        match transformed {
            Ok((downstream, folded, value)) => Some((
                downstream,
                Self {
                    base,
                    folded,
                    value,
                },
            )),
            Err(err) => {
                warn!(error = %err, "folded change no longer applies, dropping it");
                let value = base.value().clone();
                let reset = (self.value != value)
                    .then(|| Change::replace(self.value.clone(), value.clone()));
                Some((
                    reset,
                    Self {
                        base,
                        folded: None,
                        value,
                    },
                ))
            }
        }
    }
}

impl Fold {
    fn folded_value(base: &Stream, folded: Option<&Change>) -> Result<Value> {
        match folded {
            Some(f) => base.value().apply(f).map_err(Error::into_merge_error),
            None => Ok(base.value().clone()),
        }
    }
}
