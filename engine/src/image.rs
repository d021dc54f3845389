//! Materialising a value from a sequence of journal operations.

use crate::error::Result;
use crate::operation::Operation;
use crate::value::Value;
use serde::{Deserialize, Serialize};
use tracing::warn;

/// What [`build`] does with an operation whose change does not apply.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum InvalidPolicy {
    /// Stop and return the error.
    #[default]
    Strict,
    /// Log the operation and carry on without it.
    Skip,
}

/// Apply the changes of `ops` in order, starting at `initial`.
pub fn build<'a>(
    initial: Value,
    ops: impl IntoIterator<Item = &'a Operation>,
    policy: InvalidPolicy,
) -> Result<Value> {
    let mut value = initial;
    for op in ops {
        let Some(change) = &op.change else {
            continue;
        };
        match value.apply(change) {
            Ok(next) => value = next,
            Err(err) if policy == InvalidPolicy::Skip => {
                warn!(op_id = %op.id, error = %err, "skipping operation that does not apply");
            }
            Err(err) => return Err(err),
        }
    }
    Ok(value)
}
