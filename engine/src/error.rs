//! Error types for the convergence engine.

use crate::OperationId;
use thiserror::Error;

/// All possible errors from the convergence engine.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum Error {
    // Change algebra errors
    #[error("invalid change: {0}")]
    InvalidChange(String),

    #[error("invalid operation: {0}")]
    InvalidOperation(String),

    #[error("cannot merge operation with itself: {0}")]
    MergeWithSelf(OperationId),

    // Journal errors
    #[error("missing parent or basis: {0}")]
    MissingParentOrBasis(OperationId),

    #[error("log needs backfilling: index {index} precedes minimum index {min_index}")]
    LogNeedsBackfilling { index: usize, min_index: usize },

    #[error("client log needs reconcile: synced {server_index} of {log_len} journal entries")]
    ClientLogNeedsReconcile { server_index: usize, log_len: usize },

    // Reference errors
    #[error("path invalidated")]
    PathInvalidated,
}

impl Error {
    pub(crate) fn invalid_change(message: impl Into<String>) -> Self {
        Error::InvalidChange(message.into())
    }

    pub(crate) fn invalid_operation(message: impl Into<String>) -> Self {
        Error::InvalidOperation(message.into())
    }

    /// Re-labels an apply failure that happened while merging.
    pub(crate) fn into_merge_error(self) -> Self {
        match self {
            Error::InvalidChange(message) => Error::InvalidOperation(message),
            other => other,
        }
    }
}

/// Result type for engine operations.
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_display() {
        let err = Error::MissingParentOrBasis("op-7".into());
        assert_eq!(err.to_string(), "missing parent or basis: op-7");

        let err = Error::LogNeedsBackfilling {
            index: 2,
            min_index: 10,
        };
        assert_eq!(
            err.to_string(),
            "log needs backfilling: index 2 precedes minimum index 10"
        );

        let err = Error::ClientLogNeedsReconcile {
            server_index: 3,
            log_len: 5,
        };
        assert_eq!(
            err.to_string(),
            "client log needs reconcile: synced 3 of 5 journal entries"
        );
    }

    #[test]
    fn merge_error_relabels_invalid_change() {
        let err = Error::invalid_change("before mismatch").into_merge_error();
        assert_eq!(err, Error::InvalidOperation("before mismatch".into()));

        let err = Error::PathInvalidated.into_merge_error();
        assert_eq!(err, Error::PathInvalidated);
    }
}
