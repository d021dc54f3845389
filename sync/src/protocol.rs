//! Wire message definitions.
//!
//! All messages are JSON-encoded and use camelCase for field names.

use converge_engine::{Change, Operation, OperationId};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// A journal operation as stored and sent over the wire.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JournalOp {
    pub id: OperationId,
    /// Author's previous operation
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent_id: Option<OperationId>,
    /// Index assigned by the op store
    #[serde(default)]
    pub version: u64,
    /// Last journal entry the author had seen
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub basis: Option<OperationId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub change: Option<Change>,
}

impl JournalOp {
    /// Wire form of an operation that has not been stored yet.
    pub fn unversioned(op: Operation) -> Self {
        Self {
            id: op.id,
            parent_id: op.parent,
            version: 0,
            basis: op.basis,
            change: op.change,
        }
    }
}

impl From<JournalOp> for Operation {
    fn from(op: JournalOp) -> Self {
        Operation::new(op.id, op.basis, op.parent_id, op.change)
    }
}

/// Request and response body exchanged with a remote op store.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct Envelope {
    /// Stream name
    pub name: String,
    /// Operations to append, or operations fetched
    pub ops: Vec<JournalOp>,
    /// Version to fetch from, or the store version after the request
    pub version: u64,
    /// Most operations to return
    pub limit: usize,
    /// How long a poll may wait
    #[serde(with = "crate::config::millis")]
    pub duration: Duration,
}

impl Envelope {
    /// Append `ops` to the named stream.
    pub fn append(name: impl Into<String>, ops: Vec<JournalOp>) -> Self {
        Self {
            name: name.into(),
            ops,
            ..Self::default()
        }
    }

    /// Fetch up to `limit` operations starting at `version`.
    pub fn fetch(name: impl Into<String>, version: u64, limit: usize) -> Self {
        Self {
            name: name.into(),
            version,
            limit,
            ..Self::default()
        }
    }

    /// Wait up to `duration` for operations at or past `version`.
    pub fn poll(name: impl Into<String>, version: u64, duration: Duration) -> Self {
        Self {
            name: name.into(),
            version,
            duration,
            ..Self::default()
        }
    }

    /// Reply carrying `ops` and the store version.
    pub fn reply(name: impl Into<String>, ops: Vec<JournalOp>, version: u64) -> Self {
        Self {
            name: name.into(),
            ops,
            version,
            ..Self::default()
        }
    }
}
