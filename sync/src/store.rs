//! Op stores: versioned, append-only operation logs.

use crate::error::{Result, SyncError};
use crate::protocol::JournalOp;
use converge_engine::OperationId;
use std::collections::HashSet;
use std::future::Future;
use std::sync::{Mutex, PoisonError};
use tokio::sync::watch;
use tracing::{debug, trace};

/// A monotonically versioned, append-only log of journal operations.
///
/// Versions are assigned by the store: the n-th distinct operation ever
/// appended gets version `n - 1`. Appending an id the store already holds is
/// a no-op.
pub trait OpStore: Send + Sync {
    /// Append operations in order. Returns the store version afterwards, which
    /// is the number of operations held.
    fn append(&self, ops: Vec<JournalOp>) -> impl Future<Output = Result<u64>> + Send;

    /// Up to `limit` operations with version `version` or later.
    fn get_since(
        &self,
        version: u64,
        limit: usize,
    ) -> impl Future<Output = Result<Vec<JournalOp>>> + Send;

    /// Wait until an operation with version `version` or later exists.
    fn poll(&self, version: u64) -> impl Future<Output = Result<()>> + Send;

    /// Stop accepting requests and wake every poller.
    fn close(&self);
}

#[derive(Debug, Default)]
struct Inner {
    ops: Vec<JournalOp>,
    ids: HashSet<OperationId>,
    closed: bool,
}

/// In-memory op store.
#[derive(Debug)]
pub struct MemStore {
    inner: Mutex<Inner>,
    /// Current version, watched by pollers
    version: watch::Sender<u64>,
}

impl Default for MemStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MemStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(Inner::default()),
            version: watch::Sender::new(0),
        }
    }

    /// Number of operations held.
    pub fn version(&self) -> u64 {
        *self.version.borrow()
    }

    pub fn is_closed(&self) -> bool {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner).closed
    }

    fn append_now(&self, ops: Vec<JournalOp>) -> Result<u64> {
        let mut inner = self.inner.lock().unwrap_or_else(PoisonError::into_inner);
        if inner.closed {
            return Err(SyncError::Closed);
        }
        let mut added = 0;
        for mut op in ops {
            if !inner.ids.insert(op.id.clone()) {
                trace!(op_id = %op.id, "duplicate operation ignored");
                continue;
            }
            op.version = inner.ops.len() as u64;
            inner.ops.push(op);
            added += 1;
        }
        let version = inner.ops.len() as u64;
        drop(inner);

        if added > 0 {
            self.version.send_replace(version);
            debug!(added, version, "appended operations");
        }
        Ok(version)
    }

    fn get_since_now(&self, version: u64, limit: usize) -> Result<Vec<JournalOp>> {
        let inner = self.inner.lock().unwrap_or_else(PoisonError::into_inner);
        if inner.closed {
            return Err(SyncError::Closed);
        }
        let start = usize::try_from(version)
            .unwrap_or(usize::MAX)
            .min(inner.ops.len());
        Ok(inner.ops[start..].iter().take(limit).cloned().collect())
    }
}

impl OpStore for MemStore {
    async fn append(&self, ops: Vec<JournalOp>) -> Result<u64> {
        self.append_now(ops)
    }

    async fn get_since(&self, version: u64, limit: usize) -> Result<Vec<JournalOp>> {
        self.get_since_now(version, limit)
    }

    async fn poll(&self, version: u64) -> Result<()> {
        let mut rx = self.version.subscribe();
        loop {
            if self.is_closed() {
                return Err(SyncError::Closed);
            }
            if *rx.borrow_and_update() > version {
                return Ok(());
            }
            // The sender lives as long as the store.
            if rx.changed().await.is_err() {
                return Err(SyncError::Closed);
            }
        }
    }

    fn close(&self) {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner).closed = true;
        // Wake pollers so they observe the closed flag.
        self.version.send_modify(|_| {});
        debug!("op store closed");
    }
}
