//! Client-side reconciliation against the journal.
//!
//! A client keeps its own unacknowledged operations rebased against every
//! journal entry it has seen. When new journal entries arrive the client
//! transforms them past its pending operations and hands the results back as
//! compensating operations for the local model. When one of its own
//! operations comes back from the journal it is simply dropped from the
//! pending list.
//!
//! The merge arguments are ordered the same way [`Log`] orders them (journal
//! side on the left), so the client's view of its own rebased operations
//! matches what the journal computes for them.

use crate::error::{Error, Result};
use crate::log::Log;
use crate::operation::{merge_ops, Operation};
use crate::OperationId;
use tracing::{debug, trace};

/// Client view of the journal.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ClientLog {
    /// Own operations acknowledged by the journal
    client_index: usize,
    /// Journal entries incorporated into the local model
    server_index: usize,
    /// Pending own operations, rebased onto the first `server_index` entries
    rebased: Vec<Operation>,
    /// Journal entries since the pending basis, transformed past the pending
    /// operations
    merge_chain: Vec<Operation>,
}

impl ClientLog {
    /// A client that has seen nothing.
    pub fn new() -> Self {
        Self::default()
    }

    /// A client whose local model already includes the first `server_index`
    /// journal entries.
    pub fn resume(server_index: usize) -> Self {
        Self {
            server_index,
            ..Self::default()
        }
    }

    pub fn server_index(&self) -> usize {
        self.server_index
    }

    pub fn client_index(&self) -> usize {
        self.client_index
    }

    /// True when no own operations are awaiting acknowledgement.
    pub fn is_empty(&self) -> bool {
        self.rebased.is_empty()
    }

    /// Pending own operations in their rebased form.
    pub fn rebased(&self) -> &[Operation] {
        &self.rebased
    }

    pub fn merge_chain(&self) -> &[Operation] {
        &self.merge_chain
    }

    /// Ids of own operations not yet seen in the journal.
    pub fn pending_ids(&self) -> impl Iterator<Item = &OperationId> {
        self.rebased.iter().map(|op| &op.id)
    }

    /// Forget pending operations, keeping the journal position. Used after a
    /// reconnect when pending operations are resent from scratch.
    pub fn reset(&mut self) {
        self.rebased.clear();
        self.merge_chain.clear();
    }

    /// Incorporate journal entries past `server_index`. Returns the
    /// operations the local model must apply to stay convergent.
    pub fn reconcile(&mut self, log: &Log) -> Result<Vec<Operation>> {
        let incoming = log.rebased_since(self.server_index)?;
        let mut rebased = self.rebased.clone();
        let mut merge_chain = self.merge_chain.clone();
        let mut client_index = self.client_index;
        let mut compensations = Vec::new();

        for entry in incoming {
            if rebased.first().is_some_and(|own| own.id == entry.id) {
                trace!(op_id = %entry.id, "own operation acknowledged");
                rebased.remove(0);
                client_index += 1;
                continue;
            }
            let (pending, mut adjusted) = merge_ops(std::slice::from_ref(entry), &rebased)
                .map_err(Error::into_merge_error)?;
            rebased = pending;
            if let Some(adjusted) = adjusted.pop() {
                if !rebased.is_empty() {
                    merge_chain.push(adjusted.clone());
                }
                compensations.push(adjusted);
            }
        }
        if rebased.is_empty() {
            merge_chain.clear();
        }

        debug!(
            from = self.server_index,
            to = log.len(),
            pending = rebased.len(),
            "reconciled client log"
        );
        self.server_index = log.len();
        self.client_index = client_index;
        self.rebased = rebased;
        self.merge_chain = merge_chain;
        Ok(compensations)
    }

    /// Record a new own operation. The local model is assumed to already
    /// include `op`; the returned operations bring it up to date with
    /// everything the journal holds.
    pub fn append_client_op(&mut self, log: &Log, op: Operation) -> Result<Vec<Operation>> {
        let mut next = self.clone();
        let mut compensations = if self.rebased.is_empty() {
            next.bootstrap(log, op)?
        } else {
            next.push_pending(log, op)?
        };
        if log.len() > next.server_index {
            compensations.extend(next.reconcile(log)?);
        }
        *self = next;
        Ok(compensations)
    }

    fn bootstrap(&mut self, log: &Log, op: Operation) -> Result<Vec<Operation>> {
        if let Some(index) = log.index_of(&op.id) {
            // Already committed: catch up straight from the journal.
            let (_, chain) = log.get(&op.id).ok_or(Error::LogNeedsBackfilling {
                index,
                min_index: log.min_index(),
            })?;
            let mut compensations = chain.to_vec();
            compensations.extend_from_slice(log.rebased_since(index + 1)?);
            self.server_index = log.len();
            self.client_index += 1;
            self.merge_chain.clear();
            debug!(op_id = %op.id, index, "bootstrapped from journal");
            return Ok(compensations);
        }

        let start = match &op.basis {
            Some(basis) => log
                .index_of(basis)
                .ok_or_else(|| Error::MissingParentOrBasis(basis.clone()))?
                + 1,
            None => 0,
        };
        let after_parent = match &op.parent {
            Some(parent) => log.index_of(parent).map_or(0, |p| p + 1),
            None => 0,
        };
        let end = self.server_index.max(start).max(after_parent);
        let chain = log.merge_target_until(op.basis.as_ref(), op.parent.as_ref(), end)?;
        self.server_index = end;
        self.merge_chain = chain;
        self.push_merged(op)
    }

    fn push_pending(&mut self, log: &Log, op: Operation) -> Result<Vec<Operation>> {
        let last_basis = self.rebased.last().and_then(|last| last.basis.as_ref());
        if op.basis.as_ref() != last_basis {
            let basis = op
                .basis
                .as_ref()
                .ok_or_else(|| Error::invalid_operation("basis precedes pending operations"))?;
            let basis_idx = log
                .index_of(basis)
                .filter(|idx| *idx < self.server_index)
                .ok_or_else(|| Error::MissingParentOrBasis(basis.clone()))?;
            self.merge_chain
                .retain(|entry| log.index_of(&entry.id).is_some_and(|idx| idx > basis_idx));
        }
        self.push_merged(op)
    }

    fn push_merged(&mut self, op: Operation) -> Result<Vec<Operation>> {
        let (mut merged, residue) = merge_ops(&self.merge_chain, std::slice::from_ref(&op))
            .map_err(Error::into_merge_error)?;
        let merged = merged
            .pop()
            .ok_or_else(|| Error::invalid_operation("merge dropped the operation"))?;
        trace!(op_id = %merged.id, chain = residue.len(), "queued client operation");
        self.rebased.push(merged);
        self.merge_chain = residue.clone();
        Ok(residue)
    }
}
