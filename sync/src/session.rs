//! Client sessions: a local stream kept convergent with an op store.

use crate::config::Config;
use crate::error::Result;
use crate::protocol::JournalOp;
use crate::store::OpStore;
use converge_engine::{Change, ClientLog, Log, Operation, OperationId, Stream, Value};
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::debug;

struct State {
    /// Local replica of the journal, rebuilt from the store
    journal: Log,
    client: ClientLog,
    /// Latest node of the local stream
    tip: Stream,
    /// Next store version to fetch
    version: u64,
    last_own: Option<OperationId>,
    /// Operations not yet pushed to the store
    outbox: Vec<Operation>,
}

impl State {
    /// Check that `changes` apply in order on top of `value`.
    fn check(value: Value, changes: &[Operation]) -> Result<()> {
        changes
            .iter()
            .filter_map(|op| op.change.as_ref())
            .try_fold(value, |value, change| value.apply(change))?;
        Ok(())
    }

    fn apply_remote(&mut self, compensations: Vec<Operation>) -> Result<()> {
        for op in compensations {
            if let Some(change) = op.change {
                self.tip = self.tip.append(change)?;
            }
        }
        Ok(())
    }
}

/// A writer on one named stream of an op store.
///
/// Local edits go through [`Session::append`]; [`Session::push`] sends them
/// to the store and [`Session::pull`] brings in everyone else's. All calls
/// are serialised behind one lock, so the session may be shared between
/// tasks. The stream returned by [`Session::stream`] is for reading and
/// subscribing: changes appended to it directly bypass the journal.
pub struct Session<S> {
    config: Config,
    store: Arc<S>,
    state: Mutex<State>,
}

impl<S: OpStore> Session<S> {
    /// Start a session whose journal applies to `initial`. Every session on
    /// the same stream must start from the same value.
    pub fn new(config: Config, store: Arc<S>, initial: Value) -> Self {
        Self {
            config,
            store,
            state: Mutex::new(State {
                journal: Log::new(),
                client: ClientLog::new(),
                tip: Stream::new(initial),
                version: 0,
                last_own: None,
                outbox: Vec::new(),
            }),
        }
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Apply a local change and queue it for the next push. Returns the
    /// stream node holding the change.
    pub async fn append(&self, change: Change) -> Result<Stream> {
        let mut guard = self.state.lock().await;
        let state = &mut *guard;
        let applied = state.tip.value().apply(&change)?;

        let op = Operation::new(
            uuid::Uuid::new_v4().to_string(),
            state.journal.tip().cloned(),
            state.last_own.clone(),
            Some(change.clone()),
        );
        let mut client = state.client.clone();
        let compensations = client.append_client_op(&state.journal, op.clone())?;
        State::check(applied, &compensations)?;

        // Nothing below fails on a stream only this session appends to.
        debug!(op_id = %op.id, pending = state.outbox.len() + 1, "queued local change");
        state.client = client;
        state.last_own = Some(op.id.clone());
        state.outbox.push(op);
        let node = state.tip.append(change)?;
        state.tip = node.clone();
        state.apply_remote(compensations)?;
        Ok(node)
    }

    /// Send queued operations to the store. Returns how many were sent.
    pub async fn push(&self) -> Result<usize> {
        let mut state = self.state.lock().await;
        if state.outbox.is_empty() {
            return Ok(0);
        }
        let ops: Vec<JournalOp> = state
            .outbox
            .iter()
            .cloned()
            .map(JournalOp::unversioned)
            .collect();
        let count = ops.len();
        // The outbox is kept until the store has accepted the batch.
        let version = self.store.append(ops).await?;
        state.outbox.clear();
        debug!(name = %self.config.name, count, version, "pushed operations");
        Ok(count)
    }

    /// Fetch every operation the session has not seen and fold it into the
    /// local stream. Returns how many were fetched.
    pub async fn pull(&self) -> Result<usize> {
        let mut guard = self.state.lock().await;
        let state = &mut *guard;
        let limit = self.config.effective_limit();
        let mut pulled = 0;
        loop {
            let ops = self.store.get_since(state.version, limit).await?;
            let count = ops.len();
            for op in ops {
                let version = op.version.saturating_add(1);
                state.journal.append(op.into())?;
                state.version = version;
            }
            pulled += count;
            if count < limit {
                break;
            }
        }

        let mut client = state.client.clone();
        let compensations = client.reconcile(&state.journal)?;
        State::check(state.tip.value().clone(), &compensations)?;
        state.client = client;
        state.apply_remote(compensations)?;
        debug!(name = %self.config.name, pulled, version = state.version, "pulled operations");
        Ok(pulled)
    }

    /// Wait up to the configured poll timeout for new operations, then pull.
    /// Returns 0 on timeout.
    pub async fn poll(&self) -> Result<usize> {
        let version = self.state.lock().await.version;
        match tokio::time::timeout(self.config.poll_timeout, self.store.poll(version)).await {
            Ok(polled) => {
                polled?;
                self.pull().await
            }
            Err(_) => Ok(0),
        }
    }

    /// Push, then pull.
    pub async fn sync(&self) -> Result<usize> {
        self.push().await?;
        self.pull().await
    }

    /// The current local value.
    pub async fn value(&self) -> Value {
        self.state.lock().await.tip.value().clone()
    }

    /// The latest node of the local stream.
    pub async fn stream(&self) -> Stream {
        self.state.lock().await.tip.clone()
    }

    /// Number of local operations the journal has not acknowledged.
    pub async fn pending(&self) -> usize {
        self.state.lock().await.client.pending_ids().count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::SyncError;
    use crate::store::MemStore;
    use std::sync::atomic::{AtomicBool, Ordering};

    /// Hands out one page with a dangling basis, then serves the real ops.
    struct CorruptOnce {
        inner: MemStore,
        corrupt: AtomicBool,
    }

    impl OpStore for CorruptOnce {
        async fn append(&self, ops: Vec<JournalOp>) -> Result<u64> {
            self.inner.append(ops).await
        }

        async fn get_since(&self, version: u64, limit: usize) -> Result<Vec<JournalOp>> {
            let mut ops = self.inner.get_since(version, limit).await?;
            if self.corrupt.swap(false, Ordering::SeqCst) {
                if let Some(last) = ops.last_mut() {
                    last.basis = Some("missing".to_string());
                }
            }
            Ok(ops)
        }

        async fn poll(&self, version: u64) -> Result<()> {
            self.inner.poll(version).await
        }

        fn close(&self) {
            self.inner.close()
        }
    }

    fn insert(offset: usize, text: &str) -> Change {
        Change::splice(offset, Value::text(""), Value::text(text))
    }

    #[tokio::test]
    async fn append_is_local_until_push() {
        let store = Arc::new(MemStore::new());
        let session = Session::new(Config::new("doc"), Arc::clone(&store), Value::text(""));
        session.append(insert(0, "hi")).await.unwrap();
        assert_eq!(session.value().await, Value::text("hi"));
        assert_eq!(store.version(), 0);

        assert_eq!(session.push().await.unwrap(), 1);
        assert_eq!(store.version(), 1);
        assert_eq!(session.push().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn own_operations_are_acknowledged() {
        let store = Arc::new(MemStore::new());
        let session = Session::new(Config::new("doc"), store, Value::text(""));
        session.append(insert(0, "a")).await.unwrap();
        session.append(insert(1, "b")).await.unwrap();
        assert_eq!(session.pending().await, 2);

        assert_eq!(session.sync().await.unwrap(), 2);
        assert_eq!(session.pending().await, 0);
        assert_eq!(session.value().await, Value::text("ab"));
    }

    #[tokio::test]
    async fn invalid_change_is_rejected_without_queueing() {
        let store = Arc::new(MemStore::new());
        let session = Session::new(Config::new("doc"), store, Value::text("abc"));
        let result = session
            .append(Change::splice(0, Value::text("x"), Value::text("")))
            .await;
        assert!(result.is_err());
        assert_eq!(session.push().await.unwrap(), 0);
        assert_eq!(session.value().await, Value::text("abc"));
    }

    #[tokio::test]
    async fn small_limit_pulls_every_page() {
        let store = Arc::new(MemStore::new());
        let writer = Session::new(Config::new("doc"), Arc::clone(&store), Value::text(""));
        for i in 0..5 {
            writer.append(insert(i, "x")).await.unwrap();
        }
        writer.push().await.unwrap();

        let reader = Session::new(Config::new("doc").with_limit(2), store, Value::text(""));
        assert_eq!(reader.pull().await.unwrap(), 5);
        assert_eq!(reader.value().await, Value::text("xxxxx"));
    }

    #[tokio::test]
    async fn failed_pull_refetches_the_failing_op() {
        let store = Arc::new(CorruptOnce {
            inner: MemStore::new(),
            corrupt: AtomicBool::new(true),
        });
        let writer = Session::new(Config::new("doc"), Arc::clone(&store), Value::text(""));
        writer.append(insert(0, "a")).await.unwrap();
        writer.append(insert(1, "b")).await.unwrap();
        writer.push().await.unwrap();

        let reader = Session::new(Config::new("doc"), store, Value::text(""));
        let failed = reader.pull().await;
        assert!(matches!(
            failed,
            Err(SyncError::Engine(converge_engine::Error::MissingParentOrBasis(_)))
        ));
        assert_eq!(reader.value().await, Value::text(""));

        assert_eq!(reader.pull().await.unwrap(), 1);
        assert_eq!(reader.value().await, Value::text("ab"));
    }
}
