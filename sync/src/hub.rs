//! Named op stores served over the wire protocol.
//!
//! A [`Hub`] owns one [`MemStore`] per stream name and answers encoded
//! [`Envelope`] requests against them. [`WireStore`] is the client side: an
//! [`OpStore`] that sends every request through a hub as bytes, so the wire
//! format is exercised end to end.

use crate::codec::{Codec, JsonCodec};
use crate::error::Result;
use crate::protocol::{Envelope, JournalOp};
use crate::store::{MemStore, OpStore};
use dashmap::DashMap;
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

/// Registry of named in-memory stores.
#[derive(Debug, Default)]
pub struct Hub<C = JsonCodec> {
    stores: DashMap<String, Arc<MemStore>>,
    codec: C,
}

impl Hub {
    /// Create a hub speaking JSON.
    pub fn new() -> Self {
        Self::with_codec(JsonCodec)
    }

    /// Create a hub wrapped in Arc for sharing.
    pub fn new_shared() -> Arc<Self> {
        Arc::new(Self::new())
    }
}

impl<C: Codec> Hub<C> {
    pub fn with_codec(codec: C) -> Self {
        Self {
            stores: DashMap::new(),
            codec,
        }
    }

    /// The store for `name`, created on first use.
    pub fn store(&self, name: &str) -> Arc<MemStore> {
        Arc::clone(self.stores.entry(name.to_string()).or_default().value())
    }

    /// Names of every store opened so far.
    pub fn names(&self) -> Vec<String> {
        self.stores.iter().map(|entry| entry.key().clone()).collect()
    }

    /// Close every store.
    pub fn close_all(&self) {
        for entry in self.stores.iter() {
            entry.value().close();
        }
    }

    /// Append the request's operations. Replies with the store version.
    pub async fn handle_append(&self, request: &[u8]) -> Result<Vec<u8>> {
        let envelope: Envelope = self.codec.decode(request)?;
        let count = envelope.ops.len();
        let version = self.store(&envelope.name).append(envelope.ops).await?;
        debug!(name = %envelope.name, count, version, "handled append");
        self.codec
            .encode(&Envelope::reply(envelope.name, Vec::new(), version))
    }

    /// Fetch operations from the requested version on.
    pub async fn handle_fetch(&self, request: &[u8]) -> Result<Vec<u8>> {
        let envelope: Envelope = self.codec.decode(request)?;
        let store = self.store(&envelope.name);
        let ops = store.get_since(envelope.version, envelope.limit).await?;
        debug!(name = %envelope.name, from = envelope.version, count = ops.len(), "handled fetch");
        self.codec
            .encode(&Envelope::reply(envelope.name, ops, store.version()))
    }

    /// Wait for operations at or past the requested version, up to the
    /// request's duration. Replies with the store version either way.
    pub async fn handle_poll(&self, request: &[u8]) -> Result<Vec<u8>> {
        let envelope: Envelope = self.codec.decode(request)?;
        let store = self.store(&envelope.name);
        // Timing out is not an error; the reply version tells the caller.
        if let Ok(polled) = tokio::time::timeout(envelope.duration, store.poll(envelope.version)).await {
            polled?;
        }
        self.codec
            .encode(&Envelope::reply(envelope.name, Vec::new(), store.version()))
    }
}

/// An [`OpStore`] reaching a hub through encoded envelopes.
#[derive(Debug)]
pub struct WireStore<C = JsonCodec> {
    hub: Arc<Hub<C>>,
    name: String,
    poll_timeout: Duration,
}

impl<C: Codec> WireStore<C> {
    pub fn new(hub: Arc<Hub<C>>, name: impl Into<String>, poll_timeout: Duration) -> Self {
        Self {
            hub,
            name: name.into(),
            poll_timeout,
        }
    }

    fn encode(&self, envelope: &Envelope) -> Result<Vec<u8>> {
        self.hub.codec.encode(envelope)
    }

    fn decode(&self, bytes: &[u8]) -> Result<Envelope> {
        self.hub.codec.decode(bytes)
    }
}

impl<C: Codec> OpStore for WireStore<C> {
    async fn append(&self, ops: Vec<JournalOp>) -> Result<u64> {
        let request = self.encode(&Envelope::append(self.name.clone(), ops))?;
        let reply = self.decode(&self.hub.handle_append(&request).await?)?;
        Ok(reply.version)
    }

    async fn get_since(&self, version: u64, limit: usize) -> Result<Vec<JournalOp>> {
        let request = self.encode(&Envelope::fetch(self.name.clone(), version, limit))?;
        let reply = self.decode(&self.hub.handle_fetch(&request).await?)?;
        Ok(reply.ops)
    }

    async fn poll(&self, version: u64) -> Result<()> {
        // Re-issue timed polls until something arrives.
        loop {
            let request = self.encode(&Envelope::poll(
                self.name.clone(),
                version,
                self.poll_timeout,
            ))?;
            let reply = self.decode(&self.hub.handle_poll(&request).await?)?;
            if reply.version > version {
                return Ok(());
            }
        }
    }

    fn close(&self) {
        self.hub.store(&self.name).close();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::SyncError;

    fn op(id: &str) -> JournalOp {
        JournalOp {
            id: id.into(),
            parent_id: None,
            version: 0,
            basis: None,
            change: None,
        }
    }

    #[tokio::test]
    async fn stores_are_per_name() {
        let hub = Hub::new_shared();
        let notes = WireStore::new(Arc::clone(&hub), "notes", Duration::from_millis(50));
        let todos = WireStore::new(Arc::clone(&hub), "todos", Duration::from_millis(50));

        assert_eq!(notes.append(vec![op("a"), op("b")]).await.unwrap(), 2);
        assert_eq!(todos.append(vec![op("a")]).await.unwrap(), 1);

        let fetched = notes.get_since(1, 10).await.unwrap();
        assert_eq!(fetched.len(), 1);
        assert_eq!(fetched[0].id, "b");
        assert_eq!(fetched[0].version, 1);

        let mut names = hub.names();
        names.sort();
        assert_eq!(names, vec!["notes".to_string(), "todos".to_string()]);
    }

    #[tokio::test]
    async fn poll_reply_carries_version_after_timeout() {
        let hub = Hub::new_shared();
        let request = JsonCodec
            .encode(&Envelope::poll("doc", 0, Duration::from_millis(10)))
            .unwrap();
        let reply: Envelope = JsonCodec
            .decode(&hub.handle_poll(&request).await.unwrap())
            .unwrap();
        assert_eq!(reply.version, 0);
    }

    #[tokio::test]
    async fn wire_poll_returns_after_append() {
        let hub = Hub::new_shared();
        let store = Arc::new(WireStore::new(
            Arc::clone(&hub),
            "doc",
            Duration::from_millis(20),
        ));
        let waiter = {
            let store = Arc::clone(&store);
            tokio::spawn(async move { store.poll(0).await })
        };
        tokio::time::sleep(Duration::from_millis(50)).await;
        store.append(vec![op("a")]).await.unwrap();
        tokio::time::timeout(Duration::from_secs(1), waiter)
            .await
            .unwrap()
            .unwrap()
            .unwrap();
    }

    #[tokio::test]
    async fn closed_store_is_reported() {
        let hub = Hub::new_shared();
        let store = WireStore::new(Arc::clone(&hub), "doc", Duration::from_millis(20));
        hub.close_all();
        // Stores opened after close_all are fresh.
        store.append(vec![op("a")]).await.unwrap();
        store.close();
        assert!(matches!(store.poll(5).await, Err(SyncError::Closed)));
        assert!(matches!(
            hub.handle_fetch(b"garbage").await,
            Err(SyncError::Codec(_))
        ));
    }
}
