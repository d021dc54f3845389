//! Integration tests for sessions syncing through op stores.

use converge_engine::{Change, PathKey, Streamer, Value};
use converge_sync::{Config, Hub, MemStore, OpStore, Session, WireStore};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

fn insert(offset: usize, text: &str) -> Change {
    Change::splice(offset, Value::text(""), Value::text(text))
}

async fn push_all<S: OpStore>(sessions: &[&Session<S>]) {
    for session in sessions {
        session.push().await.unwrap();
    }
}

async fn pull_all<S: OpStore>(sessions: &[&Session<S>]) {
    for session in sessions {
        session.pull().await.unwrap();
    }
}

mod memory_store {
    use super::*;

    #[tokio::test]
    async fn concurrent_inserts_converge() {
        init_tracing();
        let store = Arc::new(MemStore::new());
        let alice = Session::new(Config::new("doc"), Arc::clone(&store), Value::text(""));
        let bob = Session::new(Config::new("doc"), Arc::clone(&store), Value::text(""));

        alice.append(insert(0, "hello")).await.unwrap();
        bob.append(insert(0, "world")).await.unwrap();
        push_all(&[&alice, &bob]).await;
        pull_all(&[&alice, &bob]).await;

        // The first operation in the journal wins the tie.
        assert_eq!(alice.value().await, Value::text("helloworld"));
        assert_eq!(bob.value().await, Value::text("helloworld"));
        assert_eq!(store.version(), 2);
    }

    #[tokio::test]
    async fn nested_edits_converge() {
        init_tracing();
        let initial = Value::map([
            ("title", Value::text("todo")),
            ("items", Value::list([Value::text("milk")])),
        ]);
        let store = Arc::new(MemStore::new());
        let alice = Session::new(Config::new("list"), Arc::clone(&store), initial.clone());
        let bob = Session::new(Config::new("list"), store, initial);

        alice
            .append(Change::at(vec![PathKey::key("title")], insert(4, "s")))
            .await
            .unwrap();
        bob.append(Change::at(
            vec![PathKey::key("items")],
            Change::splice(1, Value::list([]), Value::list([Value::text("eggs")])),
        ))
        .await
        .unwrap();
        push_all(&[&alice, &bob]).await;
        pull_all(&[&alice, &bob]).await;

        let value = alice.value().await;
        assert_eq!(value, bob.value().await);
        assert_eq!(value.get("title"), Some(&Value::text("todos")));
        assert_eq!(value.get("items").map(Value::len), Some(2));
    }

    #[tokio::test]
    async fn subscribers_see_pulled_changes() {
        init_tracing();
        let store = Arc::new(MemStore::new());
        let alice = Session::new(Config::new("doc"), Arc::clone(&store), Value::text(""));
        let bob = Session::new(Config::new("doc"), store, Value::text(""));

        let calls = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&calls);
        let stream = bob.stream().await;
        stream.on(move || {
            counter.fetch_add(1, Ordering::SeqCst);
        });

        alice.append(insert(0, "a")).await.unwrap();
        alice.append(insert(1, "b")).await.unwrap();
        alice.push().await.unwrap();
        bob.pull().await.unwrap();

        assert_eq!(calls.load(Ordering::SeqCst), 2);
        assert_eq!(stream.latest().current(), Value::text("ab"));
    }
}

mod wire_store {
    use super::*;

    fn session(hub: &Arc<Hub>, config: Config) -> Session<WireStore> {
        let store = WireStore::new(Arc::clone(hub), config.name.clone(), config.poll_timeout);
        Session::new(config, Arc::new(store), Value::text(""))
    }

    #[tokio::test]
    async fn three_writers_converge() {
        init_tracing();
        let hub = Hub::new_shared();
        let a = session(&hub, Config::new("doc"));
        let b = session(&hub, Config::new("doc"));
        let c = session(&hub, Config::new("doc"));

        a.append(insert(0, "a")).await.unwrap();
        b.append(insert(0, "b")).await.unwrap();
        c.append(insert(0, "c")).await.unwrap();
        push_all(&[&a, &b, &c]).await;
        pull_all(&[&a, &b, &c]).await;
        for s in [&a, &b, &c] {
            assert_eq!(s.value().await, Value::text("abc"));
        }

        // Second round: edits made against the converged value.
        a.append(insert(3, "!")).await.unwrap();
        b.append(insert(0, "?")).await.unwrap();
        push_all(&[&a, &b]).await;
        pull_all(&[&a, &b, &c]).await;
        for s in [&a, &b, &c] {
            assert_eq!(s.value().await, Value::text("?abc!"));
            assert_eq!(s.pending().await, 0);
        }
    }

    #[tokio::test]
    async fn poll_picks_up_remote_push() {
        init_tracing();
        let hub = Hub::new_shared();
        let config = Config::new("doc").with_poll_timeout(Duration::from_secs(5));
        let writer = session(&hub, config.clone());
        let reader = Arc::new(session(&hub, config));

        let waiter = {
            let reader = Arc::clone(&reader);
            tokio::spawn(async move { reader.poll().await })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;
        writer.append(insert(0, "ping")).await.unwrap();
        writer.push().await.unwrap();

        let pulled = waiter.await.unwrap().unwrap();
        assert_eq!(pulled, 1);
        assert_eq!(reader.value().await, Value::text("ping"));
    }

    #[tokio::test]
    async fn poll_times_out_quietly() {
        init_tracing();
        let hub = Hub::new_shared();
        let config = Config::new("quiet").with_poll_timeout(Duration::from_millis(20));
        let reader = session(&hub, config);
        assert_eq!(reader.poll().await.unwrap(), 0);
    }
}
