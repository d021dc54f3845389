//! # Converge Sync
//!
//! Collaborators of the converge engine: op stores, the wire protocol, and
//! client sessions.
//!
//! - [`OpStore`] - versioned, append-only operation log with id-level
//!   deduplication; [`MemStore`] keeps one in memory
//! - [`JournalOp`] and [`Envelope`] - wire messages, encoded by a [`Codec`]
//! - [`Hub`] and [`WireStore`] - named stores served over encoded envelopes
//! - [`Session`] - a local stream kept convergent with an op store
//!
//! ## Example
//!
//! ```rust
//! use converge_sync::{Config, MemStore, Session};
//! use converge_engine::{Change, Value};
//! use std::sync::Arc;
//!
//! # #[tokio::main(flavor = "current_thread")]
//! # async fn main() -> converge_sync::Result<()> {
//! let store = Arc::new(MemStore::new());
//! let alice = Session::new(Config::new("doc"), Arc::clone(&store), Value::text(""));
//! let bob = Session::new(Config::new("doc"), store, Value::text(""));
//!
//! alice.append(Change::splice(0, Value::text(""), Value::text("hello"))).await?;
//! bob.append(Change::splice(0, Value::text(""), Value::text("world"))).await?;
//!
//! alice.push().await?;
//! bob.push().await?;
//! alice.pull().await?;
//! bob.pull().await?;
//! assert_eq!(alice.value().await, bob.value().await);
//! # Ok(())
//! # }
//! ```

pub mod codec;
pub mod config;
pub mod error;
pub mod hub;
pub mod protocol;
pub mod session;
pub mod store;

pub use codec::{Codec, JsonCodec};
pub use config::Config;
pub use error::{Result, SyncError};
pub use hub::{Hub, WireStore};
pub use protocol::{Envelope, JournalOp};
pub use session::Session;
pub use store::{MemStore, OpStore};
