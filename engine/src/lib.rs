//! # Converge Engine
//!
//! A convergent operational-transformation engine for collaborative
//! documents.
//!
//! This crate provides the core logic for merging concurrent edits. It
//! handles values, changes, journals, and streams with guaranteed
//! convergence: replicas that see the same operations end up with the same
//! value regardless of arrival order.
//!
//! ## Design Principles
//!
//! - **No IO**: Engine has no knowledge of files, network, or platform
//! - **Deterministic**: Same inputs always produce same outputs
//! - **Testable**: Pure logic, no mocks needed
//!
//! ## Core Concepts
//!
//! ### Values and Changes
//!
//! A [`Value`] is nil, an opaque atomic payload, UTF-16 text, a list, a map,
//! or a counter. A [`Change`] edits a value:
//! - [`Change::Replace`] - Swap the whole value
//! - [`Change::Splice`] - Replace a run of sequence items
//! - [`Change::Move`] - Move a block of sequence items
//! - [`Change::Set`] - Replace one map entry
//! - [`Change::Path`] - Apply a change to a nested value
//! - [`Change::Range`] - Apply a change to each item of a run
//! - [`Change::ChangeSet`] - Apply changes in order
//!
//! Any two changes made against the same value can be merged so that both
//! orders of application agree.
//!
//! ### Journal
//!
//! The [`Log`] is the authoritative, rebasing record of operations. Each
//! client mirrors its view of the journal in a [`ClientLog`], which keeps
//! unacknowledged local operations rebased on top of the server state.
//!
//! ### Streams
//!
//! A [`Stream`] is a convergent chain of values that any number of writers
//! may append to. [`Branch`], [`UndoStream`], [`Fold`] and [`Substream`]
//! derive new streams from it.
//!
//! ### References
//!
//! A [`RefPath`] points into a value and follows it through changes. A
//! [`Ref`] anchors a path to a journal position.
//!
//! ## Quick Start
//!
//! ```rust
//! use converge_engine::{image, Change, InvalidPolicy, Log, Operation, Value};
//!
//! # fn main() -> Result<(), converge_engine::Error> {
//! let mut log = Log::new();
//!
//! // Two authors insert at the start of an empty document concurrently.
//! let hello = Change::splice(0, Value::text(""), Value::text("hello"));
//! log.append(Operation::new("a1", None, None, Some(hello)))?;
//! let world = Change::splice(0, Value::text(""), Value::text("world"));
//! log.append(Operation::new("b1", None, None, Some(world)))?;
//!
//! let value = image::build(Value::text(""), log.iter(), InvalidPolicy::Strict)?;
//! assert_eq!(value, Value::text("helloworld"));
//! # Ok(())
//! # }
//! ```

pub mod change;
pub mod client_log;
pub mod error;
pub mod image;
pub mod log;
pub mod operation;
pub mod refs;
pub mod stream;
pub mod undo;
pub mod value;

// Re-export main types at crate root
pub use change::{
    merge_opt, Change, Merged, Move, PathChange, PathKey, Range, Replace, Set, Splice,
};
pub use client_log::ClientLog;
pub use error::{Error, Result};
pub use image::InvalidPolicy;
pub use log::Log;
pub use operation::{merge_ops, Operation};
pub use refs::{IndexKind, Ref, RefPath, Segment};
pub use stream::{Branch, Fold, HandlerId, Stream, Streamer, Substream, UndoStream};
pub use undo::{Tag, UndoStack};
pub use value::{Text, Value};

/// Globally unique operation identifier.
pub type OperationId = String;
