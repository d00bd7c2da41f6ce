//! Fusilli Core - Oplog Tailing and Search Indexing
//!
//! This crate provides the building blocks of the Fusilli pipeline: a tailer
//! that follows a MongoDB oplog and an indexing sink that upserts the entries
//! it delivers into a search index.
//!
//! # Key Components
//!
//! - **Entries**: [`entry`] defines decoded oplog entries and their positions
//! - **Filter**: [`filter`] selects entries by operation and namespace
//! - **Sources**: [`source`] abstracts the oplog (MongoDB and in-memory)
//! - **Tailer**: [`tailer`] is the Ready/Running/Stopped/Errored state machine
//! - **Registry**: [`registry`] hands out tailer identities
//! - **Sink**: [`sink`] maps entries with a [`mapping::DocumentMapper`] and
//!   writes them to an [`index::SearchIndex`]
//!
//! # Example
//!
//! ```rust
//! use fusilli_core::entry::{OperationKind, OplogEntry};
//!
//! fn describe(entry: &OplogEntry) -> String {
//!     match entry.operation {
//!         OperationKind::Insert => format!("insert into {}", entry.namespace),
//!         OperationKind::Update => format!("update of {}", entry.namespace),
//!         OperationKind::Delete => format!("delete from {}", entry.namespace),
//!         _ => format!("{} on {}", entry.operation, entry.namespace),
//!     }
//! }
//! ```

pub mod entry;
pub mod filter;
pub mod index;
pub mod logging;
pub mod mapping;
pub mod metrics;
pub mod registry;
pub mod sink;
pub mod source;
pub mod tailer;
