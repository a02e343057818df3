//! Lifecycle event records, the pluggable event store, and causal
//! reconstruction of node input histories.
//!
//! Everything a workflow does (topic publishes and consumes, node, tool, and
//! workflow invocations) is recorded as an [`EventRecord`] in an injected
//! [`EventStore`]. The same records drive crash recovery: an unfinished run
//! is rebuilt purely from its persisted sequence, and the [`EventGraph`]
//! recovers the causal order of the messages feeding a node.

pub mod graph;
pub mod record;
pub mod store;
#[cfg(feature = "sqlite")]
pub mod store_sqlite;

pub use graph::{EventGraph, EventGraphError};
pub use record::{EventData, EventKind, EventRecord, InvokeContext};
pub use store::{EventStore, EventStoreError, MemoryEventStore, has_open_request};
#[cfg(feature = "sqlite")]
pub use store_sqlite::SqliteEventStore;
