//! Workflow construction and execution.
//!
//! - [`WorkflowBuilder`] assembles topics and nodes, validates structure,
//!   and cross-wires tool capabilities at build time.
//! - [`Workflow`] owns the topic and node sets and drives execution:
//!   synchronous draining via [`Workflow::invoke`], concurrent streaming via
//!   [`Workflow::stream`], and resumption of open requests from the injected
//!   event store.

pub mod builder;
pub mod recovery;
pub mod runner;
pub mod stream;

pub use builder::{BuildError, WorkflowBuilder};
pub use recovery::RecoveryError;
pub use runner::{Workflow, WorkflowError};
pub use stream::OutputStream;
