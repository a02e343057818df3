//! # Topicflow: Reactive Topic Pub/Sub Workflow Engine
//!
//! Topicflow composes multi-step, tool-using computations (LLM calls,
//! function calls, retrieval steps) into a directed graph that executes
//! reactively as data becomes available, with durable recovery of partially
//! completed runs from an event store.
//!
//! ## Core Concepts
//!
//! - **Topics**: Ordered, append-only event logs with per-consumer read
//!   cursors and optional publication gates
//! - **Nodes**: Subscription-expression-gated units of work wrapping a
//!   pluggable [`Tool`](tool::Tool)
//! - **Workflow**: Ready-queue orchestrator with synchronous and concurrent
//!   streaming execution
//! - **Event Store**: Append-only lifecycle record powering audit and
//!   crash recovery
//! - **Event Graph**: Causal reconstruction of the message history feeding
//!   a node invocation
//!
//! ## Quick Start
//!
//! ```
//! use topicflow::condition::SubscriptionExpr;
//! use topicflow::event::InvokeContext;
//! use topicflow::message::Message;
//! use topicflow::node::Node;
//! use topicflow::tool::FnTool;
//! use topicflow::topic::{Topic, TopicKind};
//! use topicflow::workflow::WorkflowBuilder;
//!
//! # #[tokio::main(flavor = "current_thread")]
//! # async fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let workflow = WorkflowBuilder::new("shouter")
//!     .add_topic(Topic::new("in", TopicKind::Input))
//!     .add_topic(Topic::new("out", TopicKind::Output))
//!     .add_node(
//!         Node::new(
//!             "upper",
//!             FnTool::sync("uppercase", |messages| {
//!                 messages
//!                     .into_iter()
//!                     .map(|m| Message::assistant(&m.content.to_uppercase()))
//!                     .collect()
//!             }),
//!         )
//!         .subscribe(SubscriptionExpr::topic("in"))
//!         .publish_to("out"),
//!     )
//!     .build()?;
//!
//! let ctx = InvokeContext::new("conversation-1", "request-1");
//! let result = workflow.invoke(&ctx, vec![Message::user("hello")]).await?;
//! assert_eq!(result[0].content, "HELLO");
//! # Ok(())
//! # }
//! ```
//!
//! ## Conditional Routing
//!
//! Topics can carry a publication gate: a publish whose batch fails the
//! gate is a no-op, so a node can publish the same output to two topics and
//! let the gates decide which path reacts. See
//! [`PublishCondition`](condition::PublishCondition).
//!
//! ## Recovery
//!
//! Every lifecycle transition is recorded in an injected
//! [`EventStore`](event::EventStore). Invoking a request whose history has
//! no terminal record replays the persisted topic events (reproducing the
//! original offsets), re-enqueues every node that is still ready, and
//! continues where the previous attempt stopped.
//!
//! ## Module Guide
//!
//! - [`message`] - Message and tool-call payload types
//! - [`condition`] - Publication gates and subscription expressions
//! - [`topic`] - Ordered event logs with per-consumer cursors
//! - [`tool`] - The pluggable unit-of-work boundary
//! - [`node`] - Subscription-gated units of work
//! - [`event`] - Lifecycle records, event stores, causal ordering
//! - [`workflow`] - Builder, orchestrator, streaming, recovery
//! - [`telemetry`] - Opt-in tracing subscriber setup

pub mod condition;
pub mod event;
pub mod message;
pub mod node;
pub mod telemetry;
pub mod tool;
pub mod topic;
pub mod workflow;
