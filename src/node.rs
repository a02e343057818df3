//! Subscription-gated units of work.
//!
//! A [`Node`] binds subscription expressions over topics and a list of
//! output topics to a wrapped [`Tool`]. Nodes are built once, are stateless
//! between invocations, and keep no cursor of their own: the per-node read
//! position lives in the subscribed topics, keyed by node name.

use std::sync::Arc;

use miette::Diagnostic;
use rustc_hash::{FxHashMap, FxHashSet};
use thiserror::Error;
use uuid::Uuid;

use crate::condition::SubscriptionExpr;
use crate::event::{EventGraph, EventGraphError, InvokeContext};
use crate::message::Message;
use crate::tool::{MessageStream, Tool, ToolContext, ToolError};
use crate::topic::Topic;

/// Errors raised while gathering a node's input.
#[derive(Debug, Error, Diagnostic)]
pub enum NodeError {
    /// A subscription references a topic the workflow does not own.
    /// The builder validates this, so hitting it at run time means the
    /// topic map was mutated out from under the node.
    #[error("node '{node}' subscribes to unknown topic '{topic}'")]
    #[diagnostic(code(topicflow::node::unknown_topic))]
    UnknownTopic { node: String, topic: String },

    /// Causal ordering of the consumed events failed.
    #[error(transparent)]
    #[diagnostic(code(topicflow::node::event_graph))]
    Graph(#[from] EventGraphError),
}

/// The gathered input for one node invocation.
#[derive(Debug)]
pub struct NodeInput {
    /// Causally ordered message history feeding the tool.
    pub messages: Vec<Message>,
    /// Ids of the newly consumed events; becomes the provenance of every
    /// event this invocation publishes.
    pub consumed_event_ids: Vec<Uuid>,
    /// Per-topic cursor movements, recorded to the event store by the caller.
    pub consume_records: Vec<ConsumeRecord>,
}

/// One topic's cursor movement during input gathering.
#[derive(Clone, Debug)]
pub struct ConsumeRecord {
    pub topic: String,
    pub first_offset: usize,
    pub up_to: usize,
    pub event_ids: Vec<Uuid>,
}

/// A subscription-expression-gated unit of work.
///
/// # Examples
///
/// ```
/// use topicflow::condition::SubscriptionExpr;
/// use topicflow::message::Message;
/// use topicflow::node::Node;
/// use topicflow::tool::FnTool;
///
/// let node = Node::new(
///     "shout",
///     FnTool::sync("uppercase", |messages| {
///         messages
///             .into_iter()
///             .map(|m| Message::assistant(&m.content.to_uppercase()))
///             .collect()
///     }),
/// )
/// .subscribe(SubscriptionExpr::topic("in"))
/// .publish_to("out");
///
/// assert_eq!(node.name(), "shout");
/// assert_eq!(node.subscribed_topics(), vec!["in".to_string()]);
/// ```
pub struct Node {
    name: String,
    kind: String,
    subscriptions: Vec<SubscriptionExpr>,
    publish_to: Vec<String>,
    tool: Arc<dyn Tool>,
}

impl Node {
    /// Create a node wrapping `tool`, with no subscriptions or outputs yet.
    /// The kind tag defaults to the tool's name.
    #[must_use]
    pub fn new(name: impl Into<String>, tool: impl Tool + 'static) -> Self {
        let tool: Arc<dyn Tool> = Arc::new(tool);
        Self {
            name: name.into(),
            kind: tool.name().to_string(),
            subscriptions: Vec::new(),
            publish_to: Vec::new(),
            tool,
        }
    }

    /// Create a node from an already-shared tool.
    #[must_use]
    pub fn with_shared_tool(name: impl Into<String>, tool: Arc<dyn Tool>) -> Self {
        Self {
            name: name.into(),
            kind: tool.name().to_string(),
            subscriptions: Vec::new(),
            publish_to: Vec::new(),
            tool,
        }
    }

    /// Override the free-form kind tag used in serialization and tracing.
    #[must_use]
    pub fn with_kind(mut self, kind: impl Into<String>) -> Self {
        self.kind = kind.into();
        self
    }

    /// Attach a subscription expression. Expressions are ANDed at the node
    /// level: every attached expression must hold for the node to be ready.
    #[must_use]
    pub fn subscribe(mut self, expr: impl Into<SubscriptionExpr>) -> Self {
        self.subscriptions.push(expr.into());
        self
    }

    /// Append a destination topic for this node's output.
    #[must_use]
    pub fn publish_to(mut self, topic: impl Into<String>) -> Self {
        self.publish_to.push(topic.into());
        self
    }

    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    #[must_use]
    pub fn kind(&self) -> &str {
        &self.kind
    }

    #[must_use]
    pub fn subscriptions(&self) -> &[SubscriptionExpr] {
        &self.subscriptions
    }

    #[must_use]
    pub fn publish_targets(&self) -> &[String] {
        &self.publish_to
    }

    #[must_use]
    pub fn tool(&self) -> &Arc<dyn Tool> {
        &self.tool
    }

    /// Every topic referenced by this node's subscriptions, in
    /// first-mention order.
    #[must_use]
    pub fn subscribed_topics(&self) -> Vec<String> {
        let mut out = Vec::new();
        for expr in &self.subscriptions {
            expr.referenced_topics(&mut out);
        }
        out
    }

    /// Readiness: with no subscriptions, always true; otherwise every
    /// attached expression must evaluate true against the subscribed topics
    /// currently holding unread data for this node.
    #[must_use]
    pub fn can_invoke(&self, topics: &FxHashMap<String, Arc<Topic>>) -> bool {
        if self.subscriptions.is_empty() {
            return true;
        }
        let pending: FxHashSet<String> = self
            .subscribed_topics()
            .into_iter()
            .filter(|name| {
                topics
                    .get(name)
                    .is_some_and(|topic| topic.can_consume(&self.name))
            })
            .collect();
        self.subscriptions.iter().all(|expr| expr.evaluate(&pending))
    }

    /// Consume every subscribed topic (advancing this node's cursors) and
    /// order the union of the newly read events causally.
    ///
    /// Returns `Ok(None)` when nothing was unread; cursors do not move in
    /// that case either, so gathering is safe to retry within a pass.
    pub fn collect_input(
        &self,
        topics: &FxHashMap<String, Arc<Topic>>,
    ) -> Result<Option<NodeInput>, NodeError> {
        let mut consumed = Vec::new();
        let mut consume_records = Vec::new();

        for topic_name in self.subscribed_topics() {
            let topic = topics.get(&topic_name).ok_or_else(|| NodeError::UnknownTopic {
                node: self.name.clone(),
                topic: topic_name.clone(),
            })?;
            let events = topic.consume(&self.name);
            if events.is_empty() {
                continue;
            }
            consume_records.push(ConsumeRecord {
                topic: topic_name,
                first_offset: events[0].offset,
                up_to: events[events.len() - 1].offset + 1,
                event_ids: events.iter().map(|e| e.id).collect(),
            });
            consumed.extend(events);
        }

        if consumed.is_empty() {
            return Ok(None);
        }

        let all_events: Vec<_> = topics.values().flat_map(|t| t.events()).collect();
        let graph = EventGraph::from_seeds(&consumed, &all_events)?;
        let messages = graph.input_history()?;

        Ok(Some(NodeInput {
            messages,
            consumed_event_ids: consumed.iter().map(|e| e.id).collect(),
            consume_records,
        }))
    }

    /// Forward gathered input to the wrapped tool, one-shot.
    pub async fn invoke(
        &self,
        context: &InvokeContext,
        messages: Vec<Message>,
    ) -> Result<Vec<Message>, ToolError> {
        self.tool
            .invoke(
                ToolContext {
                    node: self.name.clone(),
                    invoke: context.clone(),
                },
                messages,
            )
            .await
    }

    /// Forward gathered input to the wrapped tool's streaming form. Cursor
    /// movement is identical to [`invoke`](Self::invoke): gathering already
    /// happened before either is called.
    pub async fn stream(
        &self,
        context: &InvokeContext,
        messages: Vec<Message>,
    ) -> Result<MessageStream, ToolError> {
        self.tool
            .stream(
                ToolContext {
                    node: self.name.clone(),
                    invoke: context.clone(),
                },
                messages,
            )
            .await
    }
}

impl std::fmt::Debug for Node {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Node")
            .field("name", &self.name)
            .field("kind", &self.kind)
            .field("subscriptions", &self.subscriptions)
            .field("publish_to", &self.publish_to)
            .finish()
    }
}
