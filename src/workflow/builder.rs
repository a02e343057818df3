//! Workflow construction and build-time validation.
//!
//! The builder derives the topic universe from the registered nodes, checks
//! the structural invariants that must never surface at run time, and
//! performs the one-time capability cross-wiring pass.

use std::sync::Arc;

use miette::Diagnostic;
use rustc_hash::FxHashMap;
use thiserror::Error;

use crate::event::{EventStore, MemoryEventStore};
use crate::node::Node;
use crate::tool::CallableSpec;
use crate::topic::{Topic, TopicKind};
use crate::workflow::runner::Workflow;

/// Default capacity of the bounded hand-off queue used by streaming runs.
const DEFAULT_STREAM_CAPACITY: usize = 64;

/// Structural errors. All of these are fatal at build time; a successfully
/// built workflow never raises them during execution.
#[derive(Debug, Error, Diagnostic)]
pub enum BuildError {
    /// Two nodes share a name.
    #[error("duplicate node name '{name}'")]
    #[diagnostic(
        code(topicflow::build::duplicate_node),
        help("Node names are identities; give every node a unique one.")
    )]
    DuplicateNode { name: String },

    /// The same topic was registered twice.
    #[error("duplicate topic registration '{name}'")]
    #[diagnostic(code(topicflow::build::duplicate_topic))]
    DuplicateTopic { name: String },

    /// No input topic is reachable (registered as Input and subscribed by a
    /// node).
    #[error("workflow has no reachable input topic")]
    #[diagnostic(
        code(topicflow::build::missing_input),
        help("Register exactly one Topic with TopicKind::Input and subscribe a node to it.")
    )]
    MissingInputTopic,

    /// More than one reachable input topic exists.
    #[error("workflow has multiple input topics: {names:?}")]
    #[diagnostic(code(topicflow::build::multiple_inputs))]
    MultipleInputTopics { names: Vec<String> },

    /// No output topic is reachable (registered as Output and published by a
    /// node).
    #[error("workflow has no reachable output topic")]
    #[diagnostic(
        code(topicflow::build::missing_output),
        help("Register at least one Topic with TopicKind::Output and publish a node into it.")
    )]
    MissingOutputTopic,
}

/// Fluent builder producing a validated [`Workflow`].
///
/// # Examples
///
/// ```
/// use topicflow::condition::SubscriptionExpr;
/// use topicflow::message::Message;
/// use topicflow::node::Node;
/// use topicflow::tool::FnTool;
/// use topicflow::topic::{Topic, TopicKind};
/// use topicflow::workflow::WorkflowBuilder;
///
/// let workflow = WorkflowBuilder::new("shouter")
///     .add_topic(Topic::new("in", TopicKind::Input))
///     .add_topic(Topic::new("out", TopicKind::Output))
///     .add_node(
///         Node::new(
///             "upper",
///             FnTool::sync("uppercase", |messages| {
///                 messages
///                     .into_iter()
///                     .map(|m| Message::assistant(&m.content.to_uppercase()))
///                     .collect()
///             }),
///         )
///         .subscribe(SubscriptionExpr::topic("in"))
///         .publish_to("out"),
///     )
///     .build()
///     .expect("valid structure");
/// assert_eq!(workflow.name(), "shouter");
/// ```
pub struct WorkflowBuilder {
    name: String,
    nodes: Vec<Node>,
    topics: FxHashMap<String, Arc<Topic>>,
    topic_order: Vec<String>,
    store: Option<Arc<dyn EventStore>>,
    stream_capacity: usize,
    duplicate_node: Option<String>,
    duplicate_topic: Option<String>,
}

impl WorkflowBuilder {
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            nodes: Vec::new(),
            topics: FxHashMap::default(),
            topic_order: Vec::new(),
            store: None,
            stream_capacity: DEFAULT_STREAM_CAPACITY,
            duplicate_node: None,
            duplicate_topic: None,
        }
    }

    /// Register a topic with an explicit kind or publication gate. Topics a
    /// node references without registration are created as plain internal
    /// topics at build time.
    #[must_use]
    pub fn add_topic(mut self, topic: Topic) -> Self {
        let name = topic.name().to_string();
        if self.topics.contains_key(&name) {
            self.duplicate_topic.get_or_insert(name);
            return self;
        }
        self.topic_order.push(name.clone());
        self.topics.insert(name, Arc::new(topic));
        self
    }

    /// Register a node. Order of registration is the tie-break order used by
    /// the scheduler when several nodes become ready at once.
    #[must_use]
    pub fn add_node(mut self, node: Node) -> Self {
        if self.nodes.iter().any(|n| n.name() == node.name()) {
            self.duplicate_node
                .get_or_insert_with(|| node.name().to_string());
            return self;
        }
        self.nodes.push(node);
        self
    }

    /// Inject the event store. Defaults to a fresh [`MemoryEventStore`]
    /// when omitted.
    #[must_use]
    pub fn with_event_store(mut self, store: Arc<dyn EventStore>) -> Self {
        self.store = Some(store);
        self
    }

    /// Capacity of the bounded output hand-off queue for streaming runs.
    #[must_use]
    pub fn with_stream_capacity(mut self, capacity: usize) -> Self {
        self.stream_capacity = capacity.max(1);
        self
    }

    /// Validate structure, derive the topic universe and subscriber
    /// adjacency, cross-wire capabilities, and produce the workflow.
    pub fn build(self) -> Result<Workflow, BuildError> {
        let Self {
            name,
            nodes,
            mut topics,
            mut topic_order,
            store,
            stream_capacity,
            duplicate_node,
            duplicate_topic,
        } = self;

        if let Some(name) = duplicate_node {
            return Err(BuildError::DuplicateNode { name });
        }
        if let Some(name) = duplicate_topic {
            return Err(BuildError::DuplicateTopic { name });
        }

        // Topic universe: explicit registrations plus every name a node
        // subscribes to or publishes into.
        for node in &nodes {
            for topic_name in node
                .subscribed_topics()
                .into_iter()
                .chain(node.publish_targets().iter().cloned())
            {
                if !topics.contains_key(&topic_name) {
                    topic_order.push(topic_name.clone());
                    topics.insert(
                        topic_name.clone(),
                        Arc::new(Topic::new(topic_name, TopicKind::Internal)),
                    );
                }
            }
        }

        // Subscriber adjacency, in node registration order.
        let mut topic_nodes: FxHashMap<String, Vec<String>> = FxHashMap::default();
        for node in &nodes {
            for topic_name in node.subscribed_topics() {
                topic_nodes
                    .entry(topic_name)
                    .or_default()
                    .push(node.name().to_string());
            }
        }

        // Reachability: an input topic must feed a subscriber, an output
        // topic must be fed by a publisher.
        let reachable_inputs: Vec<String> = topic_order
            .iter()
            .filter(|name| {
                topics[*name].kind() == TopicKind::Input
                    && topic_nodes.get(*name).is_some_and(|subs| !subs.is_empty())
            })
            .cloned()
            .collect();
        let input_topic = match reachable_inputs.as_slice() {
            [] => return Err(BuildError::MissingInputTopic),
            [single] => single.clone(),
            _ => {
                return Err(BuildError::MultipleInputTopics {
                    names: reachable_inputs,
                });
            }
        };

        let has_reachable_output = topic_order.iter().any(|name| {
            topics[name].kind() == TopicKind::Output
                && nodes
                    .iter()
                    .any(|n| n.publish_targets().iter().any(|t| t == name))
        });
        if !has_reachable_output {
            return Err(BuildError::MissingOutputTopic);
        }

        for node in &nodes {
            for topic_name in node.subscribed_topics() {
                let fed = topics[&topic_name].kind() != TopicKind::Internal
                    || nodes
                        .iter()
                        .any(|n| n.publish_targets().iter().any(|t| t == &topic_name));
                if !fed {
                    tracing::warn!(
                        node = node.name(),
                        topic = %topic_name,
                        "subscription to a topic no node publishes into"
                    );
                }
            }
        }

        cross_wire_callables(&nodes, &topic_nodes);

        let terminal_topics: Vec<String> = topic_order
            .iter()
            .filter(|name| topics[*name].kind().is_terminal())
            .cloned()
            .collect();

        let node_order: Vec<String> = nodes.iter().map(|n| n.name().to_string()).collect();
        let nodes: FxHashMap<String, Arc<Node>> = nodes
            .into_iter()
            .map(|n| (n.name().to_string(), Arc::new(n)))
            .collect();

        tracing::debug!(
            workflow = %name,
            topics = topic_order.len(),
            nodes = node_order.len(),
            input = %input_topic,
            "workflow built"
        );

        Ok(Workflow::from_parts(
            name,
            topics,
            topic_nodes,
            nodes,
            node_order,
            input_topic,
            terminal_topics,
            store.unwrap_or_else(|| Arc::new(MemoryEventStore::new())),
            stream_capacity,
        ))
    }
}

/// One-time O(topics × nodes) pass: hand every backend that accepts
/// callables the specs of the function tools listening downstream of it.
fn cross_wire_callables(nodes: &[Node], topic_nodes: &FxHashMap<String, Vec<String>>) {
    let mut specs_by_node: FxHashMap<&str, Option<CallableSpec>> = FxHashMap::default();
    for node in nodes {
        specs_by_node.insert(node.name(), node.tool().callable_spec());
    }

    // Callable specs reachable through each topic's subscribers, tagged
    // with the subscriber's identity so nodes never bind themselves.
    let mut specs_by_topic: FxHashMap<&String, Vec<(&str, CallableSpec)>> = FxHashMap::default();
    for (topic, subscribers) in topic_nodes {
        let specs: Vec<(&str, CallableSpec)> = subscribers
            .iter()
            .filter_map(|s| {
                let spec = specs_by_node.get(s.as_str()).cloned().flatten()?;
                Some((s.as_str(), spec))
            })
            .collect();
        if !specs.is_empty() {
            specs_by_topic.insert(topic, specs);
        }
    }

    for node in nodes {
        let mut specs: Vec<CallableSpec> = Vec::new();
        for target in node.publish_targets() {
            for (owner, spec) in specs_by_topic.get(target).into_iter().flatten() {
                if *owner != node.name() && !specs.iter().any(|s| s.name == spec.name) {
                    specs.push(spec.clone());
                }
            }
        }
        if !specs.is_empty() {
            tracing::debug!(
                node = node.name(),
                callables = specs.len(),
                "cross-wired downstream callables"
            );
            node.tool().bind_callables(&specs);
        }
    }
}
