//! Serializable lifecycle records persisted for every run.
//!
//! Shapes here are deliberately serde-first (tagged enums, RFC3339-capable
//! timestamps via chrono's serde support) so a store backend can persist them
//! as-is; no backend-specific encoding leaks into this module.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::message::Message;
use crate::topic::TopicEvent;

/// Causal identity threaded through every event of a run.
///
/// - `conversation_id` groups related requests (a chat session);
/// - `request_id` identifies one logical request, stable across resumes;
/// - `run_id` identifies one execution attempt of that request.
///
/// # Examples
///
/// ```
/// use topicflow::event::InvokeContext;
///
/// let ctx = InvokeContext::new("conv-1", "req-1");
/// let resumed = ctx.next_run();
/// assert_eq!(resumed.request_id, ctx.request_id);
/// assert_ne!(resumed.run_id, ctx.run_id);
/// ```
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct InvokeContext {
    pub conversation_id: String,
    pub request_id: String,
    pub run_id: String,
}

impl InvokeContext {
    /// Context for a fresh execution attempt of `request_id`.
    #[must_use]
    pub fn new(conversation_id: impl Into<String>, request_id: impl Into<String>) -> Self {
        Self {
            conversation_id: conversation_id.into(),
            request_id: request_id.into(),
            run_id: Uuid::new_v4().to_string(),
        }
    }

    /// Same conversation and request, fresh run id. Used when resuming.
    #[must_use]
    pub fn next_run(&self) -> Self {
        Self {
            conversation_id: self.conversation_id.clone(),
            request_id: self.request_id.clone(),
            run_id: Uuid::new_v4().to_string(),
        }
    }
}

/// Discriminant for filtering recorded events without matching payloads.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    TopicPublish,
    TopicConsume,
    NodeInvoke,
    NodeRespond,
    NodeFail,
    ToolInvoke,
    ToolRespond,
    ToolFail,
    WorkflowInvoke,
    WorkflowRespond,
    WorkflowFail,
}

/// Type-specific payload of a recorded event.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum EventData {
    /// A topic appended an event; embeds the full [`TopicEvent`] so replay
    /// can rebuild the log byte-for-byte (same ids, same offsets).
    TopicPublish { topic: String, event: TopicEvent },
    /// A consumer advanced its cursor over `[first_offset, up_to)`.
    TopicConsume {
        topic: String,
        consumer: String,
        first_offset: usize,
        up_to: usize,
        consumed_event_ids: Vec<Uuid>,
    },
    NodeInvoke {
        node: String,
        messages: Vec<Message>,
    },
    NodeRespond {
        node: String,
        messages: Vec<Message>,
    },
    NodeFail {
        node: String,
        error: String,
    },
    ToolInvoke {
        tool: String,
        node: String,
        messages: Vec<Message>,
    },
    ToolRespond {
        tool: String,
        node: String,
        messages: Vec<Message>,
    },
    ToolFail {
        tool: String,
        node: String,
        error: String,
    },
    WorkflowInvoke {
        workflow: String,
        messages: Vec<Message>,
    },
    WorkflowRespond {
        workflow: String,
        messages: Vec<Message>,
    },
    WorkflowFail {
        workflow: String,
        error: String,
    },
}

impl EventData {
    #[must_use]
    pub fn kind(&self) -> EventKind {
        match self {
            EventData::TopicPublish { .. } => EventKind::TopicPublish,
            EventData::TopicConsume { .. } => EventKind::TopicConsume,
            EventData::NodeInvoke { .. } => EventKind::NodeInvoke,
            EventData::NodeRespond { .. } => EventKind::NodeRespond,
            EventData::NodeFail { .. } => EventKind::NodeFail,
            EventData::ToolInvoke { .. } => EventKind::ToolInvoke,
            EventData::ToolRespond { .. } => EventKind::ToolRespond,
            EventData::ToolFail { .. } => EventKind::ToolFail,
            EventData::WorkflowInvoke { .. } => EventKind::WorkflowInvoke,
            EventData::WorkflowRespond { .. } => EventKind::WorkflowRespond,
            EventData::WorkflowFail { .. } => EventKind::WorkflowFail,
        }
    }
}

/// One persisted record: identity, timestamp, causal context, payload.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct EventRecord {
    pub id: Uuid,
    pub at: DateTime<Utc>,
    pub context: InvokeContext,
    pub data: EventData,
}

impl EventRecord {
    #[must_use]
    pub fn new(context: InvokeContext, data: EventData) -> Self {
        Self {
            id: Uuid::new_v4(),
            at: Utc::now(),
            context,
            data,
        }
    }

    #[must_use]
    pub fn kind(&self) -> EventKind {
        self.data.kind()
    }

    /// True for the records that close a request (success or failure).
    /// A request with events but no terminal record is resumable.
    #[must_use]
    pub fn is_terminal(&self) -> bool {
        matches!(
            self.kind(),
            EventKind::WorkflowRespond | EventKind::WorkflowFail
        )
    }

    #[must_use]
    pub fn topic_publish(context: &InvokeContext, topic: &str, event: TopicEvent) -> Self {
        Self::new(
            context.clone(),
            EventData::TopicPublish {
                topic: topic.to_string(),
                event,
            },
        )
    }

    #[must_use]
    pub fn topic_consume(
        context: &InvokeContext,
        topic: &str,
        consumer: &str,
        first_offset: usize,
        up_to: usize,
        consumed_event_ids: Vec<Uuid>,
    ) -> Self {
        Self::new(
            context.clone(),
            EventData::TopicConsume {
                topic: topic.to_string(),
                consumer: consumer.to_string(),
                first_offset,
                up_to,
                consumed_event_ids,
            },
        )
    }

    #[must_use]
    pub fn node_invoke(context: &InvokeContext, node: &str, messages: Vec<Message>) -> Self {
        Self::new(
            context.clone(),
            EventData::NodeInvoke {
                node: node.to_string(),
                messages,
            },
        )
    }

    #[must_use]
    pub fn node_respond(context: &InvokeContext, node: &str, messages: Vec<Message>) -> Self {
        Self::new(
            context.clone(),
            EventData::NodeRespond {
                node: node.to_string(),
                messages,
            },
        )
    }

    #[must_use]
    pub fn node_fail(context: &InvokeContext, node: &str, error: impl Into<String>) -> Self {
        Self::new(
            context.clone(),
            EventData::NodeFail {
                node: node.to_string(),
                error: error.into(),
            },
        )
    }

    #[must_use]
    pub fn tool_invoke(
        context: &InvokeContext,
        tool: &str,
        node: &str,
        messages: Vec<Message>,
    ) -> Self {
        Self::new(
            context.clone(),
            EventData::ToolInvoke {
                tool: tool.to_string(),
                node: node.to_string(),
                messages,
            },
        )
    }

    #[must_use]
    pub fn tool_respond(
        context: &InvokeContext,
        tool: &str,
        node: &str,
        messages: Vec<Message>,
    ) -> Self {
        Self::new(
            context.clone(),
            EventData::ToolRespond {
                tool: tool.to_string(),
                node: node.to_string(),
                messages,
            },
        )
    }

    #[must_use]
    pub fn tool_fail(
        context: &InvokeContext,
        tool: &str,
        node: &str,
        error: impl Into<String>,
    ) -> Self {
        Self::new(
            context.clone(),
            EventData::ToolFail {
                tool: tool.to_string(),
                node: node.to_string(),
                error: error.into(),
            },
        )
    }

    #[must_use]
    pub fn workflow_invoke(
        context: &InvokeContext,
        workflow: &str,
        messages: Vec<Message>,
    ) -> Self {
        Self::new(
            context.clone(),
            EventData::WorkflowInvoke {
                workflow: workflow.to_string(),
                messages,
            },
        )
    }

    #[must_use]
    pub fn workflow_respond(
        context: &InvokeContext,
        workflow: &str,
        messages: Vec<Message>,
    ) -> Self {
        Self::new(
            context.clone(),
            EventData::WorkflowRespond {
                workflow: workflow.to_string(),
                messages,
            },
        )
    }

    #[must_use]
    pub fn workflow_fail(
        context: &InvokeContext,
        workflow: &str,
        error: impl Into<String>,
    ) -> Self {
        Self::new(
            context.clone(),
            EventData::WorkflowFail {
                workflow: workflow.to_string(),
                error: error.into(),
            },
        )
    }
}
