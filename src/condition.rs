//! Predicates gating publication and node readiness.
//!
//! Two predicate families live here:
//!
//! - [`PublishCondition`]: evaluated against a message batch when something is
//!   published to a topic. A false result makes the publish a no-op.
//! - [`SubscriptionExpr`]: a boolean tree over topic names, evaluated against
//!   the set of subscribed topics that currently hold unread data for a
//!   consumer. Determines when a node becomes ready.
//!
//! Both are plain data evaluated by structural recursion; there is no string
//! expression language and nothing is ever interpreted at runtime.

use std::fmt;
use std::sync::Arc;

use rustc_hash::FxHashSet;

use crate::message::Message;

/// Predicate signature for custom publication gates.
pub type PayloadPredicate = Arc<dyn Fn(&[Message]) -> bool + Send + Sync>;

/// Gate evaluated on every publish attempt against the offered batch.
///
/// The stock variants cover the common routing split for tool-using
/// pipelines: forward a batch to the function-call path only when the last
/// message requests a call, and to the response path only when it does not.
///
/// # Examples
///
/// ```
/// use topicflow::condition::PublishCondition;
/// use topicflow::message::{Message, ToolCall};
/// use serde_json::json;
///
/// let gate = PublishCondition::last_message_has_tool_call();
/// let calling = vec![Message::assistant("").with_tool_calls(vec![
///     ToolCall::new("search", json!({})),
/// ])];
/// assert!(gate.accepts(&calling));
/// assert!(!gate.accepts(&[Message::assistant("plain")]));
/// ```
#[derive(Clone)]
pub enum PublishCondition {
    /// Accept every non-gated publish.
    Always,
    /// Accept only when the batch's last message carries a tool call.
    LastMessageHasToolCall,
    /// Accept only when the batch's last message carries no tool call.
    LastMessageLacksToolCall,
    /// Arbitrary named predicate over the batch.
    Predicate {
        /// Label used in logs and `Debug` output.
        name: &'static str,
        predicate: PayloadPredicate,
    },
}

impl PublishCondition {
    /// Stock gate: last message must request a function call.
    #[must_use]
    pub fn last_message_has_tool_call() -> Self {
        Self::LastMessageHasToolCall
    }

    /// Stock gate: last message must not request a function call.
    #[must_use]
    pub fn last_message_lacks_tool_call() -> Self {
        Self::LastMessageLacksToolCall
    }

    /// Wrap a custom predicate with a name for diagnostics.
    #[must_use]
    pub fn predicate(
        name: &'static str,
        predicate: impl Fn(&[Message]) -> bool + Send + Sync + 'static,
    ) -> Self {
        Self::Predicate {
            name,
            predicate: Arc::new(predicate),
        }
    }

    /// Evaluate this gate against a batch. Pure; an empty batch only passes
    /// the `Always` gate.
    #[must_use]
    pub fn accepts(&self, batch: &[Message]) -> bool {
        match self {
            Self::Always => true,
            Self::LastMessageHasToolCall => {
                batch.last().is_some_and(Message::has_tool_call)
            }
            Self::LastMessageLacksToolCall => {
                batch.last().is_some_and(|m| !m.has_tool_call())
            }
            Self::Predicate { predicate, .. } => predicate(batch),
        }
    }
}

impl Default for PublishCondition {
    fn default() -> Self {
        Self::Always
    }
}

impl fmt::Debug for PublishCondition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Always => write!(f, "Always"),
            Self::LastMessageHasToolCall => write!(f, "LastMessageHasToolCall"),
            Self::LastMessageLacksToolCall => write!(f, "LastMessageLacksToolCall"),
            Self::Predicate { name, .. } => write!(f, "Predicate({name})"),
        }
    }
}

/// Boolean expression tree over topic names.
///
/// Leaves name a topic; `All` and `Any` combine children. A node attaches one
/// or more expressions and becomes ready when every attached expression
/// evaluates true against the set of its subscribed topics with unread data.
///
/// Expressions are immutable once attached to a node, and evaluation is a
/// pure function of `(expression, pending set)`.
///
/// # Examples
///
/// ```
/// use topicflow::condition::SubscriptionExpr;
/// use rustc_hash::FxHashSet;
///
/// let expr = SubscriptionExpr::any([
///     SubscriptionExpr::topic("search_results"),
///     SubscriptionExpr::topic("cache_hits"),
/// ]);
///
/// let mut pending = FxHashSet::default();
/// pending.insert("cache_hits".to_string());
/// assert!(expr.evaluate(&pending));
/// ```
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum SubscriptionExpr {
    /// True when the named topic has unread data for the consumer.
    Topic(String),
    /// True when every child is true. Vacuously true when empty.
    All(Vec<SubscriptionExpr>),
    /// True when at least one child is true. False when empty.
    Any(Vec<SubscriptionExpr>),
}

impl SubscriptionExpr {
    /// Leaf referencing a single topic.
    #[must_use]
    pub fn topic(name: impl Into<String>) -> Self {
        Self::Topic(name.into())
    }

    /// Conjunction of children.
    #[must_use]
    pub fn all(children: impl IntoIterator<Item = SubscriptionExpr>) -> Self {
        Self::All(children.into_iter().collect())
    }

    /// Disjunction of children.
    #[must_use]
    pub fn any(children: impl IntoIterator<Item = SubscriptionExpr>) -> Self {
        Self::Any(children.into_iter().collect())
    }

    /// Evaluate against the set of topic names with pending data.
    #[must_use]
    pub fn evaluate(&self, pending: &FxHashSet<String>) -> bool {
        match self {
            Self::Topic(name) => pending.contains(name),
            Self::All(children) => children.iter().all(|c| c.evaluate(pending)),
            Self::Any(children) => children.iter().any(|c| c.evaluate(pending)),
        }
    }

    /// Collect every topic name referenced by this expression, preserving
    /// first-mention order.
    pub fn referenced_topics(&self, out: &mut Vec<String>) {
        match self {
            Self::Topic(name) => {
                if !out.iter().any(|t| t == name) {
                    out.push(name.clone());
                }
            }
            Self::All(children) | Self::Any(children) => {
                for child in children {
                    child.referenced_topics(out);
                }
            }
        }
    }
}

impl From<&str> for SubscriptionExpr {
    fn from(name: &str) -> Self {
        Self::Topic(name.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::ToolCall;
    use serde_json::json;

    fn pending(names: &[&str]) -> FxHashSet<String> {
        names.iter().map(|n| n.to_string()).collect()
    }

    #[test]
    fn always_accepts_anything() {
        assert!(PublishCondition::Always.accepts(&[]));
        assert!(PublishCondition::Always.accepts(&[Message::user("x")]));
    }

    #[test]
    fn tool_call_gates_inspect_last_message_only() {
        let has = PublishCondition::last_message_has_tool_call();
        let lacks = PublishCondition::last_message_lacks_tool_call();

        let calling = Message::assistant("").with_tool_calls(vec![ToolCall::new("f", json!({}))]);
        let plain = Message::assistant("done");

        // Only the final message decides, earlier calls are irrelevant.
        let batch = vec![calling.clone(), plain.clone()];
        assert!(!has.accepts(&batch));
        assert!(lacks.accepts(&batch));

        let batch = vec![plain, calling];
        assert!(has.accepts(&batch));
        assert!(!lacks.accepts(&batch));

        // Empty batches pass neither gate.
        assert!(!has.accepts(&[]));
        assert!(!lacks.accepts(&[]));
    }

    #[test]
    fn custom_predicate_runs_against_batch() {
        let gate = PublishCondition::predicate("two_plus", |batch| batch.len() >= 2);
        assert!(!gate.accepts(&[Message::user("a")]));
        assert!(gate.accepts(&[Message::user("a"), Message::user("b")]));
        assert_eq!(format!("{gate:?}"), "Predicate(two_plus)");
    }

    #[test]
    fn leaf_checks_membership() {
        let expr = SubscriptionExpr::topic("a");
        assert!(expr.evaluate(&pending(&["a", "b"])));
        assert!(!expr.evaluate(&pending(&["b"])));
    }

    #[test]
    fn all_requires_every_child() {
        let expr = SubscriptionExpr::all([
            SubscriptionExpr::topic("a"),
            SubscriptionExpr::topic("b"),
        ]);
        assert!(!expr.evaluate(&pending(&["a"])));
        assert!(!expr.evaluate(&pending(&["b"])));
        assert!(expr.evaluate(&pending(&["a", "b"])));
    }

    #[test]
    fn any_requires_one_child() {
        let expr = SubscriptionExpr::any([
            SubscriptionExpr::topic("a"),
            SubscriptionExpr::topic("b"),
        ]);
        assert!(expr.evaluate(&pending(&["a"])));
        assert!(expr.evaluate(&pending(&["b"])));
        assert!(!expr.evaluate(&pending(&["c"])));
    }

    #[test]
    fn empty_combinators() {
        assert!(SubscriptionExpr::all([]).evaluate(&pending(&[])));
        assert!(!SubscriptionExpr::any([]).evaluate(&pending(&["a"])));
    }

    #[test]
    fn nested_expression() {
        // a AND (b OR c)
        let expr = SubscriptionExpr::all([
            SubscriptionExpr::topic("a"),
            SubscriptionExpr::any([
                SubscriptionExpr::topic("b"),
                SubscriptionExpr::topic("c"),
            ]),
        ]);
        assert!(expr.evaluate(&pending(&["a", "c"])));
        assert!(!expr.evaluate(&pending(&["a"])));
        assert!(!expr.evaluate(&pending(&["b", "c"])));
    }

    #[test]
    fn referenced_topics_dedupes_in_order() {
        let expr = SubscriptionExpr::all([
            SubscriptionExpr::topic("a"),
            SubscriptionExpr::any([
                SubscriptionExpr::topic("b"),
                SubscriptionExpr::topic("a"),
            ]),
        ]);
        let mut out = Vec::new();
        expr.referenced_topics(&mut out);
        assert_eq!(out, vec!["a".to_string(), "b".to_string()]);
    }
}
