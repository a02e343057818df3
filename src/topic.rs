//! Append-only topic logs with per-consumer cursors and publication gates.
//!
//! A [`Topic`] is the unit of communication between nodes: an ordered,
//! offset-tracked sequence of publish events that distinct consumers read
//! independently and in full. Nothing is ever removed from a log; consumers
//! advance private cursors instead.

use std::sync::Mutex;

use chrono::{DateTime, Utc};
use miette::Diagnostic;
use rustc_hash::FxHashMap;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

use crate::condition::PublishCondition;
use crate::message::Message;

/// Role a topic plays in a workflow. One mechanism, four roles.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TopicKind {
    /// Plain intermediate channel between nodes.
    Internal,
    /// Entry point; every workflow seeds caller input here.
    Input,
    /// Terminal sink; its events form the workflow's result.
    Output,
    /// Pauses the graph pending an out-of-band reply.
    HumanRequest,
}

impl TopicKind {
    /// Returns true for topics whose events are delivered to the caller.
    #[must_use]
    pub fn is_terminal(&self) -> bool {
        matches!(self, TopicKind::Output | TopicKind::HumanRequest)
    }
}

/// One immutable publish event in a topic's log.
///
/// `offset` is the append position within the owning topic: gapless and
/// strictly increasing. `consumed_event_ids` records which upstream events
/// causally produced this payload, which is what the event graph later walks.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TopicEvent {
    /// Globally unique id, referenced by downstream provenance lists.
    pub id: Uuid,
    /// Append position within the topic.
    pub offset: usize,
    /// Identity of the publisher (node name or workflow name).
    pub publisher: String,
    /// The ordered message batch.
    pub messages: Vec<Message>,
    /// Ids of the upstream events this payload was derived from.
    pub consumed_event_ids: Vec<Uuid>,
    /// Publish time; used as the logical timestamp for output ordering.
    pub at: DateTime<Utc>,
}

/// Errors raised by topic log maintenance (restore and cursor surgery).
#[derive(Debug, Error, Diagnostic)]
pub enum TopicError {
    /// A restored event sequence is not gapless from offset zero.
    #[error("topic '{topic}': restored offset {found} where {expected} was expected")]
    #[diagnostic(
        code(topicflow::topic::offset_gap),
        help("Persisted publish events must be replayed complete and in order.")
    )]
    OffsetGap {
        topic: String,
        expected: usize,
        found: usize,
    },

    /// A cursor would be moved past the end of the log.
    #[error("topic '{topic}': cursor {cursor} for consumer '{consumer}' exceeds log length {len}")]
    #[diagnostic(
        code(topicflow::topic::cursor_out_of_range),
        help("Consume events referencing this cursor do not match the replayed log.")
    )]
    CursorOutOfRange {
        topic: String,
        consumer: String,
        cursor: usize,
        len: usize,
    },
}

#[derive(Debug, Default)]
struct TopicLog {
    events: Vec<TopicEvent>,
    cursors: FxHashMap<String, usize>,
}

/// An ordered, append-only event channel with per-consumer read cursors.
///
/// All mutation happens under one internal mutex, so cursor updates are
/// atomic per `(topic, consumer)` pair and safe to drive from concurrent
/// node tasks.
///
/// # Examples
///
/// ```
/// use topicflow::message::Message;
/// use topicflow::topic::{Topic, TopicKind};
///
/// let topic = Topic::new("in", TopicKind::Input);
/// let event = topic
///     .publish(vec![Message::user("hello")], "caller", vec![])
///     .expect("ungated publish always appends");
/// assert_eq!(event.offset, 0);
///
/// assert!(topic.can_consume("n1"));
/// let read = topic.consume("n1");
/// assert_eq!(read.len(), 1);
/// assert!(!topic.can_consume("n1"));
/// ```
#[derive(Debug)]
pub struct Topic {
    name: String,
    kind: TopicKind,
    condition: PublishCondition,
    inner: Mutex<TopicLog>,
}

impl Topic {
    /// Create an ungated topic.
    #[must_use]
    pub fn new(name: impl Into<String>, kind: TopicKind) -> Self {
        Self {
            name: name.into(),
            kind,
            condition: PublishCondition::Always,
            inner: Mutex::new(TopicLog::default()),
        }
    }

    /// Create a topic whose publishes are gated by `condition`.
    #[must_use]
    pub fn with_condition(
        name: impl Into<String>,
        kind: TopicKind,
        condition: PublishCondition,
    ) -> Self {
        Self {
            name: name.into(),
            kind,
            condition,
            inner: Mutex::new(TopicLog::default()),
        }
    }

    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    #[must_use]
    pub fn kind(&self) -> TopicKind {
        self.kind
    }

    #[must_use]
    pub fn condition(&self) -> &PublishCondition {
        &self.condition
    }

    /// Attempt to append `messages` to the log.
    ///
    /// Evaluates the publication gate first: a rejected batch is a complete
    /// no-op (no event, no offset movement) and returns `None`. An accepted
    /// batch is appended at `offset == len` and returned.
    pub fn publish(
        &self,
        messages: Vec<Message>,
        publisher: impl Into<String>,
        consumed_event_ids: Vec<Uuid>,
    ) -> Option<TopicEvent> {
        if !self.condition.accepts(&messages) {
            tracing::debug!(topic = %self.name, condition = ?self.condition, "publish gated off");
            return None;
        }

        let mut log = self.inner.lock().expect("topic log poisoned");
        let event = TopicEvent {
            id: Uuid::new_v4(),
            offset: log.events.len(),
            publisher: publisher.into(),
            messages,
            consumed_event_ids,
            at: Utc::now(),
        };
        log.events.push(event.clone());
        tracing::debug!(topic = %self.name, offset = event.offset, publisher = %event.publisher, "published");
        Some(event)
    }

    /// True iff `consumer` has unread events. Unknown consumers start at
    /// offset zero, so any non-empty log is readable.
    #[must_use]
    pub fn can_consume(&self, consumer: &str) -> bool {
        let log = self.inner.lock().expect("topic log poisoned");
        log.cursors.get(consumer).copied().unwrap_or(0) < log.events.len()
    }

    /// Return every unread event for `consumer` and advance its cursor to
    /// the end of the log, atomically.
    ///
    /// An event is returned at most once per consumer identity; a second
    /// `consume` without intervening publishes yields an empty vec.
    pub fn consume(&self, consumer: &str) -> Vec<TopicEvent> {
        let mut log = self.inner.lock().expect("topic log poisoned");
        let len = log.events.len();
        let cursor = log.cursors.get(consumer).copied().unwrap_or(0);
        let unread = log.events[cursor..].to_vec();
        log.cursors.insert(consumer.to_string(), len);
        if !unread.is_empty() {
            tracing::debug!(
                topic = %self.name,
                consumer,
                from = cursor,
                to = len,
                "consumed"
            );
        }
        unread
    }

    /// Current cursor position for `consumer` (zero if it has never read).
    #[must_use]
    pub fn cursor(&self, consumer: &str) -> usize {
        let log = self.inner.lock().expect("topic log poisoned");
        log.cursors.get(consumer).copied().unwrap_or(0)
    }

    /// Number of events in the log.
    #[must_use]
    pub fn len(&self) -> usize {
        self.inner.lock().expect("topic log poisoned").events.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Snapshot of the full log in append order.
    #[must_use]
    pub fn events(&self) -> Vec<TopicEvent> {
        self.inner.lock().expect("topic log poisoned").events.clone()
    }

    /// Clear the log and every cursor. Used at the start of a fresh run.
    pub fn reset(&self) {
        let mut log = self.inner.lock().expect("topic log poisoned");
        log.events.clear();
        log.cursors.clear();
    }

    /// Rehydrate the log from persisted publish events, replacing current
    /// contents and clearing cursors.
    ///
    /// Offsets must arrive gapless from zero so that downstream provenance
    /// ids stay valid; anything else is rejected without mutating the log.
    pub fn restore_from(&self, events: Vec<TopicEvent>) -> Result<(), TopicError> {
        for (expected, event) in events.iter().enumerate() {
            if event.offset != expected {
                return Err(TopicError::OffsetGap {
                    topic: self.name.clone(),
                    expected,
                    found: event.offset,
                });
            }
        }
        let mut log = self.inner.lock().expect("topic log poisoned");
        log.cursors.clear();
        log.events = events;
        tracing::debug!(topic = %self.name, len = log.events.len(), "restored");
        Ok(())
    }

    /// Move a consumer's cursor during restore. Rejects positions past the
    /// end of the current log.
    pub fn set_cursor(&self, consumer: &str, cursor: usize) -> Result<(), TopicError> {
        let mut log = self.inner.lock().expect("topic log poisoned");
        if cursor > log.events.len() {
            return Err(TopicError::CursorOutOfRange {
                topic: self.name.clone(),
                consumer: consumer.to_string(),
                cursor,
                len: log.events.len(),
            });
        }
        log.cursors.insert(consumer.to_string(), cursor);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn batch(content: &str) -> Vec<Message> {
        vec![Message::user(content)]
    }

    #[test]
    fn offsets_are_gapless_and_increasing() {
        let topic = Topic::new("t", TopicKind::Internal);
        for i in 0..5 {
            let event = topic.publish(batch("x"), "p", vec![]).unwrap();
            assert_eq!(event.offset, i);
        }
        assert_eq!(topic.len(), 5);
    }

    #[test]
    fn consumers_read_independently_and_exactly_once() {
        let topic = Topic::new("t", TopicKind::Internal);
        topic.publish(batch("a"), "p", vec![]);
        topic.publish(batch("b"), "p", vec![]);

        let first = topic.consume("n1");
        assert_eq!(first.len(), 2);
        assert!(topic.consume("n1").is_empty());

        // A different consumer still sees the full log.
        assert!(topic.can_consume("n2"));
        assert_eq!(topic.consume("n2").len(), 2);

        topic.publish(batch("c"), "p", vec![]);
        let next = topic.consume("n1");
        assert_eq!(next.len(), 1);
        assert_eq!(next[0].offset, 2);
    }

    #[test]
    fn gated_publish_is_a_noop() {
        let topic = Topic::with_condition(
            "t",
            TopicKind::Internal,
            PublishCondition::last_message_has_tool_call(),
        );
        assert!(topic.publish(batch("no call"), "p", vec![]).is_none());
        assert_eq!(topic.len(), 0);
        assert!(!topic.can_consume("n1"));
    }

    #[test]
    fn reset_clears_log_and_cursors() {
        let topic = Topic::new("t", TopicKind::Internal);
        topic.publish(batch("a"), "p", vec![]);
        topic.consume("n1");
        topic.reset();
        assert_eq!(topic.len(), 0);
        assert_eq!(topic.cursor("n1"), 0);
    }

    #[test]
    fn restore_reproduces_offsets() {
        let source = Topic::new("t", TopicKind::Internal);
        source.publish(batch("a"), "p", vec![]);
        source.publish(batch("b"), "p", vec![]);
        let events = source.events();
        let ids: Vec<_> = events.iter().map(|e| e.id).collect();

        let fresh = Topic::new("t", TopicKind::Internal);
        fresh.restore_from(events).unwrap();
        let restored = fresh.events();
        assert_eq!(restored.len(), 2);
        assert_eq!(restored[0].offset, 0);
        assert_eq!(restored[1].offset, 1);
        assert_eq!(restored.iter().map(|e| e.id).collect::<Vec<_>>(), ids);
    }

    #[test]
    fn restore_rejects_gapped_offsets() {
        let source = Topic::new("t", TopicKind::Internal);
        source.publish(batch("a"), "p", vec![]);
        source.publish(batch("b"), "p", vec![]);
        let mut events = source.events();
        events.remove(0);

        let fresh = Topic::new("t", TopicKind::Internal);
        let err = fresh.restore_from(events).unwrap_err();
        assert!(matches!(err, TopicError::OffsetGap { found: 1, .. }));
        // Log untouched on failure.
        assert_eq!(fresh.len(), 0);
    }

    #[test]
    fn set_cursor_bounds_checked() {
        let topic = Topic::new("t", TopicKind::Internal);
        topic.publish(batch("a"), "p", vec![]);
        topic.set_cursor("n1", 1).unwrap();
        assert!(!topic.can_consume("n1"));
        assert!(matches!(
            topic.set_cursor("n1", 2),
            Err(TopicError::CursorOutOfRange { .. })
        ));
    }
}
