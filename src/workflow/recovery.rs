//! Rebuilding topic state from a persisted event sequence.
//!
//! A run is resumed purely from its flat record sequence: publish records
//! rehydrate each topic log with identical offsets and event ids, consume
//! records replay every cursor movement, and anything referencing state
//! absent from the current build fails loudly instead of being dropped.

use std::sync::Arc;

use miette::Diagnostic;
use rustc_hash::FxHashMap;
use thiserror::Error;

use crate::event::{EventData, EventRecord};
use crate::node::Node;
use crate::topic::{Topic, TopicError, TopicEvent};

/// Errors raised while replaying a persisted run into the current build.
#[derive(Debug, Error, Diagnostic)]
pub enum RecoveryError {
    /// A persisted event names a topic the current build does not own.
    #[error("persisted event references unknown topic '{topic}'")]
    #[diagnostic(
        code(topicflow::recovery::unknown_topic),
        help("The workflow structure changed since this run was recorded; history cannot be dropped silently.")
    )]
    UnknownTopic { topic: String },

    /// A persisted consume names a consumer that is neither a node of the
    /// current build nor the workflow itself.
    #[error("persisted consume references unknown consumer '{consumer}'")]
    #[diagnostic(code(topicflow::recovery::unknown_consumer))]
    UnknownConsumer { consumer: String },

    /// The replayed sequence did not reproduce a valid log.
    #[error(transparent)]
    #[diagnostic(code(topicflow::recovery::topic))]
    Topic(#[from] TopicError),
}

/// Replay `records` into the given topic set.
///
/// Validates every referenced topic and consumer against the current build
/// before mutating anything, then resets all topics, restores each log, and
/// reapplies cursor movements in record order.
pub(crate) fn restore_topics(
    workflow_name: &str,
    topics: &FxHashMap<String, Arc<Topic>>,
    nodes: &FxHashMap<String, Arc<Node>>,
    records: &[EventRecord],
) -> Result<(), RecoveryError> {
    let mut publishes: FxHashMap<&str, Vec<TopicEvent>> = FxHashMap::default();
    let mut cursors: Vec<(&str, &str, usize)> = Vec::new();

    for record in records {
        match &record.data {
            EventData::TopicPublish { topic, event } => {
                if !topics.contains_key(topic.as_str()) {
                    return Err(RecoveryError::UnknownTopic {
                        topic: topic.clone(),
                    });
                }
                publishes.entry(topic.as_str()).or_default().push(event.clone());
            }
            EventData::TopicConsume {
                topic,
                consumer,
                up_to,
                ..
            } => {
                if !topics.contains_key(topic.as_str()) {
                    return Err(RecoveryError::UnknownTopic {
                        topic: topic.clone(),
                    });
                }
                if consumer != workflow_name && !nodes.contains_key(consumer.as_str()) {
                    return Err(RecoveryError::UnknownConsumer {
                        consumer: consumer.clone(),
                    });
                }
                cursors.push((topic.as_str(), consumer.as_str(), *up_to));
            }
            _ => {}
        }
    }

    for topic in topics.values() {
        topic.reset();
    }
    for (name, events) in publishes {
        let topic = topics.get(name).expect("topic validated above");
        topic.restore_from(events)?;
    }
    // Cursor movements replay in record order; the final position per
    // (topic, consumer) pair wins, matching the original run.
    for (topic_name, consumer, up_to) in cursors {
        let topic = topics.get(topic_name).expect("topic validated above");
        topic.set_cursor(consumer, up_to)?;
    }

    tracing::info!(workflow = %workflow_name, records = records.len(), "run state restored");
    Ok(())
}
