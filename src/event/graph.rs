//! Causal reconstruction of a node's effective input history.
//!
//! A node can be reachable through several upstream paths whose relative
//! completion order is not observable from any single topic log. The event
//! graph recovers a usable order: starting from the events a node just
//! consumed, it takes the transitive closure over `consumed_event_ids`
//! provenance edges and topologically sorts it, breaking ties by original
//! publish time. Concatenating the sorted payloads yields the ordered
//! message history feeding the invocation.

use std::cmp::Reverse;
use std::collections::BinaryHeap;

use miette::Diagnostic;
use rustc_hash::FxHashMap;
use thiserror::Error;
use uuid::Uuid;

use crate::message::Message;
use crate::topic::TopicEvent;

/// Errors raised while building or ordering the provenance graph.
#[derive(Debug, Error, Diagnostic)]
pub enum EventGraphError {
    /// A provenance edge points at an event missing from the workflow's
    /// topic logs. History has been lost or the logs were tampered with.
    #[error("provenance references unknown event {id}")]
    #[diagnostic(
        code(topicflow::event_graph::missing_dependency),
        help("Replay the full persisted event sequence before rebuilding input history.")
    )]
    MissingDependency { id: Uuid },

    /// Provenance edges form a cycle, which cannot happen in an append-only
    /// log unless records were corrupted.
    #[error("provenance cycle detected; {remaining} events could not be ordered")]
    #[diagnostic(code(topicflow::event_graph::cycle))]
    Cycle { remaining: usize },
}

/// Provenance closure of a set of consumed events, ready for causal sorting.
///
/// # Examples
///
/// ```
/// use topicflow::event::EventGraph;
/// use topicflow::message::Message;
/// use topicflow::topic::{Topic, TopicKind};
///
/// let upstream = Topic::new("up", TopicKind::Input);
/// let seeded = upstream.publish(vec![Message::user("q")], "caller", vec![]).unwrap();
///
/// let downstream = Topic::new("down", TopicKind::Internal);
/// let derived = downstream
///     .publish(vec![Message::assistant("a")], "n1", vec![seeded.id])
///     .unwrap();
///
/// let all: Vec<_> = upstream.events().into_iter().chain(downstream.events()).collect();
/// let graph = EventGraph::from_seeds(&[derived], &all).unwrap();
/// let history = graph.input_history().unwrap();
/// assert_eq!(history[0].content, "q");
/// assert_eq!(history[1].content, "a");
/// ```
#[derive(Debug)]
pub struct EventGraph {
    /// Closure members in canonical publish order (time, then offset, then id).
    members: Vec<TopicEvent>,
}

impl EventGraph {
    /// Build the closure of `seeds` under provenance edges, drawing
    /// dependencies from `all_events` (the union of the workflow's topic
    /// logs).
    pub fn from_seeds(
        seeds: &[TopicEvent],
        all_events: &[TopicEvent],
    ) -> Result<Self, EventGraphError> {
        let by_id: FxHashMap<Uuid, &TopicEvent> =
            all_events.iter().map(|e| (e.id, e)).collect();

        let mut members: FxHashMap<Uuid, TopicEvent> = FxHashMap::default();
        let mut frontier: Vec<&TopicEvent> = seeds.iter().collect();

        while let Some(event) = frontier.pop() {
            if members.contains_key(&event.id) {
                continue;
            }
            members.insert(event.id, event.clone());
            for dep_id in &event.consumed_event_ids {
                if members.contains_key(dep_id) {
                    continue;
                }
                let dep = by_id
                    .get(dep_id)
                    .copied()
                    .ok_or(EventGraphError::MissingDependency { id: *dep_id })?;
                frontier.push(dep);
            }
        }

        let mut members: Vec<TopicEvent> = members.into_values().collect();
        members.sort_by(|a, b| {
            (a.at, a.offset, a.id).cmp(&(b.at, b.offset, b.id))
        });
        Ok(Self { members })
    }

    /// Number of events in the closure.
    #[must_use]
    pub fn len(&self) -> usize {
        self.members.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.members.is_empty()
    }

    /// Stable topological order of the closure: every event follows its
    /// provenance, ties resolved by original publish order.
    pub fn sorted(&self) -> Result<Vec<TopicEvent>, EventGraphError> {
        let rank: FxHashMap<Uuid, usize> = self
            .members
            .iter()
            .enumerate()
            .map(|(i, e)| (e.id, i))
            .collect();

        // In-degree counts only edges internal to the closure; from_seeds
        // guarantees there are no dangling ones.
        let mut indegree = vec![0usize; self.members.len()];
        let mut dependents: Vec<Vec<usize>> = vec![Vec::new(); self.members.len()];
        for (i, event) in self.members.iter().enumerate() {
            for dep_id in &event.consumed_event_ids {
                if let Some(&dep_rank) = rank.get(dep_id) {
                    indegree[i] += 1;
                    dependents[dep_rank].push(i);
                }
            }
        }

        let mut ready: BinaryHeap<Reverse<usize>> = indegree
            .iter()
            .enumerate()
            .filter(|(_, d)| **d == 0)
            .map(|(i, _)| Reverse(i))
            .collect();

        let mut sorted = Vec::with_capacity(self.members.len());
        while let Some(Reverse(i)) = ready.pop() {
            sorted.push(self.members[i].clone());
            for &dependent in &dependents[i] {
                indegree[dependent] -= 1;
                if indegree[dependent] == 0 {
                    ready.push(Reverse(dependent));
                }
            }
        }

        if sorted.len() != self.members.len() {
            return Err(EventGraphError::Cycle {
                remaining: self.members.len() - sorted.len(),
            });
        }
        Ok(sorted)
    }

    /// Causally ordered concatenation of the closure's payloads.
    pub fn input_history(&self) -> Result<Vec<Message>, EventGraphError> {
        Ok(self
            .sorted()?
            .into_iter()
            .flat_map(|e| e.messages)
            .collect())
    }
}
