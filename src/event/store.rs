//! The pluggable event store contract and its in-memory implementation.
//!
//! A store is an append-only, queryable sequence of [`EventRecord`]s. The
//! workflow and topics receive a store reference at construction time;
//! there is no process-wide registry to reach into.

use std::fmt;
use std::sync::Mutex;

use async_trait::async_trait;
use miette::Diagnostic;
use thiserror::Error;

use super::record::EventRecord;

/// Errors surfaced by store implementations.
#[derive(Debug, Error, Diagnostic)]
pub enum EventStoreError {
    /// The backing storage failed (connection, I/O, constraint).
    #[error("event store backend error: {message}")]
    #[diagnostic(
        code(topicflow::event_store::backend),
        help("Check connectivity and schema for the configured store backend.")
    )]
    Backend { message: String },

    /// A persisted record could not be (de)serialized.
    #[error("event store serialization error: {source}")]
    #[diagnostic(
        code(topicflow::event_store::serde),
        help("Persisted records must match the EventRecord schema.")
    )]
    Serde {
        #[source]
        source: serde_json::Error,
    },
}

/// Append/query contract over all lifecycle events.
///
/// Implementations must preserve insertion order: queries return records in
/// the order they were recorded, which is what replay depends on.
#[async_trait]
pub trait EventStore: Send + Sync + fmt::Debug {
    /// Append one record.
    async fn record_event(&self, event: EventRecord) -> Result<(), EventStoreError>;

    /// Append a batch in order. The default implementation loops over
    /// [`record_event`](Self::record_event); backends with cheaper bulk
    /// writes should override it.
    async fn record_events(&self, events: Vec<EventRecord>) -> Result<(), EventStoreError> {
        for event in events {
            self.record_event(event).await?;
        }
        Ok(())
    }

    /// Every record, in insertion order.
    async fn get_events(&self) -> Result<Vec<EventRecord>, EventStoreError>;

    /// Records belonging to one conversation, in insertion order.
    async fn get_conversation_events(
        &self,
        conversation_id: &str,
    ) -> Result<Vec<EventRecord>, EventStoreError>;

    /// Records belonging to one logical request, in insertion order.
    async fn get_request_events(
        &self,
        request_id: &str,
    ) -> Result<Vec<EventRecord>, EventStoreError>;

    /// Drop everything. Primarily for tests and development loops.
    async fn clear_events(&self) -> Result<(), EventStoreError>;
}

/// True iff `events` describes an unfinished run: some activity was recorded
/// but no terminal workflow respond/fail closed it.
#[must_use]
pub fn has_open_request(events: &[EventRecord]) -> bool {
    !events.is_empty() && !events.iter().any(EventRecord::is_terminal)
}

/// Volatile store for tests and development.
///
/// # Examples
///
/// ```
/// use topicflow::event::{EventRecord, EventStore, InvokeContext, MemoryEventStore};
///
/// # #[tokio::main(flavor = "current_thread")]
/// # async fn main() {
/// let store = MemoryEventStore::new();
/// let ctx = InvokeContext::new("conv-1", "req-1");
/// store
///     .record_event(EventRecord::workflow_invoke(&ctx, "wf", vec![]))
///     .await
///     .unwrap();
/// assert_eq!(store.get_request_events("req-1").await.unwrap().len(), 1);
/// # }
/// ```
#[derive(Debug, Default)]
pub struct MemoryEventStore {
    records: Mutex<Vec<EventRecord>>,
}

impl MemoryEventStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl EventStore for MemoryEventStore {
    async fn record_event(&self, event: EventRecord) -> Result<(), EventStoreError> {
        self.records.lock().expect("record log poisoned").push(event);
        Ok(())
    }

    async fn record_events(&self, events: Vec<EventRecord>) -> Result<(), EventStoreError> {
        self.records
            .lock()
            .expect("record log poisoned")
            .extend(events);
        Ok(())
    }

    async fn get_events(&self) -> Result<Vec<EventRecord>, EventStoreError> {
        Ok(self.records.lock().expect("record log poisoned").clone())
    }

    async fn get_conversation_events(
        &self,
        conversation_id: &str,
    ) -> Result<Vec<EventRecord>, EventStoreError> {
        Ok(self
            .records
            .lock()
            .expect("record log poisoned")
            .iter()
            .filter(|r| r.context.conversation_id == conversation_id)
            .cloned()
            .collect())
    }

    async fn get_request_events(
        &self,
        request_id: &str,
    ) -> Result<Vec<EventRecord>, EventStoreError> {
        Ok(self
            .records
            .lock()
            .expect("record log poisoned")
            .iter()
            .filter(|r| r.context.request_id == request_id)
            .cloned()
            .collect())
    }

    async fn clear_events(&self) -> Result<(), EventStoreError> {
        self.records.lock().expect("record log poisoned").clear();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::record::InvokeContext;

    #[tokio::test]
    async fn filters_by_conversation_and_request() {
        let store = MemoryEventStore::new();
        let ctx_a = InvokeContext::new("conv-a", "req-1");
        let ctx_b = InvokeContext::new("conv-b", "req-2");

        store
            .record_events(vec![
                EventRecord::workflow_invoke(&ctx_a, "wf", vec![]),
                EventRecord::workflow_invoke(&ctx_b, "wf", vec![]),
                EventRecord::workflow_respond(&ctx_a, "wf", vec![]),
            ])
            .await
            .unwrap();

        assert_eq!(store.get_events().await.unwrap().len(), 3);
        assert_eq!(
            store.get_conversation_events("conv-a").await.unwrap().len(),
            2
        );
        assert_eq!(store.get_request_events("req-2").await.unwrap().len(), 1);

        store.clear_events().await.unwrap();
        assert!(store.get_events().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn open_request_detection() {
        let store = MemoryEventStore::new();
        let ctx = InvokeContext::new("conv", "req");

        let events = store.get_request_events("req").await.unwrap();
        assert!(!has_open_request(&events));

        store
            .record_event(EventRecord::workflow_invoke(&ctx, "wf", vec![]))
            .await
            .unwrap();
        let events = store.get_request_events("req").await.unwrap();
        assert!(has_open_request(&events));

        store
            .record_event(EventRecord::workflow_respond(&ctx, "wf", vec![]))
            .await
            .unwrap();
        let events = store.get_request_events("req").await.unwrap();
        assert!(!has_open_request(&events));
    }
}
