//! In-memory event log for tests and database-less runs.
//!
//! Same contract as the Postgres store: append-only, duplicate ids
//! conflict, queries return events in occurred_at order. Sorting is
//! stable so equal timestamps keep insertion order.

use std::collections::HashSet;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use uuid::Uuid;

use backoffice_common::error::StorageError;
use backoffice_common::events::{AggregateType, Event, EventType};

use super::EventStore;

#[derive(Default)]
struct Log {
    events: Vec<Event>,
    ids: HashSet<Uuid>,
}

/// Append-only log held in process memory.
#[derive(Default)]
pub struct MemoryEventStore {
    log: Mutex<Log>,
}

impl MemoryEventStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn collect<F>(&self, predicate: F) -> Vec<Event>
    where
        F: Fn(&Event) -> bool,
    {
        let log = self.log.lock();
        let mut events: Vec<Event> = log.events.iter().filter(|e| predicate(e)).cloned().collect();
        events.sort_by_key(|e| e.occurred_at);
        events
    }
}

#[async_trait]
impl EventStore for MemoryEventStore {
    async fn append(&self, mut event: Event) -> Result<Event, StorageError> {
        if event.event_id.is_nil() {
            event.event_id = Uuid::new_v4();
        }

        let mut log = self.log.lock();
        if !log.ids.insert(event.event_id) {
            return Err(StorageError::Conflict {
                entity: "event",
                id: event.event_id.to_string(),
            });
        }
        log.events.push(event.clone());
        Ok(event)
    }

    async fn by_aggregate(
        &self,
        kind: AggregateType,
        id: &str,
    ) -> Result<Vec<Event>, StorageError> {
        Ok(self.collect(|e| e.aggregate.kind == kind && e.aggregate.id == id))
    }

    async fn by_correlation(&self, correlation_id: Uuid) -> Result<Vec<Event>, StorageError> {
        Ok(self.collect(|e| e.correlation_id == correlation_id))
    }

    async fn by_event_type(&self, event_type: EventType) -> Result<Vec<Event>, StorageError> {
        Ok(self.collect(|e| e.event_type == event_type))
    }

    async fn by_time_range(
        &self,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Result<Vec<Event>, StorageError> {
        Ok(self.collect(|e| e.occurred_at >= from && e.occurred_at <= to))
    }

    async fn all(&self) -> Result<Vec<Event>, StorageError> {
        Ok(self.collect(|_| true))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use backoffice_common::events::{Actor, Aggregate};
    use serde_json::json;

    fn event_for(aggregate: Aggregate, event_type: EventType, correlation: Uuid) -> Event {
        Event::new(
            event_type,
            aggregate,
            Actor::user("tester"),
            correlation,
            json!({}),
        )
    }

    #[tokio::test]
    async fn test_append_assigns_nil_id() {
        let store = MemoryEventStore::new();
        let mut event = event_for(Aggregate::order("o-1"), EventType::OrderCreated, Uuid::new_v4());
        event.event_id = Uuid::nil();

        let stored = store.append(event).await.unwrap();
        assert!(!stored.event_id.is_nil());
    }

    #[tokio::test]
    async fn test_duplicate_id_conflicts() {
        let store = MemoryEventStore::new();
        let event = event_for(Aggregate::order("o-1"), EventType::OrderCreated, Uuid::new_v4());

        store.append(event.clone()).await.unwrap();
        let err = store.append(event).await.unwrap_err();
        assert!(matches!(err, StorageError::Conflict { entity: "event", .. }));
    }

    #[tokio::test]
    async fn test_queries_filter_and_order() {
        let store = MemoryEventStore::new();
        let correlation = Uuid::new_v4();

        let first = store
            .append(event_for(
                Aggregate::order("o-1"),
                EventType::OrderCreated,
                correlation,
            ))
            .await
            .unwrap();
        let second = store
            .append(event_for(
                Aggregate::order("o-1"),
                EventType::OrderApproved,
                correlation,
            ))
            .await
            .unwrap();
        store
            .append(event_for(
                Aggregate::order("o-2"),
                EventType::OrderCreated,
                Uuid::new_v4(),
            ))
            .await
            .unwrap();

        let by_aggregate = store
            .by_aggregate(AggregateType::Order, "o-1")
            .await
            .unwrap();
        assert_eq!(by_aggregate.len(), 2);
        assert_eq!(by_aggregate[0].event_id, first.event_id);
        assert_eq!(by_aggregate[1].event_id, second.event_id);

        let by_correlation = store.by_correlation(correlation).await.unwrap();
        assert_eq!(by_correlation.len(), 2);
        assert!(by_correlation
            .windows(2)
            .all(|pair| pair[0].occurred_at <= pair[1].occurred_at));

        let created = store.by_event_type(EventType::OrderCreated).await.unwrap();
        assert_eq!(created.len(), 2);

        let all = store.all().await.unwrap();
        assert_eq!(all.len(), 3);
    }

    #[tokio::test]
    async fn test_time_range_is_inclusive() {
        let store = MemoryEventStore::new();
        let event = store
            .append(event_for(
                Aggregate::order("o-1"),
                EventType::OrderCreated,
                Uuid::new_v4(),
            ))
            .await
            .unwrap();

        let hits = store
            .by_time_range(event.occurred_at, event.occurred_at)
            .await
            .unwrap();
        assert_eq!(hits.len(), 1);

        let misses = store
            .by_time_range(
                event.occurred_at + chrono::Duration::seconds(1),
                event.occurred_at + chrono::Duration::seconds(2),
            )
            .await
            .unwrap();
        assert!(misses.is_empty());
    }
}
