//! Durable append-only event log.
//!
//! The `events` table is the system of record; read models are rebuilt
//! from it. Append assigns identity when unset and never updates a row.
//! All query methods return events ordered by `occurred_at` ascending.

mod memory;
mod postgres;

pub use memory::MemoryEventStore;
pub use postgres::{run_event_store_migrations, PgEventStore};

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use backoffice_common::error::StorageError;
use backoffice_common::events::{AggregateType, Event, EventType};

use crate::bus::EventBus;

/// Append-only event log indexed by aggregate, correlation, type, time.
#[async_trait]
pub trait EventStore: Send + Sync {
    /// Append one event. Assigns `event_id` when nil. Fails with
    /// `Conflict` on a duplicate id; there is no update path. Returns
    /// the finalized event as stored.
    async fn append(&self, event: Event) -> Result<Event, StorageError>;

    /// Events for one aggregate, ascending by occurred_at.
    async fn by_aggregate(
        &self,
        kind: AggregateType,
        id: &str,
    ) -> Result<Vec<Event>, StorageError>;

    /// Events sharing one correlation id, ascending by occurred_at.
    async fn by_correlation(&self, correlation_id: Uuid) -> Result<Vec<Event>, StorageError>;

    /// Events of one type, ascending by occurred_at.
    async fn by_event_type(&self, event_type: EventType) -> Result<Vec<Event>, StorageError>;

    /// Events inside [from, to], ascending by occurred_at.
    async fn by_time_range(
        &self,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Result<Vec<Event>, StorageError>;

    /// The whole log, ascending by occurred_at. Use with caution.
    async fn all(&self) -> Result<Vec<Event>, StorageError>;
}

/// Append-then-publish seam shared by every engine.
///
/// Publication of an event always follows a successful append of that
/// event; a failed append aborts the publish.
#[derive(Clone)]
pub struct EventPipeline {
    store: Arc<dyn EventStore>,
    bus: Arc<EventBus>,
}

impl EventPipeline {
    pub fn new(store: Arc<dyn EventStore>, bus: Arc<EventBus>) -> Self {
        Self { store, bus }
    }

    /// Append the event, then fan it out on the bus. Returns the stored
    /// event so callers can chain causation off its final identity.
    pub async fn emit(&self, event: Event) -> Result<Event, StorageError> {
        let stored = self.store.append(event).await?;
        self.bus.publish(Arc::new(stored.clone()));
        Ok(stored)
    }

    pub fn store(&self) -> &Arc<dyn EventStore> {
        &self.store
    }

    pub fn bus(&self) -> &Arc<EventBus> {
        &self.bus
    }
}
