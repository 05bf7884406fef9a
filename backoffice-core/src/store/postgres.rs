//! Postgres-backed event store.
//!
//! One row per event, append-only. The payload is stored as JSONB in
//! its permissive wire form; the envelope columns are typed.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::postgres::PgRow;
use sqlx::{PgPool, Row};
use uuid::Uuid;

use backoffice_common::error::StorageError;
use backoffice_common::events::{Actor, ActorRole, Aggregate, AggregateType, Event, EventType};

use super::EventStore;

const SELECT_COLUMNS: &str = "event_id, occurred_at, event_type, aggregate_type, aggregate_id, \
     correlation_id, causation_id, actor_id, actor_role, payload, explanation, schema_version";

/// Create the `events` table and its query indexes.
pub async fn run_event_store_migrations(pool: &PgPool) -> Result<(), StorageError> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS events (
            event_id UUID PRIMARY KEY,
            occurred_at TIMESTAMPTZ NOT NULL,
            event_type TEXT NOT NULL,
            aggregate_type TEXT NOT NULL,
            aggregate_id TEXT NOT NULL,
            correlation_id UUID NOT NULL,
            causation_id UUID,
            actor_id TEXT NOT NULL,
            actor_role TEXT NOT NULL,
            payload JSONB NOT NULL,
            explanation TEXT,
            schema_version INT NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        "CREATE INDEX IF NOT EXISTS idx_events_aggregate \
         ON events (aggregate_type, aggregate_id, occurred_at)",
    )
    .execute(pool)
    .await?;

    sqlx::query(
        "CREATE INDEX IF NOT EXISTS idx_events_correlation \
         ON events (correlation_id, occurred_at)",
    )
    .execute(pool)
    .await?;

    sqlx::query("CREATE INDEX IF NOT EXISTS idx_events_type ON events (event_type, occurred_at)")
        .execute(pool)
        .await?;

    sqlx::query("CREATE INDEX IF NOT EXISTS idx_events_occurred_at ON events (occurred_at)")
        .execute(pool)
        .await?;

    Ok(())
}

/// Event store over a shared Postgres pool.
pub struct PgEventStore {
    pool: PgPool,
}

impl PgEventStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

fn row_to_event(row: &PgRow) -> Result<Event, StorageError> {
    let event_type_raw: String = row.try_get("event_type").map_err(sqlx_get_err)?;
    let event_type = EventType::parse(&event_type_raw)
        .ok_or_else(|| StorageError::Query(format!("unknown event type '{event_type_raw}'")))?;

    let aggregate_type_raw: String = row.try_get("aggregate_type").map_err(sqlx_get_err)?;
    let aggregate_type = AggregateType::parse(&aggregate_type_raw).ok_or_else(|| {
        StorageError::Query(format!("unknown aggregate type '{aggregate_type_raw}'"))
    })?;

    let actor_role_raw: String = row.try_get("actor_role").map_err(sqlx_get_err)?;
    let role = match actor_role_raw.as_str() {
        "user" => ActorRole::User,
        "system" => ActorRole::System,
        other => return Err(StorageError::Query(format!("unknown actor role '{other}'"))),
    };

    Ok(Event {
        event_id: row.try_get("event_id").map_err(sqlx_get_err)?,
        event_type,
        occurred_at: row.try_get("occurred_at").map_err(sqlx_get_err)?,
        actor: Actor {
            actor_id: row.try_get("actor_id").map_err(sqlx_get_err)?,
            role,
        },
        aggregate: Aggregate {
            kind: aggregate_type,
            id: row.try_get("aggregate_id").map_err(sqlx_get_err)?,
        },
        correlation_id: row.try_get("correlation_id").map_err(sqlx_get_err)?,
        causation_id: row.try_get("causation_id").map_err(sqlx_get_err)?,
        payload: row.try_get("payload").map_err(sqlx_get_err)?,
        explanation: row.try_get("explanation").map_err(sqlx_get_err)?,
        schema_version: row.try_get("schema_version").map_err(sqlx_get_err)?,
    })
}

fn sqlx_get_err(err: sqlx::Error) -> StorageError {
    StorageError::Query(err.to_string())
}

fn rows_to_events(rows: Vec<PgRow>) -> Result<Vec<Event>, StorageError> {
    rows.iter().map(row_to_event).collect()
}

#[async_trait]
impl EventStore for PgEventStore {
    async fn append(&self, mut event: Event) -> Result<Event, StorageError> {
        if event.event_id.is_nil() {
            event.event_id = Uuid::new_v4();
        }

        let result = sqlx::query(
            r#"
            INSERT INTO events (
                event_id, occurred_at, event_type, aggregate_type, aggregate_id,
                correlation_id, causation_id, actor_id, actor_role,
                payload, explanation, schema_version
            ) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12)
            "#,
        )
        .bind(event.event_id)
        .bind(event.occurred_at)
        .bind(event.event_type.as_str())
        .bind(event.aggregate.kind.as_str())
        .bind(&event.aggregate.id)
        .bind(event.correlation_id)
        .bind(event.causation_id)
        .bind(&event.actor.actor_id)
        .bind(event.actor.role.to_string())
        .bind(&event.payload)
        .bind(&event.explanation)
        .bind(event.schema_version)
        .execute(&self.pool)
        .await;

        match result {
            Ok(_) => Ok(event),
            Err(err) => match StorageError::from(err) {
                StorageError::Conflict { .. } => Err(StorageError::Conflict {
                    entity: "event",
                    id: event.event_id.to_string(),
                }),
                other => Err(other),
            },
        }
    }

    async fn by_aggregate(
        &self,
        kind: AggregateType,
        id: &str,
    ) -> Result<Vec<Event>, StorageError> {
        let rows = sqlx::query(&format!(
            "SELECT {SELECT_COLUMNS} FROM events \
             WHERE aggregate_type = $1 AND aggregate_id = $2 \
             ORDER BY occurred_at ASC"
        ))
        .bind(kind.as_str())
        .bind(id)
        .fetch_all(&self.pool)
        .await?;

        rows_to_events(rows)
    }

    async fn by_correlation(&self, correlation_id: Uuid) -> Result<Vec<Event>, StorageError> {
        let rows = sqlx::query(&format!(
            "SELECT {SELECT_COLUMNS} FROM events \
             WHERE correlation_id = $1 ORDER BY occurred_at ASC"
        ))
        .bind(correlation_id)
        .fetch_all(&self.pool)
        .await?;

        rows_to_events(rows)
    }

    async fn by_event_type(&self, event_type: EventType) -> Result<Vec<Event>, StorageError> {
        let rows = sqlx::query(&format!(
            "SELECT {SELECT_COLUMNS} FROM events \
             WHERE event_type = $1 ORDER BY occurred_at ASC"
        ))
        .bind(event_type.as_str())
        .fetch_all(&self.pool)
        .await?;

        rows_to_events(rows)
    }

    async fn by_time_range(
        &self,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Result<Vec<Event>, StorageError> {
        let rows = sqlx::query(&format!(
            "SELECT {SELECT_COLUMNS} FROM events \
             WHERE occurred_at BETWEEN $1 AND $2 ORDER BY occurred_at ASC"
        ))
        .bind(from)
        .bind(to)
        .fetch_all(&self.pool)
        .await?;

        rows_to_events(rows)
    }

    async fn all(&self) -> Result<Vec<Event>, StorageError> {
        let rows = sqlx::query(&format!(
            "SELECT {SELECT_COLUMNS} FROM events ORDER BY occurred_at ASC"
        ))
        .fetch_all(&self.pool)
        .await?;

        rows_to_events(rows)
    }
}
