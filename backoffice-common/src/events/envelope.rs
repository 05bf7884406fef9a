//! The immutable event envelope.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use super::types::{Actor, Aggregate, EventType};

/// Current envelope schema version.
pub const SCHEMA_VERSION: i32 = 1;

/// A single durable, correlated, causally linked state change.
///
/// Identity and timing are assigned at construction; the event store
/// fills them in on append only when left unset (nil id). Once appended
/// an event is never mutated.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Event {
    pub event_id: Uuid,
    pub event_type: EventType,
    pub occurred_at: DateTime<Utc>,
    pub actor: Actor,
    pub aggregate: Aggregate,
    /// Identifies the user-initiated flow this event belongs to
    pub correlation_id: Uuid,
    /// The immediate parent event, if any
    #[serde(skip_serializing_if = "Option::is_none")]
    pub causation_id: Option<Uuid>,
    /// Open-schema payload; see `payloads` for the typed views
    pub payload: Value,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub explanation: Option<String>,
    pub schema_version: i32,
}

impl Event {
    /// Create a new event with identity and timing assigned.
    pub fn new(
        event_type: EventType,
        aggregate: Aggregate,
        actor: Actor,
        correlation_id: Uuid,
        payload: Value,
    ) -> Self {
        Self {
            event_id: Uuid::new_v4(),
            event_type,
            occurred_at: Utc::now(),
            actor,
            aggregate,
            correlation_id,
            causation_id: None,
            payload,
            explanation: None,
            schema_version: SCHEMA_VERSION,
        }
    }

    /// Set the causation id.
    pub fn with_causation(mut self, causation_id: Uuid) -> Self {
        self.causation_id = Some(causation_id);
        self
    }

    /// Set a human-readable explanation.
    pub fn with_explanation(mut self, explanation: impl Into<String>) -> Self {
        self.explanation = Some(explanation.into());
        self
    }

    /// Link this event as a child of `parent`: inherit the correlation
    /// and reference the parent as causation.
    pub fn derived_from(mut self, parent: &Event) -> Self {
        self.correlation_id = parent.correlation_id;
        self.causation_id = Some(parent.event_id);
        self
    }

    /// Payload field as a string, if present.
    pub fn payload_str(&self, key: &str) -> Option<&str> {
        self.payload.get(key).and_then(Value::as_str)
    }

    /// Payload field parsed as a UUID, if present and valid.
    pub fn payload_uuid(&self, key: &str) -> Option<Uuid> {
        self.payload_str(key).and_then(|s| Uuid::parse_str(s).ok())
    }
}
