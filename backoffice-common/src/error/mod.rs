//! Consolidated error handling for the back-office.
//!
//! Common failure modes live in `common`; `CoreError` is the top-level
//! taxonomy that command handlers propagate to the transport boundary.
//! Event-driven handlers log and continue instead of propagating.

mod common;

pub use common::*;

use thiserror::Error;
use uuid::Uuid;

/// Top-level error returned by command handlers.
///
/// Each variant maps to exactly one transport status code so the external
/// HTTP layer can translate without inspecting messages.
#[derive(Error, Debug)]
pub enum CoreError {
    /// Inputs violate a stated constraint
    #[error(transparent)]
    Validation(#[from] ValidationError),

    /// A referenced aggregate does not exist
    #[error("{entity} not found: {id}")]
    NotFound { entity: &'static str, id: String },

    /// Pre-trade compliance blocked the order; the order id is kept for audit
    #[error("order {order_id} blocked by compliance")]
    ComplianceBlocked { order_id: Uuid },

    /// Duplicate key, state machine violation, or rule-in-use
    #[error("conflict: {reason}")]
    Conflict { reason: String },

    /// The event store or read model backend failed
    #[error(transparent)]
    Storage(#[from] StorageError),

    /// Payload could not be encoded or decoded
    #[error(transparent)]
    Serialization(#[from] SerializationError),

    /// Anything a projection should log and skip rather than surface
    #[error("internal error: {0}")]
    Internal(String),
}

impl CoreError {
    /// Create a NotFound error
    pub fn not_found(entity: &'static str, id: impl ToString) -> Self {
        CoreError::NotFound {
            entity,
            id: id.to_string(),
        }
    }

    /// Create a Conflict error
    pub fn conflict(reason: impl Into<String>) -> Self {
        CoreError::Conflict {
            reason: reason.into(),
        }
    }

    /// Create an Internal error
    pub fn internal(reason: impl Into<String>) -> Self {
        CoreError::Internal(reason.into())
    }

    /// Status code the transport boundary should answer with.
    pub fn status_code(&self) -> u16 {
        match self {
            CoreError::Validation(_) => 400,
            CoreError::NotFound { .. } => 404,
            CoreError::ComplianceBlocked { .. } => 403,
            CoreError::Conflict { .. } => 409,
            CoreError::Storage(_) => 500,
            CoreError::Serialization(_) => 400,
            CoreError::Internal(_) => 500,
        }
    }
}

impl From<EntityError> for CoreError {
    fn from(err: EntityError) -> Self {
        match err {
            EntityError::NotFound { entity_type, id } => CoreError::NotFound {
                entity: entity_type,
                id,
            },
            other => CoreError::Conflict {
                reason: other.to_string(),
            },
        }
    }
}

/// Convenience alias used across the engine crates.
pub type CoreResult<T> = Result<T, CoreError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_codes() {
        assert_eq!(
            CoreError::Validation(ValidationError::required("quantity")).status_code(),
            400
        );
        assert_eq!(CoreError::not_found("Order", "o-1").status_code(), 404);
        assert_eq!(
            CoreError::ComplianceBlocked {
                order_id: Uuid::new_v4()
            }
            .status_code(),
            403
        );
        assert_eq!(CoreError::conflict("ruleKey already exists").status_code(), 409);
        assert_eq!(
            CoreError::Storage(StorageError::Unavailable).status_code(),
            500
        );
    }

    #[test]
    fn test_entity_error_conversion() {
        let err: CoreError = EntityError::not_found("Rule", "r-1").into();
        assert!(matches!(err, CoreError::NotFound { entity: "Rule", .. }));

        let err: CoreError = EntityError::already_exists("Rule", "max_duration").into();
        assert!(matches!(err, CoreError::Conflict { .. }));
    }
}
