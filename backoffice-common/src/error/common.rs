//! Common error types shared across crates.
//!
//! These represent failure modes that recur throughout the back-office.
//! Crate-specific errors wrap these using `#[from]`.

use thiserror::Error;

/// Event store and read model storage errors.
#[derive(Error, Debug)]
#[non_exhaustive]
pub enum StorageError {
    /// Query execution failed
    #[error("Query failed: {0}")]
    Query(String),

    /// Connection to the database failed
    #[error("Storage connection failed: {0}")]
    Connection(String),

    /// Append of an event id that already exists in the log
    #[error("Duplicate {entity}: {id}")]
    Conflict { entity: &'static str, id: String },

    /// Backend unreachable or pool exhausted
    #[error("Storage unavailable")]
    Unavailable,
}

impl From<sqlx::Error> for StorageError {
    fn from(err: sqlx::Error) -> Self {
        match &err {
            sqlx::Error::PoolTimedOut => StorageError::Unavailable,
            sqlx::Error::Io(_) => StorageError::Connection(err.to_string()),
            sqlx::Error::Database(db) if db.is_unique_violation() => StorageError::Conflict {
                entity: "row",
                id: db.constraint().unwrap_or("unique").to_string(),
            },
            _ => StorageError::Query(err.to_string()),
        }
    }
}

/// Configuration loading and validation errors.
#[derive(Error, Debug)]
#[non_exhaustive]
pub enum ConfigurationError {
    /// Environment variable not set
    #[error("Environment variable not set: {0}")]
    EnvVarMissing(String),

    /// Field has invalid value
    #[error("Invalid value for '{field}': {reason}")]
    InvalidValue { field: String, reason: String },
}

impl ConfigurationError {
    /// Create an InvalidValue error
    pub fn invalid_value(field: impl Into<String>, reason: impl Into<String>) -> Self {
        ConfigurationError::InvalidValue {
            field: field.into(),
            reason: reason.into(),
        }
    }
}

/// Entity-related errors for CRUD operations.
#[derive(Error, Debug)]
#[non_exhaustive]
pub enum EntityError {
    /// Entity was not found
    #[error("{entity_type} not found: {id}")]
    NotFound {
        entity_type: &'static str,
        id: String,
    },

    /// Entity already exists (duplicate)
    #[error("{entity_type} already exists: {id}")]
    AlreadyExists {
        entity_type: &'static str,
        id: String,
    },

    /// Entity is in the wrong state for the operation
    #[error("{entity_type} '{id}' is in invalid state: {reason}")]
    InvalidState {
        entity_type: &'static str,
        id: String,
        reason: String,
    },
}

impl EntityError {
    /// Create a NotFound error
    pub fn not_found(entity_type: &'static str, id: impl Into<String>) -> Self {
        EntityError::NotFound {
            entity_type,
            id: id.into(),
        }
    }

    /// Create an AlreadyExists error
    pub fn already_exists(entity_type: &'static str, id: impl Into<String>) -> Self {
        EntityError::AlreadyExists {
            entity_type,
            id: id.into(),
        }
    }

    /// Create an InvalidState error
    pub fn invalid_state(
        entity_type: &'static str,
        id: impl Into<String>,
        reason: impl Into<String>,
    ) -> Self {
        EntityError::InvalidState {
            entity_type,
            id: id.into(),
            reason: reason.into(),
        }
    }
}

/// Serialization and parsing errors.
#[derive(Error, Debug)]
#[non_exhaustive]
pub enum SerializationError {
    /// JSON serialization/deserialization failed
    #[error("JSON error: {0}")]
    Json(String),

    /// Decimal conversion failed
    #[error("Decimal conversion error: {0}")]
    Decimal(String),
}

impl From<serde_json::Error> for SerializationError {
    fn from(err: serde_json::Error) -> Self {
        SerializationError::Json(err.to_string())
    }
}

impl From<rust_decimal::Error> for SerializationError {
    fn from(err: rust_decimal::Error) -> Self {
        SerializationError::Decimal(err.to_string())
    }
}

/// Validation errors for command inputs.
#[derive(Error, Debug, Clone, PartialEq)]
#[non_exhaustive]
pub enum ValidationError {
    /// Required field is empty or missing
    #[error("{field} is required but was empty")]
    Required { field: &'static str },

    /// Field has an invalid value
    #[error("{field} is invalid: {reason}")]
    Invalid { field: &'static str, reason: String },
}

impl ValidationError {
    /// Create a Required validation error
    pub fn required(field: &'static str) -> Self {
        ValidationError::Required { field }
    }

    /// Create an Invalid validation error
    pub fn invalid(field: &'static str, reason: impl Into<String>) -> Self {
        ValidationError::Invalid {
            field,
            reason: reason.into(),
        }
    }
}
