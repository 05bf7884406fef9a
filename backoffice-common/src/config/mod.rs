//! Process configuration loaded from the environment.
//!
//! One typed schema with explicit defaults and a validation pass. The
//! lookup is injected so tests can drive it without touching the real
//! environment.

use std::time::Duration;

use crate::error::ConfigurationError;

/// Default buffer for projection and domain-listener subscriptions.
pub const DEFAULT_CONSUMER_BUFFER: usize = 1000;

/// Application configuration.
#[derive(Debug, Clone)]
pub struct AppConfig {
    /// Postgres connection string for the event store and read models
    pub database_url: String,
    /// Port the external transport layer listens on
    pub port: u16,
    /// Maximum open connections in the shared pool
    pub db_max_connections: u32,
    /// Idle connections kept warm in the shared pool
    pub db_min_connections: u32,
    /// Maximum lifetime of a pooled connection
    pub db_max_lifetime: Duration,
    /// Queue depth for projection workers and domain listeners
    pub consumer_buffer: usize,
}

impl AppConfig {
    /// Load from the process environment.
    pub fn from_env() -> Result<Self, ConfigurationError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Load using an arbitrary variable lookup.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigurationError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let database_url = lookup("DATABASE_URL")
            .ok_or_else(|| ConfigurationError::EnvVarMissing("DATABASE_URL".to_string()))?;

        let port = parse_or("PORT", &lookup, 8080)?;
        let db_max_connections = parse_or("DB_MAX_CONNECTIONS", &lookup, 20)?;
        let db_min_connections = parse_or("DB_MIN_CONNECTIONS", &lookup, 10)?;
        let lifetime_secs: u64 = parse_or("DB_MAX_LIFETIME_SECS", &lookup, 1800)?;
        let consumer_buffer = parse_or("CONSUMER_BUFFER", &lookup, DEFAULT_CONSUMER_BUFFER)?;

        let config = Self {
            database_url,
            port,
            db_max_connections,
            db_min_connections,
            db_max_lifetime: Duration::from_secs(lifetime_secs),
            consumer_buffer,
        };

        config.validate()?;
        Ok(config)
    }

    /// Check cross-field constraints.
    pub fn validate(&self) -> Result<(), ConfigurationError> {
        if self.database_url.is_empty() {
            return Err(ConfigurationError::invalid_value(
                "DATABASE_URL",
                "must not be empty",
            ));
        }
        if self.db_max_connections == 0 {
            return Err(ConfigurationError::invalid_value(
                "DB_MAX_CONNECTIONS",
                "must be greater than 0",
            ));
        }
        if self.db_min_connections > self.db_max_connections {
            return Err(ConfigurationError::invalid_value(
                "DB_MIN_CONNECTIONS",
                "must not exceed DB_MAX_CONNECTIONS",
            ));
        }
        if self.consumer_buffer == 0 {
            return Err(ConfigurationError::invalid_value(
                "CONSUMER_BUFFER",
                "must be greater than 0",
            ));
        }
        Ok(())
    }
}

fn parse_or<T, F>(key: &str, lookup: &F, default: T) -> Result<T, ConfigurationError>
where
    T: std::str::FromStr,
    F: Fn(&str) -> Option<String>,
{
    match lookup(key) {
        Some(raw) => raw
            .parse()
            .map_err(|_| ConfigurationError::invalid_value(key, format!("unparseable '{raw}'"))),
        None => Ok(default),
    }
}
