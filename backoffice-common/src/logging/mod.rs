//! Standardized logging configuration for the back-office.
//!
//! Provides a consistent format across all crates:
//! - Human-readable console output (default)
//! - JSON format for log aggregation
//!
//! # Environment Variables
//!
//! - `RUST_LOG`: Standard tracing filter (e.g., `info`, `backoffice_core=debug`)
//! - `LOG_FORMAT`: Output format - `pretty` (default), `compact`, or `json`
//!
//! # Usage
//!
//! ```rust,ignore
//! use backoffice_common::logging::{init_logging, LogConfig};
//!
//! init_logging(&LogConfig::from_env())?;
//! ```

mod config;

pub use config::{init_logging, LogConfig, LogFormat};
