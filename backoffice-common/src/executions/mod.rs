//! Execution domain: simulation status, executions, and fills.

mod types;

pub use types::*;
