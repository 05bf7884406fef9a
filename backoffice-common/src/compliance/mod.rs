//! Compliance domain: rules, predicates, evaluation points, and results.

mod types;

pub use types::*;
