//! Portfolio domain: positions, targets, analytics, and proposals.

mod types;

pub use types::*;
