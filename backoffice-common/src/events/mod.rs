//! Event model: envelope, type/aggregate enums, and typed payloads.
//!
//! Events are immutable once appended. Payloads travel as open-schema
//! JSON on the wire; the typed structs in `payloads` are the in-process
//! view, serialized through a permissive representation so the schema
//! can evolve additively.

mod envelope;
mod payloads;
mod types;

pub use envelope::*;
pub use payloads::*;
pub use types::*;
