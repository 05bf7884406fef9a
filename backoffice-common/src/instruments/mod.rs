//! Reference data records: instruments, accounts, households.

mod types;

pub use types::*;
