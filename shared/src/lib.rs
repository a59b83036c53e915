//! Shared types for the message log archiver
//!
//! Log record and chain head models used by the archiver crate and by
//! anything that produces or inspects message log records.

pub mod models;
pub mod util;

// Re-exports
pub use models::{DigestEntry, LogRecord, LogRecordBody, LogRecordKind};
pub use serde::{Deserialize, Serialize};
