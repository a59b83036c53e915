//! Data models
//!
//! DB row types use `#[cfg_attr(feature = "db", derive(sqlx::FromRow))]`.
//! All IDs are `i64` (SQLite INTEGER PRIMARY KEY).

pub mod digest_entry;
pub mod log_record;

// Re-exports
pub use digest_entry::*;
pub use log_record::*;
