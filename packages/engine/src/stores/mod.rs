//! Storage backends.
//!
//! - `MemoryStore`: in-process, for tests and dry runs (always available)
//! - `SqliteStore`: file-backed (requires the `sqlite` feature)

pub mod memory;

#[cfg(feature = "sqlite")]
pub mod sqlite;

pub use memory::MemoryStore;

#[cfg(feature = "sqlite")]
pub use sqlite::SqliteStore;
