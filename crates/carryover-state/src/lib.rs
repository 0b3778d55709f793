//! Persistence for the carryover migration engine.
//!
//! Provides the [`MigrationStore`] trait with a [`SqliteMigrationStore`]
//! implementation for jobs, lineage, snapshots, and step checkpoints, plus
//! the [`CrudBridge`] contract for the versioned target entity store with
//! `SQLite` and in-memory implementations.

#![warn(clippy::pedantic)]

pub mod backend;
pub mod bridge;
pub mod entity_sqlite;
pub mod error;
pub mod memory;
pub mod sqlite;

pub use backend::MigrationStore;
pub use bridge::CrudBridge;
pub use entity_sqlite::SqliteEntityStore;
pub use error::{BridgeError, StateError};
pub use memory::MemoryEntityStore;
pub use sqlite::SqliteMigrationStore;
