//! Shared Carryover data model: jobs, lineage, snapshots, checkpoints,
//! match results, readiness reports, and target-store shapes.
//!
//! Pure data with serde support. No I/O lives here so the state and engine
//! crates can share these types without depending on each other.

pub mod checkpoint;
pub mod cursor;
pub mod entity;
pub mod job;
pub mod lineage;
pub mod matching;
pub mod readiness;
pub mod rollback;
