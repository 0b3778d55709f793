//! Matching, checkpointing, readiness gating, rollback, and batch execution
//! for Carryover migration jobs.

pub mod checkpoint;
pub mod config;
pub mod errors;
pub mod matcher;
pub mod orchestrator;
pub mod perf;
pub mod readiness;
pub mod result;
pub mod rollback;
pub mod runner;
pub mod source;

// Re-export public API for convenience
pub use errors::EngineError;
pub use matcher::{batch_fuzzy_match_names, fuzzy_match_name, MatchOptions};
pub use orchestrator::{check_job, job_status, rollback_job, run_job};
pub use perf::{PerfReport, PerfTracker};
pub use readiness::{PreflightGate, ReadinessCheck, ReadinessGate};
pub use result::{CheckResult, JobStatusReport, RunSummary};
pub use rollback::RollbackEngine;
pub use runner::{MigrationRunner, RunnerOptions};
