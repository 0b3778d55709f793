//! Engine error model.

use carryover_state::{BridgeError, StateError};
use carryover_types::job::{JobId, JobStatus};

/// Categorized engine error.
///
/// Job-level violations (`JobNotFound`, `AlreadyRolledBack`,
/// `StaleCheckpoint`) are raised before any mutation. Per-row write failures
/// never surface here; they are accumulated in run and rollback results.
#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    /// Malformed job or check input. Never retried.
    #[error("validation failed: {0}")]
    Validation(String),

    #[error("migration job '{0}' not found")]
    JobNotFound(JobId),

    #[error("migration job '{0}' is already rolled back")]
    AlreadyRolledBack(JobId),

    /// Resume was requested for a job that is no longer running.
    #[error("migration job '{job_id}' is {status}, only running jobs can resume")]
    JobNotRunning { job_id: JobId, status: JobStatus },

    #[error(
        "stale checkpoint for job '{job_id}': written by transform '{checkpoint_version}', \
         active transform is '{active_version}'"
    )]
    StaleCheckpoint {
        job_id: JobId,
        checkpoint_version: String,
        active_version: String,
    },

    /// The readiness gate blocked the job. Carries the gate's reason.
    #[error("{0}")]
    ReadinessFailed(String),

    #[error(transparent)]
    State(#[from] StateError),

    #[error(transparent)]
    Bridge(#[from] BridgeError),

    /// The legacy record source failed to produce a batch.
    #[error("record source error: {0}")]
    Source(String),

    /// Opaque host-side failure (file I/O, task join, etc.).
    #[error(transparent)]
    Infrastructure(#[from] anyhow::Error),
}

impl EngineError {
    /// Whether the error reflects job state that makes continuing unsafe.
    #[must_use]
    pub fn is_job_state_error(&self) -> bool {
        matches!(
            self,
            Self::JobNotFound(_)
                | Self::AlreadyRolledBack(_)
                | Self::JobNotRunning { .. }
                | Self::StaleCheckpoint { .. }
        )
    }
}
