//! Rollback accounting types.

use serde::{Deserialize, Serialize};

use crate::entity::EntityId;
use crate::job::JobId;

/// Which rollback phase a row failure happened in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RollbackPhase {
    /// Deleting records the job created.
    Delete,
    /// Restoring records the job overwrote.
    Restore,
}

impl std::fmt::Display for RollbackPhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            Self::Delete => "delete",
            Self::Restore => "restore",
        })
    }
}

/// A single row that could not be rolled back.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RollbackRowError {
    pub entity_id: EntityId,
    pub phase: RollbackPhase,
    pub message: String,
}

/// Accounting returned by every rollback, including partial ones.
///
/// Callers decide whether `failed_count > 0` is an overall failure.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RollbackResult {
    pub job_id: JobId,
    pub entity_type: String,
    pub deleted_count: u64,
    pub restored_count: u64,
    pub failed_count: u64,
    pub errors: Vec<RollbackRowError>,
}

impl RollbackResult {
    #[must_use]
    pub fn new(job_id: JobId, entity_type: impl Into<String>) -> Self {
        Self {
            job_id,
            entity_type: entity_type.into(),
            deleted_count: 0,
            restored_count: 0,
            failed_count: 0,
            errors: Vec::new(),
        }
    }

    /// Record a row failure and bump `failed_count`.
    pub fn record_failure(
        &mut self,
        entity_id: EntityId,
        phase: RollbackPhase,
        message: impl Into<String>,
    ) {
        self.failed_count += 1;
        self.errors.push(RollbackRowError {
            entity_id,
            phase,
            message: message.into(),
        });
    }

    #[must_use]
    pub fn is_clean(&self) -> bool {
        self.failed_count == 0
    }
}
