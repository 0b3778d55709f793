//! Lineage and snapshot records written while a job runs.
//!
//! Lineage ties a legacy record to the target entity the job created for it.
//! Snapshots capture an existing target entity right before the job overwrites
//! it. Rollback consumes both: lineage to delete what was created, snapshots
//! to restore what was updated.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::entity::EntityId;
use crate::job::JobId;

/// Write state of a lineage row.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LineageState {
    Pending,
    Committed,
    Failed,
}

impl LineageState {
    /// Wire-format string for storage.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Committed => "committed",
            Self::Failed => "failed",
        }
    }

    #[must_use]
    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "pending" => Some(Self::Pending),
            "committed" => Some(Self::Committed),
            "failed" => Some(Self::Failed),
            _ => None,
        }
    }
}

impl std::fmt::Display for LineageState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Legacy-to-target correspondence for a record created by a job.
///
/// Only moves to [`LineageState::Committed`] after the create went through
/// the target store; `target_id` is set at the same time.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MigrationLineage {
    /// Store-assigned row id.
    pub id: i64,
    pub job_id: JobId,
    /// Identifier of the record in the legacy system.
    pub legacy_ref: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target_id: Option<EntityId>,
    pub state: LineageState,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Write-shape capture of a target entity taken before it was overwritten.
///
/// At most one per `(job_id, entity_id)`. Never taken for fresh creates.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MigrationRowSnapshot {
    pub job_id: JobId,
    pub entity_id: EntityId,
    /// Core persisted fields as they were before the write.
    pub before_write_core: Map<String, Value>,
    /// Extension fields as they were before the write.
    #[serde(default)]
    pub before_write_custom: Map<String, Value>,
    /// Optimistic-lock version at snapshot time.
    pub before_version: u64,
    /// Version the job's most recent write left the entity at.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_written_version: Option<u64>,
    pub captured_at: DateTime<Utc>,
}

impl MigrationRowSnapshot {
    /// Rebuild the persistable payload: core fields, plus the extension
    /// fields nested under `customData` when there are any.
    #[must_use]
    pub fn restore_payload(&self) -> Map<String, Value> {
        let mut payload = self.before_write_core.clone();
        if !self.before_write_custom.is_empty() {
            payload.insert(
                crate::entity::CUSTOM_DATA_KEY.to_string(),
                Value::Object(self.before_write_custom.clone()),
            );
        }
        payload
    }

    /// Version a restore must expect: the version the job's own write
    /// produced, or the snapshot version when no write was recorded.
    #[must_use]
    pub fn restore_expected_version(&self) -> u64 {
        self.last_written_version.unwrap_or(self.before_version)
    }
}
