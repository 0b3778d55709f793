//! Migration job model types.
//!
//! A [`MigrationJob`] is one run that moves legacy records of a single
//! entity type into the target store. Persisted by a `MigrationStore`
//! implementation; owned by the engine while the run is active.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// Newtypes
// ---------------------------------------------------------------------------

/// Opaque migration job identifier.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct JobId(String);

impl JobId {
    /// Create a new job identifier.
    #[must_use]
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Borrow the inner string.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for JobId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl<S: Into<String>> From<S> for JobId {
    fn from(value: S) -> Self {
        Self(value.into())
    }
}

// ---------------------------------------------------------------------------
// Status lifecycle
// ---------------------------------------------------------------------------

/// Lifecycle status of a migration job.
///
/// `Running -> Completed` is the normal path. Rollback may be applied to a
/// running (aborted) or completed job and is terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    Running,
    Completed,
    RolledBack,
}

impl JobStatus {
    /// Wire-format string for storage.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Running => "running",
            Self::Completed => "completed",
            Self::RolledBack => "rolled_back",
        }
    }

    /// Parse the storage representation produced by [`JobStatus::as_str`].
    #[must_use]
    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "running" => Some(Self::Running),
            "completed" => Some(Self::Completed),
            "rolled_back" => Some(Self::RolledBack),
            _ => None,
        }
    }

    /// Whether moving from `self` to `next` is a legal transition.
    #[must_use]
    pub fn can_transition_to(self, next: Self) -> bool {
        matches!(
            (self, next),
            (Self::Running, Self::Completed)
                | (Self::Running | Self::Completed, Self::RolledBack)
        )
    }

    #[must_use]
    pub fn is_terminal(self) -> bool {
        self == Self::RolledBack
    }
}

impl std::fmt::Display for JobStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

// ---------------------------------------------------------------------------
// Field mappings
// ---------------------------------------------------------------------------

/// Maps one legacy field onto one target field.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldMapping {
    /// Field name on the legacy record.
    pub source: String,
    /// Field name on the target entity.
    pub target: String,
    /// Write into the entity's extension (`customData`) fields instead of
    /// its core fields.
    #[serde(default)]
    pub custom: bool,
}

impl FieldMapping {
    #[must_use]
    pub fn core(source: impl Into<String>, target: impl Into<String>) -> Self {
        Self {
            source: source.into(),
            target: target.into(),
            custom: false,
        }
    }

    #[must_use]
    pub fn custom(source: impl Into<String>, target: impl Into<String>) -> Self {
        Self {
            source: source.into(),
            target: target.into(),
            custom: true,
        }
    }
}

// ---------------------------------------------------------------------------
// Job
// ---------------------------------------------------------------------------

/// One migration run targeting one entity type.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MigrationJob {
    pub id: JobId,
    pub entity_type: String,
    pub status: JobStatus,
    #[serde(default)]
    pub field_mappings: Vec<FieldMapping>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
}

impl MigrationJob {
    /// Build a fresh `running` job stamped with the current time.
    #[must_use]
    pub fn new(
        id: impl Into<JobId>,
        entity_type: impl Into<String>,
        field_mappings: Vec<FieldMapping>,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: id.into(),
            entity_type: entity_type.into(),
            status: JobStatus::Running,
            field_mappings,
            created_at: now,
            updated_at: now,
            completed_at: None,
        }
    }
}
