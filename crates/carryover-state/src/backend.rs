//! Migration store trait definition.
//!
//! [`MigrationStore`] defines the storage contract for migration jobs,
//! lineage rows, pre-write snapshots, and step checkpoints. Model types live
//! in [`carryover_types`].

use carryover_types::checkpoint::StepCheckpoint;
use carryover_types::entity::EntityId;
use carryover_types::job::{JobId, JobStatus, MigrationJob};
use carryover_types::lineage::{LineageState, MigrationLineage, MigrationRowSnapshot};
use chrono::{DateTime, Utc};

use crate::error;

/// Storage contract for migration bookkeeping.
///
/// Implementations must be `Send + Sync` for use behind `Arc<dyn MigrationStore>`.
pub trait MigrationStore: Send + Sync {
    /// Persist a new job.
    ///
    /// # Errors
    ///
    /// Returns [`StateError`](crate::error::StateError) on storage failure,
    /// including a duplicate job id.
    fn create_job(&self, job: &MigrationJob) -> error::Result<()>;

    /// Load a job by id. Returns `Ok(None)` when it does not exist.
    ///
    /// # Errors
    ///
    /// Returns [`StateError`](crate::error::StateError) on storage failure.
    fn get_job(&self, job_id: &JobId) -> error::Result<Option<MigrationJob>>;

    /// Set a job's status, bumping `updated_at`. `completed_at` is written
    /// when provided. Returns `false` when no such job exists.
    ///
    /// # Errors
    ///
    /// Returns [`StateError`](crate::error::StateError) on storage failure.
    fn update_job_status(
        &self,
        job_id: &JobId,
        status: JobStatus,
        completed_at: Option<DateTime<Utc>>,
    ) -> error::Result<bool>;

    /// Insert a `pending` lineage row, returning its id.
    ///
    /// # Errors
    ///
    /// Returns [`StateError`](crate::error::StateError) on storage failure.
    fn insert_lineage(&self, job_id: &JobId, legacy_ref: &str) -> error::Result<i64>;

    /// Mark a lineage row `committed` and attach the created entity id.
    ///
    /// # Errors
    ///
    /// Returns [`StateError`](crate::error::StateError) on storage failure.
    fn mark_lineage_committed(&self, lineage_id: i64, target_id: &EntityId) -> error::Result<()>;

    /// Mark a lineage row `failed` with the write error.
    ///
    /// # Errors
    ///
    /// Returns [`StateError`](crate::error::StateError) on storage failure.
    fn mark_lineage_failed(&self, lineage_id: i64, error: &str) -> error::Result<()>;

    /// Lineage rows for a job in insertion order, optionally filtered by state.
    ///
    /// # Errors
    ///
    /// Returns [`StateError`](crate::error::StateError) on storage failure.
    fn lineage_for_job(
        &self,
        job_id: &JobId,
        state: Option<LineageState>,
    ) -> error::Result<Vec<MigrationLineage>>;

    /// Delete every lineage row of a job. Returns the number removed.
    ///
    /// # Errors
    ///
    /// Returns [`StateError`](crate::error::StateError) on storage failure.
    fn delete_lineage(&self, job_id: &JobId) -> error::Result<u64>;

    /// Insert a snapshot unless one already exists for `(job_id, entity_id)`.
    /// Returns `true` when this call stored it.
    ///
    /// # Errors
    ///
    /// Returns [`StateError`](crate::error::StateError) on storage failure.
    fn insert_snapshot(&self, snapshot: &MigrationRowSnapshot) -> error::Result<bool>;

    /// Record the version a job's write left an already-snapshotted entity
    /// at. Returns `false` when no snapshot exists.
    ///
    /// # Errors
    ///
    /// Returns [`StateError`](crate::error::StateError) on storage failure.
    fn record_snapshot_write(
        &self,
        job_id: &JobId,
        entity_id: &EntityId,
        version: u64,
    ) -> error::Result<bool>;

    /// Load the snapshot for `(job_id, entity_id)`.
    ///
    /// # Errors
    ///
    /// Returns [`StateError`](crate::error::StateError) on storage failure.
    fn get_snapshot(
        &self,
        job_id: &JobId,
        entity_id: &EntityId,
    ) -> error::Result<Option<MigrationRowSnapshot>>;

    /// All snapshots of a job in capture order.
    ///
    /// # Errors
    ///
    /// Returns [`StateError`](crate::error::StateError) on storage failure.
    fn snapshots_for_job(&self, job_id: &JobId) -> error::Result<Vec<MigrationRowSnapshot>>;

    /// Read the checkpoint of one step of a job.
    ///
    /// # Errors
    ///
    /// Returns [`StateError`](crate::error::StateError) on storage failure.
    fn get_checkpoint(&self, job_id: &JobId, step: &str) -> error::Result<Option<StepCheckpoint>>;

    /// Upsert the checkpoint of one step of a job.
    ///
    /// # Errors
    ///
    /// Returns [`StateError`](crate::error::StateError) on storage failure.
    fn save_checkpoint(
        &self,
        job_id: &JobId,
        step: &str,
        checkpoint: &StepCheckpoint,
    ) -> error::Result<()>;
}
