//! Compensating rollback of a migration job.
//!
//! Phase 1 deletes the entities the job created (committed lineage rows).
//! Phase 2 restores the entities the job overwrote from their pre-write
//! snapshots. Deletes must run first, and entities the job itself created
//! are never restored. Row failures are accumulated in the
//! [`RollbackResult`] and never abort the rollback; only job-level problems
//! (unknown job, double rollback, store failure) return an error.

use std::collections::HashSet;
use std::sync::Arc;

use carryover_state::{CrudBridge, MigrationStore};
use carryover_types::entity::{EntityId, MutateRequest};
use carryover_types::job::{JobId, JobStatus, MigrationJob};
use carryover_types::lineage::LineageState;
use carryover_types::rollback::{RollbackPhase, RollbackResult};
use chrono::Utc;

use crate::errors::EngineError;

/// Undoes a job's writes through the target store.
pub struct RollbackEngine {
    store: Arc<dyn MigrationStore>,
    bridge: Arc<dyn CrudBridge>,
}

impl RollbackEngine {
    #[must_use]
    pub fn new(store: Arc<dyn MigrationStore>, bridge: Arc<dyn CrudBridge>) -> Self {
        Self { store, bridge }
    }

    /// Roll back `job_id` and return full accounting, even on partial failure.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::JobNotFound`] or [`EngineError::AlreadyRolledBack`]
    /// before touching anything, and [`EngineError::State`] if bookkeeping
    /// can't be read or finalized.
    pub async fn rollback(&self, job_id: &JobId) -> Result<RollbackResult, EngineError> {
        let job = self
            .store
            .get_job(job_id)?
            .ok_or_else(|| EngineError::JobNotFound(job_id.clone()))?;
        if job.status == JobStatus::RolledBack {
            return Err(EngineError::AlreadyRolledBack(job_id.clone()));
        }

        tracing::info!(
            job_id = job.id.as_str(),
            entity_type = job.entity_type,
            status = %job.status,
            "Rolling back migration job"
        );

        let mut result = RollbackResult::new(job.id.clone(), job.entity_type.clone());
        let created = self.delete_created(&job, &mut result).await?;
        self.restore_overwritten(&job, &created, &mut result).await?;

        self.store
            .update_job_status(&job.id, JobStatus::RolledBack, Some(Utc::now()))?;
        let purged = self.store.delete_lineage(&job.id)?;

        tracing::info!(
            job_id = job.id.as_str(),
            deleted = result.deleted_count,
            restored = result.restored_count,
            failed = result.failed_count,
            lineage_purged = purged,
            "Rollback finished"
        );
        Ok(result)
    }

    async fn delete_created(
        &self,
        job: &MigrationJob,
        result: &mut RollbackResult,
    ) -> Result<HashSet<EntityId>, EngineError> {
        let committed = self
            .store
            .lineage_for_job(&job.id, Some(LineageState::Committed))?;

        let mut created = HashSet::new();
        for lineage in committed {
            let Some(entity_id) = lineage.target_id else {
                continue;
            };
            created.insert(entity_id.clone());
            match self.delete_one(&job.entity_type, &entity_id).await {
                Ok(()) => result.deleted_count += 1,
                Err(message) => {
                    tracing::warn!(
                        job_id = job.id.as_str(),
                        entity_id = entity_id.as_str(),
                        legacy_ref = lineage.legacy_ref,
                        "Rollback delete failed: {message}"
                    );
                    result.record_failure(entity_id, RollbackPhase::Delete, message);
                }
            }
        }
        Ok(created)
    }

    async fn delete_one(&self, entity_type: &str, entity_id: &EntityId) -> Result<(), String> {
        let current = self
            .bridge
            .read_raw_row(entity_type, entity_id)
            .await
            .map_err(|e| e.to_string())?
            .ok_or_else(|| format!("{entity_type} '{entity_id}' no longer exists"))?;
        self.bridge
            .mutate(MutateRequest::delete(
                entity_type,
                entity_id.clone(),
                current.version,
            ))
            .await
            .map(|_| ())
            .map_err(|e| e.to_string())
    }

    async fn restore_overwritten(
        &self,
        job: &MigrationJob,
        created: &HashSet<EntityId>,
        result: &mut RollbackResult,
    ) -> Result<(), EngineError> {
        for snapshot in self.store.snapshots_for_job(&job.id)? {
            if created.contains(&snapshot.entity_id) {
                continue;
            }
            let request = MutateRequest::update(
                &job.entity_type,
                snapshot.entity_id.clone(),
                snapshot.restore_payload(),
                snapshot.restore_expected_version(),
            );
            match self.bridge.mutate(request).await {
                Ok(_) => result.restored_count += 1,
                Err(err) => {
                    tracing::warn!(
                        job_id = job.id.as_str(),
                        entity_id = snapshot.entity_id.as_str(),
                        "Rollback restore failed: {err}"
                    );
                    result.record_failure(
                        snapshot.entity_id,
                        RollbackPhase::Restore,
                        err.to_string(),
                    );
                }
            }
        }
        Ok(())
    }
}
