//! Batch runner for one migration job.
//!
//! Batches are processed strictly in order. Within a batch, records are
//! processed in index order and the checkpoint's `loaded_up_to` is persisted
//! after each one, so a crash resumes at exactly the next unprocessed record.

use std::collections::HashMap;
use std::sync::Arc;

use carryover_state::{CrudBridge, MigrationStore};
use carryover_types::checkpoint::StepCheckpoint;
use carryover_types::entity::{EntityId, EntityRow, MutateRequest, CUSTOM_DATA_KEY};
use carryover_types::job::{JobId, JobStatus, MigrationJob};
use carryover_types::lineage::{LineageState, MigrationRowSnapshot};
use carryover_types::matching::{MatchType, NameCandidate};
use chrono::Utc;
use serde_json::{Map, Value};

use crate::checkpoint::{self, StalePolicy, LOAD_STEP};
use crate::errors::EngineError;
use crate::matcher::{fuzzy_match_name, MatchOptions};
use crate::perf::PerfTracker;
use crate::readiness::PreflightGate;
use crate::result::RunSummary;
use crate::source::{value_text, LegacyRecord, RecordSource};

pub const STAGE_EXTRACT: &str = "extract";
pub const STAGE_MATCH: &str = "match";
pub const STAGE_WRITE: &str = "write";
pub const STAGE_CHECKPOINT: &str = "checkpoint";

pub const DEFAULT_BATCH_SIZE: usize = 500;

/// How legacy records are resolved against existing target entities.
#[derive(Debug, Clone, Default)]
pub struct MatchSettings {
    /// Target fields compared for exact equality, tried in order.
    pub key_fields: Vec<String>,
    /// Target field used for fuzzy fallback when no key matches.
    pub fuzzy_field: Option<String>,
    pub options: MatchOptions,
    /// Lowest fuzzy score accepted as a match.
    pub min_score: f64,
}

/// Runner tuning.
#[derive(Debug, Clone)]
pub struct RunnerOptions {
    pub batch_size: usize,
    pub transform_version: String,
    pub stale_policy: StalePolicy,
    pub matching: MatchSettings,
}

impl RunnerOptions {
    #[must_use]
    pub fn new(transform_version: impl Into<String>) -> Self {
        Self {
            batch_size: DEFAULT_BATCH_SIZE,
            transform_version: transform_version.into(),
            stale_policy: StalePolicy::default(),
            matching: MatchSettings::default(),
        }
    }
}

#[derive(Debug, Default)]
struct Tally {
    batches: u64,
    processed: u64,
    created: u64,
    updated: u64,
    skipped: u64,
    failed: u64,
}

enum RecordOutcome {
    Created,
    Updated,
    Skipped,
    Failed,
}

/// Where a legacy record landed among the known target rows.
struct TargetMatch {
    position: usize,
    match_type: MatchType,
}

/// Drives one job through its batches.
pub struct MigrationRunner {
    store: Arc<dyn MigrationStore>,
    bridge: Arc<dyn CrudBridge>,
    source: Arc<dyn RecordSource>,
    gate: Option<Arc<dyn PreflightGate>>,
    options: RunnerOptions,
    perf: PerfTracker,
}

impl MigrationRunner {
    #[must_use]
    pub fn new(
        store: Arc<dyn MigrationStore>,
        bridge: Arc<dyn CrudBridge>,
        source: Arc<dyn RecordSource>,
        options: RunnerOptions,
    ) -> Self {
        Self {
            store,
            bridge,
            source,
            gate: None,
            options,
            perf: PerfTracker::new(),
        }
    }

    /// Consult `gate` before the first batch of every invocation.
    #[must_use]
    pub fn with_gate(mut self, gate: Arc<dyn PreflightGate>) -> Self {
        self.gate = Some(gate);
        self
    }

    #[must_use]
    pub fn perf(&self) -> &PerfTracker {
        &self.perf
    }

    /// Persist `job` as a new running job and migrate it to completion.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::Validation`] for a malformed job,
    /// [`EngineError::ReadinessFailed`] when the gate blocks (nothing is
    /// persisted), and store or source errors that abort the run.
    pub async fn start(&self, job: MigrationJob) -> Result<RunSummary, EngineError> {
        self.validate(&job)?;
        self.preflight(&job).await?;

        self.store.create_job(&job)?;
        let initial = StepCheckpoint::initial(&self.options.transform_version);
        self.store.save_checkpoint(&job.id, LOAD_STEP, &initial)?;
        tracing::info!(
            job_id = job.id.as_str(),
            entity_type = job.entity_type,
            batch_size = self.options.batch_size,
            transform_version = self.options.transform_version,
            "Migration job started"
        );
        self.run_batches(&job, initial).await
    }

    /// Continue a running job from its persisted checkpoint.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::JobNotFound`], [`EngineError::AlreadyRolledBack`],
    /// or [`EngineError::JobNotRunning`] for jobs that can't resume, and
    /// [`EngineError::StaleCheckpoint`] under [`StalePolicy::Fail`].
    pub async fn resume(&self, job_id: &JobId) -> Result<RunSummary, EngineError> {
        let job = self
            .store
            .get_job(job_id)?
            .ok_or_else(|| EngineError::JobNotFound(job_id.clone()))?;
        match job.status {
            JobStatus::Running => {}
            JobStatus::RolledBack => return Err(EngineError::AlreadyRolledBack(job.id)),
            status @ JobStatus::Completed => {
                return Err(EngineError::JobNotRunning {
                    job_id: job.id,
                    status,
                })
            }
        }
        self.validate(&job)?;

        let loaded = checkpoint::load_or_initial(
            self.store.as_ref(),
            &job.id,
            LOAD_STEP,
            &self.options.transform_version,
        )?;
        let checkpoint = checkpoint::reconcile(
            &job.id,
            loaded,
            &self.options.transform_version,
            self.options.stale_policy,
        )?;
        self.preflight(&job).await?;

        tracing::info!(
            job_id = job.id.as_str(),
            batch_index = checkpoint.batch_index,
            next_record = checkpoint::next_record_index(&checkpoint),
            cursor = ?checkpoint.cursor,
            "Resuming migration job"
        );
        self.run_batches(&job, checkpoint).await
    }

    fn validate(&self, job: &MigrationJob) -> Result<(), EngineError> {
        if job.entity_type.trim().is_empty() {
            return Err(EngineError::Validation("entity type must not be empty".into()));
        }
        if self.options.batch_size == 0 {
            return Err(EngineError::Validation("batch size must be at least 1".into()));
        }
        Ok(())
    }

    async fn preflight(&self, job: &MigrationJob) -> Result<(), EngineError> {
        let Some(gate) = &self.gate else {
            return Ok(());
        };
        let decision = gate.check(job).await;
        if decision.passed {
            return Ok(());
        }
        let reason = decision
            .reason
            .unwrap_or_else(|| "Readiness checks failed".to_string());
        tracing::error!(job_id = job.id.as_str(), "Migration blocked: {reason}");
        Err(EngineError::ReadinessFailed(reason))
    }

    async fn run_batches(
        &self,
        job: &MigrationJob,
        mut checkpoint: StepCheckpoint,
    ) -> Result<RunSummary, EngineError> {
        let mut tally = Tally::default();
        let mut committed: HashMap<String, EntityId> = self
            .store
            .lineage_for_job(&job.id, Some(LineageState::Committed))?
            .into_iter()
            .filter_map(|l| l.target_id.map(|id| (l.legacy_ref, id)))
            .collect();

        loop {
            let timer = self.perf.start(STAGE_EXTRACT);
            let batch = self
                .source
                .fetch(checkpoint.cursor.as_ref(), self.options.batch_size)
                .await;
            timer.end();
            let batch = batch?;
            if batch.is_empty() {
                break;
            }

            let mut targets = if self.needs_targets() {
                self.bridge.list_rows(&job.entity_type).await?
            } else {
                Vec::new()
            };

            let first = usize::try_from(checkpoint::next_record_index(&checkpoint))
                .unwrap_or(usize::MAX);
            for (index, record) in batch.iter().enumerate().skip(first) {
                let outcome = self
                    .process_record(job, record, &mut targets, &mut committed)
                    .await?;
                match outcome {
                    RecordOutcome::Created => tally.created += 1,
                    RecordOutcome::Updated => tally.updated += 1,
                    RecordOutcome::Skipped => tally.skipped += 1,
                    RecordOutcome::Failed => tally.failed += 1,
                }
                tally.processed += 1;

                checkpoint::record_progress(&mut checkpoint, index as u64);
                self.save_checkpoint(&job.id, &checkpoint)?;
            }

            let last_id = batch.last().map(|r| r.id.as_str());
            checkpoint = checkpoint::advance_batch(
                &checkpoint,
                self.source.cursor_mode(),
                batch.len() as u64,
                last_id,
            );
            self.save_checkpoint(&job.id, &checkpoint)?;
            tally.batches += 1;
            tracing::info!(
                job_id = job.id.as_str(),
                batch_index = checkpoint.batch_index,
                records = batch.len(),
                created = tally.created,
                updated = tally.updated,
                failed = tally.failed,
                "Batch committed"
            );
        }

        self.store
            .update_job_status(&job.id, JobStatus::Completed, Some(Utc::now()))?;
        tracing::info!(
            job_id = job.id.as_str(),
            batches = tally.batches,
            processed = tally.processed,
            created = tally.created,
            updated = tally.updated,
            skipped = tally.skipped,
            failed = tally.failed,
            "Migration job completed"
        );

        Ok(RunSummary {
            job_id: job.id.clone(),
            batches: tally.batches,
            processed: tally.processed,
            created: tally.created,
            updated: tally.updated,
            skipped: tally.skipped,
            failed: tally.failed,
            perf: self.perf.to_report(),
        })
    }

    fn needs_targets(&self) -> bool {
        !self.options.matching.key_fields.is_empty() || self.options.matching.fuzzy_field.is_some()
    }

    fn save_checkpoint(&self, job_id: &JobId, checkpoint: &StepCheckpoint) -> Result<(), EngineError> {
        self.perf.measure(STAGE_CHECKPOINT, || {
            self.store.save_checkpoint(job_id, LOAD_STEP, checkpoint)
        })?;
        Ok(())
    }

    async fn process_record(
        &self,
        job: &MigrationJob,
        record: &LegacyRecord,
        targets: &mut Vec<EntityRow>,
        committed: &mut HashMap<String, EntityId>,
    ) -> Result<RecordOutcome, EngineError> {
        if let Some(existing) = committed.get(&record.id) {
            tracing::debug!(
                job_id = job.id.as_str(),
                legacy_ref = record.id,
                entity_id = existing.as_str(),
                "Record already committed, skipping"
            );
            return Ok(RecordOutcome::Skipped);
        }

        let (core, custom) = map_fields(job, record);
        let found = self
            .perf
            .measure(STAGE_MATCH, || self.resolve(&core, &custom, targets.as_slice()));

        let timer = self.perf.start(STAGE_WRITE);
        let outcome = match found {
            Some(found) => self.update_existing(job, record, found, core, custom, targets).await,
            None => {
                self.create_new(job, record, core, custom, targets, committed)
                    .await
            }
        };
        timer.end();
        outcome
    }

    fn resolve(
        &self,
        core: &Map<String, Value>,
        custom: &Map<String, Value>,
        targets: &[EntityRow],
    ) -> Option<TargetMatch> {
        let settings = &self.options.matching;
        let mapped_text = |field: &str| {
            core.get(field)
                .or_else(|| custom.get(field))
                .and_then(value_text)
        };

        for key in &settings.key_fields {
            let Some(wanted) = mapped_text(key) else {
                continue;
            };
            let hit = targets.iter().position(|row| {
                row.field(key).and_then(value_text).as_deref() == Some(wanted.as_str())
            });
            if let Some(position) = hit {
                return Some(TargetMatch {
                    position,
                    match_type: MatchType::Exact,
                });
            }
        }

        let fuzzy_field = settings.fuzzy_field.as_deref()?;
        let query = mapped_text(fuzzy_field)?;
        let candidates: Vec<NameCandidate> = targets
            .iter()
            .enumerate()
            .filter_map(|(i, row)| {
                row.field(fuzzy_field)
                    .and_then(value_text)
                    .map(|v| NameCandidate::new(i, v))
            })
            .collect();
        fuzzy_match_name(&query, &candidates, &settings.options)
            .into_iter()
            .find(|m| m.normalized_score >= settings.min_score)
            .map(|m| TargetMatch {
                position: m.candidate_index,
                match_type: MatchType::Fuzzy,
            })
    }

    async fn update_existing(
        &self,
        job: &MigrationJob,
        record: &LegacyRecord,
        found: TargetMatch,
        core: Map<String, Value>,
        custom: Map<String, Value>,
        targets: &mut [EntityRow],
    ) -> Result<RecordOutcome, EngineError> {
        let current = &targets[found.position];
        self.store.insert_snapshot(&MigrationRowSnapshot {
            job_id: job.id.clone(),
            entity_id: current.entity_id.clone(),
            before_write_core: current.core.clone(),
            before_write_custom: current.custom.clone(),
            before_version: current.version,
            last_written_version: None,
            captured_at: Utc::now(),
        })?;

        let mut merged_core = current.core.clone();
        merged_core.extend(core);
        let mut merged_custom = current.custom.clone();
        merged_custom.extend(custom);
        let request = MutateRequest::update(
            &job.entity_type,
            current.entity_id.clone(),
            with_custom_data(merged_core, merged_custom),
            current.version,
        );

        match self.bridge.mutate(request).await {
            Ok(row) => {
                self.store
                    .record_snapshot_write(&job.id, &row.entity_id, row.version)?;
                tracing::debug!(
                    job_id = job.id.as_str(),
                    legacy_ref = record.id,
                    entity_id = row.entity_id.as_str(),
                    match_type = ?found.match_type,
                    "Updated existing entity"
                );
                targets[found.position] = row;
                Ok(RecordOutcome::Updated)
            }
            Err(err) => {
                tracing::warn!(
                    job_id = job.id.as_str(),
                    legacy_ref = record.id,
                    entity_id = targets[found.position].entity_id.as_str(),
                    "Record update failed: {err}"
                );
                Ok(RecordOutcome::Failed)
            }
        }
    }

    async fn create_new(
        &self,
        job: &MigrationJob,
        record: &LegacyRecord,
        core: Map<String, Value>,
        custom: Map<String, Value>,
        targets: &mut Vec<EntityRow>,
        committed: &mut HashMap<String, EntityId>,
    ) -> Result<RecordOutcome, EngineError> {
        let lineage_id = self.store.insert_lineage(&job.id, &record.id)?;
        let request = MutateRequest::create(&job.entity_type, with_custom_data(core, custom));

        match self.bridge.mutate(request).await {
            Ok(row) => {
                self.store.mark_lineage_committed(lineage_id, &row.entity_id)?;
                tracing::debug!(
                    job_id = job.id.as_str(),
                    legacy_ref = record.id,
                    entity_id = row.entity_id.as_str(),
                    "Created entity"
                );
                committed.insert(record.id.clone(), row.entity_id.clone());
                targets.push(row);
                Ok(RecordOutcome::Created)
            }
            Err(err) => {
                self.store.mark_lineage_failed(lineage_id, &err.to_string())?;
                tracing::warn!(
                    job_id = job.id.as_str(),
                    legacy_ref = record.id,
                    "Record create failed: {err}"
                );
                Ok(RecordOutcome::Failed)
            }
        }
    }
}

/// Split a legacy record into mapped core and custom fields. Source fields
/// absent from the record are not written.
fn map_fields(job: &MigrationJob, record: &LegacyRecord) -> (Map<String, Value>, Map<String, Value>) {
    let mut core = Map::new();
    let mut custom = Map::new();
    for mapping in &job.field_mappings {
        let Some(value) = record.fields.get(&mapping.source) else {
            continue;
        };
        let dest = if mapping.custom { &mut custom } else { &mut core };
        dest.insert(mapping.target.clone(), value.clone());
    }
    (core, custom)
}

fn with_custom_data(mut core: Map<String, Value>, custom: Map<String, Value>) -> Map<String, Value> {
    if !custom.is_empty() {
        core.insert(CUSTOM_DATA_KEY.to_string(), Value::Object(custom));
    }
    core
}
