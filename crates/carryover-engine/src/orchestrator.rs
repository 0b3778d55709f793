//! Job orchestrator: builds stores, source, and readiness gate from a job
//! config and drives check, run, rollback, and status.

use std::collections::BTreeMap;
use std::sync::Arc;

use anyhow::Context;
use carryover_state::{MigrationStore, SqliteEntityStore, SqliteMigrationStore};
use carryover_types::job::{JobId, MigrationJob};
use carryover_types::lineage::LineageState;
use carryover_types::rollback::RollbackResult;
use chrono::Utc;

use crate::checkpoint::LOAD_STEP;
use crate::config::types::{JobConfig, SourceKind};
use crate::errors::EngineError;
use crate::matcher::MatchOptions;
use crate::readiness::{
    DuplicateTargetCheck, MappingCompletenessCheck, MatchKeyNullRateCheck, ReadinessGate,
    SourceNullRateSampler,
};
use crate::result::{CheckResult, JobStatusReport, LineageCounts, RunSummary};
use crate::rollback::RollbackEngine;
use crate::runner::{MatchSettings, MigrationRunner, RunnerOptions};
use crate::source::{JsonlSource, RecordSource};

/// Job described by `config`. A fixed `job.id` wins; otherwise a fresh id is
/// derived from the entity type and the current time.
#[must_use]
pub fn build_job(config: &JobConfig) -> MigrationJob {
    let id = config.job.id.clone().unwrap_or_else(|| {
        format!(
            "{}-{}",
            config.job.entity_type,
            Utc::now().format("%Y%m%dT%H%M%S%3fZ")
        )
    });
    MigrationJob::new(
        id,
        config.job.entity_type.clone(),
        config.job.field_mappings.clone(),
    )
}

fn build_source(config: &JobConfig) -> Arc<dyn RecordSource> {
    match config.source.kind {
        SourceKind::Jsonl => Arc::new(JsonlSource::new(
            config.source.path.clone(),
            config.source.id_field.clone(),
            config.source.cursor,
        )),
    }
}

/// Legacy source field feeding each match key, for keys that are mapped.
fn match_key_sources(config: &JobConfig) -> BTreeMap<String, String> {
    let matching = &config.matching;
    matching
        .key_fields
        .iter()
        .chain(matching.fuzzy_field.iter())
        .filter_map(|key| {
            config
                .job
                .field_mappings
                .iter()
                .find(|m| &m.target == key)
                .map(|m| (key.clone(), m.source.clone()))
        })
        .collect()
}

/// Readiness gate with the built-in checks configured for `config`.
#[must_use]
pub fn build_gate(config: &JobConfig, source: Arc<dyn RecordSource>) -> ReadinessGate {
    let sampler = SourceNullRateSampler::new(
        source,
        match_key_sources(config),
        config.readiness.sample_size,
    );
    ReadinessGate::new(config.readiness.fail_on_warnings)
        .with_check(MappingCompletenessCheck)
        .with_check(DuplicateTargetCheck)
        .with_check(
            MatchKeyNullRateCheck::new(Arc::new(sampler))
                .with_threshold(config.readiness.null_rate_threshold),
        )
}

fn runner_options(config: &JobConfig) -> RunnerOptions {
    let mut options = RunnerOptions::new(config.job.transform_version.clone());
    options.batch_size = config.job.batch_size;
    options.stale_policy = config.checkpoint.on_stale;
    options.matching = MatchSettings {
        key_fields: config.matching.key_fields.clone(),
        fuzzy_field: config.matching.fuzzy_field.clone(),
        options: MatchOptions::default()
            .with_threshold(config.matching.threshold)
            .with_score_weight(config.matching.score_weight),
        min_score: config.matching.min_score,
    };
    options
}

fn open_state(config: &JobConfig) -> Result<Arc<SqliteMigrationStore>, EngineError> {
    let store = SqliteMigrationStore::open(&config.state.path).with_context(|| {
        format!(
            "Failed to open state database: {}",
            config.state.path.display()
        )
    })?;
    Ok(Arc::new(store))
}

fn open_target(config: &JobConfig) -> Result<Arc<SqliteEntityStore>, EngineError> {
    let store = SqliteEntityStore::open(&config.target.path).with_context(|| {
        format!(
            "Failed to open target database: {}",
            config.target.path.display()
        )
    })?;
    Ok(Arc::new(store))
}

/// Evaluate the readiness gate without writing anything.
pub async fn check_job(config: &JobConfig) -> CheckResult {
    tracing::info!(
        entity_type = config.job.entity_type,
        source = %config.source.path.display(),
        "Checking migration job"
    );
    let job = build_job(config);
    let gate = build_gate(config, build_source(config));
    let report = gate.evaluate(&job).await;
    let blocking = gate
        .blocking_names(&report)
        .into_iter()
        .map(str::to_string)
        .collect();
    CheckResult { report, blocking }
}

/// Start a new job, or resume `resume` when given.
///
/// # Errors
///
/// Returns [`EngineError`] when the stores can't be opened, the gate blocks,
/// the job can't resume, or the run aborts.
pub async fn run_job(
    config: &JobConfig,
    resume: Option<&JobId>,
) -> Result<RunSummary, EngineError> {
    let store = open_state(config)?;
    let bridge = open_target(config)?;
    let source = build_source(config);
    let gate = build_gate(config, Arc::clone(&source));
    let runner = MigrationRunner::new(store, bridge, source, runner_options(config))
        .with_gate(Arc::new(gate));

    let result = match resume {
        Some(job_id) => runner.resume(job_id).await,
        None => runner.start(build_job(config)).await,
    };
    if let Err(ref err) = result {
        tracing::error!(
            entity_type = config.job.entity_type,
            "Migration job failed: {err}"
        );
    }
    result
}

/// Roll back `job_id` against the configured stores.
///
/// # Errors
///
/// Returns [`EngineError`] when the stores can't be opened or the job can't
/// be rolled back.
pub async fn rollback_job(
    config: &JobConfig,
    job_id: &JobId,
) -> Result<RollbackResult, EngineError> {
    let store = open_state(config)?;
    let bridge = open_target(config)?;
    RollbackEngine::new(store, bridge).rollback(job_id).await
}

/// Read a job's bookkeeping.
///
/// # Errors
///
/// Returns [`EngineError::JobNotFound`] for an unknown job and
/// [`EngineError::State`] on storage failure.
pub fn job_status(config: &JobConfig, job_id: &JobId) -> Result<JobStatusReport, EngineError> {
    let store = open_state(config)?;
    status_from_store(store.as_ref(), job_id)
}

pub(crate) fn status_from_store(
    store: &dyn MigrationStore,
    job_id: &JobId,
) -> Result<JobStatusReport, EngineError> {
    let job = store
        .get_job(job_id)?
        .ok_or_else(|| EngineError::JobNotFound(job_id.clone()))?;
    let mut lineage = LineageCounts::default();
    for row in store.lineage_for_job(job_id, None)? {
        match row.state {
            LineageState::Pending => lineage.pending += 1,
            LineageState::Committed => lineage.committed += 1,
            LineageState::Failed => lineage.failed += 1,
        }
    }
    Ok(JobStatusReport {
        checkpoint: store.get_checkpoint(job_id, LOAD_STEP)?,
        snapshots: store.snapshots_for_job(job_id)?.len(),
        job,
        lineage,
    })
}
