//! Integration tests for the batch runner: crash and resume, stale
//! checkpoints, readiness blocking, and run-then-rollback.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use carryover_engine::checkpoint::{StalePolicy, LOAD_STEP};
use carryover_engine::readiness::{MappingCompletenessCheck, ReadinessGate};
use carryover_engine::runner::MatchSettings;
use carryover_engine::source::{LegacyRecord, VecSource};
use carryover_engine::{EngineError, MigrationRunner, RollbackEngine, RunnerOptions};
use carryover_state::{
    CrudBridge, MemoryEntityStore, MigrationStore, SqliteMigrationStore, StateError,
};
use carryover_types::checkpoint::StepCheckpoint;
use carryover_types::cursor::{Cursor, CursorMode};
use carryover_types::entity::EntityId;
use carryover_types::job::{FieldMapping, JobId, JobStatus, MigrationJob};
use carryover_types::lineage::{LineageState, MigrationLineage, MigrationRowSnapshot};
use chrono::{DateTime, Utc};
use serde_json::{json, Map, Value};

// ---------------------------------------------------------------------------
// Fixtures
// ---------------------------------------------------------------------------

/// Store that stops persisting checkpoints after a fixed number of saves,
/// simulating a process dying mid-batch.
struct CrashingStore {
    inner: Arc<SqliteMigrationStore>,
    saves_left: AtomicUsize,
}

impl CrashingStore {
    fn new(inner: Arc<SqliteMigrationStore>, saves: usize) -> Self {
        Self {
            inner,
            saves_left: AtomicUsize::new(saves),
        }
    }
}

impl MigrationStore for CrashingStore {
    fn create_job(&self, job: &MigrationJob) -> carryover_state::error::Result<()> {
        self.inner.create_job(job)
    }
    fn get_job(&self, job_id: &JobId) -> carryover_state::error::Result<Option<MigrationJob>> {
        self.inner.get_job(job_id)
    }
    fn update_job_status(
        &self,
        job_id: &JobId,
        status: JobStatus,
        completed_at: Option<DateTime<Utc>>,
    ) -> carryover_state::error::Result<bool> {
        self.inner.update_job_status(job_id, status, completed_at)
    }
    fn insert_lineage(&self, job_id: &JobId, legacy_ref: &str) -> carryover_state::error::Result<i64> {
        self.inner.insert_lineage(job_id, legacy_ref)
    }
    fn mark_lineage_committed(
        &self,
        lineage_id: i64,
        target_id: &EntityId,
    ) -> carryover_state::error::Result<()> {
        self.inner.mark_lineage_committed(lineage_id, target_id)
    }
    fn mark_lineage_failed(&self, lineage_id: i64, error: &str) -> carryover_state::error::Result<()> {
        self.inner.mark_lineage_failed(lineage_id, error)
    }
    fn lineage_for_job(
        &self,
        job_id: &JobId,
        state: Option<LineageState>,
    ) -> carryover_state::error::Result<Vec<MigrationLineage>> {
        self.inner.lineage_for_job(job_id, state)
    }
    fn delete_lineage(&self, job_id: &JobId) -> carryover_state::error::Result<u64> {
        self.inner.delete_lineage(job_id)
    }
    fn insert_snapshot(&self, snapshot: &MigrationRowSnapshot) -> carryover_state::error::Result<bool> {
        self.inner.insert_snapshot(snapshot)
    }
    fn record_snapshot_write(
        &self,
        job_id: &JobId,
        entity_id: &EntityId,
        version: u64,
    ) -> carryover_state::error::Result<bool> {
        self.inner.record_snapshot_write(job_id, entity_id, version)
    }
    fn get_snapshot(
        &self,
        job_id: &JobId,
        entity_id: &EntityId,
    ) -> carryover_state::error::Result<Option<MigrationRowSnapshot>> {
        self.inner.get_snapshot(job_id, entity_id)
    }
    fn snapshots_for_job(&self, job_id: &JobId) -> carryover_state::error::Result<Vec<MigrationRowSnapshot>> {
        self.inner.snapshots_for_job(job_id)
    }
    fn get_checkpoint(
        &self,
        job_id: &JobId,
        step: &str,
    ) -> carryover_state::error::Result<Option<StepCheckpoint>> {
        self.inner.get_checkpoint(job_id, step)
    }
    fn save_checkpoint(
        &self,
        job_id: &JobId,
        step: &str,
        checkpoint: &StepCheckpoint,
    ) -> carryover_state::error::Result<()> {
        let left = self.saves_left.load(Ordering::SeqCst);
        if left == 0 {
            return Err(StateError::Corrupt("simulated crash".into()));
        }
        self.saves_left.store(left - 1, Ordering::SeqCst);
        self.inner.save_checkpoint(job_id, step, checkpoint)
    }
}

fn object(value: Value) -> Map<String, Value> {
    match value {
        Value::Object(map) => map,
        _ => Map::new(),
    }
}

fn records(n: usize) -> Vec<LegacyRecord> {
    (1..=n)
        .map(|i| {
            LegacyRecord::new(
                format!("L-{i}"),
                object(json!({
                    "legacy_id": format!("L-{i}"),
                    "full_name": format!("Person {i}"),
                    "mail": format!("p{i}@example.com"),
                })),
            )
        })
        .collect()
}

fn job() -> MigrationJob {
    MigrationJob::new(
        "job-run",
        "customer",
        vec![
            FieldMapping::core("full_name", "name"),
            FieldMapping::core("mail", "email"),
            FieldMapping::custom("legacy_id", "legacyRef"),
        ],
    )
}

fn options(version: &str, batch_size: usize) -> RunnerOptions {
    let mut options = RunnerOptions::new(version);
    options.batch_size = batch_size;
    options.matching = MatchSettings {
        key_fields: vec!["email".into()],
        ..MatchSettings::default()
    };
    options
}

/// Run 5 records in batches of 3 and crash after the third record of the
/// first batch is written but before its progress is saved.
async fn crashed_run(
    store: &Arc<SqliteMigrationStore>,
    bridge: &Arc<MemoryEntityStore>,
    source: &Arc<VecSource>,
) {
    // 1 initial save + 2 per-record saves, then the 3rd record's save fails.
    let crashing = Arc::new(CrashingStore::new(store.clone(), 3));
    let runner = MigrationRunner::new(crashing, bridge.clone(), source.clone(), options("v1", 3));
    let err = runner.start(job()).await.unwrap_err();
    assert!(matches!(err, EngineError::State(_)), "got: {err}");
}

// ---------------------------------------------------------------------------
// Crash and resume
// ---------------------------------------------------------------------------

#[tokio::test]
async fn test_resume_after_crash_processes_only_remaining_records() {
    let store = Arc::new(SqliteMigrationStore::in_memory().unwrap());
    let bridge = Arc::new(MemoryEntityStore::new());
    let source = Arc::new(VecSource::new(records(5), CursorMode::Offset));
    crashed_run(&store, &bridge, &source).await;

    let job_id = JobId::new("job-run");
    let cp = store.get_checkpoint(&job_id, LOAD_STEP).unwrap().unwrap();
    assert_eq!(cp.batch_index, 0);
    assert_eq!(cp.loaded_up_to, 1);
    assert!(cp.batch_in_progress);
    assert_eq!(bridge.count("customer").unwrap(), 3);

    let runner = MigrationRunner::new(store.clone(), bridge.clone(), source, options("v1", 3));
    let summary = runner.resume(&job_id).await.unwrap();

    // Record 3 was written before the crash; only its progress was lost.
    assert_eq!(summary.processed, 3);
    assert_eq!(summary.skipped, 1);
    assert_eq!(summary.created, 2);
    assert_eq!(summary.failed, 0);
    assert_eq!(bridge.count("customer").unwrap(), 5);

    let committed = store
        .lineage_for_job(&job_id, Some(LineageState::Committed))
        .unwrap();
    assert_eq!(committed.len(), 5);
    assert_eq!(
        store.get_job(&job_id).unwrap().unwrap().status,
        JobStatus::Completed
    );
    let cp = store.get_checkpoint(&job_id, LOAD_STEP).unwrap().unwrap();
    assert_eq!(cp.cursor, Some(Cursor::Offset { offset: 5 }));
    assert_eq!(cp.batch_index, 2);
}

#[tokio::test]
async fn test_stale_checkpoint_fails_by_default() {
    let store = Arc::new(SqliteMigrationStore::in_memory().unwrap());
    let bridge = Arc::new(MemoryEntityStore::new());
    let source = Arc::new(VecSource::new(records(5), CursorMode::Offset));
    crashed_run(&store, &bridge, &source).await;

    let runner = MigrationRunner::new(store.clone(), bridge.clone(), source, options("v2", 3));
    let err = runner.resume(&JobId::new("job-run")).await.unwrap_err();
    match err {
        EngineError::StaleCheckpoint {
            checkpoint_version,
            active_version,
            ..
        } => {
            assert_eq!(checkpoint_version, "v1");
            assert_eq!(active_version, "v2");
        }
        other => panic!("expected stale checkpoint, got {other}"),
    }
    assert_eq!(bridge.count("customer").unwrap(), 3);
}

#[tokio::test]
async fn test_stale_checkpoint_restart_batch_redoes_current_batch() {
    let store = Arc::new(SqliteMigrationStore::in_memory().unwrap());
    let bridge = Arc::new(MemoryEntityStore::new());
    let source = Arc::new(VecSource::new(records(5), CursorMode::Offset));
    crashed_run(&store, &bridge, &source).await;

    let mut opts = options("v2", 3);
    opts.stale_policy = StalePolicy::RestartBatch;
    let runner = MigrationRunner::new(store.clone(), bridge.clone(), source, opts);
    let summary = runner.resume(&JobId::new("job-run")).await.unwrap();

    assert_eq!(summary.processed, 5);
    assert_eq!(summary.skipped, 3);
    assert_eq!(summary.created, 2);
    assert_eq!(bridge.count("customer").unwrap(), 5);
    let cp = store
        .get_checkpoint(&JobId::new("job-run"), LOAD_STEP)
        .unwrap()
        .unwrap();
    assert_eq!(cp.transform_version, "v2");
}

#[tokio::test]
async fn test_id_cursor_resumes_after_last_id() {
    let store = Arc::new(SqliteMigrationStore::in_memory().unwrap());
    let bridge = Arc::new(MemoryEntityStore::new());
    let source = Arc::new(VecSource::new(records(4), CursorMode::Id));
    let runner = MigrationRunner::new(store.clone(), bridge.clone(), source, options("v1", 2));
    let summary = runner.start(job()).await.unwrap();

    assert_eq!(summary.batches, 2);
    assert_eq!(summary.created, 4);
    let cp = store
        .get_checkpoint(&JobId::new("job-run"), LOAD_STEP)
        .unwrap()
        .unwrap();
    assert_eq!(
        cp.cursor,
        Some(Cursor::Id {
            last_id: "L-4".into()
        })
    );
}

// ---------------------------------------------------------------------------
// Readiness
// ---------------------------------------------------------------------------

#[tokio::test]
async fn test_blocked_gate_writes_nothing() {
    let store = Arc::new(SqliteMigrationStore::in_memory().unwrap());
    let bridge = Arc::new(MemoryEntityStore::new());
    let source = Arc::new(VecSource::new(records(2), CursorMode::Offset));
    let gate = ReadinessGate::new(false).with_check(MappingCompletenessCheck);
    let runner = MigrationRunner::new(store.clone(), bridge.clone(), source, options("v1", 10))
        .with_gate(Arc::new(gate));

    let unmapped = MigrationJob::new("job-run", "customer", Vec::new());
    let err = runner.start(unmapped).await.unwrap_err();
    assert_eq!(
        err.to_string(),
        "Readiness checks failed: mapping_completeness"
    );
    assert!(store.get_job(&JobId::new("job-run")).unwrap().is_none());
    assert_eq!(bridge.count("customer").unwrap(), 0);
}

// ---------------------------------------------------------------------------
// Run then roll back
// ---------------------------------------------------------------------------

#[tokio::test]
async fn test_run_then_rollback_restores_target() {
    let store = Arc::new(SqliteMigrationStore::in_memory().unwrap());
    let bridge = Arc::new(MemoryEntityStore::new());
    bridge
        .seed(
            "customer",
            "pre-1",
            object(json!({"name": "Person Two (old)", "email": "p2@example.com"})),
            object(json!({"tier": "silver"})),
            7,
        )
        .unwrap();
    let source = Arc::new(VecSource::new(records(3), CursorMode::Offset));
    let runner = MigrationRunner::new(store.clone(), bridge.clone(), source, options("v1", 2));
    let summary = runner.start(job()).await.unwrap();
    assert_eq!(summary.created, 2);
    assert_eq!(summary.updated, 1);

    let updated = bridge
        .read_raw_row("customer", &EntityId::new("pre-1"))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(updated.core["name"], json!("Person 2"));
    assert_eq!(updated.custom["legacyRef"], json!("L-2"));
    assert_eq!(updated.custom["tier"], json!("silver"));

    let result = RollbackEngine::new(store.clone(), bridge.clone())
        .rollback(&JobId::new("job-run"))
        .await
        .unwrap();
    assert_eq!(result.deleted_count, 2);
    assert_eq!(result.restored_count, 1);
    assert!(result.is_clean());

    let rows = bridge.list_rows("customer").await.unwrap();
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0].core["name"], json!("Person Two (old)"));
    assert_eq!(rows[0].custom, object(json!({"tier": "silver"})));

    let err = runner.resume(&JobId::new("job-run")).await.unwrap_err();
    assert!(matches!(err, EngineError::AlreadyRolledBack(_)));
}
