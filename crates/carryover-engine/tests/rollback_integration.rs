//! Integration tests for the two-phase rollback against the SQLite stores.

use std::collections::HashSet;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use carryover_engine::{EngineError, RollbackEngine};
use carryover_state::{
    BridgeError, CrudBridge, MigrationStore, SqliteEntityStore, SqliteMigrationStore,
};
use carryover_types::entity::{EntityId, EntityRow, MutateRequest};
use carryover_types::job::{FieldMapping, JobStatus, MigrationJob};
use carryover_types::lineage::MigrationRowSnapshot;
use carryover_types::rollback::RollbackPhase;
use chrono::Utc;
use serde_json::{json, Map, Value};

fn object(value: Value) -> Map<String, Value> {
    match value {
        Value::Object(map) => map,
        _ => Map::new(),
    }
}

fn job() -> MigrationJob {
    MigrationJob::new(
        "job-rb",
        "customer",
        vec![FieldMapping::core("full_name", "name")],
    )
}

/// Entity store whose deletes of chosen ids lose a concurrent-edit race.
struct RacingBridge {
    inner: SqliteEntityStore,
    contested: Mutex<HashSet<EntityId>>,
}

#[async_trait]
impl CrudBridge for RacingBridge {
    async fn mutate(&self, request: MutateRequest) -> Result<EntityRow, BridgeError> {
        let contested = request
            .entity_id
            .as_ref()
            .is_some_and(|id| self.contested.lock().unwrap().contains(id));
        if contested {
            let entity_id = request.entity_id.clone().unwrap();
            let current = self
                .inner
                .read_raw_row(&request.entity_type, &entity_id)
                .await?
                .unwrap();
            // Someone else edits the row between our read and our write.
            self.inner
                .mutate(MutateRequest::update(
                    &request.entity_type,
                    entity_id,
                    object(json!({"name": "edited elsewhere"})),
                    current.version,
                ))
                .await?;
        }
        self.inner.mutate(request).await
    }

    async fn read_raw_row(
        &self,
        entity_type: &str,
        entity_id: &EntityId,
    ) -> Result<Option<EntityRow>, BridgeError> {
        self.inner.read_raw_row(entity_type, entity_id).await
    }

    async fn list_rows(&self, entity_type: &str) -> Result<Vec<EntityRow>, BridgeError> {
        self.inner.list_rows(entity_type).await
    }
}

async fn create(bridge: &dyn CrudBridge, name: &str) -> EntityRow {
    bridge
        .mutate(MutateRequest::create(
            "customer",
            object(json!({ "name": name })),
        ))
        .await
        .unwrap()
}

#[tokio::test]
async fn test_one_created_one_updated_rolls_back_cleanly() {
    let dir = tempfile::tempdir().unwrap();
    let store = Arc::new(SqliteMigrationStore::open(&dir.path().join("state.db")).unwrap());
    let bridge = Arc::new(SqliteEntityStore::open(&dir.path().join("target.db")).unwrap());
    let job = job();
    store.create_job(&job).unwrap();

    // Pre-existing entity the job overwrote.
    let existing = create(bridge.as_ref(), "Original").await;
    store
        .insert_snapshot(&MigrationRowSnapshot {
            job_id: job.id.clone(),
            entity_id: existing.entity_id.clone(),
            before_write_core: object(json!({"name": "Original"})),
            before_write_custom: object(json!({"tier": "gold"})),
            before_version: existing.version,
            last_written_version: None,
            captured_at: Utc::now(),
        })
        .unwrap();

    // Entity the job created.
    let created = create(bridge.as_ref(), "New").await;
    let lineage = store.insert_lineage(&job.id, "L-9").unwrap();
    store
        .mark_lineage_committed(lineage, &created.entity_id)
        .unwrap();

    let engine = RollbackEngine::new(store.clone(), bridge.clone());
    let result = engine.rollback(&job.id).await.unwrap();

    assert_eq!(result.deleted_count, 1);
    assert_eq!(result.restored_count, 1);
    assert_eq!(result.failed_count, 0);
    assert!(result.errors.is_empty());

    let stored = store.get_job(&job.id).unwrap().unwrap();
    assert_eq!(stored.status, JobStatus::RolledBack);
    assert!(stored.completed_at.is_some());
    assert!(store.lineage_for_job(&job.id, None).unwrap().is_empty());
    assert_eq!(store.snapshots_for_job(&job.id).unwrap().len(), 1);

    assert!(bridge
        .read_raw_row("customer", &created.entity_id)
        .await
        .unwrap()
        .is_none());
    let restored = bridge
        .read_raw_row("customer", &existing.entity_id)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(restored.core["name"], json!("Original"));
    assert_eq!(restored.custom["tier"], json!("gold"));

    let err = engine.rollback(&job.id).await.unwrap_err();
    assert!(matches!(err, EngineError::AlreadyRolledBack(_)));
    assert!(err.is_job_state_error());
}

#[tokio::test]
async fn test_one_of_two_deletes_conflicts_and_restore_still_runs() {
    let store = Arc::new(SqliteMigrationStore::in_memory().unwrap());
    let bridge = Arc::new(RacingBridge {
        inner: SqliteEntityStore::in_memory().unwrap(),
        contested: Mutex::new(HashSet::new()),
    });
    let job = job();
    store.create_job(&job).unwrap();

    let a = create(bridge.as_ref(), "A").await;
    let b = create(bridge.as_ref(), "B").await;
    for (legacy, row) in [("L-1", &a), ("L-2", &b)] {
        let id = store.insert_lineage(&job.id, legacy).unwrap();
        store.mark_lineage_committed(id, &row.entity_id).unwrap();
    }
    bridge
        .contested
        .lock()
        .unwrap()
        .insert(b.entity_id.clone());

    let existing = create(bridge.as_ref(), "Kept").await;
    store
        .insert_snapshot(&MigrationRowSnapshot {
            job_id: job.id.clone(),
            entity_id: existing.entity_id.clone(),
            before_write_core: object(json!({"name": "Before"})),
            before_write_custom: Map::new(),
            before_version: existing.version,
            last_written_version: None,
            captured_at: Utc::now(),
        })
        .unwrap();

    let engine = RollbackEngine::new(store.clone(), bridge.clone());
    let result = engine.rollback(&job.id).await.unwrap();

    assert_eq!(result.deleted_count, 1);
    assert_eq!(result.restored_count, 1);
    assert_eq!(result.failed_count, 1);
    assert_eq!(result.errors.len(), 1);
    assert_eq!(result.errors[0].entity_id, b.entity_id);
    assert_eq!(result.errors[0].phase, RollbackPhase::Delete);
    assert!(result.errors[0].message.contains("version conflict"));

    assert_eq!(
        store.get_job(&job.id).unwrap().unwrap().status,
        JobStatus::RolledBack
    );
    assert!(bridge
        .read_raw_row("customer", &b.entity_id)
        .await
        .unwrap()
        .is_some());
}

#[tokio::test]
async fn test_rollback_of_unknown_job_fails_fast() {
    let store = Arc::new(SqliteMigrationStore::in_memory().unwrap());
    let bridge = Arc::new(SqliteEntityStore::in_memory().unwrap());
    let engine = RollbackEngine::new(store, bridge.clone());
    let err = engine
        .rollback(&carryover_types::job::JobId::new("nope"))
        .await
        .unwrap_err();
    assert!(matches!(err, EngineError::JobNotFound(_)));
    assert!(bridge.list_rows("customer").await.unwrap().is_empty());
}
