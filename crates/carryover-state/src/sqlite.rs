//! `SQLite`-backed implementation of [`MigrationStore`].
//!
//! Uses a single `Mutex<Connection>` for thread safety.

use std::path::Path;
use std::sync::{Mutex, MutexGuard};

use carryover_types::checkpoint::StepCheckpoint;
use carryover_types::entity::EntityId;
use carryover_types::job::{FieldMapping, JobId, JobStatus, MigrationJob};
use carryover_types::lineage::{LineageState, MigrationLineage, MigrationRowSnapshot};
use chrono::{DateTime, Utc};
use rusqlite::{Connection, OptionalExtension};
use serde_json::{Map, Value};

use crate::backend::MigrationStore;
use crate::error::{self, StateError};

/// Idempotent DDL for migration bookkeeping tables.
const CREATE_TABLES: &str = r"
CREATE TABLE IF NOT EXISTS migration_jobs (
    id TEXT PRIMARY KEY,
    entity_type TEXT NOT NULL,
    status TEXT NOT NULL,
    field_mappings TEXT NOT NULL,
    created_at TEXT NOT NULL,
    updated_at TEXT NOT NULL,
    completed_at TEXT
);

CREATE TABLE IF NOT EXISTS migration_lineage (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    job_id TEXT NOT NULL REFERENCES migration_jobs(id),
    legacy_ref TEXT NOT NULL,
    target_id TEXT,
    state TEXT NOT NULL,
    error_message TEXT
);

CREATE INDEX IF NOT EXISTS idx_lineage_job_state ON migration_lineage (job_id, state);

CREATE TABLE IF NOT EXISTS migration_row_snapshots (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    job_id TEXT NOT NULL REFERENCES migration_jobs(id),
    entity_id TEXT NOT NULL,
    before_write_core TEXT NOT NULL,
    before_write_custom TEXT NOT NULL,
    before_version INTEGER NOT NULL,
    last_written_version INTEGER,
    captured_at TEXT NOT NULL,
    UNIQUE (job_id, entity_id)
);

CREATE TABLE IF NOT EXISTS migration_checkpoints (
    job_id TEXT NOT NULL REFERENCES migration_jobs(id),
    step TEXT NOT NULL,
    checkpoint TEXT NOT NULL,
    updated_at TEXT NOT NULL,
    PRIMARY KEY (job_id, step)
);
";

/// `SQLite`-backed migration store.
///
/// Create with [`SqliteMigrationStore::open`] for file-backed persistence
/// or [`SqliteMigrationStore::in_memory`] for tests.
pub struct SqliteMigrationStore {
    conn: Mutex<Connection>,
}

impl SqliteMigrationStore {
    /// Open or create a `SQLite` state database at `path`.
    ///
    /// # Errors
    ///
    /// Returns [`StateError::Io`] if the directory can't be created,
    /// or [`StateError::Sqlite`] if the database can't be opened.
    pub fn open(path: &Path) -> error::Result<Self> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        let conn = Connection::open(path).map_err(StateError::backend)?;
        Self::init(conn)
    }

    /// Create an in-memory `SQLite` store (for testing).
    ///
    /// # Errors
    ///
    /// Returns [`StateError::Sqlite`] if the in-memory database can't
    /// be initialized.
    pub fn in_memory() -> error::Result<Self> {
        let conn = Connection::open_in_memory().map_err(StateError::backend)?;
        Self::init(conn)
    }

    fn init(conn: Connection) -> error::Result<Self> {
        conn.execute_batch("PRAGMA foreign_keys = ON;")
            .map_err(StateError::backend)?;
        conn.execute_batch(CREATE_TABLES)
            .map_err(StateError::backend)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// Acquire the connection lock.
    fn lock_conn(&self) -> error::Result<MutexGuard<'_, Connection>> {
        self.conn.lock().map_err(|_| StateError::LockPoisoned)
    }

    fn parse_timestamp(raw: &str) -> error::Result<DateTime<Utc>> {
        DateTime::parse_from_rfc3339(raw)
            .map(|dt| dt.with_timezone(&Utc))
            .map_err(|e| StateError::Corrupt(format!("bad timestamp '{raw}': {e}")))
    }

    fn parse_object(raw: &str) -> error::Result<Map<String, Value>> {
        match serde_json::from_str(raw)? {
            Value::Object(map) => Ok(map),
            other => Err(StateError::Corrupt(format!(
                "expected JSON object, found {other}"
            ))),
        }
    }

    #[allow(clippy::cast_sign_loss)]
    fn version_from_sql(raw: i64) -> u64 {
        raw.max(0) as u64
    }

    #[allow(clippy::cast_possible_wrap)]
    fn version_to_sql(version: u64) -> i64 {
        version as i64
    }
}

type LineageRow = (i64, String, String, Option<String>, String, Option<String>);
type SnapshotRow = (String, String, String, String, i64, Option<i64>, String);

fn lineage_from_row(row: LineageRow) -> error::Result<MigrationLineage> {
    let (id, job_id, legacy_ref, target_id, state, error) = row;
    let state = LineageState::parse(&state)
        .ok_or_else(|| StateError::Corrupt(format!("unknown lineage state '{state}'")))?;
    Ok(MigrationLineage {
        id,
        job_id: JobId::new(job_id),
        legacy_ref,
        target_id: target_id.map(EntityId::new),
        state,
        error,
    })
}

fn snapshot_from_row(row: SnapshotRow) -> error::Result<MigrationRowSnapshot> {
    let (job_id, entity_id, core, custom, version, last_written, captured_at) = row;
    Ok(MigrationRowSnapshot {
        job_id: JobId::new(job_id),
        entity_id: EntityId::new(entity_id),
        before_write_core: SqliteMigrationStore::parse_object(&core)?,
        before_write_custom: SqliteMigrationStore::parse_object(&custom)?,
        before_version: SqliteMigrationStore::version_from_sql(version),
        last_written_version: last_written.map(SqliteMigrationStore::version_from_sql),
        captured_at: SqliteMigrationStore::parse_timestamp(&captured_at)?,
    })
}

impl MigrationStore for SqliteMigrationStore {
    fn create_job(&self, job: &MigrationJob) -> error::Result<()> {
        let mappings = serde_json::to_string(&job.field_mappings)?;
        let conn = self.lock_conn()?;
        conn.execute(
            "INSERT INTO migration_jobs \
             (id, entity_type, status, field_mappings, created_at, updated_at, completed_at) \
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            rusqlite::params![
                job.id.as_str(),
                job.entity_type,
                job.status.as_str(),
                mappings,
                job.created_at.to_rfc3339(),
                job.updated_at.to_rfc3339(),
                job.completed_at.map(|ts| ts.to_rfc3339()),
            ],
        )
        .map_err(|e| StateError::backend_context("create_job", e))?;
        Ok(())
    }

    fn get_job(&self, job_id: &JobId) -> error::Result<Option<MigrationJob>> {
        let conn = self.lock_conn()?;
        let row = conn
            .query_row(
                "SELECT entity_type, status, field_mappings, created_at, updated_at, completed_at \
                 FROM migration_jobs WHERE id = ?1",
                [job_id.as_str()],
                |row| {
                    Ok((
                        row.get::<_, String>(0)?,
                        row.get::<_, String>(1)?,
                        row.get::<_, String>(2)?,
                        row.get::<_, String>(3)?,
                        row.get::<_, String>(4)?,
                        row.get::<_, Option<String>>(5)?,
                    ))
                },
            )
            .optional()
            .map_err(StateError::backend)?;

        let Some((entity_type, status, mappings, created_at, updated_at, completed_at)) = row
        else {
            return Ok(None);
        };

        let status = JobStatus::parse(&status)
            .ok_or_else(|| StateError::Corrupt(format!("unknown job status '{status}'")))?;
        let field_mappings: Vec<FieldMapping> = serde_json::from_str(&mappings)?;
        Ok(Some(MigrationJob {
            id: job_id.clone(),
            entity_type,
            status,
            field_mappings,
            created_at: Self::parse_timestamp(&created_at)?,
            updated_at: Self::parse_timestamp(&updated_at)?,
            completed_at: completed_at
                .as_deref()
                .map(Self::parse_timestamp)
                .transpose()?,
        }))
    }

    fn update_job_status(
        &self,
        job_id: &JobId,
        status: JobStatus,
        completed_at: Option<DateTime<Utc>>,
    ) -> error::Result<bool> {
        let conn = self.lock_conn()?;
        let now = Utc::now().to_rfc3339();
        let rows = conn
            .execute(
                "UPDATE migration_jobs SET status = ?1, updated_at = ?2, \
                 completed_at = COALESCE(?3, completed_at) WHERE id = ?4",
                rusqlite::params![
                    status.as_str(),
                    now,
                    completed_at.map(|ts| ts.to_rfc3339()),
                    job_id.as_str(),
                ],
            )
            .map_err(|e| StateError::backend_context("update_job_status", e))?;
        Ok(rows > 0)
    }

    fn insert_lineage(&self, job_id: &JobId, legacy_ref: &str) -> error::Result<i64> {
        let conn = self.lock_conn()?;
        conn.execute(
            "INSERT INTO migration_lineage (job_id, legacy_ref, state) VALUES (?1, ?2, ?3)",
            rusqlite::params![job_id.as_str(), legacy_ref, LineageState::Pending.as_str()],
        )
        .map_err(|e| StateError::backend_context("insert_lineage", e))?;
        Ok(conn.last_insert_rowid())
    }

    fn mark_lineage_committed(&self, lineage_id: i64, target_id: &EntityId) -> error::Result<()> {
        let conn = self.lock_conn()?;
        conn.execute(
            "UPDATE migration_lineage SET state = ?1, target_id = ?2, error_message = NULL \
             WHERE id = ?3",
            rusqlite::params![
                LineageState::Committed.as_str(),
                target_id.as_str(),
                lineage_id
            ],
        )
        .map_err(|e| StateError::backend_context("mark_lineage_committed", e))?;
        Ok(())
    }

    fn mark_lineage_failed(&self, lineage_id: i64, error: &str) -> error::Result<()> {
        let conn = self.lock_conn()?;
        conn.execute(
            "UPDATE migration_lineage SET state = ?1, error_message = ?2 WHERE id = ?3",
            rusqlite::params![LineageState::Failed.as_str(), error, lineage_id],
        )
        .map_err(|e| StateError::backend_context("mark_lineage_failed", e))?;
        Ok(())
    }

    fn lineage_for_job(
        &self,
        job_id: &JobId,
        state: Option<LineageState>,
    ) -> error::Result<Vec<MigrationLineage>> {
        let conn = self.lock_conn()?;
        let mut stmt = conn
            .prepare(
                "SELECT id, job_id, legacy_ref, target_id, state, error_message \
                 FROM migration_lineage \
                 WHERE job_id = ?1 AND (?2 IS NULL OR state = ?2) ORDER BY id",
            )
            .map_err(StateError::backend)?;
        let rows = stmt
            .query_map(
                rusqlite::params![job_id.as_str(), state.map(LineageState::as_str)],
                |row| {
                    Ok((
                        row.get(0)?,
                        row.get(1)?,
                        row.get(2)?,
                        row.get(3)?,
                        row.get(4)?,
                        row.get(5)?,
                    ))
                },
            )
            .map_err(StateError::backend)?;

        let mut lineage = Vec::new();
        for row in rows {
            lineage.push(lineage_from_row(row.map_err(StateError::backend)?)?);
        }
        Ok(lineage)
    }

    fn delete_lineage(&self, job_id: &JobId) -> error::Result<u64> {
        let conn = self.lock_conn()?;
        let removed = conn
            .execute(
                "DELETE FROM migration_lineage WHERE job_id = ?1",
                [job_id.as_str()],
            )
            .map_err(|e| StateError::backend_context("delete_lineage", e))?;
        Ok(removed as u64)
    }

    fn insert_snapshot(&self, snapshot: &MigrationRowSnapshot) -> error::Result<bool> {
        let core = serde_json::to_string(&snapshot.before_write_core)?;
        let custom = serde_json::to_string(&snapshot.before_write_custom)?;
        let conn = self.lock_conn()?;
        let rows = conn
            .execute(
                "INSERT OR IGNORE INTO migration_row_snapshots \
                 (job_id, entity_id, before_write_core, before_write_custom, before_version, \
                 last_written_version, captured_at) \
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
                rusqlite::params![
                    snapshot.job_id.as_str(),
                    snapshot.entity_id.as_str(),
                    core,
                    custom,
                    Self::version_to_sql(snapshot.before_version),
                    snapshot.last_written_version.map(Self::version_to_sql),
                    snapshot.captured_at.to_rfc3339(),
                ],
            )
            .map_err(|e| StateError::backend_context("insert_snapshot", e))?;
        Ok(rows > 0)
    }

    fn record_snapshot_write(
        &self,
        job_id: &JobId,
        entity_id: &EntityId,
        version: u64,
    ) -> error::Result<bool> {
        let conn = self.lock_conn()?;
        let rows = conn
            .execute(
                "UPDATE migration_row_snapshots SET last_written_version = ?3 \
                 WHERE job_id = ?1 AND entity_id = ?2",
                rusqlite::params![
                    job_id.as_str(),
                    entity_id.as_str(),
                    Self::version_to_sql(version)
                ],
            )
            .map_err(|e| StateError::backend_context("record_snapshot_write", e))?;
        Ok(rows > 0)
    }

    fn get_snapshot(
        &self,
        job_id: &JobId,
        entity_id: &EntityId,
    ) -> error::Result<Option<MigrationRowSnapshot>> {
        let conn = self.lock_conn()?;
        let row: Option<SnapshotRow> = conn
            .query_row(
                "SELECT job_id, entity_id, before_write_core, before_write_custom, \
                 before_version, last_written_version, captured_at FROM migration_row_snapshots \
                 WHERE job_id = ?1 AND entity_id = ?2",
                rusqlite::params![job_id.as_str(), entity_id.as_str()],
                |row| {
                    Ok((
                        row.get(0)?,
                        row.get(1)?,
                        row.get(2)?,
                        row.get(3)?,
                        row.get(4)?,
                        row.get(5)?,
                        row.get(6)?,
                    ))
                },
            )
            .optional()
            .map_err(StateError::backend)?;
        row.map(snapshot_from_row).transpose()
    }

    fn snapshots_for_job(&self, job_id: &JobId) -> error::Result<Vec<MigrationRowSnapshot>> {
        let conn = self.lock_conn()?;
        let mut stmt = conn
            .prepare(
                "SELECT job_id, entity_id, before_write_core, before_write_custom, \
                 before_version, last_written_version, captured_at FROM migration_row_snapshots \
                 WHERE job_id = ?1 ORDER BY id",
            )
            .map_err(StateError::backend)?;
        let rows = stmt
            .query_map([job_id.as_str()], |row| {
                Ok((
                    row.get(0)?,
                    row.get(1)?,
                    row.get(2)?,
                    row.get(3)?,
                    row.get(4)?,
                    row.get(5)?,
                    row.get(6)?,
                ))
            })
            .map_err(StateError::backend)?;

        let mut snapshots = Vec::new();
        for row in rows {
            snapshots.push(snapshot_from_row(row.map_err(StateError::backend)?)?);
        }
        Ok(snapshots)
    }

    fn get_checkpoint(&self, job_id: &JobId, step: &str) -> error::Result<Option<StepCheckpoint>> {
        let conn = self.lock_conn()?;
        let raw: Option<String> = conn
            .query_row(
                "SELECT checkpoint FROM migration_checkpoints WHERE job_id = ?1 AND step = ?2",
                rusqlite::params![job_id.as_str(), step],
                |row| row.get(0),
            )
            .optional()
            .map_err(StateError::backend)?;
        Ok(raw
            .as_deref()
            .map(serde_json::from_str::<StepCheckpoint>)
            .transpose()?)
    }

    fn save_checkpoint(
        &self,
        job_id: &JobId,
        step: &str,
        checkpoint: &StepCheckpoint,
    ) -> error::Result<()> {
        let encoded = serde_json::to_string(checkpoint)?;
        let conn = self.lock_conn()?;
        conn.execute(
            "INSERT INTO migration_checkpoints (job_id, step, checkpoint, updated_at) \
             VALUES (?1, ?2, ?3, ?4) \
             ON CONFLICT(job_id, step) DO UPDATE SET checkpoint = ?3, updated_at = ?4",
            rusqlite::params![job_id.as_str(), step, encoded, Utc::now().to_rfc3339()],
        )
        .map_err(|e| StateError::backend_context("save_checkpoint", e))?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use carryover_types::cursor::Cursor;
    use serde_json::json;

    fn job(id: &str) -> MigrationJob {
        MigrationJob::new(
            id,
            "customer",
            vec![
                FieldMapping::core("full_name", "name"),
                FieldMapping::custom("tier", "loyalty_tier"),
            ],
        )
    }

    fn store_with_job(id: &str) -> SqliteMigrationStore {
        let store = SqliteMigrationStore::in_memory().unwrap();
        store.create_job(&job(id)).unwrap();
        store
    }

    fn snapshot(job_id: &str, entity_id: &str, version: u64) -> MigrationRowSnapshot {
        let Value::Object(core) = json!({"name": "Grace Hopper"}) else {
            unreachable!()
        };
        let Value::Object(custom) = json!({"loyalty_tier": "silver"}) else {
            unreachable!()
        };
        MigrationRowSnapshot {
            job_id: JobId::new(job_id),
            entity_id: EntityId::new(entity_id),
            before_write_core: core,
            before_write_custom: custom,
            before_version: version,
            last_written_version: None,
            captured_at: Utc::now(),
        }
    }

    #[test]
    fn job_roundtrip() {
        let store = SqliteMigrationStore::in_memory().unwrap();
        let original = job("job-1");
        store.create_job(&original).unwrap();

        let loaded = store.get_job(&JobId::new("job-1")).unwrap().unwrap();
        assert_eq!(loaded.entity_type, "customer");
        assert_eq!(loaded.status, JobStatus::Running);
        assert_eq!(loaded.field_mappings, original.field_mappings);
        assert!(loaded.completed_at.is_none());

        assert!(store.get_job(&JobId::new("missing")).unwrap().is_none());
    }

    #[test]
    fn duplicate_job_rejected() {
        let store = store_with_job("job-1");
        let err = store.create_job(&job("job-1")).unwrap_err();
        assert!(err.to_string().contains("create_job"));
    }

    #[test]
    fn update_job_status_sets_completion() {
        let store = store_with_job("job-1");
        let done = Utc::now();
        assert!(store
            .update_job_status(&JobId::new("job-1"), JobStatus::Completed, Some(done))
            .unwrap());

        let loaded = store.get_job(&JobId::new("job-1")).unwrap().unwrap();
        assert_eq!(loaded.status, JobStatus::Completed);
        assert!(loaded.completed_at.is_some());

        assert!(!store
            .update_job_status(&JobId::new("nope"), JobStatus::Completed, None)
            .unwrap());
    }

    #[test]
    fn lineage_lifecycle_and_filtering() {
        let store = store_with_job("job-1");
        let jid = JobId::new("job-1");

        let a = store.insert_lineage(&jid, "L-1").unwrap();
        let b = store.insert_lineage(&jid, "L-2").unwrap();
        let _c = store.insert_lineage(&jid, "L-3").unwrap();
        store.mark_lineage_committed(a, &EntityId::new("c-1")).unwrap();
        store.mark_lineage_failed(b, "version conflict").unwrap();

        let all = store.lineage_for_job(&jid, None).unwrap();
        assert_eq!(all.len(), 3);
        assert_eq!(all[2].state, LineageState::Pending);

        let committed = store
            .lineage_for_job(&jid, Some(LineageState::Committed))
            .unwrap();
        assert_eq!(committed.len(), 1);
        assert_eq!(committed[0].legacy_ref, "L-1");
        assert_eq!(committed[0].target_id, Some(EntityId::new("c-1")));

        let failed = store
            .lineage_for_job(&jid, Some(LineageState::Failed))
            .unwrap();
        assert_eq!(failed[0].error.as_deref(), Some("version conflict"));

        assert_eq!(store.delete_lineage(&jid).unwrap(), 3);
        assert!(store.lineage_for_job(&jid, None).unwrap().is_empty());
    }

    #[test]
    fn lineage_requires_existing_job() {
        let store = SqliteMigrationStore::in_memory().unwrap();
        let err = store
            .insert_lineage(&JobId::new("ghost"), "L-1")
            .expect_err("foreign key should reject unknown job");
        assert!(err.to_string().contains("insert_lineage"));
    }

    #[test]
    fn snapshot_is_insert_once() {
        let store = store_with_job("job-1");
        assert!(store.insert_snapshot(&snapshot("job-1", "c-9", 3)).unwrap());
        assert!(!store.insert_snapshot(&snapshot("job-1", "c-9", 7)).unwrap());

        let stored = store
            .get_snapshot(&JobId::new("job-1"), &EntityId::new("c-9"))
            .unwrap()
            .unwrap();
        assert_eq!(stored.before_version, 3);
        assert_eq!(stored.before_write_custom["loyalty_tier"], json!("silver"));

        let all = store.snapshots_for_job(&JobId::new("job-1")).unwrap();
        assert_eq!(all.len(), 1);
    }

    #[test]
    fn snapshot_tracks_last_written_version() {
        let store = store_with_job("job-1");
        let jid = JobId::new("job-1");
        let eid = EntityId::new("c-9");
        assert!(!store.record_snapshot_write(&jid, &eid, 4).unwrap());

        store.insert_snapshot(&snapshot("job-1", "c-9", 3)).unwrap();
        assert!(store.record_snapshot_write(&jid, &eid, 4).unwrap());
        assert!(store.record_snapshot_write(&jid, &eid, 5).unwrap());

        let stored = store.get_snapshot(&jid, &eid).unwrap().unwrap();
        assert_eq!(stored.before_version, 3);
        assert_eq!(stored.last_written_version, Some(5));
        assert_eq!(stored.restore_expected_version(), 5);
    }

    #[test]
    fn checkpoint_upsert() {
        let store = store_with_job("job-1");
        let jid = JobId::new("job-1");
        assert!(store.get_checkpoint(&jid, "load").unwrap().is_none());

        let mut cp = StepCheckpoint::initial("v1");
        store.save_checkpoint(&jid, "load", &cp).unwrap();

        cp.cursor = Some(Cursor::Id {
            last_id: "L-500".into(),
        });
        cp.batch_index = 1;
        store.save_checkpoint(&jid, "load", &cp).unwrap();

        let loaded = store.get_checkpoint(&jid, "load").unwrap().unwrap();
        assert_eq!(loaded, cp);
    }

    #[test]
    fn file_backed_store_persists_across_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("state.db");
        {
            let store = SqliteMigrationStore::open(&path).unwrap();
            store.create_job(&job("job-1")).unwrap();
        }
        let reopened = SqliteMigrationStore::open(&path).unwrap();
        assert!(reopened.get_job(&JobId::new("job-1")).unwrap().is_some());
    }
}
