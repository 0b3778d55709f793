//! `SQLite`-backed [`CrudBridge`] target store.
//!
//! Rows live in a single `entity_rows` table keyed by `(entity_type,
//! entity_id)`. Version checks and writes happen under one connection lock
//! so a compare-and-set cannot interleave with another writer.

use std::path::Path;
use std::sync::{Mutex, MutexGuard};

use async_trait::async_trait;
use carryover_types::entity::{ActionVerb, EntityId, EntityRow, MutateRequest};
use rusqlite::{params, Connection, OptionalExtension};
use serde_json::{Map, Value};

use crate::bridge::{check_version, validate_request, CrudBridge};
use crate::error::{BridgeError, StateError};

const CREATE_TABLES: &str = r"
CREATE TABLE IF NOT EXISTS entity_rows (
    entity_type TEXT NOT NULL,
    entity_id TEXT NOT NULL,
    version INTEGER NOT NULL,
    core_json TEXT NOT NULL,
    custom_json TEXT NOT NULL,
    PRIMARY KEY (entity_type, entity_id)
);

CREATE TABLE IF NOT EXISTS entity_id_sequence (
    entity_type TEXT PRIMARY KEY,
    next_value INTEGER NOT NULL
);
";

/// `SQLite` target entity store.
pub struct SqliteEntityStore {
    conn: Mutex<Connection>,
}

impl SqliteEntityStore {
    /// Open or create an entity database at `path`.
    ///
    /// # Errors
    ///
    /// Returns [`StateError`] if the directory or database can't be created.
    pub fn open(path: &Path) -> Result<Self, StateError> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        let conn = Connection::open(path).map_err(StateError::backend)?;
        Self::init(conn)
    }

    /// In-memory entity store (for testing).
    ///
    /// # Errors
    ///
    /// Returns [`StateError::Sqlite`] if initialization fails.
    pub fn in_memory() -> Result<Self, StateError> {
        let conn = Connection::open_in_memory().map_err(StateError::backend)?;
        Self::init(conn)
    }

    fn init(conn: Connection) -> Result<Self, StateError> {
        conn.execute_batch(CREATE_TABLES)
            .map_err(StateError::backend)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn lock_conn(&self) -> Result<MutexGuard<'_, Connection>, BridgeError> {
        self.conn
            .lock()
            .map_err(|_| BridgeError::from(StateError::LockPoisoned))
    }

    fn load(
        conn: &Connection,
        entity_type: &str,
        entity_id: &EntityId,
    ) -> Result<Option<EntityRow>, BridgeError> {
        let raw: Option<(i64, String, String)> = conn
            .query_row(
                "SELECT version, core_json, custom_json FROM entity_rows
                 WHERE entity_type = ?1 AND entity_id = ?2",
                params![entity_type, entity_id.as_str()],
                |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?)),
            )
            .optional()?;
        raw.map(|(version, core, custom)| {
            decode_row(entity_type, entity_id.as_str(), version, &core, &custom)
        })
        .transpose()
    }

    fn next_id(conn: &Connection, entity_type: &str) -> Result<EntityId, BridgeError> {
        conn.execute(
            "INSERT INTO entity_id_sequence (entity_type, next_value) VALUES (?1, 1)
             ON CONFLICT(entity_type) DO UPDATE SET next_value = next_value + 1",
            params![entity_type],
        )?;
        let n: i64 = conn.query_row(
            "SELECT next_value FROM entity_id_sequence WHERE entity_type = ?1",
            params![entity_type],
            |row| row.get(0),
        )?;
        Ok(EntityId::new(format!("{entity_type}-{n}")))
    }
}

#[allow(clippy::cast_sign_loss)]
fn decode_row(
    entity_type: &str,
    entity_id: &str,
    version: i64,
    core: &str,
    custom: &str,
) -> Result<EntityRow, BridgeError> {
    Ok(EntityRow {
        entity_type: entity_type.to_string(),
        entity_id: EntityId::new(entity_id),
        version: version.max(0) as u64,
        core: parse_object(core)?,
        custom: parse_object(custom)?,
    })
}

fn parse_object(raw: &str) -> Result<Map<String, Value>, BridgeError> {
    match serde_json::from_str(raw).map_err(StateError::from)? {
        Value::Object(map) => Ok(map),
        other => Err(BridgeError::Backend(format!(
            "expected JSON object column, found {other}"
        ))),
    }
}

fn encode(map: &Map<String, Value>) -> Result<String, BridgeError> {
    Ok(serde_json::to_string(map).map_err(StateError::from)?)
}

#[allow(clippy::cast_possible_wrap)]
fn version_to_sql(version: u64) -> i64 {
    version as i64
}

#[async_trait]
impl CrudBridge for SqliteEntityStore {
    async fn mutate(&self, request: MutateRequest) -> Result<EntityRow, BridgeError> {
        let checked = validate_request(&request)?;
        let entity_type = request.entity_type.as_str();
        let conn = self.lock_conn()?;

        match checked.verb {
            ActionVerb::Create => {
                let entity_id = match checked.entity_id {
                    Some(id) => id.clone(),
                    None => Self::next_id(&conn, entity_type)?,
                };
                if Self::load(&conn, entity_type, &entity_id)?.is_some() {
                    return Err(BridgeError::AlreadyExists {
                        entity_type: entity_type.to_string(),
                        entity_id,
                    });
                }
                let (core, custom) = EntityRow::split_payload(request.input.clone());
                conn.execute(
                    "INSERT INTO entity_rows (entity_type, entity_id, version, core_json, custom_json)
                     VALUES (?1, ?2, 1, ?3, ?4)",
                    params![entity_type, entity_id.as_str(), encode(&core)?, encode(&custom)?],
                )?;
                Ok(EntityRow {
                    entity_type: entity_type.to_string(),
                    entity_id,
                    version: 1,
                    core,
                    custom,
                })
            }
            ActionVerb::Update => {
                let entity_id = checked.entity_id.cloned().ok_or_else(|| {
                    BridgeError::InvalidAction("update requires an entity id".into())
                })?;
                let current = Self::load(&conn, entity_type, &entity_id)?.ok_or_else(|| {
                    BridgeError::NotFound {
                        entity_type: entity_type.to_string(),
                        entity_id: entity_id.clone(),
                    }
                })?;
                check_version(&entity_id, checked.expected_version, current.version)?;
                let (core, custom) = EntityRow::split_payload(request.input.clone());
                let version = current.version + 1;
                let changed = conn.execute(
                    "UPDATE entity_rows SET version = ?1, core_json = ?2, custom_json = ?3
                     WHERE entity_type = ?4 AND entity_id = ?5 AND version = ?6",
                    params![
                        version_to_sql(version),
                        encode(&core)?,
                        encode(&custom)?,
                        entity_type,
                        entity_id.as_str(),
                        version_to_sql(current.version),
                    ],
                )?;
                if changed == 0 {
                    return Err(BridgeError::VersionConflict {
                        entity_id,
                        expected: current.version,
                        actual: current.version,
                    });
                }
                Ok(EntityRow {
                    entity_type: entity_type.to_string(),
                    entity_id,
                    version,
                    core,
                    custom,
                })
            }
            ActionVerb::Delete => {
                let entity_id = checked.entity_id.cloned().ok_or_else(|| {
                    BridgeError::InvalidAction("delete requires an entity id".into())
                })?;
                let current = Self::load(&conn, entity_type, &entity_id)?.ok_or_else(|| {
                    BridgeError::NotFound {
                        entity_type: entity_type.to_string(),
                        entity_id: entity_id.clone(),
                    }
                })?;
                check_version(&entity_id, checked.expected_version, current.version)?;
                conn.execute(
                    "DELETE FROM entity_rows WHERE entity_type = ?1 AND entity_id = ?2",
                    params![entity_type, entity_id.as_str()],
                )?;
                Ok(current)
            }
        }
    }

    async fn read_raw_row(
        &self,
        entity_type: &str,
        entity_id: &EntityId,
    ) -> Result<Option<EntityRow>, BridgeError> {
        let conn = self.lock_conn()?;
        Self::load(&conn, entity_type, entity_id)
    }

    async fn list_rows(&self, entity_type: &str) -> Result<Vec<EntityRow>, BridgeError> {
        let conn = self.lock_conn()?;
        let mut stmt = conn.prepare(
            "SELECT entity_id, version, core_json, custom_json FROM entity_rows
             WHERE entity_type = ?1 ORDER BY entity_id",
        )?;
        let raw = stmt
            .query_map(params![entity_type], |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    row.get::<_, i64>(1)?,
                    row.get::<_, String>(2)?,
                    row.get::<_, String>(3)?,
                ))
            })?
            .collect::<Result<Vec<_>, _>>()?;
        raw.iter()
            .map(|(id, version, core, custom)| decode_row(entity_type, id, *version, core, custom))
            .collect()
    }
}
