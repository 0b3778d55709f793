//! In-memory [`CrudBridge`] for tests and dry runs.

use std::collections::BTreeMap;
use std::sync::{Mutex, MutexGuard};

use async_trait::async_trait;
use carryover_types::entity::{ActionVerb, EntityId, EntityRow, MutateRequest};
use serde_json::{Map, Value};

use crate::bridge::{check_version, validate_request, CrudBridge};
use crate::error::BridgeError;

type Key = (String, EntityId);

/// Versioned entity rows held in a `BTreeMap` behind a mutex.
#[derive(Default)]
pub struct MemoryEntityStore {
    rows: Mutex<BTreeMap<Key, EntityRow>>,
    next_id: Mutex<u64>,
}

impl MemoryEntityStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn lock_rows(&self) -> Result<MutexGuard<'_, BTreeMap<Key, EntityRow>>, BridgeError> {
        self.rows
            .lock()
            .map_err(|_| BridgeError::Backend("entity store lock poisoned".into()))
    }

    fn allocate_id(&self, entity_type: &str) -> Result<EntityId, BridgeError> {
        let mut next = self
            .next_id
            .lock()
            .map_err(|_| BridgeError::Backend("entity store lock poisoned".into()))?;
        *next += 1;
        Ok(EntityId::new(format!("{entity_type}-{next}")))
    }

    /// Insert a row directly at a given version, bypassing the mutate path.
    ///
    /// # Errors
    ///
    /// Returns [`BridgeError::Backend`] if the lock is poisoned.
    pub fn seed(
        &self,
        entity_type: &str,
        entity_id: impl Into<EntityId>,
        core: Map<String, Value>,
        custom: Map<String, Value>,
        version: u64,
    ) -> Result<EntityRow, BridgeError> {
        let entity_id = entity_id.into();
        let row = EntityRow {
            entity_type: entity_type.to_string(),
            entity_id: entity_id.clone(),
            version,
            core,
            custom,
        };
        self.lock_rows()?
            .insert((entity_type.to_string(), entity_id), row.clone());
        Ok(row)
    }

    /// Number of rows of one entity type.
    ///
    /// # Errors
    ///
    /// Returns [`BridgeError::Backend`] if the lock is poisoned.
    pub fn count(&self, entity_type: &str) -> Result<usize, BridgeError> {
        Ok(self
            .lock_rows()?
            .keys()
            .filter(|(ty, _)| ty == entity_type)
            .count())
    }
}

#[async_trait]
impl CrudBridge for MemoryEntityStore {
    async fn mutate(&self, request: MutateRequest) -> Result<EntityRow, BridgeError> {
        let checked = validate_request(&request)?;
        let entity_type = request.entity_type.clone();

        match checked.verb {
            ActionVerb::Create => {
                let entity_id = match checked.entity_id {
                    Some(id) => id.clone(),
                    None => self.allocate_id(&entity_type)?,
                };
                let mut rows = self.lock_rows()?;
                let key = (entity_type.clone(), entity_id.clone());
                if rows.contains_key(&key) {
                    return Err(BridgeError::AlreadyExists {
                        entity_type,
                        entity_id,
                    });
                }
                let (core, custom) = EntityRow::split_payload(request.input);
                let row = EntityRow {
                    entity_type,
                    entity_id,
                    version: 1,
                    core,
                    custom,
                };
                rows.insert(key, row.clone());
                Ok(row)
            }
            ActionVerb::Update => {
                let entity_id = checked.entity_id.cloned().ok_or_else(|| {
                    BridgeError::InvalidAction("update requires an entity id".into())
                })?;
                let expected = checked.expected_version;
                let mut rows = self.lock_rows()?;
                let row = rows
                    .get_mut(&(entity_type.clone(), entity_id.clone()))
                    .ok_or_else(|| BridgeError::NotFound {
                        entity_type: entity_type.clone(),
                        entity_id: entity_id.clone(),
                    })?;
                check_version(&entity_id, expected, row.version)?;
                let (core, custom) = EntityRow::split_payload(request.input);
                row.core = core;
                row.custom = custom;
                row.version += 1;
                Ok(row.clone())
            }
            ActionVerb::Delete => {
                let entity_id = checked.entity_id.cloned().ok_or_else(|| {
                    BridgeError::InvalidAction("delete requires an entity id".into())
                })?;
                let expected = checked.expected_version;
                let mut rows = self.lock_rows()?;
                let key = (entity_type.clone(), entity_id.clone());
                let current = rows.get(&key).ok_or_else(|| BridgeError::NotFound {
                    entity_type: entity_type.clone(),
                    entity_id: entity_id.clone(),
                })?;
                check_version(&entity_id, expected, current.version)?;
                rows.remove(&key).ok_or(BridgeError::NotFound {
                    entity_type,
                    entity_id,
                })
            }
        }
    }

    async fn read_raw_row(
        &self,
        entity_type: &str,
        entity_id: &EntityId,
    ) -> Result<Option<EntityRow>, BridgeError> {
        Ok(self
            .lock_rows()?
            .get(&(entity_type.to_string(), entity_id.clone()))
            .cloned())
    }

    async fn list_rows(&self, entity_type: &str) -> Result<Vec<EntityRow>, BridgeError> {
        Ok(self
            .lock_rows()?
            .iter()
            .filter(|((ty, _), _)| ty == entity_type)
            .map(|(_, row)| row.clone())
            .collect())
    }
}
