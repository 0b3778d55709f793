//! Target entity store contract.
//!
//! [`CrudBridge`] is the only write path into the target store. Every
//! update and delete carries the version the caller last observed; a
//! mismatch surfaces as [`BridgeError::VersionConflict`] instead of
//! overwriting a concurrent change.

use async_trait::async_trait;
use carryover_types::entity::{ActionVerb, EntityId, EntityRow, MutateRequest};

use crate::error::BridgeError;

/// Versioned CRUD access to the target entity store.
#[async_trait]
pub trait CrudBridge: Send + Sync {
    /// Apply a create, update, or delete and return the affected row.
    ///
    /// Update replaces the row's core and `customData` fields with the
    /// request input and bumps the version. Delete returns the removed row.
    ///
    /// # Errors
    ///
    /// Returns [`BridgeError::VersionConflict`] when `expected_version` does
    /// not match, [`BridgeError::NotFound`] for unknown ids, and
    /// [`BridgeError::InvalidAction`] for malformed requests.
    async fn mutate(&self, request: MutateRequest) -> Result<EntityRow, BridgeError>;

    /// Read the current row, or `None` when it does not exist.
    ///
    /// # Errors
    ///
    /// Returns [`BridgeError::Backend`] on storage failure.
    async fn read_raw_row(
        &self,
        entity_type: &str,
        entity_id: &EntityId,
    ) -> Result<Option<EntityRow>, BridgeError>;

    /// All current rows of an entity type, ordered by id.
    ///
    /// # Errors
    ///
    /// Returns [`BridgeError::Backend`] on storage failure.
    async fn list_rows(&self, entity_type: &str) -> Result<Vec<EntityRow>, BridgeError>;
}

/// Checked view of a mutate request.
pub(crate) struct ValidatedMutation<'a> {
    pub verb: ActionVerb,
    pub entity_id: Option<&'a EntityId>,
    pub expected_version: Option<u64>,
}

/// Reject requests whose shape does not fit their verb.
pub(crate) fn validate_request(request: &MutateRequest) -> Result<ValidatedMutation<'_>, BridgeError> {
    if request.action_type.entity_type != request.entity_type {
        return Err(BridgeError::InvalidAction(format!(
            "action type '{}' does not match entity type '{}'",
            request.action_type, request.entity_type
        )));
    }
    let verb = request.verb();
    match verb {
        ActionVerb::Create => {}
        ActionVerb::Update | ActionVerb::Delete => {
            if request.entity_id.is_none() {
                return Err(BridgeError::InvalidAction(format!(
                    "{} requires an entity id",
                    request.action_type
                )));
            }
            if request.expected_version.is_none() {
                return Err(BridgeError::InvalidAction(format!(
                    "{} requires an expected version",
                    request.action_type
                )));
            }
        }
    }
    Ok(ValidatedMutation {
        verb,
        entity_id: request.entity_id.as_ref(),
        expected_version: request.expected_version,
    })
}

/// Compare an expected version against the stored one.
pub(crate) fn check_version(
    entity_id: &EntityId,
    expected: Option<u64>,
    actual: u64,
) -> Result<(), BridgeError> {
    match expected {
        Some(expected) if expected != actual => Err(BridgeError::VersionConflict {
            entity_id: entity_id.clone(),
            expected,
            actual,
        }),
        _ => Ok(()),
    }
}
