//! State and bridge error types.

use carryover_types::entity::EntityId;

/// Errors produced by [`MigrationStore`](crate::MigrationStore) operations.
#[derive(Debug, thiserror::Error)]
pub enum StateError {
    /// Underlying `SQLite` failure.
    #[error("sqlite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    /// `SQLite` failure with the operation that triggered it.
    #[error("{context}: {source}")]
    Backend {
        context: &'static str,
        #[source]
        source: rusqlite::Error,
    },

    /// File-system I/O failure (e.g. creating the database directory).
    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),

    /// A JSON column could not be encoded or decoded.
    #[error("serialization error: {0}")]
    Serde(#[from] serde_json::Error),

    /// A stored value is not one this crate wrote.
    #[error("corrupt row: {0}")]
    Corrupt(String),

    /// Internal mutex was poisoned by a panicked thread.
    #[error("state backend lock poisoned")]
    LockPoisoned,
}

impl StateError {
    pub(crate) fn backend(source: rusqlite::Error) -> Self {
        Self::Sqlite(source)
    }

    pub(crate) fn backend_context(context: &'static str, source: rusqlite::Error) -> Self {
        Self::Backend { context, source }
    }
}

/// Convenience alias used throughout this crate.
pub type Result<T> = std::result::Result<T, StateError>;

/// Errors produced by [`CrudBridge`](crate::CrudBridge) implementations.
#[derive(Debug, thiserror::Error)]
pub enum BridgeError {
    #[error("{entity_type} '{entity_id}' not found")]
    NotFound {
        entity_type: String,
        entity_id: EntityId,
    },

    /// Optimistic-lock check failed: someone else wrote the row.
    #[error("version conflict on '{entity_id}': expected {expected}, found {actual}")]
    VersionConflict {
        entity_id: EntityId,
        expected: u64,
        actual: u64,
    },

    #[error("{entity_type} '{entity_id}' already exists")]
    AlreadyExists {
        entity_type: String,
        entity_id: EntityId,
    },

    /// Malformed request (missing id, missing version, mismatched type).
    #[error("invalid mutate request: {0}")]
    InvalidAction(String),

    #[error("entity store backend error: {0}")]
    Backend(String),
}

impl BridgeError {
    #[must_use]
    pub fn is_version_conflict(&self) -> bool {
        matches!(self, Self::VersionConflict { .. })
    }
}

impl From<StateError> for BridgeError {
    fn from(err: StateError) -> Self {
        Self::Backend(err.to_string())
    }
}

impl From<rusqlite::Error> for BridgeError {
    fn from(err: rusqlite::Error) -> Self {
        Self::Backend(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sqlite_error_displays_context() {
        let inner = rusqlite::Error::SqliteFailure(
            rusqlite::ffi::Error::new(1),
            Some("table not found".into()),
        );
        let err = StateError::Sqlite(inner);
        let msg = err.to_string();
        assert!(msg.contains("sqlite"), "got: {msg}");
    }

    #[test]
    fn backend_context_prefixes_operation() {
        let err = StateError::backend_context(
            "insert_lineage: execute",
            rusqlite::Error::QueryReturnedNoRows,
        );
        assert!(err.to_string().starts_with("insert_lineage: execute"));
    }

    #[test]
    fn lock_poisoned_displays() {
        let err = StateError::LockPoisoned;
        assert_eq!(err.to_string(), "state backend lock poisoned");
    }

    #[test]
    fn version_conflict_displays_both_versions() {
        let err = BridgeError::VersionConflict {
            entity_id: EntityId::new("c-1"),
            expected: 2,
            actual: 3,
        };
        assert!(err.is_version_conflict());
        let msg = err.to_string();
        assert!(msg.contains("expected 2"));
        assert!(msg.contains("found 3"));
    }
}
