//! Cursor types for batch position tracking.
//!
//! A cursor marks where the next batch starts in the legacy source so a
//! job can resume after a crash. The null cursor (first batch, nothing read
//! yet) is represented as `Option::<Cursor>::None`.

use serde::{Deserialize, Serialize};

/// How a source addresses batch positions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CursorMode {
    /// Positional: skip `offset` records.
    #[default]
    Offset,
    /// Keyset: continue after the last-seen record id.
    Id,
}

/// Concrete cursor position.
///
/// JSON form: `{"type": "offset", "offset": 500}` or
/// `{"type": "id", "last_id": "cust-0042"}`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Cursor {
    /// Number of records already consumed from the start of the source.
    Offset { offset: u64 },
    /// Id of the last record consumed.
    Id { last_id: String },
}

impl Cursor {
    #[must_use]
    pub fn mode(&self) -> CursorMode {
        match self {
            Self::Offset { .. } => CursorMode::Offset,
            Self::Id { .. } => CursorMode::Id,
        }
    }
}

impl std::fmt::Display for Cursor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Offset { offset } => write!(f, "offset:{offset}"),
            Self::Id { last_id } => write!(f, "id:{last_id}"),
        }
    }
}
