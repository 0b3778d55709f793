//! Legacy record sources.
//!
//! Extraction is opaque to the engine: a [`RecordSource`] hands back batches
//! of [`LegacyRecord`]s starting at a cursor.

use std::path::PathBuf;

use anyhow::Context;
use async_trait::async_trait;
use carryover_types::cursor::{Cursor, CursorMode};
use serde_json::{Map, Value};

use crate::errors::EngineError;

/// One record read from the legacy system.
#[derive(Debug, Clone, PartialEq)]
pub struct LegacyRecord {
    /// Stable legacy identifier, used as the lineage reference.
    pub id: String,
    pub fields: Map<String, Value>,
}

impl LegacyRecord {
    #[must_use]
    pub fn new(id: impl Into<String>, fields: Map<String, Value>) -> Self {
        Self {
            id: id.into(),
            fields,
        }
    }

    /// Field rendered as text. Strings are returned as-is, numbers and
    /// booleans in JSON form; null, missing, and blank values are `None`.
    #[must_use]
    pub fn text(&self, field: &str) -> Option<String> {
        value_text(self.fields.get(field)?)
    }
}

/// Text form of a scalar JSON value, `None` for null or blank.
pub(crate) fn value_text(value: &Value) -> Option<String> {
    match value {
        Value::Null => None,
        Value::String(s) if s.trim().is_empty() => None,
        Value::String(s) => Some(s.clone()),
        other => Some(other.to_string()),
    }
}

/// Producer of legacy record batches.
#[async_trait]
pub trait RecordSource: Send + Sync {
    /// How this source addresses batch positions.
    fn cursor_mode(&self) -> CursorMode;

    /// Up to `limit` records starting at `cursor` (`None` = the beginning).
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::Source`] if the records can't be read or the
    /// cursor does not belong to this source.
    async fn fetch(
        &self,
        cursor: Option<&Cursor>,
        limit: usize,
    ) -> Result<Vec<LegacyRecord>, EngineError>;
}

/// Slice an ordered record list by cursor.
fn page(
    records: &[LegacyRecord],
    mode: CursorMode,
    cursor: Option<&Cursor>,
    limit: usize,
) -> Result<Vec<LegacyRecord>, EngineError> {
    let start = match cursor {
        None => 0,
        Some(cursor) if cursor.mode() != mode => {
            return Err(EngineError::Source(format!(
                "cursor {cursor} does not match source cursor mode {mode:?}"
            )));
        }
        Some(Cursor::Offset { offset }) => usize::try_from(*offset).unwrap_or(usize::MAX),
        Some(Cursor::Id { last_id }) => records
            .iter()
            .position(|r| &r.id == last_id)
            .map(|pos| pos + 1)
            .ok_or_else(|| {
                EngineError::Source(format!("cursor id '{last_id}' not present in source"))
            })?,
    };
    Ok(records.iter().skip(start).take(limit).cloned().collect())
}

/// In-memory source over a fixed record list.
#[derive(Debug, Clone)]
pub struct VecSource {
    records: Vec<LegacyRecord>,
    mode: CursorMode,
}

impl VecSource {
    #[must_use]
    pub fn new(records: Vec<LegacyRecord>, mode: CursorMode) -> Self {
        Self { records, mode }
    }
}

#[async_trait]
impl RecordSource for VecSource {
    fn cursor_mode(&self) -> CursorMode {
        self.mode
    }

    async fn fetch(
        &self,
        cursor: Option<&Cursor>,
        limit: usize,
    ) -> Result<Vec<LegacyRecord>, EngineError> {
        page(&self.records, self.mode, cursor, limit)
    }
}

/// JSON-lines file source. Each non-blank line is one object; `id_field`
/// names the legacy identifier.
#[derive(Debug, Clone)]
pub struct JsonlSource {
    path: PathBuf,
    id_field: String,
    mode: CursorMode,
}

impl JsonlSource {
    #[must_use]
    pub fn new(path: impl Into<PathBuf>, id_field: impl Into<String>, mode: CursorMode) -> Self {
        Self {
            path: path.into(),
            id_field: id_field.into(),
            mode,
        }
    }

    async fn read_all(&self) -> Result<Vec<LegacyRecord>, EngineError> {
        let raw = tokio::fs::read_to_string(&self.path)
            .await
            .with_context(|| format!("Failed to read source file: {}", self.path.display()))?;
        raw.lines()
            .enumerate()
            .filter(|(_, line)| !line.trim().is_empty())
            .map(|(n, line)| self.parse_line(n + 1, line))
            .collect()
    }

    fn parse_line(&self, line_no: usize, line: &str) -> Result<LegacyRecord, EngineError> {
        let fields = match serde_json::from_str::<Value>(line) {
            Ok(Value::Object(fields)) => fields,
            Ok(_) => {
                return Err(EngineError::Source(format!(
                    "{}:{line_no}: expected a JSON object",
                    self.path.display()
                )))
            }
            Err(e) => {
                return Err(EngineError::Source(format!(
                    "{}:{line_no}: {e}",
                    self.path.display()
                )))
            }
        };
        let id = fields
            .get(&self.id_field)
            .and_then(value_text)
            .ok_or_else(|| {
                EngineError::Source(format!(
                    "{}:{line_no}: missing id field '{}'",
                    self.path.display(),
                    self.id_field
                ))
            })?;
        Ok(LegacyRecord::new(id, fields))
    }
}

#[async_trait]
impl RecordSource for JsonlSource {
    fn cursor_mode(&self) -> CursorMode {
        self.mode
    }

    async fn fetch(
        &self,
        cursor: Option<&Cursor>,
        limit: usize,
    ) -> Result<Vec<LegacyRecord>, EngineError> {
        let records = self.read_all().await?;
        page(&records, self.mode, cursor, limit)
    }
}
