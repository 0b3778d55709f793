//! Step checkpoint type.
//!
//! [`StepCheckpoint`] records how far one pipeline step got, precisely
//! enough to resume after a crash. Construction and advancement rules live
//! with the runner in `carryover-engine`; this type only carries the data.

use serde::{Deserialize, Serialize};

use crate::cursor::Cursor;

/// Resumable position within one pipeline step.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StepCheckpoint {
    /// Start position of the current batch. `None` before the first batch.
    pub cursor: Option<Cursor>,
    /// Zero-based index of the current batch. Only ever increases.
    pub batch_index: u64,
    /// Index of the last successfully processed record within the current
    /// batch. Meaningful only while `batch_in_progress` is set.
    pub loaded_up_to: u64,
    /// Whether any record of the current batch has been processed.
    #[serde(default)]
    pub batch_in_progress: bool,
    /// Fingerprint of the transform logic that produced this checkpoint.
    pub transform_version: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub plan_fingerprint: Option<String>,
}

impl StepCheckpoint {
    /// Checkpoint for a step that has not read anything yet.
    #[must_use]
    pub fn initial(transform_version: impl Into<String>) -> Self {
        Self {
            cursor: None,
            batch_index: 0,
            loaded_up_to: 0,
            batch_in_progress: false,
            transform_version: transform_version.into(),
            plan_fingerprint: None,
        }
    }

    #[must_use]
    pub fn with_plan_fingerprint(mut self, fingerprint: impl Into<String>) -> Self {
        self.plan_fingerprint = Some(fingerprint.into());
        self
    }
}
