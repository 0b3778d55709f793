//! Checkpoint resume, advancement, and staleness rules.
//!
//! [`StepCheckpoint`] itself is plain data. The runner applies these rules:
//! a checkpoint with `loaded_up_to = k` resumes at record `k + 1` of the
//! current batch; a completed batch bumps `batch_index`, resets in-batch
//! progress, and moves the cursor past the batch.

use carryover_state::MigrationStore;
use carryover_types::checkpoint::StepCheckpoint;
use carryover_types::cursor::{Cursor, CursorMode};
use carryover_types::job::JobId;
use serde::{Deserialize, Serialize};

use crate::errors::EngineError;

/// Step name under which the runner persists its checkpoint.
pub const LOAD_STEP: &str = "load";

/// Index of the next record to process given `loaded_up_to = k`.
#[must_use]
pub fn resume_index(loaded_up_to: u64) -> u64 {
    loaded_up_to.saturating_add(1)
}

/// Records still to process in a batch of `total` given `loaded_up_to = k`.
#[must_use]
pub fn remaining_records(total: u64, loaded_up_to: u64) -> u64 {
    total.saturating_sub(resume_index(loaded_up_to))
}

/// First record of the current batch that has not been processed yet.
#[must_use]
pub fn next_record_index(checkpoint: &StepCheckpoint) -> u64 {
    if checkpoint.batch_in_progress {
        resume_index(checkpoint.loaded_up_to)
    } else {
        0
    }
}

/// Mark record `index` of the current batch as durable.
///
/// Progress never moves backwards; returns `false` when `index` is already
/// covered.
pub fn record_progress(checkpoint: &mut StepCheckpoint, index: u64) -> bool {
    if checkpoint.batch_in_progress && index <= checkpoint.loaded_up_to {
        return false;
    }
    checkpoint.loaded_up_to = index;
    checkpoint.batch_in_progress = true;
    true
}

/// Checkpoint for the batch after a completed one.
///
/// `processed` is the full size of the finished batch and `last_id` the id
/// of its final record. A null cursor becomes the first concrete cursor of
/// `mode`.
#[must_use]
pub fn advance_batch(
    checkpoint: &StepCheckpoint,
    mode: CursorMode,
    processed: u64,
    last_id: Option<&str>,
) -> StepCheckpoint {
    let cursor = match mode {
        CursorMode::Offset => {
            let base = match &checkpoint.cursor {
                Some(Cursor::Offset { offset }) => *offset,
                _ => 0,
            };
            Some(Cursor::Offset {
                offset: base.saturating_add(processed),
            })
        }
        CursorMode::Id => match last_id {
            Some(id) => Some(Cursor::Id {
                last_id: id.to_string(),
            }),
            None => checkpoint.cursor.clone(),
        },
    };
    StepCheckpoint {
        cursor,
        batch_index: checkpoint.batch_index.saturating_add(1),
        loaded_up_to: 0,
        batch_in_progress: false,
        transform_version: checkpoint.transform_version.clone(),
        plan_fingerprint: checkpoint.plan_fingerprint.clone(),
    }
}

/// Whether the checkpoint was written by different transform logic.
#[must_use]
pub fn is_stale(checkpoint: &StepCheckpoint, active_version: &str) -> bool {
    checkpoint.transform_version != active_version
}

/// What to do when resuming from a stale checkpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StalePolicy {
    /// Refuse to resume.
    #[default]
    Fail,
    /// Redo the current batch from its first record under the new version.
    RestartBatch,
}

/// Apply `policy` to a loaded checkpoint before resuming.
///
/// # Errors
///
/// Returns [`EngineError::StaleCheckpoint`] when the checkpoint is stale and
/// the policy is [`StalePolicy::Fail`].
pub fn reconcile(
    job_id: &JobId,
    checkpoint: StepCheckpoint,
    active_version: &str,
    policy: StalePolicy,
) -> Result<StepCheckpoint, EngineError> {
    if !is_stale(&checkpoint, active_version) {
        return Ok(checkpoint);
    }
    match policy {
        StalePolicy::Fail => Err(EngineError::StaleCheckpoint {
            job_id: job_id.clone(),
            checkpoint_version: checkpoint.transform_version,
            active_version: active_version.to_string(),
        }),
        StalePolicy::RestartBatch => {
            tracing::warn!(
                job_id = job_id.as_str(),
                from = checkpoint.transform_version,
                to = active_version,
                batch_index = checkpoint.batch_index,
                "Stale checkpoint: restarting current batch under new transform version"
            );
            Ok(StepCheckpoint {
                loaded_up_to: 0,
                batch_in_progress: false,
                transform_version: active_version.to_string(),
                ..checkpoint
            })
        }
    }
}

/// Load the persisted checkpoint for `step`, or a fresh one.
///
/// # Errors
///
/// Returns [`EngineError::State`] on storage failure.
pub fn load_or_initial(
    store: &dyn MigrationStore,
    job_id: &JobId,
    step: &str,
    transform_version: &str,
) -> Result<StepCheckpoint, EngineError> {
    Ok(store
        .get_checkpoint(job_id, step)?
        .unwrap_or_else(|| StepCheckpoint::initial(transform_version)))
}
