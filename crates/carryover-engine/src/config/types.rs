//! Job file model.

use std::path::PathBuf;

use carryover_types::cursor::CursorMode;
use carryover_types::job::FieldMapping;
use serde::{Deserialize, Serialize};

use crate::checkpoint::StalePolicy;
use crate::matcher::{DEFAULT_SCORE_WEIGHT, DEFAULT_THRESHOLD};
use crate::readiness::checks::DEFAULT_NULL_RATE_THRESHOLD;
use crate::runner::DEFAULT_BATCH_SIZE;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobConfig {
    pub version: String,
    pub job: JobSection,
    #[serde(default)]
    pub matching: MatchingConfig,
    pub source: SourceConfig,
    pub target: TargetConfig,
    pub state: StateConfig,
    #[serde(default)]
    pub readiness: ReadinessConfig,
    #[serde(default)]
    pub checkpoint: CheckpointConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobSection {
    /// Fixed job id. Generated per run when absent.
    #[serde(default)]
    pub id: Option<String>,
    pub entity_type: String,
    /// Fingerprint of the transform logic; checkpoints written under a
    /// different value are stale.
    pub transform_version: String,
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
    #[serde(default)]
    pub field_mappings: Vec<FieldMapping>,
}

fn default_batch_size() -> usize {
    DEFAULT_BATCH_SIZE
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MatchingConfig {
    #[serde(default)]
    pub key_fields: Vec<String>,
    #[serde(default)]
    pub fuzzy_field: Option<String>,
    #[serde(default = "default_threshold")]
    pub threshold: f64,
    #[serde(default = "default_score_weight")]
    pub score_weight: f64,
    #[serde(default)]
    pub min_score: f64,
}

fn default_threshold() -> f64 {
    DEFAULT_THRESHOLD
}
fn default_score_weight() -> f64 {
    DEFAULT_SCORE_WEIGHT
}

impl Default for MatchingConfig {
    fn default() -> Self {
        Self {
            key_fields: Vec::new(),
            fuzzy_field: None,
            threshold: default_threshold(),
            score_weight: default_score_weight(),
            min_score: 0.0,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SourceKind {
    Jsonl,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SourceConfig {
    pub kind: SourceKind,
    pub path: PathBuf,
    pub id_field: String,
    #[serde(default)]
    pub cursor: CursorMode,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TargetConfig {
    pub path: PathBuf,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StateConfig {
    pub path: PathBuf,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReadinessConfig {
    #[serde(default)]
    pub fail_on_warnings: bool,
    #[serde(default = "default_null_rate_threshold")]
    pub null_rate_threshold: f64,
    #[serde(default = "default_sample_size")]
    pub sample_size: usize,
}

fn default_null_rate_threshold() -> f64 {
    DEFAULT_NULL_RATE_THRESHOLD
}
fn default_sample_size() -> usize {
    200
}

impl Default for ReadinessConfig {
    fn default() -> Self {
        Self {
            fail_on_warnings: false,
            null_rate_threshold: default_null_rate_threshold(),
            sample_size: default_sample_size(),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CheckpointConfig {
    #[serde(default)]
    pub on_stale: StalePolicy,
}
