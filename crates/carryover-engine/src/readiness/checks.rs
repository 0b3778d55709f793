//! Built-in readiness checks.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use async_trait::async_trait;
use carryover_types::entity::CUSTOM_DATA_KEY;
use carryover_types::job::MigrationJob;
use carryover_types::readiness::{CheckOutcome, Severity};
use serde_json::json;

use super::ReadinessCheck;
use crate::errors::EngineError;
use crate::source::RecordSource;

pub const DEFAULT_NULL_RATE_THRESHOLD: f64 = 0.4;

// ---------------------------------------------------------------------------
// Mapping completeness
// ---------------------------------------------------------------------------

/// Fails with error severity when the job maps no fields at all.
#[derive(Debug, Clone, Copy, Default)]
pub struct MappingCompletenessCheck;

#[async_trait]
impl ReadinessCheck for MappingCompletenessCheck {
    fn name(&self) -> &str {
        "mapping_completeness"
    }

    async fn check(&self, job: &MigrationJob) -> CheckOutcome {
        let count = job.field_mappings.len();
        if count == 0 {
            return CheckOutcome::fail(
                Severity::Error,
                format!("No field mappings configured for {}", job.entity_type),
            );
        }
        CheckOutcome::pass(Severity::Info, format!("{count} field mapping(s) configured"))
            .with_details(json!({ "mapped_fields": count }))
    }
}

// ---------------------------------------------------------------------------
// Duplicate mapping targets
// ---------------------------------------------------------------------------

/// Fails with error severity when two mappings write the same target field.
/// Core and `customData` fields are separate namespaces.
#[derive(Debug, Clone, Copy, Default)]
pub struct DuplicateTargetCheck;

#[async_trait]
impl ReadinessCheck for DuplicateTargetCheck {
    fn name(&self) -> &str {
        "duplicate_mapping_targets"
    }

    async fn check(&self, job: &MigrationJob) -> CheckOutcome {
        let mut seen = BTreeSet::new();
        let mut duplicates = BTreeSet::new();
        for mapping in &job.field_mappings {
            let target = if mapping.custom {
                format!("{CUSTOM_DATA_KEY}.{}", mapping.target)
            } else {
                mapping.target.clone()
            };
            if !seen.insert(target.clone()) {
                duplicates.insert(target);
            }
        }
        if duplicates.is_empty() {
            return CheckOutcome::pass(Severity::Info, "Every target field is mapped once");
        }
        let list: Vec<String> = duplicates.into_iter().collect();
        CheckOutcome::fail(
            Severity::Error,
            format!("Target fields mapped more than once: {}", list.join(", ")),
        )
        .with_details(json!({ "duplicates": list }))
    }
}

// ---------------------------------------------------------------------------
// Match-key null rate
// ---------------------------------------------------------------------------

/// Estimates the null rate (0..=1) of each match key for a job.
#[async_trait]
pub trait NullRateSampler: Send + Sync {
    /// # Errors
    ///
    /// Returns an [`EngineError`] if the sample can't be taken.
    async fn sample(&self, job: &MigrationJob) -> Result<BTreeMap<String, f64>, EngineError>;
}

/// Warns when match keys are too often null to match on.
///
/// Non-fatal unless the gate runs with `fail_on_warnings`.
pub struct MatchKeyNullRateCheck {
    sampler: Arc<dyn NullRateSampler>,
    threshold: f64,
}

impl MatchKeyNullRateCheck {
    #[must_use]
    pub fn new(sampler: Arc<dyn NullRateSampler>) -> Self {
        Self {
            sampler,
            threshold: DEFAULT_NULL_RATE_THRESHOLD,
        }
    }

    #[must_use]
    pub fn with_threshold(mut self, threshold: f64) -> Self {
        self.threshold = threshold;
        self
    }
}

fn percent(rate: f64) -> String {
    format!("{:.0}%", rate * 100.0)
}

#[async_trait]
impl ReadinessCheck for MatchKeyNullRateCheck {
    fn name(&self) -> &str {
        "match_key_null_rate"
    }

    async fn check(&self, job: &MigrationJob) -> CheckOutcome {
        let rates = match self.sampler.sample(job).await {
            Ok(rates) => rates,
            Err(err) => {
                return CheckOutcome::fail(
                    Severity::Warning,
                    format!("Null-rate sampling failed: {err}"),
                )
                .with_details(json!({ "error": err.to_string() }));
            }
        };

        let over: Vec<String> = rates
            .iter()
            .filter(|(_, rate)| **rate > self.threshold)
            .map(|(key, rate)| format!("{key}={}", percent(*rate)))
            .collect();

        if over.is_empty() {
            return CheckOutcome::pass(
                Severity::Info,
                format!(
                    "All match keys within null-rate threshold of {}",
                    percent(self.threshold)
                ),
            )
            .with_details(json!(rates));
        }
        CheckOutcome::fail(
            Severity::Warning,
            format!(
                "Match keys exceed null-rate threshold of {}: {}",
                percent(self.threshold),
                over.join(", ")
            ),
        )
        .with_details(json!({ "null_rates": rates, "threshold": self.threshold }))
    }
}

/// Samples the first records of a [`RecordSource`] and measures how often
/// each match key's source field is missing, null, or blank.
pub struct SourceNullRateSampler {
    source: Arc<dyn RecordSource>,
    /// Match key name to the legacy field that feeds it.
    keys: BTreeMap<String, String>,
    sample_size: usize,
}

impl SourceNullRateSampler {
    #[must_use]
    pub fn new(
        source: Arc<dyn RecordSource>,
        keys: BTreeMap<String, String>,
        sample_size: usize,
    ) -> Self {
        Self {
            source,
            keys,
            sample_size,
        }
    }
}

#[async_trait]
impl NullRateSampler for SourceNullRateSampler {
    #[allow(clippy::cast_precision_loss)]
    async fn sample(&self, _job: &MigrationJob) -> Result<BTreeMap<String, f64>, EngineError> {
        let records = self.source.fetch(None, self.sample_size).await?;
        let total = records.len();
        Ok(self
            .keys
            .iter()
            .map(|(key, field)| {
                let rate = if total == 0 {
                    0.0
                } else {
                    let nulls = records.iter().filter(|r| r.text(field).is_none()).count();
                    nulls as f64 / total as f64
                };
                (key.clone(), rate)
            })
            .collect())
    }
}
