//! Semantic validation for parsed job configuration values.

use std::collections::BTreeSet;

use anyhow::{bail, Result};

use crate::config::types::{JobConfig, MatchingConfig};

fn validate_matching(matching: &MatchingConfig, errors: &mut Vec<String>) {
    if !(0.0..=1.0).contains(&matching.threshold) {
        errors.push(format!(
            "matching.threshold must be within [0, 1], got {}",
            matching.threshold
        ));
    }
    if !(matching.score_weight.is_finite() && matching.score_weight > 0.0) {
        errors.push(format!(
            "matching.score_weight must be > 0, got {}",
            matching.score_weight
        ));
    }
    if !(matching.min_score >= 0.0 && matching.min_score <= matching.score_weight) {
        errors.push(format!(
            "matching.min_score must be within [0, score_weight], got {}",
            matching.min_score
        ));
    }
    let mut seen = BTreeSet::new();
    for key in &matching.key_fields {
        if key.trim().is_empty() {
            errors.push("matching.key_fields contains an empty field name".to_string());
        } else if !seen.insert(key.as_str()) {
            errors.push(format!("matching.key_fields lists '{key}' more than once"));
        }
    }
    if matching
        .fuzzy_field
        .as_deref()
        .is_some_and(|f| f.trim().is_empty())
    {
        errors.push("matching.fuzzy_field must not be empty when set".to_string());
    }
}

/// Validate a parsed job configuration.
/// Returns `Ok(())` if valid, Err with all validation errors if not.
///
/// # Errors
///
/// Returns an error listing all validation failures found in the job config.
pub fn validate_job(config: &JobConfig) -> Result<()> {
    let mut errors = Vec::new();

    if config.version != "1.0" {
        errors.push(format!(
            "Unsupported job version '{}', expected '1.0'",
            config.version
        ));
    }

    let job = &config.job;
    if job.id.as_deref().is_some_and(|id| id.trim().is_empty()) {
        errors.push("job.id must not be empty when set".to_string());
    }
    if job.entity_type.trim().is_empty() {
        errors.push("job.entity_type must not be empty".to_string());
    }
    if job.transform_version.trim().is_empty() {
        errors.push("job.transform_version must not be empty".to_string());
    }
    if job.batch_size == 0 {
        errors.push("job.batch_size must be at least 1".to_string());
    }
    for (i, mapping) in job.field_mappings.iter().enumerate() {
        if mapping.source.trim().is_empty() {
            errors.push(format!("field_mappings[{i}] has an empty source"));
        }
        if mapping.target.trim().is_empty() {
            errors.push(format!("field_mappings[{i}] has an empty target"));
        }
    }

    validate_matching(&config.matching, &mut errors);

    if config.source.path.as_os_str().is_empty() {
        errors.push("source.path must not be empty".to_string());
    }
    if config.source.id_field.trim().is_empty() {
        errors.push("source.id_field must not be empty".to_string());
    }
    if config.target.path.as_os_str().is_empty() {
        errors.push("target.path must not be empty".to_string());
    }
    if config.state.path.as_os_str().is_empty() {
        errors.push("state.path must not be empty".to_string());
    }

    if !(0.0..=1.0).contains(&config.readiness.null_rate_threshold) {
        errors.push(format!(
            "readiness.null_rate_threshold must be within [0, 1], got {}",
            config.readiness.null_rate_threshold
        ));
    }
    if config.readiness.sample_size == 0 {
        errors.push("readiness.sample_size must be at least 1".to_string());
    }

    if errors.is_empty() {
        Ok(())
    } else {
        bail!("Job validation failed:\n  - {}", errors.join("\n  - "));
    }
}
