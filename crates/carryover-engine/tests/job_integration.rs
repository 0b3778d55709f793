//! Integration tests for job parsing, validation, and the orchestrator
//! entry points, using real fixture files.

use std::path::{Path, PathBuf};

use carryover_engine::config::parser;
use carryover_engine::config::types::{JobConfig, SourceKind};
use carryover_engine::config::validator;
use carryover_engine::{check_job, job_status, rollback_job, run_job, EngineError};
use carryover_types::cursor::CursorMode;
use carryover_types::job::{FieldMapping, JobStatus};

fn fixture(relative: &str) -> PathBuf {
    Path::new(env!("CARGO_MANIFEST_DIR"))
        .parent()
        .unwrap()
        .parent()
        .unwrap()
        .join("tests/fixtures")
        .join(relative)
}

/// Parse the customer job fixture with its stores redirected into `dir`.
fn customer_job(dir: &Path) -> JobConfig {
    // Every test sets the same value, so concurrent tests never disagree.
    std::env::set_var("CO_JOB_WORK_DIR", "/var/lib/carryover");
    let mut config =
        parser::parse_job(&fixture("jobs/customers.yaml")).expect("Failed to parse fixture job");
    config.target.path = dir.join("target.db");
    config.state.path = dir.join("state.db");
    config
}

/// Test parsing and validating a well-formed job fixture.
#[test]
fn test_parse_and_validate_fixture_job() {
    let dir = tempfile::tempdir().unwrap();
    let config = customer_job(dir.path());

    assert_eq!(config.job.entity_type, "customer");
    assert_eq!(config.job.batch_size, 2);
    assert_eq!(config.job.field_mappings.len(), 4);
    assert_eq!(
        config.job.field_mappings[3],
        FieldMapping::custom("loyalty_tier", "tier")
    );
    assert_eq!(config.source.kind, SourceKind::Jsonl);
    assert_eq!(config.source.cursor, CursorMode::Offset);
    assert!(config.source.path.ends_with("legacy/customers.jsonl"));
    assert!(config.source.path.exists());

    validator::validate_job(&config).expect("Validation should pass");
}

/// Test that the invalid fixture reports every problem at once.
#[test]
fn test_parse_and_validate_invalid_fixture() {
    let config = parser::parse_job(&fixture("jobs/invalid_job.yaml")).unwrap();
    let err = validator::validate_job(&config).unwrap_err().to_string();
    for expected in [
        "Unsupported job version '2.0'",
        "job.entity_type must not be empty",
        "job.batch_size must be at least 1",
        "field_mappings[0] has an empty source",
        "matching.threshold must be within [0, 1]",
        "matching.min_score must be within [0, score_weight]",
        "source.id_field must not be empty",
        "readiness.null_rate_threshold must be within [0, 1]",
    ] {
        assert!(err.contains(expected), "missing '{expected}' in: {err}");
    }
}

#[tokio::test]
async fn test_check_warns_on_sparse_match_key_without_blocking() {
    let dir = tempfile::tempdir().unwrap();
    let mut config = customer_job(dir.path());
    config.matching.key_fields.push("phone".into());

    let result = check_job(&config).await;
    assert!(result.passed());
    assert!(result.blocking.is_empty());
    assert_eq!(result.report.warning_count, 1);
    let null_rate = result
        .report
        .results
        .iter()
        .find(|r| r.name == "match_key_null_rate")
        .unwrap();
    assert!(null_rate.outcome.message.contains("phone=80%"));

    config.readiness.fail_on_warnings = true;
    let result = check_job(&config).await;
    assert!(!result.passed());
    assert_eq!(result.blocking, ["match_key_null_rate"]);
}

#[tokio::test]
async fn test_run_status_and_rollback_end_to_end() {
    let dir = tempfile::tempdir().unwrap();
    let config = customer_job(dir.path());

    let summary = run_job(&config, None).await.unwrap();
    assert_eq!(summary.batches, 3);
    assert_eq!(summary.created, 5);
    assert_eq!(summary.failed, 0);
    for stage in ["extract", "match", "write", "checkpoint"] {
        assert!(summary.perf.contains_key(stage), "missing stage {stage}");
    }

    let status = job_status(&config, &summary.job_id).unwrap();
    assert_eq!(status.job.status, JobStatus::Completed);
    assert_eq!(status.lineage.committed, 5);
    assert_eq!(status.checkpoint.unwrap().batch_index, 3);

    let err = run_job(&config, Some(&summary.job_id)).await.unwrap_err();
    assert!(matches!(err, EngineError::JobNotRunning { .. }));

    let result = rollback_job(&config, &summary.job_id).await.unwrap();
    assert_eq!(result.deleted_count, 5);
    assert!(result.is_clean());

    let status = job_status(&config, &summary.job_id).unwrap();
    assert_eq!(status.job.status, JobStatus::RolledBack);
    assert_eq!(status.lineage.committed, 0);

    let err = rollback_job(&config, &summary.job_id).await.unwrap_err();
    assert!(matches!(err, EngineError::AlreadyRolledBack(_)));
}

#[tokio::test]
async fn test_second_run_updates_instead_of_duplicating() {
    let dir = tempfile::tempdir().unwrap();
    let mut config = customer_job(dir.path());
    config.job.id = Some("first".into());
    let first = run_job(&config, None).await.unwrap();
    assert_eq!(first.created, 5);

    config.job.id = Some("second".into());
    let second = run_job(&config, None).await.unwrap();
    // Four rows match by email, the one without an email by fuzzy name.
    assert_eq!(second.updated, 5);
    assert_eq!(second.created, 0);

    let status = job_status(&config, &second.job_id).unwrap();
    assert_eq!(status.snapshots, 5);
}
