//! Readiness check outcomes and reports.
//!
//! Checks never throw: every outcome is a structured [`CheckOutcome`] whose
//! [`Severity`] decides whether a failure blocks the job.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::job::JobId;

/// How much a failed check matters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    /// Always blocks the job.
    Error,
    /// Blocks only when the gate is configured with `fail_on_warnings`.
    Warning,
    /// Never blocks.
    Info,
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Error => "error",
            Self::Warning => "warning",
            Self::Info => "info",
        };
        f.write_str(s)
    }
}

/// Result of running a single readiness check.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CheckOutcome {
    pub passed: bool,
    pub severity: Severity,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub details: Option<serde_json::Value>,
}

impl CheckOutcome {
    #[must_use]
    pub fn pass(severity: Severity, message: impl Into<String>) -> Self {
        Self {
            passed: true,
            severity,
            message: message.into(),
            details: None,
        }
    }

    #[must_use]
    pub fn fail(severity: Severity, message: impl Into<String>) -> Self {
        Self {
            passed: false,
            severity,
            message: message.into(),
            details: None,
        }
    }

    #[must_use]
    pub fn with_details(mut self, details: serde_json::Value) -> Self {
        self.details = Some(details);
        self
    }
}

/// A check outcome labelled with the check's name.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NamedCheckResult {
    pub name: String,
    #[serde(flatten)]
    pub outcome: CheckOutcome,
}

/// Full result of one gate evaluation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReadinessReport {
    pub timestamp: DateTime<Utc>,
    pub job_id: JobId,
    pub entity_type: String,
    pub results: Vec<NamedCheckResult>,
    pub passed_count: usize,
    pub failed_count: usize,
    /// Failed checks with error severity.
    pub error_count: usize,
    /// Failed checks with warning severity.
    pub warning_count: usize,
    /// Failed checks with info severity.
    pub info_count: usize,
    pub overall_passed: bool,
}

impl ReadinessReport {
    /// Names of failed checks with the given severity, in report order.
    #[must_use]
    pub fn failing_names(&self, severity: Severity) -> Vec<&str> {
        self.results
            .iter()
            .filter(|r| !r.outcome.passed && r.outcome.severity == severity)
            .map(|r| r.name.as_str())
            .collect()
    }
}

/// Verdict returned by a preflight gate.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GateDecision {
    pub passed: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

impl GateDecision {
    #[must_use]
    pub fn pass() -> Self {
        Self {
            passed: true,
            reason: None,
        }
    }

    #[must_use]
    pub fn block(reason: impl Into<String>) -> Self {
        Self {
            passed: false,
            reason: Some(reason.into()),
        }
    }
}
