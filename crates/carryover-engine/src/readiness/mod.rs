//! Preflight readiness gate.
//!
//! A [`ReadinessGate`] holds a list of [`ReadinessCheck`]s, runs them
//! concurrently against a job, and aggregates the outcomes into a
//! [`ReadinessReport`]. Error-severity failures always block the job;
//! warning-severity failures block only when the gate is built with
//! `fail_on_warnings`.

pub mod checks;

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;
use carryover_types::job::MigrationJob;
use carryover_types::readiness::{
    CheckOutcome, GateDecision, NamedCheckResult, ReadinessReport, Severity,
};
use chrono::Utc;
use tokio::task::JoinSet;

pub use checks::{
    DuplicateTargetCheck, MappingCompletenessCheck, MatchKeyNullRateCheck, NullRateSampler,
    SourceNullRateSampler,
};

/// Prefix of the reason returned when the gate blocks a job.
pub const FAILURE_REASON_PREFIX: &str = "Readiness checks failed: ";

/// One pluggable preflight check.
#[async_trait]
pub trait ReadinessCheck: Send + Sync {
    /// Stable name used in reports and failure reasons.
    fn name(&self) -> &str;

    /// Inspect the job. Never errors: problems are reported as a failed
    /// [`CheckOutcome`] with an appropriate severity.
    async fn check(&self, job: &MigrationJob) -> CheckOutcome;
}

/// Pass/block decision consulted before a job starts.
#[async_trait]
pub trait PreflightGate: Send + Sync {
    async fn check(&self, job: &MigrationJob) -> GateDecision;
}

/// Outcome of the most recent gate evaluation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GateState {
    NotRun,
    Passed,
    Failed,
}

/// Aggregating gate over registered readiness checks.
pub struct ReadinessGate {
    fail_on_warnings: bool,
    checks: Vec<Arc<dyn ReadinessCheck>>,
    last_report: Mutex<Option<ReadinessReport>>,
}

impl ReadinessGate {
    #[must_use]
    pub fn new(fail_on_warnings: bool) -> Self {
        Self {
            fail_on_warnings,
            checks: Vec::new(),
            last_report: Mutex::new(None),
        }
    }

    /// Register a check. Checks report in registration order.
    pub fn add_check(&mut self, check: Arc<dyn ReadinessCheck>) -> &mut Self {
        self.checks.push(check);
        self
    }

    #[must_use]
    pub fn with_check(mut self, check: impl ReadinessCheck + 'static) -> Self {
        self.checks.push(Arc::new(check));
        self
    }

    #[must_use]
    pub fn fail_on_warnings(&self) -> bool {
        self.fail_on_warnings
    }

    #[must_use]
    pub fn check_names(&self) -> Vec<&str> {
        self.checks.iter().map(|c| c.name()).collect()
    }

    fn lock_report(&self) -> MutexGuard<'_, Option<ReadinessReport>> {
        self.last_report
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    /// Run every check concurrently and build a fresh report.
    ///
    /// A check that panics is reported as an error-severity failure.
    pub async fn evaluate(&self, job: &MigrationJob) -> ReadinessReport {
        let job = Arc::new(job.clone());
        let mut join_set: JoinSet<(usize, NamedCheckResult)> = JoinSet::new();

        for (index, check) in self.checks.iter().enumerate() {
            let check = Arc::clone(check);
            let job = Arc::clone(&job);
            join_set.spawn(async move {
                let name = check.name().to_string();
                let outcome = match tokio::spawn(async move { check.check(&job).await }).await {
                    Ok(outcome) => outcome,
                    Err(join_err) => CheckOutcome::fail(
                        Severity::Error,
                        format!("check '{name}' did not complete: {join_err}"),
                    ),
                };
                (index, NamedCheckResult { name, outcome })
            });
        }

        let mut slots: Vec<Option<NamedCheckResult>> = vec![None; self.checks.len()];
        while let Some(joined) = join_set.join_next().await {
            match joined {
                Ok((index, result)) => slots[index] = Some(result),
                Err(join_err) => {
                    tracing::error!(job_id = job.id.as_str(), "Readiness task join error: {join_err}");
                }
            }
        }
        let results: Vec<NamedCheckResult> = slots
            .into_iter()
            .enumerate()
            .map(|(index, slot)| {
                slot.unwrap_or_else(|| NamedCheckResult {
                    name: self.checks[index].name().to_string(),
                    outcome: CheckOutcome::fail(Severity::Error, "check did not report"),
                })
            })
            .collect();

        let report = self.aggregate(&job, results);
        for result in report.results.iter().filter(|r| !r.outcome.passed) {
            tracing::warn!(
                job_id = report.job_id.as_str(),
                check = result.name,
                severity = %result.outcome.severity,
                "Readiness check failed: {}",
                result.outcome.message
            );
        }
        tracing::info!(
            job_id = report.job_id.as_str(),
            entity_type = report.entity_type,
            passed = report.passed_count,
            failed = report.failed_count,
            overall_passed = report.overall_passed,
            "Readiness gate evaluated"
        );

        *self.lock_report() = Some(report.clone());
        report
    }

    fn aggregate(&self, job: &MigrationJob, results: Vec<NamedCheckResult>) -> ReadinessReport {
        let failed_with = |severity: Severity| {
            results
                .iter()
                .filter(|r| !r.outcome.passed && r.outcome.severity == severity)
                .count()
        };
        let error_count = failed_with(Severity::Error);
        let warning_count = failed_with(Severity::Warning);
        let info_count = failed_with(Severity::Info);
        let passed_count = results.iter().filter(|r| r.outcome.passed).count();
        let failed_count = results.len() - passed_count;
        let overall_passed = error_count == 0 && (!self.fail_on_warnings || warning_count == 0);

        ReadinessReport {
            timestamp: Utc::now(),
            job_id: job.id.clone(),
            entity_type: job.entity_type.clone(),
            results,
            passed_count,
            failed_count,
            error_count,
            warning_count,
            info_count,
            overall_passed,
        }
    }

    /// Names of the checks that block, in report order.
    #[must_use]
    pub fn blocking_names<'a>(&self, report: &'a ReadinessReport) -> Vec<&'a str> {
        report
            .results
            .iter()
            .filter(|r| {
                !r.outcome.passed
                    && (r.outcome.severity == Severity::Error
                        || (self.fail_on_warnings && r.outcome.severity == Severity::Warning))
            })
            .map(|r| r.name.as_str())
            .collect()
    }

    /// The report of the most recent evaluation, if any.
    #[must_use]
    pub fn last_report(&self) -> Option<ReadinessReport> {
        self.lock_report().clone()
    }

    #[must_use]
    pub fn state(&self) -> GateState {
        match self.lock_report().as_ref() {
            None => GateState::NotRun,
            Some(report) if report.overall_passed => GateState::Passed,
            Some(_) => GateState::Failed,
        }
    }
}

#[async_trait]
impl PreflightGate for ReadinessGate {
    async fn check(&self, job: &MigrationJob) -> GateDecision {
        let report = self.evaluate(job).await;
        if report.overall_passed {
            GateDecision::pass()
        } else {
            GateDecision::block(format!(
                "{FAILURE_REASON_PREFIX}{}",
                self.blocking_names(&report).join(", ")
            ))
        }
    }
}
