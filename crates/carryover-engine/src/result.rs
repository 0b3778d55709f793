//! Result types returned by the job-level entry points.

use carryover_types::checkpoint::StepCheckpoint;
use carryover_types::job::{JobId, MigrationJob};
use carryover_types::readiness::ReadinessReport;
use serde::Serialize;

use crate::perf::PerfReport;

/// Counts and stage latencies of one runner invocation.
#[derive(Debug, Clone, Serialize)]
pub struct RunSummary {
    pub job_id: JobId,
    pub batches: u64,
    pub processed: u64,
    pub created: u64,
    pub updated: u64,
    /// Records already committed by an earlier, interrupted invocation.
    pub skipped: u64,
    pub failed: u64,
    pub perf: PerfReport,
}

/// Outcome of a pre-run check.
#[derive(Debug, Clone, Serialize)]
pub struct CheckResult {
    pub report: ReadinessReport,
    /// Checks that block the run, in report order.
    pub blocking: Vec<String>,
}

impl CheckResult {
    #[must_use]
    pub fn passed(&self) -> bool {
        self.report.overall_passed
    }
}

/// Lineage rows of a job, grouped by state.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct LineageCounts {
    pub pending: usize,
    pub committed: usize,
    pub failed: usize,
}

/// Point-in-time view of a job's bookkeeping.
#[derive(Debug, Clone, Serialize)]
pub struct JobStatusReport {
    pub job: MigrationJob,
    pub checkpoint: Option<StepCheckpoint>,
    pub lineage: LineageCounts,
    pub snapshots: usize,
}
