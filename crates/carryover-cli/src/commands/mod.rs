pub mod check;
pub mod matching;
pub mod rollback;
pub mod run;
pub mod status;

use std::path::Path;

use anyhow::{Context, Result};
use carryover_engine::config::{parse_job, validate_job, JobConfig};

/// Parse and validate a job file.
pub(crate) fn load_job(job_path: &Path) -> Result<JobConfig> {
    let config = parse_job(job_path)
        .with_context(|| format!("Failed to parse job: {}", job_path.display()))?;
    validate_job(&config)?;
    Ok(config)
}
