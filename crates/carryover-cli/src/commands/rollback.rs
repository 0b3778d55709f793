use std::path::Path;

use anyhow::Result;
use carryover_engine::orchestrator;
use carryover_types::job::JobId;

/// Execute the `rollback` command. Fails when any row could not be undone.
pub async fn execute(job_path: &Path, job_id: &str) -> Result<()> {
    let config = super::load_job(job_path)?;
    let result = orchestrator::rollback_job(&config, &JobId::new(job_id)).await?;

    println!("Job '{}' rolled back ({}).", result.job_id, result.entity_type);
    println!("  Deleted:  {}", result.deleted_count);
    println!("  Restored: {}", result.restored_count);
    println!("  Failed:   {}", result.failed_count);
    for error in &result.errors {
        println!("    {} [{}]: {}", error.entity_id, error.phase, error.message);
    }

    if result.is_clean() {
        Ok(())
    } else {
        anyhow::bail!(
            "{} row(s) could not be rolled back; manual remediation required",
            result.failed_count
        )
    }
}
