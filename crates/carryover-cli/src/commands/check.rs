use std::path::Path;

use anyhow::Result;
use carryover_engine::orchestrator;
use carryover_types::readiness::NamedCheckResult;

/// Execute the `check` command: validate the job file and run the readiness gate.
pub async fn execute(job_path: &Path) -> Result<()> {
    let config = super::load_job(job_path)?;
    println!("Job structure:     OK");

    let result = orchestrator::check_job(&config).await;
    for check in &result.report.results {
        print_check(check);
    }

    if result.passed() {
        println!("\nAll blocking checks passed.");
        Ok(())
    } else {
        anyhow::bail!(
            "{}{}",
            carryover_engine::readiness::FAILURE_REASON_PREFIX,
            result.blocking.join(", ")
        )
    }
}

fn print_check(result: &NamedCheckResult) {
    let status = if result.outcome.passed { "OK" } else { "FAILED" };
    println!(
        "{:28} {:7} [{}] {}",
        format!("{}:", result.name),
        status,
        result.outcome.severity,
        result.outcome.message
    );
}
