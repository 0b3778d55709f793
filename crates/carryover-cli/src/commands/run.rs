use std::path::Path;

use anyhow::Result;
use carryover_engine::orchestrator;
use carryover_types::job::JobId;

/// Execute the `run` command: parse, validate, gate, and run a job.
pub async fn execute(job_path: &Path, resume: Option<&str>) -> Result<()> {
    let config = super::load_job(job_path)?;

    tracing::info!(
        entity_type = config.job.entity_type,
        source = %config.source.path.display(),
        batch_size = config.job.batch_size,
        mappings = config.job.field_mappings.len(),
        "Job validated"
    );

    let resume = resume.map(JobId::new);
    let summary = orchestrator::run_job(&config, resume.as_ref()).await?;

    println!("Job '{}' completed successfully.", summary.job_id);
    println!("  Batches:   {}", summary.batches);
    println!("  Processed: {}", summary.processed);
    println!("  Created:   {}", summary.created);
    println!("  Updated:   {}", summary.updated);
    println!("  Skipped:   {}", summary.skipped);
    println!("  Failed:    {}", summary.failed);
    if !summary.perf.is_empty() {
        println!("  Stage latency (ms):");
        for (stage, stats) in &summary.perf {
            println!(
                "    {:12} n={:<6} p50={:>9.3} p95={:>9.3}",
                stage, stats.count, stats.p50_ms, stats.p95_ms
            );
        }
    }
    Ok(())
}
