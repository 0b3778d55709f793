use std::path::Path;

use anyhow::Result;
use carryover_engine::orchestrator;
use carryover_types::job::JobId;

/// Execute the `status` command: print job status, checkpoint, and lineage counts.
pub fn execute(job_path: &Path, job_id: &str) -> Result<()> {
    let config = super::load_job(job_path)?;
    let status = orchestrator::job_status(&config, &JobId::new(job_id))?;

    println!("Job:         {}", status.job.id);
    println!("Entity type: {}", status.job.entity_type);
    println!("Status:      {}", status.job.status);
    println!("Created:     {}", status.job.created_at.to_rfc3339());
    if let Some(done) = status.job.completed_at {
        println!("Finished:    {}", done.to_rfc3339());
    }
    match &status.checkpoint {
        Some(cp) => {
            let cursor = cp
                .cursor
                .as_ref()
                .map_or_else(|| "start".to_string(), ToString::to_string);
            println!(
                "Checkpoint:  batch {} at {cursor}, transform {}",
                cp.batch_index, cp.transform_version
            );
            if cp.batch_in_progress {
                println!("             in batch through record {}", cp.loaded_up_to);
            }
        }
        None => println!("Checkpoint:  none"),
    }
    println!(
        "Lineage:     {} committed, {} pending, {} failed",
        status.lineage.committed, status.lineage.pending, status.lineage.failed
    );
    println!("Snapshots:   {}", status.snapshots);
    Ok(())
}
