mod commands;
mod logging;

use std::path::PathBuf;

use clap::{Parser, Subcommand};

#[derive(Parser)]
#[command(
    name = "carryover",
    version,
    about = "Resumable, reversible legacy-to-target data migration"
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Log level (error, warn, info, debug, trace)
    #[arg(long, default_value = "info", global = true)]
    log_level: String,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the readiness gate for a migration job
    Check {
        /// Path to job YAML file
        job: PathBuf,
    },
    /// Run a migration job, or resume an interrupted one
    Run {
        /// Path to job YAML file
        job: PathBuf,
        /// Resume this running job from its last checkpoint
        #[arg(long)]
        resume: Option<String>,
    },
    /// Undo a migration job's writes
    Rollback {
        /// Path to job YAML file
        job: PathBuf,
        /// Job id to roll back
        job_id: String,
    },
    /// Show a job's status, checkpoint, and lineage counts
    Status {
        /// Path to job YAML file
        job: PathBuf,
        /// Job id to inspect
        job_id: String,
    },
    /// Fuzzy-match a name against a candidate list
    Match {
        /// Name to look up
        name: String,
        /// File with one candidate per line
        candidates: PathBuf,
        /// Largest accepted distance, 0 (exact) to 1 (anything)
        #[arg(long, default_value_t = carryover_engine::matcher::DEFAULT_THRESHOLD)]
        threshold: f64,
        /// Score of a perfect match
        #[arg(long, default_value_t = carryover_engine::matcher::DEFAULT_SCORE_WEIGHT)]
        score_weight: f64,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    logging::init(&cli.log_level);

    match cli.command {
        Commands::Check { job } => commands::check::execute(&job).await,
        Commands::Run { job, resume } => commands::run::execute(&job, resume.as_deref()).await,
        Commands::Rollback { job, job_id } => commands::rollback::execute(&job, &job_id).await,
        Commands::Status { job, job_id } => commands::status::execute(&job, &job_id),
        Commands::Match {
            name,
            candidates,
            threshold,
            score_weight,
        } => commands::matching::execute(&name, &candidates, threshold, score_weight),
    }
}
