// crates/cli/src/main.rs
//! `jobwatch`: submit long-running jobs and follow them to completion.
//!
//! Tracking survives dropped connections, and Ctrl-C detaches without
//! losing the job: the snapshot stays on disk and `jobwatch resume` picks
//! it back up.

use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use jobwatch_core::{
    FileSnapshotStore, HttpJobApi, JobApi, JobTracker, MemorySnapshotStore, Recovery,
    SnapshotStore, TrackerConfig, TrackerDeps, TrackingOutcome,
};
use jobwatch_types::{JobId, JobState, JobStatus};
use tracing::warn;
use tracing_subscriber::EnvFilter;

mod printer;

use printer::ProgressPrinter;

const DEFAULT_LOG_FILTER: &str = "warn,jobwatch_core=info,jobwatch_cli=info";

#[derive(Parser)]
#[command(name = "jobwatch", version)]
#[command(about = "Submit and track long-running server-side jobs", long_about = None)]
struct Cli {
    /// TOML config file (defaults to the platform config dir)
    #[arg(long, global = true, value_name = "PATH")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Submit new work and follow it until it finishes.
    Submit {
        /// Numeric job type understood by the server
        #[arg(long, default_value_t = 1)]
        job_type: u32,

        /// Input text for the job
        input: String,
    },

    /// Resume the job left behind by an interrupted run, if any.
    Resume,

    /// Print the current status of a job.
    Status { job_id: String },

    /// Ask the server to cancel a job.
    Cancel { job_id: String },

    /// Forget the persisted job snapshot.
    Reset,
}

fn init_tracing() {
    let filter = EnvFilter::try_from_env("JOBWATCH_LOG")
        .or_else(|_| EnvFilter::try_from_default_env())
        .unwrap_or_else(|_| EnvFilter::new(DEFAULT_LOG_FILTER));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

#[tokio::main]
async fn main() -> Result<ExitCode> {
    init_tracing();
    let cli = Cli::parse();
    let config = TrackerConfig::load(cli.config.as_deref()).context("loading configuration")?;

    match cli.command {
        Command::Submit { job_type, input } => {
            let tracker = JobTracker::submit(tracker_deps(&config), job_type, &input).await?;
            eprintln!("Submitted job {}", tracker.job_id());
            follow(tracker).await
        }
        Command::Resume => match JobTracker::recover(tracker_deps(&config)).await {
            Recovery::Nothing => {
                eprintln!("No unfinished job to resume");
                Ok(ExitCode::SUCCESS)
            }
            Recovery::Settled(state) => {
                print_settled(&state);
                Ok(exit_code(state.status()))
            }
            Recovery::Resumed(tracker) => {
                eprintln!("Resuming job {}", tracker.job_id());
                follow(tracker).await
            }
        },
        Command::Status { job_id } => {
            let api = HttpJobApi::from_config(&config);
            let status = api.query_status(&JobId::new(job_id)).await?;
            println!("{status}");
            Ok(ExitCode::SUCCESS)
        }
        Command::Cancel { job_id } => {
            let api = HttpJobApi::from_config(&config);
            let job_id = JobId::new(job_id);
            api.cancel(&job_id)
                .await
                .with_context(|| format!("cancelling job {job_id}"))?;
            eprintln!("Cancel requested for job {job_id}");
            Ok(ExitCode::SUCCESS)
        }
        Command::Reset => {
            snapshot_store(&config)
                .clear()
                .await
                .context("clearing job snapshot")?;
            eprintln!("Job snapshot cleared");
            Ok(ExitCode::SUCCESS)
        }
    }
}

fn snapshot_store(config: &TrackerConfig) -> Arc<dyn SnapshotStore> {
    match &config.snapshot_path {
        Some(path) => Arc::new(FileSnapshotStore::new(path)),
        None => {
            warn!("No data directory available; job snapshot will not survive this process");
            Arc::new(MemorySnapshotStore::new())
        }
    }
}

fn tracker_deps(config: &TrackerConfig) -> TrackerDeps {
    let api = Arc::new(HttpJobApi::from_config(config));
    TrackerDeps::new(api, snapshot_store(config), config.clone())
        .with_observer(Arc::new(ProgressPrinter::stdout()))
}

/// Track until the job ends. Ctrl-C detaches and keeps the snapshot.
async fn follow(tracker: JobTracker) -> Result<ExitCode> {
    let handle = tracker.handle();
    let interrupt = tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            eprintln!("\nDetached. Run `jobwatch resume` to continue tracking.");
            handle.detach().await;
        }
    });

    let outcome = tracker.wait().await;
    interrupt.abort();

    match outcome? {
        TrackingOutcome::Terminal(state) => Ok(exit_code(state.status())),
        TrackingOutcome::Stopped(_) => Ok(ExitCode::SUCCESS),
    }
}

fn print_settled(state: &JobState) {
    if !state.progress_text().is_empty() {
        println!("{}", state.progress_text());
    }
    eprintln!("Job {} is {}", state.id(), state.status());
}

fn exit_code(status: JobStatus) -> ExitCode {
    if status == JobStatus::Failed {
        ExitCode::FAILURE
    } else {
        ExitCode::SUCCESS
    }
}
