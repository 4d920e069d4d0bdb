//! CLI command definitions for trainforge.
//!
//! The long-running commands (`saver`, `worker`) run until Ctrl-C; the
//! others perform one lifecycle call and print the result.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use tokio::sync::broadcast;
use tracing::{info, warn};

use crate::config::OrchestratorConfig;
use crate::metrics::init_metrics;
use crate::scheduler::{
    JobConfig, JobService, JobState, MessageBus, RedisConnector, Saver, SimulatedTrainer,
    SortOrder, SubmitRequest, WorkerPool, WorkerPoolConfig,
};
use crate::store::{ArtifactStore, CancelMarkers, JobStore};

/// Training job orchestrator.
#[derive(Parser)]
#[command(name = "trainforge")]
#[command(about = "Submit, run and track training jobs over a Redis task queue")]
#[command(version)]
#[command(
    long_about = "trainforge dispatches training jobs through Redis, runs them on a worker pool and persists their progress into a file-based job store.\n\nExample usage:\n  trainforge saver\n  trainforge worker -n 4\n  trainforge submit my-project --config '{\"epochs\": 5}'"
)]
pub struct Cli {
    /// The subcommand to execute.
    #[command(subcommand)]
    pub command: Commands,

    /// Log level (trace, debug, info, warn, error).
    #[arg(short, long, default_value = "info", global = true)]
    pub log_level: String,

    /// Redis URL; overrides REDIS_URL.
    #[arg(long, global = true)]
    pub redis_url: Option<String>,

    /// Job store root; overrides WORKDIR_CONTAINER.
    #[arg(short, long, global = true)]
    pub workdir: Option<PathBuf>,
}

/// Available CLI subcommands.
#[derive(clap::Subcommand)]
pub enum Commands {
    /// Run the saver that persists job messages into the job store.
    Saver,

    /// Run a pool of training workers.
    Worker(WorkerArgs),

    /// Submit a training job.
    Submit(SubmitArgs),

    /// Request cancellation of a job.
    Cancel(CancelArgs),

    /// Show the current view of one job.
    #[command(alias = "get")]
    Status(JobArgs),

    /// List the jobs of a project.
    List(ListArgs),

    /// Print a job's event log.
    Logs(JobArgs),
}

/// Arguments for `trainforge worker`.
#[derive(Parser, Debug)]
pub struct WorkerArgs {
    /// Number of workers; overrides WORKER_COUNT.
    #[arg(short = 'n', long)]
    pub num_workers: Option<usize>,
}

/// Arguments for `trainforge submit`.
#[derive(Parser, Debug)]
pub struct SubmitArgs {
    /// Owning project.
    pub project_id: String,

    /// Display name (defaults to experiment-<project>).
    #[arg(long)]
    pub name: Option<String>,

    /// Job config as a JSON object, e.g. '{"epochs": 5}'.
    #[arg(short, long)]
    pub config: Option<String>,
}

/// Arguments for `trainforge cancel`.
#[derive(Parser, Debug)]
pub struct CancelArgs {
    /// Job to cancel.
    pub job_id: String,
}

/// Arguments addressing a single job.
#[derive(Parser, Debug)]
pub struct JobArgs {
    /// Owning project.
    pub project_id: String,

    /// Job id.
    pub job_id: String,
}

/// Arguments for `trainforge list`.
#[derive(Parser, Debug)]
pub struct ListArgs {
    /// Owning project.
    pub project_id: String,

    /// Only show jobs in this state (PENDING, RUNNING, COMPLETED, FAILED, CANCELLED).
    #[arg(long)]
    pub state: Option<JobState>,

    /// Oldest first instead of newest first.
    #[arg(long)]
    pub asc: bool,
}

/// Parse CLI arguments without running any command.
pub fn parse_cli() -> Cli {
    Cli::parse()
}

/// Run the CLI by parsing arguments and executing the command.
pub async fn run() -> anyhow::Result<()> {
    run_with_cli(parse_cli()).await
}

/// Run the CLI with the parsed arguments.
pub async fn run_with_cli(cli: Cli) -> anyhow::Result<()> {
    let config = load_config(&cli)?;

    match cli.command {
        Commands::Saver => run_saver_command(config).await,
        Commands::Worker(args) => run_worker_command(config, args).await,
        Commands::Submit(args) => run_submit_command(config, args).await,
        Commands::Cancel(args) => {
            let service = store_service(&config);
            service.cancel(&args.job_id).await?;
            println!("Cancellation requested for {}", args.job_id);
            Ok(())
        }
        Commands::Status(args) => {
            let service = store_service(&config);
            let job = service.get(&args.project_id, &args.job_id).await?;
            println!("{}", serde_json::to_string_pretty(&job)?);
            Ok(())
        }
        Commands::List(args) => {
            let service = store_service(&config);
            let order = if args.asc {
                SortOrder::Ascending
            } else {
                SortOrder::Descending
            };
            let jobs = service.list(&args.project_id, args.state, order).await?;
            println!("{}", serde_json::to_string_pretty(&jobs)?);
            Ok(())
        }
        Commands::Logs(args) => {
            let service = store_service(&config);
            print!("{}", service.logs(&args.project_id, &args.job_id).await?);
            Ok(())
        }
    }
}

fn load_config(cli: &Cli) -> anyhow::Result<OrchestratorConfig> {
    let mut config = OrchestratorConfig::from_env().context("Invalid configuration")?;
    if let Some(url) = &cli.redis_url {
        config = config.with_redis_url(url.clone());
    }
    if let Some(workdir) = &cli.workdir {
        config = config.with_workdir(workdir.clone());
    }
    Ok(config)
}

/// Service for commands that only touch the work directory.
fn store_service(config: &OrchestratorConfig) -> JobService {
    JobService::store_only(
        Arc::new(JobStore::new(&config.workdir)),
        CancelMarkers::new(&config.workdir),
    )
}

async fn connect_service(config: &OrchestratorConfig) -> anyhow::Result<JobService> {
    let connector = RedisConnector::new(config.redis_url.clone());
    let bus = MessageBus::connect(&connector, config.channels.clone())
        .await
        .with_context(|| format!("Failed to connect to {}", config.redis_url))?;

    Ok(JobService::new(
        bus,
        Arc::new(JobStore::new(&config.workdir)),
        CancelMarkers::new(&config.workdir),
    ))
}

async fn run_submit_command(config: OrchestratorConfig, args: SubmitArgs) -> anyhow::Result<()> {
    let mut request = SubmitRequest::new(args.project_id);
    if let Some(name) = args.name {
        request = request.with_name(name);
    }
    if let Some(raw) = args.config {
        let job_config: JobConfig =
            serde_json::from_str(&raw).context("--config must be a JSON object")?;
        request = request.with_config(job_config);
    }

    let service = connect_service(&config).await?;
    let job_id = service.submit(request).await?;
    println!("{}", job_id);
    Ok(())
}

async fn run_saver_command(config: OrchestratorConfig) -> anyhow::Result<()> {
    init_metrics().context("Failed to register metrics")?;

    let connector = RedisConnector::new(config.redis_url.clone());
    let bus = MessageBus::connect(&connector, config.channels.clone())
        .await
        .with_context(|| format!("Failed to connect to {}", config.redis_url))?;

    let saver = Saver::new(
        bus,
        Arc::new(JobStore::new(&config.workdir)),
        config.saver_poll_timeout,
    );

    let (stop_tx, stop_rx) = broadcast::channel(1);
    let handle = tokio::spawn(saver.run(stop_rx));

    tokio::signal::ctrl_c()
        .await
        .context("Failed to listen for Ctrl-C")?;
    info!("Stopping saver");
    let _ = stop_tx.send(());

    match tokio::time::timeout(config.shutdown_timeout, handle).await {
        Ok(Ok(stats)) => {
            info!(
                persisted = stats.persisted,
                undecodable = stats.undecodable,
                write_failures = stats.write_failures,
                "Saver exited"
            );
            Ok(())
        }
        Ok(Err(e)) => Err(anyhow::anyhow!("Saver task failed: {}", e)),
        Err(_) => {
            warn!(
                timeout_secs = config.shutdown_timeout.as_secs(),
                "Saver did not stop in time"
            );
            Ok(())
        }
    }
}

async fn run_worker_command(config: OrchestratorConfig, args: WorkerArgs) -> anyhow::Result<()> {
    init_metrics().context("Failed to register metrics")?;

    let mut pool_config = WorkerPoolConfig::from_orchestrator(&config);
    if let Some(n) = args.num_workers {
        if n == 0 {
            return Err(anyhow::anyhow!("--num-workers must be at least 1"));
        }
        pool_config.num_workers = n;
    }

    let mut pool = WorkerPool::new(
        pool_config,
        Arc::new(RedisConnector::new(config.redis_url.clone())),
        Arc::new(SimulatedTrainer::new(config.worker.unit_delay)),
        ArtifactStore::new(&config.workdir),
        CancelMarkers::new(&config.workdir),
    );
    pool.start()
        .await
        .with_context(|| format!("Failed to start workers against {}", config.redis_url))?;

    tokio::signal::ctrl_c()
        .await
        .context("Failed to listen for Ctrl-C")?;
    info!("Stopping worker pool");

    if let Err(e) = pool.shutdown().await {
        warn!(error = %e, "Worker pool did not shut down cleanly");
    }

    let stats = pool.stats();
    info!(
        completed = stats.jobs_completed,
        failed = stats.jobs_failed,
        cancelled = stats.jobs_cancelled,
        "Worker pool exited"
    );
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_definition_is_valid() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_parse_submit() {
        let cli = Cli::try_parse_from([
            "trainforge",
            "--workdir",
            "/tmp/jobs",
            "submit",
            "p1",
            "--name",
            "baseline",
            "--config",
            r#"{"epochs": 3}"#,
        ])
        .expect("parse");

        assert_eq!(cli.workdir, Some(PathBuf::from("/tmp/jobs")));
        match cli.command {
            Commands::Submit(args) => {
                assert_eq!(args.project_id, "p1");
                assert_eq!(args.name.as_deref(), Some("baseline"));
                assert_eq!(args.config.as_deref(), Some(r#"{"epochs": 3}"#));
            }
            _ => panic!("expected submit"),
        }
    }

    #[test]
    fn test_parse_list_state_filter() {
        let cli = Cli::try_parse_from(["trainforge", "list", "p1", "--state", "completed", "--asc"])
            .expect("parse");

        match cli.command {
            Commands::List(args) => {
                assert_eq!(args.state, Some(JobState::Completed));
                assert!(args.asc);
            }
            _ => panic!("expected list"),
        }

        assert!(Cli::try_parse_from(["trainforge", "list", "p1", "--state", "bogus"]).is_err());
    }

    #[tokio::test]
    async fn test_read_commands_work_without_broker() {
        let temp_dir = tempfile::TempDir::new().expect("Failed to create temp dir");
        let workdir = temp_dir.path().to_string_lossy().into_owned();
        let workdir = workdir.as_str();
        let unreachable = "redis://127.0.0.1:1/0";

        for args in [
            vec!["trainforge", "--redis-url", unreachable, "--workdir", workdir, "cancel", "job-1"],
            vec!["trainforge", "--redis-url", unreachable, "--workdir", workdir, "list", "p1"],
        ] {
            let cli = Cli::try_parse_from(args).expect("parse");
            run_with_cli(cli).await.expect("command should not need the broker");
        }

        assert!(temp_dir.path().join("cancellations/job-1.cancel").exists());
    }

    #[test]
    fn test_global_flags_after_subcommand() {
        let cli = Cli::try_parse_from([
            "trainforge",
            "worker",
            "-n",
            "4",
            "--redis-url",
            "redis://broker:6379/1",
        ])
        .expect("parse");

        assert_eq!(cli.redis_url.as_deref(), Some("redis://broker:6379/1"));
        match cli.command {
            Commands::Worker(args) => assert_eq!(args.num_workers, Some(4)),
            _ => panic!("expected worker"),
        }
    }
}
