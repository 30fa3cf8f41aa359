//! jobsched - A pull-based job scheduling engine.
//!
//! Usage:
//!   jobsched run --config <file>       Run the worker pool until Ctrl+C
//!   jobsched submit --config <file>    Queue a job through the command log
//!   jobsched remove --config <file>    Queue the removal of a job
//!   jobsched list --config <file>      List persisted jobs
//!   jobsched validate --config <file>  Validate the configuration

use chrono::{DateTime, Utc};
use clap::{Parser, Subcommand};
use jobsched::{
    CommandStore, ConfigLoader, FifoRunnableJobFinder, HandlerRegistry, InMemoryCommandLog,
    InMemoryPersister, Job, JobCommand, JobId, JobPersister, JobScheduler, JobSchedulerService,
    ServiceConfig, SqliteStorage, StorageConfig,
};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{error, info};

/// jobsched - A pull-based job scheduling engine
#[derive(Parser)]
#[command(name = "jobsched")]
#[command(author, version, about, long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the ingester and worker pool until Ctrl+C
    Run {
        /// Path to the configuration file
        #[arg(short, long, value_name = "FILE")]
        config: PathBuf,
    },

    /// Queue a new job
    Submit {
        /// Path to the configuration file
        #[arg(short, long, value_name = "FILE")]
        config: PathBuf,

        /// Job type used to pick the handler
        #[arg(short = 't', long = "type", value_name = "TYPE")]
        job_type: String,

        /// Job payload, stored as UTF-8 bytes
        #[arg(short, long)]
        data: Option<String>,

        /// Delay before the job becomes runnable
        #[arg(long, value_name = "SECS")]
        delay_secs: Option<u64>,
    },

    /// Queue the removal of a job
    Remove {
        /// Path to the configuration file
        #[arg(short, long, value_name = "FILE")]
        config: PathBuf,

        /// Id of the job to remove
        #[arg(value_name = "JOB_ID")]
        job_id: String,
    },

    /// List persisted jobs
    List {
        /// Path to the configuration file
        #[arg(short, long, value_name = "FILE")]
        config: PathBuf,
    },

    /// Validate the configuration without running
    Validate {
        /// Path to the configuration file
        #[arg(short, long, value_name = "FILE")]
        config: PathBuf,
    },
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(tracing::Level::INFO.into()),
        )
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Run { config } => {
            run(config).await?;
        }
        Commands::Submit {
            config,
            job_type,
            data,
            delay_secs,
        } => {
            submit(config, job_type, data, delay_secs).await?;
        }
        Commands::Remove { config, job_id } => {
            remove(config, job_id).await?;
        }
        Commands::List { config } => {
            list(config).await?;
        }
        Commands::Validate { config } => {
            validate(config)?;
        }
    }

    Ok(())
}

/// Handlers available to `run`.
fn builtin_handlers() -> HandlerRegistry {
    let mut registry = HandlerRegistry::new();
    registry.register_fn("noop", |_job| async { Ok(()) });
    registry.register_fn("log", |job: Job| async move {
        let data = job.data().map(String::from_utf8_lossy).unwrap_or_default();
        info!(job_id = %job.id(), data = %data, "log job");
        Ok(())
    });
    registry
}

/// Run the service until Ctrl+C.
async fn run(config_path: PathBuf) -> Result<(), Box<dyn std::error::Error>> {
    let config = ConfigLoader::load(&config_path)?;
    info!("Loaded configuration from: {}", config_path.display());

    match config.storage.clone() {
        StorageConfig::Memory => {
            info!("Using in-memory storage; jobs are lost on exit");
            run_service(
                Arc::new(InMemoryPersister::new()),
                Arc::new(InMemoryCommandLog::new()),
                config,
            )
            .await
        }
        StorageConfig::Sqlite { path } => {
            info!("Using SQLite storage at: {}", path);
            let storage = Arc::new(SqliteStorage::new(&path).await?);
            run_service(Arc::clone(&storage), storage, config).await
        }
    }
}

async fn run_service<P, C>(
    persister: P,
    commands: Arc<C>,
    config: ServiceConfig,
) -> Result<(), Box<dyn std::error::Error>>
where
    P: JobPersister + 'static,
    C: CommandStore + 'static,
{
    let finder = FifoRunnableJobFinder::new().with_timeout_window(config.job_timeout());
    let scheduler = Arc::new(JobScheduler::new(finder, persister));
    let registry = builtin_handlers();
    info!("Registered handlers: {}", registry.job_types().join(", "));

    let service = JobSchedulerService::new(scheduler, commands, registry, config);
    service.load_persisted_jobs().await?;
    service.start().await?;
    info!("Press Ctrl+C to stop");

    tokio::signal::ctrl_c().await?;
    info!("Shutting down...");
    service.stop().await?;

    info!("Goodbye!");
    Ok(())
}

/// Open the SQLite database named by the configuration.
///
/// Commands from a separate process only reach a running service through a
/// shared database.
async fn open_shared_storage(
    config_path: &Path,
) -> Result<SqliteStorage, Box<dyn std::error::Error>> {
    let config = ConfigLoader::load(config_path)?;
    match config.storage {
        StorageConfig::Sqlite { path } => Ok(SqliteStorage::new(&path).await?),
        StorageConfig::Memory => {
            Err("this command requires sqlite storage in the configuration".into())
        }
    }
}

/// Queue a SCHEDULE command.
async fn submit(
    config_path: PathBuf,
    job_type: String,
    data: Option<String>,
    delay_secs: Option<u64>,
) -> Result<(), Box<dyn std::error::Error>> {
    let storage = open_shared_storage(&config_path).await?;

    let delay = i64::try_from(delay_secs.unwrap_or(0))
        .ok()
        .and_then(chrono::Duration::try_seconds)
        .ok_or("delay is too large")?;
    let scheduled_at = Utc::now() + delay;
    let job_id = JobId::generate();
    let job = Job::new(job_id.clone(), job_type)
        .with_optional_data(data.map(String::into_bytes))
        .with_scheduled_at(scheduled_at);
    storage.append(JobCommand::schedule(job)).await?;
    storage.close().await;

    println!("{}", job_id);
    Ok(())
}

/// Queue a REMOVE command.
async fn remove(config_path: PathBuf, job_id: String) -> Result<(), Box<dyn std::error::Error>> {
    let storage = open_shared_storage(&config_path).await?;
    storage.append(JobCommand::remove(job_id.as_str())).await?;
    storage.close().await;

    info!("Queued removal of job {}", job_id);
    Ok(())
}

/// List persisted jobs.
async fn list(config_path: PathBuf) -> Result<(), Box<dyn std::error::Error>> {
    let storage = open_shared_storage(&config_path).await?;
    let jobs = storage.find_all_jobs().await?;
    storage.close().await;

    if jobs.is_empty() {
        println!("No jobs found");
        return Ok(());
    }

    for job in &jobs {
        println!("ID: {}", job.id());
        println!("  Type: {}", job.job().job_type());
        println!("  State: {}", job.state());
        if let Some(requester) = job.requester_id() {
            println!("  Requester: {}", requester);
        }
        println!("  Scheduled at: {}", format_instant(job.job().scheduled_at()));
        if let Some(timeout_at) = job.timeout_at() {
            println!("  Times out at: {}", timeout_at.to_rfc3339());
        }
        println!();
    }

    Ok(())
}

fn format_instant(at: Option<DateTime<Utc>>) -> String {
    at.map(|at| at.to_rfc3339())
        .unwrap_or_else(|| "immediately".to_string())
}

/// Validate the configuration without running.
fn validate(config_path: PathBuf) -> Result<(), Box<dyn std::error::Error>> {
    info!("Validating configuration: {}", config_path.display());

    match ConfigLoader::load(&config_path) {
        Ok(config) => {
            info!("Configuration is valid:");
            info!("  workers: {}", config.worker_count);
            info!("  poll timeout: {}ms", config.poll_timeout_ms);
            info!("  ingest interval: {}ms", config.ingest_interval_ms);
            info!("  storage: {:?}", config.storage);
            Ok(())
        }
        Err(e) => {
            error!("Validation failed: {}", e);
            Err(e.into())
        }
    }
}
