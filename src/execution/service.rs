//! Worker pool that pulls jobs from a scheduler and executes them.
//!
//! The service owns three things:
//! - an [`IngesterRunner`] applying the command log to the scheduler
//! - a fixed number of worker tasks pulling runnable jobs
//! - the producer side of the command log (`schedule`, `remove`)
//!
//! Workers never report completion to the scheduler directly. A finished
//! job produces a `JOB_FINISHED` command and a failed one `JOB_FAILED`,
//! so the command log stays the single path by which state changes arrive.

use chrono::{DateTime, Utc};
use std::any::Any;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use thiserror::Error;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio::time::Instant;

use super::handler::{HandlerError, HandlerRegistry, JobHandler, Work};
use crate::config::ServiceConfig;
use crate::core::job::{Job, ScheduledJob};
use crate::core::types::{JobId, RequesterId};
use crate::ingest::{CommandStore, CommandStoreError, IngestError, IngesterRunner, JobCommand, JobIngester};
use crate::scheduler::{JobScheduler, SchedulerError};
use crate::storage::JobPersister;

/// Pause after a failed pull so a broken persister does not spin a worker.
const WORKER_ERROR_DELAY: Duration = Duration::from_secs(1);

/// Errors that can occur in the scheduler service.
#[derive(Debug, Error)]
pub enum ServiceError {
    /// `start` was called on a running service.
    #[error("job processing has already been started")]
    AlreadyStarted,

    /// `stop` was called on a stopped service.
    #[error("job processing has not been started")]
    NotStarted,

    /// The work to schedule was rejected.
    #[error("invalid work: {0}")]
    InvalidWork(String),

    /// Appending a command failed.
    #[error("command store error: {0}")]
    Store(#[from] CommandStoreError),

    /// The scheduler rejected an operation.
    #[error("scheduler error: {0}")]
    Scheduler(#[from] SchedulerError),

    /// The ingester could not be started or stopped.
    #[error("ingester error: {0}")]
    Ingest(#[from] IngestError),

    /// Work could not be serialized.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// What a worker needs to pull and execute jobs.
struct Worker<P: JobPersister, C: CommandStore> {
    requester_id: RequesterId,
    scheduler: Arc<JobScheduler<P>>,
    commands: Arc<C>,
    registry: Arc<HandlerRegistry>,
    stopping: Arc<AtomicBool>,
    poll_timeout: Duration,
}

impl<P: JobPersister + 'static, C: CommandStore + 'static> Worker<P, C> {
    async fn run(self) {
        tracing::debug!(requester_id = %self.requester_id, "Worker started");
        while !self.stopping.load(Ordering::SeqCst) {
            match self
                .scheduler
                .start_next_runnable_job(&self.requester_id, self.poll_timeout)
                .await
            {
                Ok(Some(job)) => self.execute(job).await,
                Ok(None) => {}
                Err(e) => {
                    tracing::warn!(requester_id = %self.requester_id, error = %e, "Failed to start next job");
                    tokio::time::sleep(WORKER_ERROR_DELAY).await;
                }
            }
        }
        tracing::debug!(requester_id = %self.requester_id, "Worker stopped");
    }

    async fn execute(&self, job: Job) {
        let job_id = job.id().clone();
        tracing::debug!(
            requester_id = %self.requester_id,
            job_id = %job_id,
            job_type = job.job_type(),
            "Executing job"
        );

        let outcome = match self.registry.get(job.job_type()) {
            None => Err(HandlerError::UnknownType(job.job_type().to_string())),
            Some(handler) => run_isolated(handler, job).await,
        };

        let command = match outcome {
            Ok(()) => {
                tracing::debug!(job_id = %job_id, "Job succeeded");
                JobCommand::job_finished(job_id.clone())
            }
            Err(e @ HandlerError::Panicked(_)) => {
                tracing::warn!(
                    requester_id = %self.requester_id,
                    job_id = %job_id,
                    error = %e,
                    "Job handler panicked"
                );
                JobCommand::job_failed(job_id.clone())
            }
            Err(e) => {
                tracing::warn!(job_id = %job_id, error = %e, "Job failed");
                JobCommand::job_failed(job_id.clone())
            }
        };
        if let Err(e) = self.commands.append(command).await {
            tracing::error!(job_id = %job_id, error = %e, "Failed to report job outcome");
        }
    }
}

/// Run a handler on its own task so a panic only takes that task down.
async fn run_isolated(handler: Arc<dyn JobHandler>, job: Job) -> Result<(), HandlerError> {
    match tokio::spawn(async move { handler.handle(&job).await }).await {
        Ok(result) => result,
        Err(e) if e.is_panic() => Err(HandlerError::Panicked(panic_message(e.into_panic()))),
        Err(e) => Err(HandlerError::Failed(e.to_string())),
    }
}

fn panic_message(payload: Box<dyn Any + Send>) -> String {
    match payload.downcast::<String>() {
        Ok(message) => *message,
        Err(payload) => match payload.downcast::<&'static str>() {
            Ok(message) => message.to_string(),
            Err(_) => "unknown panic payload".to_string(),
        },
    }
}

/// Workers of one `start`, with the flag that tells them to stop.
struct WorkerPool {
    stopping: Arc<AtomicBool>,
    workers: Vec<JoinHandle<()>>,
}

/// Runs a worker pool and an ingester around a [`JobScheduler`].
///
/// `start` and `stop` are serialized: a `start` issued while `stop` is
/// draining waits for the drain and then starts a fresh pool.
pub struct JobSchedulerService<P: JobPersister + 'static, C: CommandStore + 'static> {
    scheduler: Arc<JobScheduler<P>>,
    commands: Arc<C>,
    registry: Arc<HandlerRegistry>,
    runner: IngesterRunner<P, Arc<C>>,
    config: ServiceConfig,
    started: AtomicBool,
    pool: Mutex<Option<WorkerPool>>,
}

impl<P: JobPersister + 'static, C: CommandStore + 'static> JobSchedulerService<P, C> {
    /// Create a stopped service.
    pub fn new(
        scheduler: Arc<JobScheduler<P>>,
        commands: Arc<C>,
        registry: HandlerRegistry,
        config: ServiceConfig,
    ) -> Self {
        let mut ingester = JobIngester::new(Arc::clone(&scheduler), Arc::clone(&commands));
        if let Some(batch_size) = config.ingest_batch_size {
            ingester = ingester.with_batch_size(batch_size);
        }
        let runner = IngesterRunner::new(Arc::new(ingester), config.ingest_interval());

        Self {
            scheduler,
            commands,
            registry: Arc::new(registry),
            runner,
            config,
            started: AtomicBool::new(false),
            pool: Mutex::new(None),
        }
    }

    /// Get the underlying scheduler.
    pub fn scheduler(&self) -> &Arc<JobScheduler<P>> {
        &self.scheduler
    }

    /// Get the command store producers append to.
    pub fn commands(&self) -> &Arc<C> {
        &self.commands
    }

    /// Whether the service is processing jobs.
    pub fn is_started(&self) -> bool {
        self.started.load(Ordering::SeqCst)
    }

    /// Replace the scheduler's jobs with the persisted ones.
    pub async fn load_persisted_jobs(&self) -> Result<usize, ServiceError> {
        Ok(self.scheduler.load_persisted_jobs().await?)
    }

    /// Start the ingester and the worker pool.
    pub async fn start(&self) -> Result<(), ServiceError> {
        let mut pool = self.pool.lock().await;
        if pool.is_some() {
            return Err(ServiceError::AlreadyStarted);
        }

        self.runner.start().await?;

        let stopping = Arc::new(AtomicBool::new(false));
        let workers = (1..=self.config.worker_count)
            .map(|n| {
                let worker = Worker {
                    requester_id: RequesterId::new(format!(
                        "{}-{}",
                        self.config.requester_prefix, n
                    )),
                    scheduler: Arc::clone(&self.scheduler),
                    commands: Arc::clone(&self.commands),
                    registry: Arc::clone(&self.registry),
                    stopping: Arc::clone(&stopping),
                    poll_timeout: self.config.poll_timeout(),
                };
                tokio::spawn(worker.run())
            })
            .collect();
        *pool = Some(WorkerPool { stopping, workers });
        self.started.store(true, Ordering::SeqCst);

        tracing::info!(workers = self.config.worker_count, "Job processing started");
        Ok(())
    }

    /// Stop the ingester and drain the worker pool.
    ///
    /// Workers get `shutdown_timeout` in total to finish the job they are
    /// executing; the ones still busy after that are aborted.
    pub async fn stop(&self) -> Result<(), ServiceError> {
        let mut pool = self.pool.lock().await;
        let Some(WorkerPool { stopping, workers }) = pool.take() else {
            return Err(ServiceError::NotStarted);
        };
        self.started.store(false, Ordering::SeqCst);

        stopping.store(true, Ordering::SeqCst);
        self.scheduler.unblock_all_waiters_immediately(true);
        if let Err(e) = self.runner.stop().await {
            tracing::warn!(error = %e, "Failed to stop ingester");
        }

        let deadline = Instant::now() + self.config.shutdown_timeout();
        let mut undrained = 0;
        for mut worker in workers {
            if tokio::time::timeout_at(deadline, &mut worker).await.is_err() {
                worker.abort();
                undrained += 1;
            }
        }
        if undrained > 0 {
            tracing::warn!(workers = undrained, "Not all workers stopped in time; aborted them");
        }

        self.scheduler.unblock_all_waiters_immediately(false);
        tracing::info!("Job processing stopped");
        Ok(())
    }

    /// Schedule a job through the command log and return its new id.
    ///
    /// Without `scheduled_at` the job is due now, which keeps jobs in
    /// submission order.
    pub async fn schedule(
        &self,
        job_type: impl Into<String>,
        data: Option<Vec<u8>>,
        scheduled_at: Option<DateTime<Utc>>,
    ) -> Result<JobId, ServiceError> {
        let job_type = job_type.into();
        if job_type.is_empty() {
            return Err(ServiceError::InvalidWork(
                "job type must not be empty".to_string(),
            ));
        }

        let job_id = JobId::generate();
        let job = Job::new(job_id.clone(), job_type)
            .with_optional_data(data)
            .with_scheduled_at(scheduled_at.unwrap_or_else(Utc::now));
        tracing::debug!(job_id = %job_id, job_type = job.job_type(), "Scheduling job");
        self.commands.append(JobCommand::schedule(job)).await?;
        Ok(job_id)
    }

    /// Schedule typed work; its JSON form becomes the job data.
    pub async fn schedule_work<W: Work>(
        &self,
        work: &W,
        scheduled_at: Option<DateTime<Utc>>,
    ) -> Result<JobId, ServiceError> {
        let data = serde_json::to_vec(work)?;
        self.schedule(W::JOB_TYPE, Some(data), scheduled_at).await
    }

    /// Remove a job through the command log.
    pub async fn remove(&self, job_id: &JobId) -> Result<(), ServiceError> {
        self.commands
            .append(JobCommand::remove(job_id.clone()))
            .await?;
        tracing::debug!(job_id = %job_id, "Requested job removal");
        Ok(())
    }

    /// Snapshot of the jobs tracked by the scheduler.
    pub async fn find_all_jobs(&self) -> Vec<ScheduledJob> {
        self.scheduler.find_all_jobs().await
    }
}
