//! Scheduler engine implementation.
//!
//! The scheduler is responsible for:
//! - Serializing every mutation of the finder and persister under one lock
//! - Handing each runnable job to at most one requester
//! - Blocking pulls with a deadline and exponential backoff
//! - Resynchronizing in-memory state from the persister

use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tokio::sync::{Mutex, Notify, Semaphore};
use tokio::time::Instant;

use super::batch::SchedulerBatch;
use super::types::SchedulerError;
use crate::core::job::{Job, ScheduledJob};
use crate::core::types::{JobId, RequesterId};
use crate::finder::RunnableJobFinder;
use crate::storage::JobPersister;

/// First wait of a blocked pull.
const INITIAL_BACKOFF: Duration = Duration::from_millis(10);

/// Upper bound for the wait between two attempts of a blocked pull.
const MAX_BACKOFF: Duration = Duration::from_millis(1000);

/// Coordinates requesters pulling jobs and producers mutating them.
///
/// One lock guards the finder and the persister. Picking a candidate,
/// marking it running and persisting that happen under the lock, so two
/// requesters can never be handed the same job.
pub struct JobScheduler<P: JobPersister> {
    finder: Mutex<Box<dyn RunnableJobFinder>>,
    persister: P,
    /// Signalled whenever a batch changed the tracked jobs.
    changed: Notify,
    /// Lets only one requester at a time run the backoff loop.
    start_gate: Semaphore,
    unblock_waiters: AtomicBool,
}

impl<P: JobPersister> JobScheduler<P> {
    /// Create a scheduler over the given finder and persister.
    pub fn new(finder: impl RunnableJobFinder + 'static, persister: P) -> Self {
        Self {
            finder: Mutex::new(Box::new(finder)),
            persister,
            changed: Notify::new(),
            start_gate: Semaphore::new(1),
            unblock_waiters: AtomicBool::new(false),
        }
    }

    /// Get the persister.
    pub fn persister(&self) -> &P {
        &self.persister
    }

    /// Take the scheduler lock for a series of operations.
    ///
    /// Everything done through the returned batch is atomic with respect to
    /// concurrent pulls.
    pub async fn batch(&self) -> SchedulerBatch<'_, P> {
        SchedulerBatch::new(self.finder.lock().await, &self.persister, &self.changed)
    }

    /// Replace the tracked jobs by the persisted ones.
    ///
    /// Called at startup and after a failed ingestion to discard in-memory
    /// state that drifted from the persister. Returns the number of jobs loaded.
    pub async fn load_persisted_jobs(&self) -> Result<usize, SchedulerError> {
        let count = self.batch().await.load_persisted_jobs().await?;
        tracing::info!(jobs = count, "Loaded persisted jobs");
        Ok(count)
    }

    /// Schedule a new job. The job starts out idle.
    pub async fn schedule(&self, job: Job) -> Result<(), SchedulerError> {
        self.batch().await.schedule(job).await
    }

    /// Return a running job to idle so it can be picked up again.
    pub async fn reschedule(&self, job_id: &JobId) -> Result<(), SchedulerError> {
        self.batch().await.reschedule(job_id).await
    }

    /// Mark a running job as failed.
    ///
    /// Failed jobs stay tracked and are never started again; remove them or
    /// schedule a new job to retry.
    pub async fn job_failed(&self, job_id: &JobId) -> Result<(), SchedulerError> {
        self.batch().await.job_failed(job_id).await
    }

    /// Remove a running job that completed successfully.
    pub async fn job_finished(&self, job_id: &JobId) -> Result<(), SchedulerError> {
        self.batch().await.job_finished(job_id).await
    }

    /// Remove a job regardless of its state.
    pub async fn remove(&self, job_id: &JobId) -> Result<(), SchedulerError> {
        self.batch().await.remove(job_id).await
    }

    /// Start the next runnable job, or return `None` right away if there is none.
    pub async fn try_start_next_runnable_job(
        &self,
        requester_id: &RequesterId,
    ) -> Result<Option<Job>, SchedulerError> {
        validate_requester(requester_id)?;
        self.batch()
            .await
            .try_start_next_runnable_job(requester_id)
            .await
    }

    /// Start the next runnable job, waiting at most `timeout` for one.
    ///
    /// Returns `None` when the timeout passes, when waiters are being
    /// unblocked, or when the admission gate cannot be entered in time.
    /// Dropping the returned future is equivalent to a timeout.
    pub async fn start_next_runnable_job(
        &self,
        requester_id: &RequesterId,
        timeout: Duration,
    ) -> Result<Option<Job>, SchedulerError> {
        validate_requester(requester_id)?;
        let deadline = Instant::now() + timeout;

        let _permit = match tokio::time::timeout_at(deadline, self.start_gate.acquire()).await {
            Ok(Ok(permit)) => permit,
            _ => return Ok(None),
        };

        let mut delay = INITIAL_BACKOFF;
        loop {
            let notified = self.changed.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            if self.unblock_waiters.load(Ordering::SeqCst) {
                return Ok(None);
            }

            let job = self
                .batch()
                .await
                .try_start_next_runnable_job(requester_id)
                .await?;
            if job.is_some() {
                return Ok(job);
            }

            let now = Instant::now();
            if now >= deadline {
                return Ok(None);
            }
            let _ = tokio::time::timeout(delay.min(deadline - now), notified).await;
            delay = (delay * 2).min(MAX_BACKOFF);
        }
    }

    /// Snapshot of all tracked jobs, including running and failed ones.
    pub async fn find_all_jobs(&self) -> Vec<ScheduledJob> {
        self.batch().await.find_all_jobs()
    }

    /// Snapshot of one tracked job.
    pub async fn find_by_id(&self, job_id: &JobId) -> Option<ScheduledJob> {
        self.batch().await.find_by_id(job_id)
    }

    /// Make blocked pulls return `None` immediately while `unblock` is set.
    ///
    /// Used during shutdown so workers drain promptly. Reset it to resume
    /// normal blocking.
    pub fn unblock_all_waiters_immediately(&self, unblock: bool) {
        self.unblock_waiters.store(unblock, Ordering::SeqCst);
        self.changed.notify_waiters();
    }

    /// Whether blocked pulls are currently being released.
    pub fn is_unblocking(&self) -> bool {
        self.unblock_waiters.load(Ordering::SeqCst)
    }
}

fn validate_requester(requester_id: &RequesterId) -> Result<(), SchedulerError> {
    if requester_id.is_empty() {
        return Err(SchedulerError::InvalidArgument(
            "requester id must not be empty".to_string(),
        ));
    }
    Ok(())
}
