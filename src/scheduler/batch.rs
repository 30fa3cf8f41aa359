//! Locked mutation scope over the scheduler.
//!
//! A [`SchedulerBatch`] owns the scheduler lock for as long as it lives.
//! Every mutation first validates against the finder, then writes through
//! the persister, and only then updates the finder. A persister failure
//! therefore leaves the in-memory state untouched.

use chrono::Utc;
use tokio::sync::{MutexGuard, Notify};

use super::types::SchedulerError;
use crate::core::job::{Job, JobState, ScheduledJob};
use crate::core::types::{JobId, RequesterId};
use crate::finder::RunnableJobFinder;
use crate::storage::JobPersister;

/// Exclusive access to the scheduler state.
///
/// Obtained from [`JobScheduler::batch`](super::JobScheduler::batch).
/// Concurrent pulls are held off until the batch is dropped. Dropping a
/// batch that changed anything wakes the requester waiting for a runnable
/// job.
pub struct SchedulerBatch<'a, P: JobPersister> {
    finder: MutexGuard<'a, Box<dyn RunnableJobFinder>>,
    persister: &'a P,
    changed: &'a Notify,
    dirty: bool,
}

impl<'a, P: JobPersister> SchedulerBatch<'a, P> {
    pub(crate) fn new(
        finder: MutexGuard<'a, Box<dyn RunnableJobFinder>>,
        persister: &'a P,
        changed: &'a Notify,
    ) -> Self {
        Self {
            finder,
            persister,
            changed,
            dirty: false,
        }
    }

    /// Add a new idle job.
    pub async fn schedule(&mut self, job: Job) -> Result<(), SchedulerError> {
        if self.finder.find_by_id(job.id()).is_some() {
            return Err(SchedulerError::DuplicateJob(job.id().clone()));
        }
        let scheduled = ScheduledJob::new(job);
        self.persister.create(&scheduled).await?;
        tracing::debug!(job_id = %scheduled.id(), job_type = scheduled.job().job_type(), "Scheduled job");
        self.dirty = true;
        self.finder.add_job(scheduled)
    }

    /// Return a running job to idle.
    pub async fn reschedule(&mut self, job_id: &JobId) -> Result<(), SchedulerError> {
        let current = self.require_state(job_id, JobState::Running)?;
        let rescheduled = current.on_reschedule();
        self.persister.update(&rescheduled).await?;
        tracing::debug!(job_id = %job_id, "Rescheduled job");
        self.dirty = true;
        self.finder.update_job(rescheduled)
    }

    /// Mark a running job as failed. The job stays tracked.
    pub async fn job_failed(&mut self, job_id: &JobId) -> Result<(), SchedulerError> {
        let current = self.require_state(job_id, JobState::Running)?;
        let failed = current.on_error();
        self.persister.update(&failed).await?;
        tracing::debug!(job_id = %job_id, "Job failed");
        self.dirty = true;
        self.finder.update_job(failed)
    }

    /// Remove a running job that completed successfully.
    pub async fn job_finished(&mut self, job_id: &JobId) -> Result<(), SchedulerError> {
        self.require_state(job_id, JobState::Running)?;
        self.persister.remove(job_id).await?;
        tracing::debug!(job_id = %job_id, "Job finished");
        self.dirty = true;
        self.finder.remove_job(job_id).map(|_| ())
    }

    /// Remove a job whatever its state.
    ///
    /// Used to drop jobs whose requester died, to abandon failed jobs and to
    /// cancel jobs scheduled in the future.
    pub async fn remove(&mut self, job_id: &JobId) -> Result<(), SchedulerError> {
        self.require_known(job_id)?;
        self.persister.remove(job_id).await?;
        tracing::debug!(job_id = %job_id, "Removed job");
        self.dirty = true;
        self.finder.remove_job(job_id).map(|_| ())
    }

    /// Start the next runnable job for `requester_id`, if there is one.
    pub async fn try_start_next_runnable_job(
        &mut self,
        requester_id: &RequesterId,
    ) -> Result<Option<Job>, SchedulerError> {
        let now = Utc::now();
        let started = {
            let Some(candidate) = self.finder.find_next_runnable_job(now) else {
                return Ok(None);
            };
            // The finder contract only allows idle candidates.
            if candidate.state() != JobState::Idle {
                return Err(SchedulerError::illegal_state(
                    candidate.id(),
                    candidate.state(),
                    JobState::Idle,
                ));
            }
            let timeout_at = self.finder.timeout_instant(candidate.job(), now);
            candidate.clone().on_start(requester_id.clone(), timeout_at)
        };
        self.persister.update(&started).await?;
        tracing::debug!(job_id = %started.id(), requester_id = %requester_id, "Started job");
        let job = started.job().clone();
        self.finder.update_job(started)?;
        Ok(Some(job))
    }

    /// Snapshot of all tracked jobs.
    pub fn find_all_jobs(&self) -> Vec<ScheduledJob> {
        self.finder.find_all_jobs()
    }

    /// Snapshot of one tracked job.
    pub fn find_by_id(&self, job_id: &JobId) -> Option<ScheduledJob> {
        self.finder.find_by_id(job_id).cloned()
    }

    /// Replace every tracked job with the persisted ones.
    ///
    /// If the persister cannot be read the tracked jobs are left as they were.
    pub async fn load_persisted_jobs(&mut self) -> Result<usize, SchedulerError> {
        let jobs = self.persister.find_all_jobs().await?;
        let count = jobs.len();
        self.dirty = true;
        self.finder.remove_all_scheduled_jobs();
        for job in jobs {
            self.finder.add_job(job)?;
        }
        Ok(count)
    }

    fn require_known(&self, job_id: &JobId) -> Result<ScheduledJob, SchedulerError> {
        self.finder
            .find_by_id(job_id)
            .cloned()
            .ok_or_else(|| SchedulerError::UnknownJob(job_id.clone()))
    }

    fn require_state(
        &self,
        job_id: &JobId,
        expected: JobState,
    ) -> Result<ScheduledJob, SchedulerError> {
        let current = self.require_known(job_id)?;
        if current.state() != expected {
            return Err(SchedulerError::illegal_state(
                job_id,
                current.state(),
                expected,
            ));
        }
        Ok(current)
    }
}

impl<P: JobPersister> Drop for SchedulerBatch<'_, P> {
    fn drop(&mut self) {
        if self.dirty {
            self.changed.notify_waiters();
        }
    }
}
