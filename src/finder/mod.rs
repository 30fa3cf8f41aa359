//! Runnable job selection.
//!
//! A [`RunnableJobFinder`] holds the set of scheduled jobs and decides which
//! one a requester gets next. Finders are not synchronized: the
//! [`JobScheduler`](crate::scheduler::JobScheduler) serializes every call
//! into them under its own lock.

mod fifo;

pub use fifo::FifoRunnableJobFinder;

use chrono::{DateTime, Utc};

use crate::core::job::{Job, ScheduledJob};
use crate::core::types::JobId;
use crate::scheduler::SchedulerError;

/// Holds a set of scheduled jobs and picks the next one to run.
pub trait RunnableJobFinder: Send {
    /// Start tracking a job.
    ///
    /// Fails with [`SchedulerError::DuplicateJob`] if the id is already tracked.
    fn add_job(&mut self, job: ScheduledJob) -> Result<(), SchedulerError>;

    /// Look up a tracked job.
    fn find_by_id(&self, job_id: &JobId) -> Option<&ScheduledJob>;

    /// Replace a tracked job with a new value for the same id.
    ///
    /// Fails with [`SchedulerError::UnknownJob`] if the id is not tracked.
    fn update_job(&mut self, job: ScheduledJob) -> Result<(), SchedulerError>;

    /// Stop tracking a job and return it.
    ///
    /// Fails with [`SchedulerError::UnknownJob`] if the id is not tracked.
    fn remove_job(&mut self, job_id: &JobId) -> Result<ScheduledJob, SchedulerError>;

    /// Snapshot of all tracked jobs.
    fn find_all_jobs(&self) -> Vec<ScheduledJob>;

    /// Forget every tracked job.
    fn remove_all_scheduled_jobs(&mut self);

    /// The job that should be started next at `now`, if any.
    ///
    /// Implementations must only return idle jobs.
    fn find_next_runnable_job(&self, now: DateTime<Utc>) -> Option<&ScheduledJob>;

    /// Deadline recorded on a job that is started at `now`.
    fn timeout_instant(&self, job: &Job, now: DateTime<Utc>) -> DateTime<Utc>;
}
