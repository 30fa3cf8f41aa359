//! First-in, first-out runnable job finder.

use chrono::{DateTime, Duration, Utc};
use std::collections::HashMap;

use super::RunnableJobFinder;
use crate::core::job::{Job, JobState, ScheduledJob};
use crate::core::types::JobId;
use crate::scheduler::SchedulerError;

/// Default time a started job may run before it counts as expired.
const DEFAULT_TIMEOUT_WINDOW_SECS: i64 = 60 * 60;

struct Entry {
    /// Insertion sequence; breaks ties between equal `scheduled_at` values.
    seq: u64,
    job: ScheduledJob,
}

/// Picks the idle, due job with the earliest `scheduled_at`.
///
/// Jobs without a `scheduled_at` count as earlier than any instant. Jobs
/// with equal times are picked in insertion order. Updating a job keeps its
/// original position.
pub struct FifoRunnableJobFinder {
    jobs: HashMap<JobId, Entry>,
    next_seq: u64,
    timeout_window: Duration,
}

impl FifoRunnableJobFinder {
    /// Create an empty finder with a one hour timeout window.
    pub fn new() -> Self {
        Self {
            jobs: HashMap::new(),
            next_seq: 0,
            timeout_window: Duration::seconds(DEFAULT_TIMEOUT_WINDOW_SECS),
        }
    }

    /// Set how long a started job may run before it counts as expired.
    pub fn with_timeout_window(mut self, window: Duration) -> Self {
        self.timeout_window = window;
        self
    }

    /// Number of tracked jobs.
    pub fn len(&self) -> usize {
        self.jobs.len()
    }

    /// Whether no jobs are tracked.
    pub fn is_empty(&self) -> bool {
        self.jobs.is_empty()
    }
}

impl Default for FifoRunnableJobFinder {
    fn default() -> Self {
        Self::new()
    }
}

impl RunnableJobFinder for FifoRunnableJobFinder {
    fn add_job(&mut self, job: ScheduledJob) -> Result<(), SchedulerError> {
        if self.jobs.contains_key(job.id()) {
            return Err(SchedulerError::DuplicateJob(job.id().clone()));
        }
        let seq = self.next_seq;
        self.next_seq += 1;
        self.jobs.insert(job.id().clone(), Entry { seq, job });
        Ok(())
    }

    fn find_by_id(&self, job_id: &JobId) -> Option<&ScheduledJob> {
        self.jobs.get(job_id).map(|entry| &entry.job)
    }

    fn update_job(&mut self, job: ScheduledJob) -> Result<(), SchedulerError> {
        let entry = self
            .jobs
            .get_mut(job.id())
            .ok_or_else(|| SchedulerError::UnknownJob(job.id().clone()))?;
        entry.job = job;
        Ok(())
    }

    fn remove_job(&mut self, job_id: &JobId) -> Result<ScheduledJob, SchedulerError> {
        self.jobs
            .remove(job_id)
            .map(|entry| entry.job)
            .ok_or_else(|| SchedulerError::UnknownJob(job_id.clone()))
    }

    fn find_all_jobs(&self) -> Vec<ScheduledJob> {
        let mut entries: Vec<&Entry> = self.jobs.values().collect();
        entries.sort_by_key(|entry| entry.seq);
        entries.into_iter().map(|entry| entry.job.clone()).collect()
    }

    fn remove_all_scheduled_jobs(&mut self) {
        self.jobs.clear();
    }

    fn find_next_runnable_job(&self, now: DateTime<Utc>) -> Option<&ScheduledJob> {
        self.jobs
            .values()
            .filter(|entry| entry.job.state() == JobState::Idle && entry.job.job().is_due(now))
            .min_by_key(|entry| (entry.job.job().scheduled_at(), entry.seq))
            .map(|entry| &entry.job)
    }

    fn timeout_instant(&self, _job: &Job, now: DateTime<Utc>) -> DateTime<Utc> {
        now + self.timeout_window
    }
}
