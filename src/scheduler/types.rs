//! Scheduler type definitions.
//!
//! This module contains the error type shared by the scheduler and the
//! runnable job finders it drives.

use thiserror::Error;

use crate::core::job::JobState;
use crate::core::types::JobId;
use crate::storage::PersistError;

/// Errors that can occur in the scheduler.
#[derive(Debug, Error)]
pub enum SchedulerError {
    /// A job with the same id is already tracked.
    #[error("a job with id {0} already exists")]
    DuplicateJob(JobId),

    /// No job with the given id is tracked.
    #[error("no job exists with id {0}")]
    UnknownJob(JobId),

    /// The job is not in the state the operation requires.
    #[error("job {job_id} has state {actual} instead of {expected}")]
    IllegalJobState {
        job_id: JobId,
        actual: JobState,
        expected: JobState,
    },

    /// A required argument was missing or out of range.
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// The persister rejected an operation.
    #[error("persistence error: {0}")]
    Persistence(#[from] PersistError),
}

impl SchedulerError {
    pub(crate) fn illegal_state(job_id: &JobId, actual: JobState, expected: JobState) -> Self {
        SchedulerError::IllegalJobState {
            job_id: job_id.clone(),
            actual,
            expected,
        }
    }
}
