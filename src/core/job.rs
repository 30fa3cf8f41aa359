//! Job and scheduled-job data model.
//!
//! A [`Job`] is the immutable description of a unit of work. A
//! [`ScheduledJob`] wraps a job together with the state the scheduler owns
//! for it. State transitions consume the scheduled job and return the new
//! value, so a copy handed out by the scheduler never changes underneath
//! its holder.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::hash::{Hash, Hasher};
use std::str::FromStr;
use thiserror::Error;

use super::types::{JobId, RequesterId};

/// A unit of work submitted to the scheduler.
///
/// Equality and hashing consider the id only.
#[derive(Clone, Serialize, Deserialize)]
pub struct Job {
    id: JobId,
    job_type: String,
    data: Option<Vec<u8>>,
    scheduled_at: Option<DateTime<Utc>>,
}

impl Job {
    /// Create a job that is eligible immediately and carries no payload.
    pub fn new(id: impl Into<JobId>, job_type: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            job_type: job_type.into(),
            data: None,
            scheduled_at: None,
        }
    }

    /// Create a job that only carries an id.
    ///
    /// Used for commands that reference an existing job.
    pub fn reference(id: impl Into<JobId>) -> Self {
        Self::new(id, "")
    }

    /// Set the opaque payload.
    pub fn with_data(mut self, data: impl Into<Vec<u8>>) -> Self {
        self.data = Some(data.into());
        self
    }

    /// Set the payload from an optional value.
    pub fn with_optional_data(mut self, data: Option<Vec<u8>>) -> Self {
        self.data = data;
        self
    }

    /// Set the earliest time the job may run.
    pub fn with_scheduled_at(mut self, at: DateTime<Utc>) -> Self {
        self.scheduled_at = Some(at);
        self
    }

    /// Set the earliest run time from an optional value.
    pub fn with_optional_scheduled_at(mut self, at: Option<DateTime<Utc>>) -> Self {
        self.scheduled_at = at;
        self
    }

    /// Get the job id.
    pub fn id(&self) -> &JobId {
        &self.id
    }

    /// Get the type tag used to select a handler.
    pub fn job_type(&self) -> &str {
        &self.job_type
    }

    /// Get the payload, if any.
    pub fn data(&self) -> Option<&[u8]> {
        self.data.as_deref()
    }

    /// Get the earliest run time. `None` means immediately eligible.
    pub fn scheduled_at(&self) -> Option<DateTime<Utc>> {
        self.scheduled_at
    }

    /// Whether the job may run at `now`.
    pub fn is_due(&self, now: DateTime<Utc>) -> bool {
        self.scheduled_at.is_none_or(|at| at <= now)
    }
}

impl PartialEq for Job {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl Eq for Job {}

impl Hash for Job {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.id.hash(state);
    }
}

impl fmt::Debug for Job {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Job")
            .field("id", &self.id)
            .field("job_type", &self.job_type)
            .field("data_len", &self.data.as_ref().map(Vec::len))
            .field("scheduled_at", &self.scheduled_at)
            .finish()
    }
}

/// Error returned when parsing a [`JobState`] from its stored form.
#[derive(Debug, Error)]
#[error("unknown job state: {0}")]
pub struct ParseJobStateError(String);

/// Execution state of a scheduled job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum JobState {
    /// Waiting to be started.
    Idle,
    /// Started by a requester.
    Running,
    /// The last execution failed. Not retried automatically.
    Error,
}

impl JobState {
    /// Stored representation of the state.
    pub fn as_str(&self) -> &'static str {
        match self {
            JobState::Idle => "IDLE",
            JobState::Running => "RUNNING",
            JobState::Error => "ERROR",
        }
    }
}

impl fmt::Display for JobState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for JobState {
    type Err = ParseJobStateError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "IDLE" => Ok(JobState::Idle),
            "RUNNING" => Ok(JobState::Running),
            "ERROR" => Ok(JobState::Error),
            other => Err(ParseJobStateError(other.to_string())),
        }
    }
}

/// A job plus the execution state owned by the scheduler.
///
/// `requester_id` and `timeout_at` are only set while the job is running.
/// The timeout is informational: nothing in the scheduler reclaims expired
/// jobs on its own.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScheduledJob {
    job: Job,
    state: JobState,
    requester_id: Option<RequesterId>,
    timeout_at: Option<DateTime<Utc>>,
}

impl ScheduledJob {
    /// Wrap a newly scheduled job. The state is idle.
    pub fn new(job: Job) -> Self {
        Self {
            job,
            state: JobState::Idle,
            requester_id: None,
            timeout_at: None,
        }
    }

    /// Rebuild a scheduled job from stored parts.
    pub fn from_parts(
        job: Job,
        state: JobState,
        requester_id: Option<RequesterId>,
        timeout_at: Option<DateTime<Utc>>,
    ) -> Self {
        Self {
            job,
            state,
            requester_id,
            timeout_at,
        }
    }

    /// Get the wrapped job.
    pub fn job(&self) -> &Job {
        &self.job
    }

    /// Unwrap into the job.
    pub fn into_job(self) -> Job {
        self.job
    }

    /// Shorthand for `self.job().id()`.
    pub fn id(&self) -> &JobId {
        self.job.id()
    }

    /// Get the current state.
    pub fn state(&self) -> JobState {
        self.state
    }

    /// Get the requester that is running the job.
    pub fn requester_id(&self) -> Option<&RequesterId> {
        self.requester_id.as_ref()
    }

    /// Get the time after which the running job is considered expired.
    pub fn timeout_at(&self) -> Option<DateTime<Utc>> {
        self.timeout_at
    }

    /// Transition to running for `requester_id`.
    pub fn on_start(self, requester_id: RequesterId, timeout_at: DateTime<Utc>) -> Self {
        Self {
            state: JobState::Running,
            requester_id: Some(requester_id),
            timeout_at: Some(timeout_at),
            ..self
        }
    }

    /// Transition back to idle so the job can be picked up again.
    pub fn on_reschedule(self) -> Self {
        Self {
            state: JobState::Idle,
            requester_id: None,
            timeout_at: None,
            ..self
        }
    }

    /// Transition to error.
    pub fn on_error(self) -> Self {
        Self {
            state: JobState::Error,
            requester_id: None,
            timeout_at: None,
            ..self
        }
    }
}

impl PartialEq for ScheduledJob {
    fn eq(&self, other: &Self) -> bool {
        self.job == other.job
    }
}

impl Eq for ScheduledJob {}
