//! Durable command log and the ingester that applies it.
//!
//! Producers never mutate the scheduler directly. They append a
//! [`JobCommand`] to a [`CommandStore`]; the [`JobIngester`] periodically
//! reads the pending commands, applies them to the scheduler in one batch
//! and deletes them.

mod ingester;
mod memory;
mod runner;

pub use ingester::{IngestError, JobIngester};
pub use memory::InMemoryCommandLog;
pub use runner::IngesterRunner;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use thiserror::Error;

use crate::core::job::Job;
use crate::core::types::{CommandId, JobId};

/// Errors that can occur in a command store.
#[derive(Debug, Error)]
pub enum CommandStoreError {
    /// Storage lock was poisoned.
    #[error("command store lock poisoned")]
    LockPoisoned,

    /// Fewer (or more) rows were deleted than requested.
    #[error("deleted {deleted} of {requested} job commands")]
    DeleteMismatch { requested: usize, deleted: usize },

    /// A stored command could not be decoded.
    #[error("serialization error: {0}")]
    Serialization(String),

    /// Generic storage error.
    #[error("command store error: {0}")]
    Other(String),
}

/// The intent carried by a command.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum CommandKind {
    /// Add a new idle job.
    Schedule,
    /// Return a running job to idle.
    Reschedule,
    /// A running job completed; remove it.
    JobFinished,
    /// A running job failed; mark it as error.
    JobFailed,
    /// Remove a job regardless of its state.
    Remove,
}

impl CommandKind {
    /// Stored representation of the command.
    pub fn as_str(&self) -> &'static str {
        match self {
            CommandKind::Schedule => "SCHEDULE",
            CommandKind::Reschedule => "RESCHEDULE",
            CommandKind::JobFinished => "JOB_FINISHED",
            CommandKind::JobFailed => "JOB_FAILED",
            CommandKind::Remove => "REMOVE",
        }
    }
}

impl fmt::Display for CommandKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for CommandKind {
    type Err = CommandStoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "SCHEDULE" => Ok(CommandKind::Schedule),
            "RESCHEDULE" => Ok(CommandKind::Reschedule),
            "JOB_FINISHED" => Ok(CommandKind::JobFinished),
            "JOB_FAILED" => Ok(CommandKind::JobFailed),
            "REMOVE" => Ok(CommandKind::Remove),
            other => Err(CommandStoreError::Serialization(format!(
                "unknown command: {}",
                other
            ))),
        }
    }
}

/// A queued intent against the scheduler.
///
/// Only [`CommandKind::Schedule`] carries a full job; the other kinds only
/// need the job id.
#[derive(Debug, Clone)]
pub struct JobCommand {
    command_id: Option<CommandId>,
    kind: CommandKind,
    job: Job,
}

impl JobCommand {
    /// Schedule `job`.
    pub fn schedule(job: Job) -> Self {
        Self::new(CommandKind::Schedule, job)
    }

    /// Reschedule the running job with `job_id`.
    pub fn reschedule(job_id: impl Into<JobId>) -> Self {
        Self::new(CommandKind::Reschedule, Job::reference(job_id))
    }

    /// Report that the job with `job_id` finished successfully.
    pub fn job_finished(job_id: impl Into<JobId>) -> Self {
        Self::new(CommandKind::JobFinished, Job::reference(job_id))
    }

    /// Report that the job with `job_id` failed.
    pub fn job_failed(job_id: impl Into<JobId>) -> Self {
        Self::new(CommandKind::JobFailed, Job::reference(job_id))
    }

    /// Remove the job with `job_id`.
    pub fn remove(job_id: impl Into<JobId>) -> Self {
        Self::new(CommandKind::Remove, Job::reference(job_id))
    }

    /// Create a command that has not been stored yet.
    pub fn new(kind: CommandKind, job: Job) -> Self {
        Self {
            command_id: None,
            kind,
            job,
        }
    }

    /// Attach the id assigned by the store.
    pub fn with_command_id(mut self, command_id: CommandId) -> Self {
        self.command_id = Some(command_id);
        self
    }

    /// Id assigned by the store; `None` before the command is appended.
    pub fn command_id(&self) -> Option<CommandId> {
        self.command_id
    }

    /// Get the command kind.
    pub fn kind(&self) -> CommandKind {
        self.kind
    }

    /// Get the job the command refers to.
    pub fn job(&self) -> &Job {
        &self.job
    }

    /// Get the referenced job id.
    pub fn job_id(&self) -> &JobId {
        self.job.id()
    }
}

/// Durable, ordered queue of pending commands.
#[async_trait]
pub trait CommandStore: Send + Sync {
    /// Append a command and return the id assigned to it.
    async fn append(&self, command: JobCommand) -> Result<CommandId, CommandStoreError>;

    /// Pending commands in ascending command id order, at most `limit`.
    async fn find_pending(&self, limit: Option<usize>)
    -> Result<Vec<JobCommand>, CommandStoreError>;

    /// Delete commands by id and return how many rows were actually deleted.
    async fn delete(&self, command_ids: &[CommandId]) -> Result<usize, CommandStoreError>;
}

#[async_trait]
impl<C: CommandStore + ?Sized> CommandStore for Arc<C> {
    async fn append(&self, command: JobCommand) -> Result<CommandId, CommandStoreError> {
        (**self).append(command).await
    }

    async fn find_pending(
        &self,
        limit: Option<usize>,
    ) -> Result<Vec<JobCommand>, CommandStoreError> {
        (**self).find_pending(limit).await
    }

    async fn delete(&self, command_ids: &[CommandId]) -> Result<usize, CommandStoreError> {
        (**self).delete(command_ids).await
    }
}
