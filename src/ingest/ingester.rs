//! Applies pending commands to the scheduler.

use std::sync::Arc;
use thiserror::Error;

use super::{CommandKind, CommandStore, CommandStoreError, JobCommand};
use crate::core::types::CommandId;
use crate::scheduler::{JobScheduler, SchedulerBatch, SchedulerError};
use crate::storage::JobPersister;

/// Errors that can occur while ingesting commands.
#[derive(Debug, Error)]
pub enum IngestError {
    /// Applying a command to the scheduler failed.
    #[error("failed to apply command: {0}")]
    Scheduler(#[from] SchedulerError),

    /// Reading or deleting commands failed.
    #[error("command store error: {0}")]
    Store(#[from] CommandStoreError),

    /// Ingestion failed and reloading the persisted jobs failed too.
    #[error("ingestion failed ({source}) and resync failed: {resync}")]
    Resync {
        #[source]
        source: Box<IngestError>,
        resync: SchedulerError,
    },

    /// The ingester loop is already running.
    #[error("ingester is already running")]
    AlreadyRunning,

    /// The ingester loop is not running.
    #[error("ingester is not running")]
    NotRunning,
}

/// Reads pending commands and applies them to a [`JobScheduler`].
///
/// A read batch is applied inside one [`SchedulerBatch`], and the applied
/// commands are deleted before the batch is released. If a command fails,
/// the commands applied before it are still deleted, and the scheduler
/// reloads its jobs from the persister so memory never drifts from durable
/// state. The failed command and the rest of the batch stay pending and are
/// retried on the next run.
pub struct JobIngester<P: JobPersister, C: CommandStore> {
    scheduler: Arc<JobScheduler<P>>,
    commands: C,
    batch_size: Option<usize>,
}

impl<P: JobPersister, C: CommandStore> JobIngester<P, C> {
    /// Create an ingester that reads every pending command per run.
    pub fn new(scheduler: Arc<JobScheduler<P>>, commands: C) -> Self {
        Self {
            scheduler,
            commands,
            batch_size: None,
        }
    }

    /// Limit how many commands one run reads.
    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = Some(batch_size);
        self
    }

    /// Get the command store.
    pub fn commands(&self) -> &C {
        &self.commands
    }

    /// Apply one batch of pending commands.
    ///
    /// Returns the number of commands applied; 0 when nothing was pending.
    pub async fn ingest(&self) -> Result<usize, IngestError> {
        let pending = self.commands.find_pending(self.batch_size).await?;
        if pending.is_empty() {
            return Ok(0);
        }

        match self.apply(&pending).await {
            Ok(applied) => {
                tracing::info!(commands = applied, "Ingested job commands");
                Ok(applied)
            }
            Err(e) => {
                tracing::warn!(error = %e, "Ingestion failed, reloading persisted jobs");
                match self.scheduler.load_persisted_jobs().await {
                    Ok(_) => Err(e),
                    Err(resync) => {
                        tracing::error!(error = %resync, "Failed to reload persisted jobs");
                        Err(IngestError::Resync {
                            source: Box::new(e),
                            resync,
                        })
                    }
                }
            }
        }
    }

    async fn apply(&self, pending: &[JobCommand]) -> Result<usize, IngestError> {
        let mut batch = self.scheduler.batch().await;
        let mut applied: Vec<CommandId> = Vec::with_capacity(pending.len());

        if let Err(e) = apply_each(&mut batch, pending, &mut applied).await {
            // The applied prefix already reached the persister; replaying it
            // would fail on every later run.
            if !applied.is_empty() {
                match self.commands.delete(&applied).await {
                    Ok(deleted) => {
                        tracing::debug!(commands = deleted, "Deleted applied prefix of failed batch")
                    }
                    Err(delete) => {
                        tracing::warn!(error = %delete, "Failed to delete applied prefix of failed batch")
                    }
                }
            }
            return Err(e);
        }

        let deleted = self.commands.delete(&applied).await?;
        if deleted != applied.len() {
            return Err(CommandStoreError::DeleteMismatch {
                requested: applied.len(),
                deleted,
            }
            .into());
        }
        Ok(applied.len())
    }
}

/// Apply commands in order, recording the id of each one that took effect.
async fn apply_each<P: JobPersister>(
    batch: &mut SchedulerBatch<'_, P>,
    pending: &[JobCommand],
    applied: &mut Vec<CommandId>,
) -> Result<(), IngestError> {
    for command in pending {
        let command_id = command.command_id().ok_or_else(|| {
            CommandStoreError::Other(format!(
                "{} command for job {} has no command id",
                command.kind(),
                command.job_id()
            ))
        })?;
        apply_command(batch, command).await?;
        applied.push(command_id);
    }
    Ok(())
}

async fn apply_command<P: JobPersister>(
    batch: &mut SchedulerBatch<'_, P>,
    command: &JobCommand,
) -> Result<(), SchedulerError> {
    match command.kind() {
        CommandKind::Schedule => batch.schedule(command.job().clone()).await,
        CommandKind::Reschedule => batch.reschedule(command.job_id()).await,
        CommandKind::JobFinished => batch.job_finished(command.job_id()).await,
        CommandKind::JobFailed => batch.job_failed(command.job_id()).await,
        CommandKind::Remove => batch.remove(command.job_id()).await,
    }
}
