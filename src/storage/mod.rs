//! Durable storage for scheduled jobs.
//!
//! This module provides the [`JobPersister`] abstraction the scheduler
//! writes through, with pluggable backends (no-op, in-memory, SQLite).

mod memory;
#[cfg(feature = "sqlite")]
mod sqlite;

pub use memory::{InMemoryPersister, NoOpPersister};
#[cfg(feature = "sqlite")]
pub use sqlite::SqliteStorage;

use async_trait::async_trait;
use std::sync::Arc;
use thiserror::Error;

use crate::core::job::ScheduledJob;
use crate::core::types::JobId;

/// Errors that can occur during persistence operations.
#[derive(Debug, Error)]
pub enum PersistError {
    /// The requested job was not found.
    #[error("not found: {0}")]
    NotFound(String),

    /// A job with the same id was already stored.
    #[error("duplicate key: {0}")]
    DuplicateKey(String),

    /// Storage lock was poisoned.
    #[error("storage lock poisoned")]
    LockPoisoned,

    /// A stored value could not be decoded.
    #[error("serialization error: {0}")]
    Serialization(String),

    /// Generic storage error.
    #[error("storage error: {0}")]
    Other(String),
}

/// Durable storage for scheduled jobs.
///
/// The scheduler calls these methods while holding its lock, so a persister
/// is never called concurrently by the same scheduler. Failures must be
/// reported, never swallowed.
#[async_trait]
pub trait JobPersister: Send + Sync {
    /// Store a newly scheduled job.
    async fn create(&self, job: &ScheduledJob) -> Result<(), PersistError>;

    /// Replace the stored state of an existing job.
    async fn update(&self, job: &ScheduledJob) -> Result<(), PersistError>;

    /// Delete a stored job.
    async fn remove(&self, job_id: &JobId) -> Result<(), PersistError>;

    /// Snapshot of every stored job, in the order they were created.
    async fn find_all_jobs(&self) -> Result<Vec<ScheduledJob>, PersistError>;
}

#[async_trait]
impl<P: JobPersister + ?Sized> JobPersister for Arc<P> {
    async fn create(&self, job: &ScheduledJob) -> Result<(), PersistError> {
        (**self).create(job).await
    }

    async fn update(&self, job: &ScheduledJob) -> Result<(), PersistError> {
        (**self).update(job).await
    }

    async fn remove(&self, job_id: &JobId) -> Result<(), PersistError> {
        (**self).remove(job_id).await
    }

    async fn find_all_jobs(&self) -> Result<Vec<ScheduledJob>, PersistError> {
        (**self).find_all_jobs().await
    }
}
