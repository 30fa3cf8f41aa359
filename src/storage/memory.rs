//! In-memory persister implementations.
//!
//! [`NoOpPersister`] discards everything and is the default when no
//! durability is needed. [`InMemoryPersister`] keeps jobs in a map and is
//! mainly a test double: it enforces the same key rules as a real store.

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::RwLock;

use super::{JobPersister, PersistError};
use crate::core::job::ScheduledJob;
use crate::core::types::JobId;

/// Persister that accepts every write and stores nothing.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoOpPersister;

impl NoOpPersister {
    /// Create a new no-op persister.
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl JobPersister for NoOpPersister {
    async fn create(&self, _job: &ScheduledJob) -> Result<(), PersistError> {
        Ok(())
    }

    async fn update(&self, _job: &ScheduledJob) -> Result<(), PersistError> {
        Ok(())
    }

    async fn remove(&self, _job_id: &JobId) -> Result<(), PersistError> {
        Ok(())
    }

    async fn find_all_jobs(&self) -> Result<Vec<ScheduledJob>, PersistError> {
        Ok(Vec::new())
    }
}

#[derive(Default)]
struct Jobs {
    by_id: HashMap<JobId, (u64, ScheduledJob)>,
    next_seq: u64,
}

/// In-memory persister backend.
///
/// Thread-safe storage using RwLock for concurrent access.
/// Data is not persisted across restarts.
pub struct InMemoryPersister {
    jobs: RwLock<Jobs>,
}

impl InMemoryPersister {
    /// Create a new empty in-memory persister.
    pub fn new() -> Self {
        Self {
            jobs: RwLock::new(Jobs::default()),
        }
    }

    /// Get a stored job by id.
    pub fn get(&self, job_id: &JobId) -> Result<ScheduledJob, PersistError> {
        let jobs = self.jobs.read().map_err(|_| PersistError::LockPoisoned)?;
        jobs.by_id
            .get(job_id)
            .map(|(_, job)| job.clone())
            .ok_or_else(|| PersistError::NotFound(format!("job: {}", job_id)))
    }

    /// Number of stored jobs.
    pub fn len(&self) -> usize {
        self.jobs.read().map(|jobs| jobs.by_id.len()).unwrap_or(0)
    }

    /// Whether nothing is stored.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for InMemoryPersister {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl JobPersister for InMemoryPersister {
    async fn create(&self, job: &ScheduledJob) -> Result<(), PersistError> {
        let mut jobs = self.jobs.write().map_err(|_| PersistError::LockPoisoned)?;
        if jobs.by_id.contains_key(job.id()) {
            return Err(PersistError::DuplicateKey(format!("job: {}", job.id())));
        }
        let seq = jobs.next_seq;
        jobs.next_seq += 1;
        jobs.by_id.insert(job.id().clone(), (seq, job.clone()));
        Ok(())
    }

    async fn update(&self, job: &ScheduledJob) -> Result<(), PersistError> {
        let mut jobs = self.jobs.write().map_err(|_| PersistError::LockPoisoned)?;
        let (_, stored) = jobs
            .by_id
            .get_mut(job.id())
            .ok_or_else(|| PersistError::NotFound(format!("job: {}", job.id())))?;
        *stored = job.clone();
        Ok(())
    }

    async fn remove(&self, job_id: &JobId) -> Result<(), PersistError> {
        let mut jobs = self.jobs.write().map_err(|_| PersistError::LockPoisoned)?;
        jobs.by_id
            .remove(job_id)
            .ok_or_else(|| PersistError::NotFound(format!("job: {}", job_id)))?;
        Ok(())
    }

    async fn find_all_jobs(&self) -> Result<Vec<ScheduledJob>, PersistError> {
        let jobs = self.jobs.read().map_err(|_| PersistError::LockPoisoned)?;
        let mut result: Vec<_> = jobs.by_id.values().cloned().collect();
        result.sort_by_key(|(seq, _)| *seq);
        Ok(result.into_iter().map(|(_, job)| job).collect())
    }
}
