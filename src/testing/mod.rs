//! Testing utilities for users of the jobsched library.
//!
//! This module provides helpers for testing code built on the scheduler:
//!
//! - [`FailingPersister`]: An in-memory persister with injectable failures
//! - [`RecordingHandler`]: A handler that records every job it executes
//! - [`FailingHandler`]: A handler that fails N times then succeeds
//! - [`wait_until`]: Polls an async condition until it holds or times out

use async_trait::async_trait;
use std::future::Future;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use crate::core::job::{Job, ScheduledJob};
use crate::core::types::JobId;
use crate::execution::{HandlerError, JobHandler};
use crate::storage::{InMemoryPersister, JobPersister, PersistError};

/// An in-memory persister whose operations can be made to fail.
///
/// Every call is counted, including the ones that fail.
///
/// # Example
///
/// ```
/// use jobsched::testing::FailingPersister;
///
/// let persister = FailingPersister::new();
/// persister.set_fail_update(true);
/// assert_eq!(persister.call_count(), 0);
/// ```
#[derive(Default)]
pub struct FailingPersister {
    inner: InMemoryPersister,
    fail_create: AtomicBool,
    fail_update: AtomicBool,
    fail_remove: AtomicBool,
    fail_find_all: AtomicBool,
    calls: AtomicUsize,
}

impl FailingPersister {
    /// Create a persister that does not fail yet.
    pub fn new() -> Self {
        Self::default()
    }

    /// Make `create` fail.
    pub fn set_fail_create(&self, fail: bool) {
        self.fail_create.store(fail, Ordering::SeqCst);
    }

    /// Make `update` fail.
    pub fn set_fail_update(&self, fail: bool) {
        self.fail_update.store(fail, Ordering::SeqCst);
    }

    /// Make `remove` fail.
    pub fn set_fail_remove(&self, fail: bool) {
        self.fail_remove.store(fail, Ordering::SeqCst);
    }

    /// Make `find_all_jobs` fail.
    pub fn set_fail_find_all(&self, fail: bool) {
        self.fail_find_all.store(fail, Ordering::SeqCst);
    }

    /// Number of persister calls so far.
    pub fn call_count(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    /// The persister holding the jobs that were written successfully.
    pub fn inner(&self) -> &InMemoryPersister {
        &self.inner
    }

    fn check(&self, flag: &AtomicBool, operation: &str) -> Result<(), PersistError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if flag.load(Ordering::SeqCst) {
            return Err(PersistError::Other(format!("injected {} error", operation)));
        }
        Ok(())
    }
}

#[async_trait]
impl JobPersister for FailingPersister {
    async fn create(&self, job: &ScheduledJob) -> Result<(), PersistError> {
        self.check(&self.fail_create, "create")?;
        self.inner.create(job).await
    }

    async fn update(&self, job: &ScheduledJob) -> Result<(), PersistError> {
        self.check(&self.fail_update, "update")?;
        self.inner.update(job).await
    }

    async fn remove(&self, job_id: &JobId) -> Result<(), PersistError> {
        self.check(&self.fail_remove, "remove")?;
        self.inner.remove(job_id).await
    }

    async fn find_all_jobs(&self) -> Result<Vec<ScheduledJob>, PersistError> {
        self.check(&self.fail_find_all, "find_all_jobs")?;
        self.inner.find_all_jobs().await
    }
}

/// A handler that records the jobs it executes and always succeeds.
///
/// Clones share the same record, so one clone can be registered while the
/// test keeps another.
#[derive(Clone, Default)]
pub struct RecordingHandler {
    jobs: Arc<Mutex<Vec<Job>>>,
}

impl RecordingHandler {
    /// Create a handler with an empty record.
    pub fn new() -> Self {
        Self::default()
    }

    /// Jobs executed so far, in execution order.
    pub fn jobs(&self) -> Vec<Job> {
        self.jobs.lock().map(|jobs| jobs.clone()).unwrap_or_default()
    }

    /// Number of jobs executed so far.
    pub fn count(&self) -> usize {
        self.jobs.lock().map(|jobs| jobs.len()).unwrap_or(0)
    }
}

#[async_trait]
impl JobHandler for RecordingHandler {
    async fn handle(&self, job: &Job) -> Result<(), HandlerError> {
        if let Ok(mut jobs) = self.jobs.lock() {
            jobs.push(job.clone());
        }
        Ok(())
    }
}

/// A handler that fails a configurable number of times before succeeding.
///
/// # Example
///
/// ```
/// use jobsched::testing::FailingHandler;
///
/// // Fails 2 times, then succeeds on the 3rd attempt
/// let handler = FailingHandler::new(2);
/// ```
pub struct FailingHandler {
    failures_remaining: AtomicUsize,
    calls: AtomicUsize,
    error_message: String,
}

impl FailingHandler {
    /// Create a handler that fails `fail_count` times then succeeds.
    pub fn new(fail_count: usize) -> Self {
        Self::with_error(fail_count, "intentional test failure")
    }

    /// Create a handler that fails with a custom error message.
    pub fn with_error(fail_count: usize, message: impl Into<String>) -> Self {
        Self {
            failures_remaining: AtomicUsize::new(fail_count),
            calls: AtomicUsize::new(0),
            error_message: message.into(),
        }
    }

    /// A handler that never succeeds.
    pub fn always() -> Self {
        Self::new(usize::MAX)
    }

    /// Number of times the handler has been called.
    pub fn call_count(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl JobHandler for FailingHandler {
    async fn handle(&self, _job: &Job) -> Result<(), HandlerError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let failed = self
            .failures_remaining
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if failed {
            return Err(HandlerError::Failed(self.error_message.clone()));
        }
        Ok(())
    }
}

/// Poll `condition` every 10ms until it returns true or `timeout` passes.
///
/// Returns whether the condition was met.
pub async fn wait_until<F, Fut>(timeout: Duration, mut condition: F) -> bool
where
    F: FnMut() -> Fut,
    Fut: Future<Output = bool>,
{
    let deadline = tokio::time::Instant::now() + timeout;
    loop {
        if condition().await {
            return true;
        }
        if tokio::time::Instant::now() >= deadline {
            return false;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}
