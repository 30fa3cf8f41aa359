//! Job handlers and the registry that maps job types to them.
//!
//! The scheduler never interprets a job's `data`. Workers look up the
//! handler registered for the job's type and hand it the job.

use async_trait::async_trait;
use serde::Serialize;
use serde::de::DeserializeOwned;
use std::collections::HashMap;
use std::future::Future;
use std::marker::PhantomData;
use std::sync::Arc;
use thiserror::Error;

use crate::core::job::Job;

/// Errors that can occur while handling a job.
#[derive(Debug, Error)]
pub enum HandlerError {
    /// No handler is registered for the job type.
    #[error("no handler registered for job type '{0}'")]
    UnknownType(String),

    /// The job data could not be decoded.
    #[error("invalid job data: {0}")]
    Deserialize(String),

    /// The handler ran and reported a failure.
    #[error("job failed: {0}")]
    Failed(String),

    /// The handler panicked.
    #[error("job handler panicked: {0}")]
    Panicked(String),

    /// Generic error wrapper.
    #[error(transparent)]
    Other(#[from] Box<dyn std::error::Error + Send + Sync>),
}

/// Executes jobs of one type.
///
/// # Example
///
/// ```ignore
/// use jobsched::{Job, JobHandler, HandlerError};
/// use async_trait::async_trait;
///
/// struct SendMail;
///
/// #[async_trait]
/// impl JobHandler for SendMail {
///     async fn handle(&self, job: &Job) -> Result<(), HandlerError> {
///         let body = job.data().unwrap_or_default();
///         // deliver body...
///         Ok(())
///     }
/// }
/// ```
#[async_trait]
pub trait JobHandler: Send + Sync {
    /// Execute the job. An `Err` marks the job as failed.
    async fn handle(&self, job: &Job) -> Result<(), HandlerError>;
}

#[async_trait]
impl<H: JobHandler + ?Sized> JobHandler for Arc<H> {
    async fn handle(&self, job: &Job) -> Result<(), HandlerError> {
        (**self).handle(job).await
    }
}

struct FnHandler<F> {
    f: F,
}

#[async_trait]
impl<F, Fut> JobHandler for FnHandler<F>
where
    F: Fn(Job) -> Fut + Send + Sync,
    Fut: Future<Output = Result<(), HandlerError>> + Send,
{
    async fn handle(&self, job: &Job) -> Result<(), HandlerError> {
        (self.f)(job.clone()).await
    }
}

/// A typed unit of work that can be scheduled as a job.
///
/// The value is stored as the job's data in JSON form and the job type is
/// [`Work::JOB_TYPE`].
pub trait Work: Serialize + DeserializeOwned + Send + Sync + 'static {
    /// Job type under which this work is scheduled and dispatched.
    const JOB_TYPE: &'static str;
}

/// Adapts an async function over a [`Work`] value into a [`JobHandler`].
pub struct WorkHandler<W, F> {
    f: F,
    _work: PhantomData<fn() -> W>,
}

impl<W, F> WorkHandler<W, F> {
    /// Wrap `f`.
    pub fn new(f: F) -> Self {
        Self {
            f,
            _work: PhantomData,
        }
    }
}

#[async_trait]
impl<W, F, Fut> JobHandler for WorkHandler<W, F>
where
    W: Work,
    F: Fn(W) -> Fut + Send + Sync,
    Fut: Future<Output = Result<(), HandlerError>> + Send,
{
    async fn handle(&self, job: &Job) -> Result<(), HandlerError> {
        let data = job
            .data()
            .ok_or_else(|| HandlerError::Deserialize(format!("job {} has no data", job.id())))?;
        let work: W =
            serde_json::from_slice(data).map_err(|e| HandlerError::Deserialize(e.to_string()))?;
        (self.f)(work).await
    }
}

/// Maps job types to handlers.
#[derive(Clone, Default)]
pub struct HandlerRegistry {
    handlers: HashMap<String, Arc<dyn JobHandler>>,
}

impl HandlerRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `handler` for `job_type`, replacing any previous one.
    pub fn register(&mut self, job_type: impl Into<String>, handler: impl JobHandler + 'static) {
        self.handlers.insert(job_type.into(), Arc::new(handler));
    }

    /// Register an async function for `job_type`.
    pub fn register_fn<F, Fut>(&mut self, job_type: impl Into<String>, f: F)
    where
        F: Fn(Job) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<(), HandlerError>> + Send + 'static,
    {
        self.register(job_type, FnHandler { f });
    }

    /// Register an async function for the work type `W`.
    pub fn register_work<W, F, Fut>(&mut self, f: F)
    where
        W: Work,
        F: Fn(W) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<(), HandlerError>> + Send + 'static,
    {
        self.register(W::JOB_TYPE, WorkHandler::<W, F>::new(f));
    }

    /// Get the handler for `job_type`.
    pub fn get(&self, job_type: &str) -> Option<Arc<dyn JobHandler>> {
        self.handlers.get(job_type).cloned()
    }

    /// Whether a handler is registered for `job_type`.
    pub fn contains(&self, job_type: &str) -> bool {
        self.handlers.contains_key(job_type)
    }

    /// Registered job types, sorted.
    pub fn job_types(&self) -> Vec<&str> {
        let mut types: Vec<_> = self.handlers.keys().map(String::as_str).collect();
        types.sort_unstable();
        types
    }
}
