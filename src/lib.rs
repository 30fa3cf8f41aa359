//! Pull-based job scheduling engine.
//!
//! Producers append commands to a durable log, an ingester applies them to
//! the [`JobScheduler`], and workers pull runnable jobs from it.

pub mod config;
pub mod core;
pub mod execution;
pub mod finder;
pub mod ingest;
pub mod scheduler;
pub mod storage;
pub mod testing;

pub use config::{ConfigError, ConfigLoader, ServiceConfig, StorageConfig};
pub use core::job::{Job, JobState, ScheduledJob};
pub use core::types::{CommandId, JobId, RequesterId};
pub use execution::{
    HandlerError, HandlerRegistry, JobHandler, JobSchedulerService, ServiceError, Work,
    WorkHandler,
};
pub use finder::{FifoRunnableJobFinder, RunnableJobFinder};
pub use ingest::{
    CommandKind, CommandStore, CommandStoreError, InMemoryCommandLog, IngestError, IngesterRunner,
    JobCommand, JobIngester,
};
pub use scheduler::{JobScheduler, SchedulerBatch, SchedulerError};
#[cfg(feature = "sqlite")]
pub use storage::SqliteStorage;
pub use storage::{InMemoryPersister, JobPersister, NoOpPersister, PersistError};
