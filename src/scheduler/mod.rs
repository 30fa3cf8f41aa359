//! Pull-based job scheduler.
//!
//! Requesters pull runnable jobs from the [`JobScheduler`]; producers mutate
//! it directly or through the command log applied by the
//! [`JobIngester`](crate::ingest::JobIngester). All state changes are written
//! through a [`JobPersister`](crate::storage::JobPersister) before they
//! become visible in memory.

mod batch;
mod engine;
mod types;

pub use batch::SchedulerBatch;
pub use engine::JobScheduler;
pub use types::SchedulerError;
