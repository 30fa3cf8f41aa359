//! Common test utilities shared across integration tests.

use jobsched::{
    FifoRunnableJobFinder, InMemoryPersister, JobPersister, JobScheduler, ScheduledJob,
};
use std::sync::Arc;

/// A scheduler over a shared in-memory persister.
pub fn memory_scheduler() -> (Arc<JobScheduler<Arc<InMemoryPersister>>>, Arc<InMemoryPersister>) {
    let persister = Arc::new(InMemoryPersister::new());
    let scheduler = Arc::new(JobScheduler::new(
        FifoRunnableJobFinder::new(),
        Arc::clone(&persister),
    ));
    (scheduler, persister)
}

/// A scheduler over any persister.
pub fn scheduler_with<P: JobPersister>(persister: P) -> Arc<JobScheduler<P>> {
    Arc::new(JobScheduler::new(FifoRunnableJobFinder::new(), persister))
}

/// Ids of the given jobs, in order.
pub fn job_ids(jobs: &[ScheduledJob]) -> Vec<String> {
    jobs.iter().map(|j| j.id().as_str().to_string()).collect()
}
