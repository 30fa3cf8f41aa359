//! Recovery scenario integration tests.
//!
//! Tests that verify a scheduler rebuilt from persisted state continues
//! where the previous one stopped.

use crate::common::{job_ids, memory_scheduler, scheduler_with};
use jobsched::{
    CommandStore, InMemoryCommandLog, Job, JobCommand, JobId, JobIngester, JobPersister, JobState,
    RequesterId, testing::FailingPersister,
};
use std::sync::Arc;

/// Test: A new scheduler over the same persister sees every job and state.
#[tokio::test]
async fn test_restart_restores_jobs_and_states() {
    let (scheduler, persister) = memory_scheduler();
    for id in ["idle", "running", "failed"] {
        scheduler.schedule(Job::new(id, "noop")).await.unwrap();
    }
    let requester = RequesterId::new("req-1");
    for _ in 0..2 {
        scheduler
            .try_start_next_runnable_job(&requester)
            .await
            .unwrap();
    }
    scheduler.reschedule(&JobId::new("idle")).await.unwrap();
    scheduler.job_failed(&JobId::new("failed")).await.unwrap();
    drop(scheduler);

    let restarted = scheduler_with(Arc::clone(&persister));
    assert_eq!(restarted.load_persisted_jobs().await.unwrap(), 3);

    let jobs = restarted.find_all_jobs().await;
    assert_eq!(job_ids(&jobs), vec!["idle", "running", "failed"]);
    let states: Vec<_> = jobs.iter().map(|j| j.state()).collect();
    assert_eq!(
        states,
        vec![JobState::Idle, JobState::Running, JobState::Error]
    );
    assert_eq!(jobs[1].requester_id(), Some(&requester));

    // Only the idle job is runnable after the restart.
    let next = restarted
        .try_start_next_runnable_job(&RequesterId::new("req-2"))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(next.id().as_str(), "idle");
}

/// Test: A job left running by a dead requester can be removed after restart.
#[tokio::test]
async fn test_orphaned_running_job_can_be_removed() {
    let (scheduler, persister) = memory_scheduler();
    scheduler.schedule(Job::new("orphan", "noop")).await.unwrap();
    scheduler
        .try_start_next_runnable_job(&RequesterId::new("dead"))
        .await
        .unwrap();
    drop(scheduler);

    let restarted = scheduler_with(Arc::clone(&persister));
    restarted.load_persisted_jobs().await.unwrap();
    restarted.remove(&JobId::new("orphan")).await.unwrap();

    assert!(restarted.find_all_jobs().await.is_empty());
    assert!(persister.is_empty());
}

/// Test: A failed ingestion batch leaves memory equal to durable state.
#[tokio::test]
async fn test_failed_ingestion_resyncs_and_retries() {
    let persister = Arc::new(FailingPersister::new());
    let scheduler = scheduler_with(Arc::clone(&persister));
    let log = Arc::new(InMemoryCommandLog::new());
    let ingester = JobIngester::new(Arc::clone(&scheduler), Arc::clone(&log));

    scheduler.schedule(Job::new("kept", "noop")).await.unwrap();
    log.append(JobCommand::schedule(Job::new("first", "noop")))
        .await
        .unwrap();
    log.append(JobCommand::schedule(Job::new("second", "noop")))
        .await
        .unwrap();

    persister.set_fail_create(true);
    assert!(ingester.ingest().await.is_err());

    let persisted = persister.inner().find_all_jobs().await.unwrap();
    assert_eq!(job_ids(&scheduler.find_all_jobs().await), job_ids(&persisted));
    assert_eq!(job_ids(&persisted), vec!["kept"]);
    assert_eq!(log.len(), 2);

    // Once storage recovers the whole batch is applied on the next run.
    persister.set_fail_create(false);
    assert_eq!(ingester.ingest().await.unwrap(), 2);
    assert_eq!(
        job_ids(&scheduler.find_all_jobs().await),
        vec!["kept", "first", "second"]
    );
    assert!(log.is_empty());
}
