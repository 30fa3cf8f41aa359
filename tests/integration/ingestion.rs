//! Command ingestion integration tests.
//!
//! Tests that producers reach the scheduler only through the command log,
//! and that the log drains in order and in batches.

use crate::common::{job_ids, memory_scheduler};
use jobsched::{
    CommandStore, InMemoryCommandLog, IngestError, Job, JobCommand, JobId, JobIngester, JobState,
    RequesterId, SchedulerError,
};
use std::sync::Arc;

/// Test: Commands are applied in append order and removed from the log.
#[tokio::test]
async fn test_commands_apply_in_append_order() {
    let (scheduler, persister) = memory_scheduler();
    let log = Arc::new(InMemoryCommandLog::new());
    let ingester = JobIngester::new(Arc::clone(&scheduler), Arc::clone(&log));

    for id in ["a", "b", "c"] {
        log.append(JobCommand::schedule(Job::new(id, "noop")))
            .await
            .unwrap();
    }
    log.append(JobCommand::remove("b")).await.unwrap();

    assert_eq!(ingester.ingest().await.unwrap(), 4);
    assert!(log.is_empty());
    assert_eq!(job_ids(&scheduler.find_all_jobs().await), vec!["a", "c"]);
    assert_eq!(persister.len(), 2);

    // Nothing pending is not an error.
    assert_eq!(ingester.ingest().await.unwrap(), 0);
}

/// Test: A batch size bounds how many commands one run applies.
#[tokio::test]
async fn test_batch_size_limits_each_run() {
    let (scheduler, _persister) = memory_scheduler();
    let log = Arc::new(InMemoryCommandLog::new());
    let ingester =
        JobIngester::new(Arc::clone(&scheduler), Arc::clone(&log)).with_batch_size(2);

    for i in 0..5 {
        log.append(JobCommand::schedule(Job::new(format!("job-{}", i), "noop")))
            .await
            .unwrap();
    }

    let mut runs = Vec::new();
    loop {
        let applied = ingester.ingest().await.unwrap();
        if applied == 0 {
            break;
        }
        runs.push(applied);
    }

    assert_eq!(runs, vec![2, 2, 1]);
    assert_eq!(
        job_ids(&scheduler.find_all_jobs().await),
        vec!["job-0", "job-1", "job-2", "job-3", "job-4"]
    );
}

/// Test: Completion reported through the log finishes a running job.
#[tokio::test]
async fn test_completion_commands_drive_the_lifecycle() {
    let (scheduler, persister) = memory_scheduler();
    let log = Arc::new(InMemoryCommandLog::new());
    let ingester = JobIngester::new(Arc::clone(&scheduler), Arc::clone(&log));

    log.append(JobCommand::schedule(Job::new("ok", "noop")))
        .await
        .unwrap();
    log.append(JobCommand::schedule(Job::new("bad", "noop")))
        .await
        .unwrap();
    ingester.ingest().await.unwrap();

    let requester = RequesterId::new("req-1");
    for _ in 0..2 {
        scheduler
            .try_start_next_runnable_job(&requester)
            .await
            .unwrap()
            .unwrap();
    }
    log.append(JobCommand::job_finished("ok")).await.unwrap();
    log.append(JobCommand::job_failed("bad")).await.unwrap();
    ingester.ingest().await.unwrap();

    let jobs = scheduler.find_all_jobs().await;
    assert_eq!(job_ids(&jobs), vec!["bad"]);
    assert_eq!(jobs[0].state(), JobState::Error);
    assert_eq!(persister.get(&JobId::new("bad")).unwrap().state(), JobState::Error);

    log.append(JobCommand::remove("bad")).await.unwrap();
    ingester.ingest().await.unwrap();
    assert!(persister.is_empty());
}

/// Test: A rejected command does not wedge the log once it is gone.
#[tokio::test]
async fn test_rejected_command_does_not_wedge_the_log() {
    let (scheduler, persister) = memory_scheduler();
    let log = Arc::new(InMemoryCommandLog::new());
    let ingester = JobIngester::new(Arc::clone(&scheduler), Arc::clone(&log));

    log.append(JobCommand::schedule(Job::new("a", "noop")))
        .await
        .unwrap();
    let missing = log.append(JobCommand::remove("missing")).await.unwrap();

    let err = ingester.ingest().await.unwrap_err();
    assert!(matches!(
        err,
        IngestError::Scheduler(SchedulerError::UnknownJob(_))
    ));

    // "a" reached the persister, so its command is gone and the reload keeps it.
    assert_eq!(log.len(), 1);
    assert_eq!(job_ids(&scheduler.find_all_jobs().await), vec!["a"]);
    assert_eq!(persister.len(), 1);

    log.delete(&[missing]).await.unwrap();
    for _ in 0..3 {
        assert_eq!(ingester.ingest().await.unwrap(), 0);
    }
    assert!(log.is_empty());
    assert_eq!(job_ids(&scheduler.find_all_jobs().await), vec!["a"]);
}

#[cfg(feature = "sqlite")]
mod sqlite {
    use super::*;
    use crate::common::scheduler_with;
    use jobsched::{JobPersister, SqliteStorage};

    /// Test: One SQLite database serves as both command log and persister.
    #[tokio::test]
    async fn test_sqlite_log_and_persister_end_to_end() {
        let storage = Arc::new(SqliteStorage::in_memory().await.unwrap());
        let scheduler = scheduler_with(Arc::clone(&storage));
        let ingester = JobIngester::new(Arc::clone(&scheduler), Arc::clone(&storage));

        let data: Vec<u8> = (1..=10).collect();
        storage
            .append(JobCommand::schedule(
                Job::new("J1", "noop").with_data(data.clone()),
            ))
            .await
            .unwrap();
        storage
            .append(JobCommand::schedule(Job::new("J2", "noop")))
            .await
            .unwrap();

        assert_eq!(ingester.ingest().await.unwrap(), 2);
        assert!(storage.find_pending(None).await.unwrap().is_empty());

        let persisted = storage.find_all_jobs().await.unwrap();
        assert_eq!(job_ids(&persisted), vec!["J1", "J2"]);
        assert_eq!(persisted[0].job().data(), Some(data.as_slice()));

        let job = scheduler
            .try_start_next_runnable_job(&RequesterId::new("req-1"))
            .await
            .unwrap()
            .unwrap();
        storage
            .append(JobCommand::job_finished(job.id().clone()))
            .await
            .unwrap();
        ingester.ingest().await.unwrap();

        assert_eq!(
            job_ids(&storage.find_all_jobs().await.unwrap()),
            vec!["J2"]
        );
    }

    /// Test: Commands written before a restart are applied after it.
    #[tokio::test]
    async fn test_sqlite_commands_survive_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("jobs.db");

        {
            let storage = SqliteStorage::new(&path).await.unwrap();
            storage
                .append(JobCommand::schedule(Job::new("queued", "noop")))
                .await
                .unwrap();
            storage.close().await;
        }

        let storage = Arc::new(SqliteStorage::new(&path).await.unwrap());
        let scheduler = scheduler_with(Arc::clone(&storage));
        scheduler.load_persisted_jobs().await.unwrap();
        assert!(scheduler.find_all_jobs().await.is_empty());

        let ingester = JobIngester::new(Arc::clone(&scheduler), Arc::clone(&storage));
        assert_eq!(ingester.ingest().await.unwrap(), 1);
        assert_eq!(
            job_ids(&scheduler.find_all_jobs().await),
            vec!["queued"]
        );
        storage.close().await;
    }
}
