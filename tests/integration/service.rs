//! Service integration tests.
//!
//! Tests that run the full worker pool and ingester against shared storage.

use jobsched::{
    FifoRunnableJobFinder, HandlerRegistry, InMemoryCommandLog, InMemoryPersister, JobScheduler,
    JobSchedulerService, ServiceConfig, testing::{FailingHandler, RecordingHandler, wait_until},
};
use std::sync::Arc;
use std::time::Duration;

fn config() -> ServiceConfig {
    ServiceConfig {
        worker_count: 3,
        poll_timeout_ms: 200,
        ingest_interval_ms: 10,
        shutdown_timeout_secs: 5,
        ..ServiceConfig::default()
    }
}

/// Test: Every scheduled job is executed exactly once.
#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_service_executes_every_job_once() {
    let recorder = RecordingHandler::new();
    let mut registry = HandlerRegistry::new();
    registry.register("record", recorder.clone());

    let scheduler = Arc::new(JobScheduler::new(
        FifoRunnableJobFinder::new(),
        Arc::new(InMemoryPersister::new()),
    ));
    let service = JobSchedulerService::new(
        scheduler,
        Arc::new(InMemoryCommandLog::new()),
        registry,
        config(),
    );
    service.start().await.unwrap();

    for i in 0..20u8 {
        service
            .schedule("record", Some(vec![i]), None)
            .await
            .unwrap();
    }

    let svc = &service;
    let drained = wait_until(Duration::from_secs(10), || async move {
        svc.find_all_jobs().await.is_empty() && svc.commands().is_empty()
    })
    .await;
    service.stop().await.unwrap();

    assert!(drained);
    let mut payloads: Vec<u8> = recorder
        .jobs()
        .iter()
        .map(|job| job.data().unwrap()[0])
        .collect();
    payloads.sort_unstable();
    assert_eq!(payloads, (0..20).collect::<Vec<_>>());
}

/// Test: A failing handler leaves its job in the error state.
#[tokio::test]
async fn test_failing_handler_marks_job_failed() {
    let handler = Arc::new(FailingHandler::always());
    let mut registry = HandlerRegistry::new();
    registry.register("flaky", Arc::clone(&handler));

    let scheduler = Arc::new(JobScheduler::new(
        FifoRunnableJobFinder::new(),
        Arc::new(InMemoryPersister::new()),
    ));
    let service = JobSchedulerService::new(
        scheduler,
        Arc::new(InMemoryCommandLog::new()),
        registry,
        config(),
    );
    service.start().await.unwrap();

    let job_id = service.schedule("flaky", None, None).await.unwrap();
    let (svc, id) = (&service, &job_id);
    let failed = wait_until(Duration::from_secs(5), || async move {
        svc.scheduler()
            .find_by_id(id)
            .await
            .is_some_and(|j| j.state() == jobsched::JobState::Error)
    })
    .await;
    service.stop().await.unwrap();

    assert!(failed);
    assert_eq!(handler.call_count(), 1);
}

#[cfg(feature = "sqlite")]
mod sqlite {
    use super::*;
    use chrono::{Duration as ChronoDuration, Utc};
    use jobsched::{JobPersister, JobState, SqliteStorage};

    /// Test: Jobs scheduled before a restart run after it.
    #[tokio::test]
    async fn test_service_resumes_persisted_jobs_after_restart() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("jobs.db");

        // First run: queue a job that is not due yet, then stop.
        let pending_id = {
            let storage = Arc::new(SqliteStorage::new(&path).await.unwrap());
            let scheduler = Arc::new(JobScheduler::new(
                FifoRunnableJobFinder::new(),
                Arc::clone(&storage),
            ));
            let service =
                JobSchedulerService::new(scheduler, storage.clone(), HandlerRegistry::new(), config());
            service.start().await.unwrap();

            let at = Utc::now() + ChronoDuration::seconds(2);
            let job_id = service.schedule("record", None, Some(at)).await.unwrap();
            let (svc, id) = (&service, &job_id);
            let ingested = wait_until(Duration::from_secs(5), || async move {
                svc.scheduler().find_by_id(id).await.is_some()
            })
            .await;
            assert!(ingested);

            service.stop().await.unwrap();
            storage.close().await;
            job_id
        };

        // Second run: the job is reloaded and executed once due.
        let storage = Arc::new(SqliteStorage::new(&path).await.unwrap());
        let persisted = storage.find_all_jobs().await.unwrap();
        assert_eq!(persisted.len(), 1);
        assert_eq!(persisted[0].state(), JobState::Idle);

        let recorder = RecordingHandler::new();
        let mut registry = HandlerRegistry::new();
        registry.register("record", recorder.clone());
        let scheduler = Arc::new(JobScheduler::new(
            FifoRunnableJobFinder::new(),
            Arc::clone(&storage),
        ));
        let service = JobSchedulerService::new(scheduler, storage.clone(), registry, config());
        assert_eq!(service.load_persisted_jobs().await.unwrap(), 1);
        service.start().await.unwrap();

        let rec = &recorder;
        let executed = wait_until(Duration::from_secs(10), || async move { rec.count() == 1 }).await;
        let st = &storage;
        let removed = wait_until(Duration::from_secs(5), || async move {
            st.find_all_jobs().await.is_ok_and(|jobs| jobs.is_empty())
        })
        .await;
        service.stop().await.unwrap();

        assert!(executed);
        assert!(removed);
        assert_eq!(recorder.jobs()[0].id(), &pending_id);
        storage.close().await;
    }
}
