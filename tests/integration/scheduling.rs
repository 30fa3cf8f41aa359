//! Scheduling scenario integration tests.
//!
//! Tests that drive the scheduler the way a requester-facing facade would:
//! schedule, pull with a timeout, and report completion.

use crate::common::{job_ids, memory_scheduler};
use chrono::{Duration as ChronoDuration, Utc};
use jobsched::{Job, JobId, JobState, RequesterId};
use std::time::Duration;

/// Test: A job is pulled, marked running for the requester, and finished.
#[tokio::test]
async fn test_schedule_pull_and_finish_end_to_end() {
    let (scheduler, persister) = memory_scheduler();
    let data: Vec<u8> = (1..=10).collect();
    let job = Job::new("J1", "noop")
        .with_data(data.clone())
        .with_scheduled_at(Utc::now());
    scheduler.schedule(job).await.unwrap();

    let requester = RequesterId::new("req-1");
    let started = scheduler
        .start_next_runnable_job(&requester, Duration::from_millis(5000))
        .await
        .unwrap()
        .expect("job should be runnable");

    assert_eq!(started.id().as_str(), "J1");
    assert_eq!(started.job_type(), "noop");
    assert_eq!(started.data(), Some(data.as_slice()));
    let tracked = scheduler.find_by_id(started.id()).await.unwrap();
    assert_eq!(tracked.state(), JobState::Running);
    assert_eq!(tracked.requester_id(), Some(&requester));

    scheduler.job_finished(started.id()).await.unwrap();

    assert!(scheduler.find_all_jobs().await.is_empty());
    assert!(persister.is_empty());
}

/// Test: Jobs are started earliest-scheduled first, ties in insertion order.
#[tokio::test]
async fn test_jobs_start_in_fifo_order() {
    let (scheduler, _persister) = memory_scheduler();
    let now = Utc::now();
    scheduler
        .schedule(Job::new("A", "noop").with_scheduled_at(now - ChronoDuration::seconds(1)))
        .await
        .unwrap();
    scheduler
        .schedule(Job::new("B", "noop").with_scheduled_at(now - ChronoDuration::seconds(2)))
        .await
        .unwrap();
    scheduler
        .schedule(Job::new("C", "noop").with_scheduled_at(now - ChronoDuration::seconds(2)))
        .await
        .unwrap();
    scheduler.schedule(Job::new("D", "noop")).await.unwrap();

    let requester = RequesterId::new("req-1");
    let mut order = Vec::new();
    while let Some(job) = scheduler
        .try_start_next_runnable_job(&requester)
        .await
        .unwrap()
    {
        order.push(job.id().as_str().to_string());
    }

    // Jobs without a time come first.
    assert_eq!(order, vec!["D", "B", "C", "A"]);
}

/// Test: A job scheduled in the future is never started early.
#[tokio::test]
async fn test_future_job_is_not_started_under_tight_polling() {
    let (scheduler, _persister) = memory_scheduler();
    scheduler
        .schedule(Job::new("later", "noop").with_scheduled_at(Utc::now() + ChronoDuration::hours(1)))
        .await
        .unwrap();

    let requester = RequesterId::new("req-1");
    for _ in 0..200 {
        let job = scheduler
            .try_start_next_runnable_job(&requester)
            .await
            .unwrap();
        assert!(job.is_none());
    }
    let job = scheduler
        .start_next_runnable_job(&requester, Duration::from_millis(100))
        .await
        .unwrap();
    assert!(job.is_none());

    let tracked = scheduler.find_by_id(&JobId::new("later")).await.unwrap();
    assert_eq!(tracked.state(), JobState::Idle);
}

/// Test: A job becomes runnable once its scheduled time passes.
#[tokio::test]
async fn test_job_becomes_runnable_when_due() {
    let (scheduler, _persister) = memory_scheduler();
    scheduler
        .schedule(
            Job::new("soon", "noop")
                .with_scheduled_at(Utc::now() + ChronoDuration::milliseconds(200)),
        )
        .await
        .unwrap();

    let job = scheduler
        .start_next_runnable_job(&RequesterId::new("req-1"), Duration::from_secs(5))
        .await
        .unwrap()
        .expect("job should become runnable");

    assert_eq!(job.id().as_str(), "soon");
}

/// Test: Pulling with a zero timeout does not block.
#[tokio::test]
async fn test_zero_timeout_returns_immediately() {
    let (scheduler, _persister) = memory_scheduler();
    let start = std::time::Instant::now();

    let job = scheduler
        .start_next_runnable_job(&RequesterId::new("req-1"), Duration::ZERO)
        .await
        .unwrap();

    assert!(job.is_none());
    assert!(start.elapsed() < Duration::from_millis(100));
}

/// Test: A failed job stays visible, is never restarted, and can be removed.
#[tokio::test]
async fn test_failed_job_lifecycle() {
    let (scheduler, persister) = memory_scheduler();
    let requester = RequesterId::new("req-1");
    scheduler.schedule(Job::new("J1", "noop")).await.unwrap();
    let job = scheduler
        .try_start_next_runnable_job(&requester)
        .await
        .unwrap()
        .unwrap();

    scheduler.job_failed(job.id()).await.unwrap();

    let jobs = scheduler.find_all_jobs().await;
    assert_eq!(job_ids(&jobs), vec!["J1"]);
    assert_eq!(jobs[0].state(), JobState::Error);
    assert!(jobs[0].requester_id().is_none());
    assert!(
        scheduler
            .try_start_next_runnable_job(&requester)
            .await
            .unwrap()
            .is_none()
    );

    // Finishing or rescheduling a failed job is not allowed.
    assert!(scheduler.job_finished(job.id()).await.is_err());
    assert!(scheduler.reschedule(job.id()).await.is_err());

    scheduler.remove(job.id()).await.unwrap();
    assert!(scheduler.find_by_id(job.id()).await.is_none());
    assert!(persister.is_empty());
}

/// Test: A rescheduled job is handed out again.
#[tokio::test]
async fn test_rescheduled_job_is_started_again() {
    let (scheduler, _persister) = memory_scheduler();
    scheduler.schedule(Job::new("J1", "noop")).await.unwrap();

    let first = scheduler
        .try_start_next_runnable_job(&RequesterId::new("req-1"))
        .await
        .unwrap()
        .unwrap();
    scheduler.reschedule(first.id()).await.unwrap();

    let second = scheduler
        .try_start_next_runnable_job(&RequesterId::new("req-2"))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(second.id(), first.id());
    let tracked = scheduler.find_by_id(second.id()).await.unwrap();
    assert_eq!(tracked.requester_id(), Some(&RequesterId::new("req-2")));
}
