//! Integration tests for queue discipline: FIFO order, serial execution and
//! deduplication under concurrent enqueues.

mod common;

use std::sync::Arc;
use std::time::Duration;

use crate::common::EngineHarness;
use job_engine::kernel::jobs::{JobStatus, JobWorkerConfig};
use test_context::test_context;

#[test_context(EngineHarness)]
#[tokio::test]
async fn jobs_run_in_enqueue_order(ctx: &EngineHarness) {
    let names = ["first", "second", "third", "fourth", "fifth"];
    let mut ids = Vec::new();
    for name in names {
        ids.push(ctx.manager.enqueue(name, ctx.probe.succeed(name)).await.unwrap());
    }
    ctx.start_worker();

    for id in &ids {
        ctx.terminal(*id).await;
    }

    assert_eq!(ctx.probe.started(), names);
    assert_eq!(ctx.probe.finished(), names);
}

#[test_context(EngineHarness)]
#[tokio::test]
async fn jobs_never_overlap(ctx: &EngineHarness) {
    let mut ids = Vec::new();
    for i in 0..4 {
        let name = format!("Slow{i}");
        let id = ctx
            .manager
            .enqueue(&name, ctx.probe.sleep(&name, Duration::from_millis(25)))
            .await
            .unwrap();
        ids.push(id);
    }
    ctx.start_worker();

    let mut records = Vec::new();
    for id in &ids {
        records.push(ctx.terminal(*id).await);
    }

    assert_eq!(ctx.probe.max_concurrency(), 1);
    for pair in records.windows(2) {
        let previous_done = pair[0].completed_at.unwrap();
        let next_started = pair[1].started_at.unwrap();
        assert!(
            previous_done <= next_started,
            "{} started before {} finished",
            pair[1].name,
            pair[0].name
        );
    }
}

#[test_context(EngineHarness)]
#[tokio::test]
async fn enqueue_while_running_waits_its_turn(ctx: &EngineHarness) {
    let first = ctx
        .manager
        .enqueue("first", ctx.probe.sleep("first", Duration::from_millis(50)))
        .await
        .unwrap();
    ctx.start_worker();
    ctx.reach(first, JobStatus::Running).await;

    let second = ctx
        .manager
        .enqueue("second", ctx.probe.succeed("second"))
        .await
        .unwrap();
    assert_eq!(
        ctx.manager.get_job(second).unwrap().status,
        JobStatus::Pending
    );

    ctx.terminal(second).await;
    assert_eq!(ctx.probe.finished(), vec!["first", "second"]);
}

#[test_context(EngineHarness)]
#[tokio::test]
async fn concurrent_enqueues_of_one_name_admit_exactly_one(ctx: &EngineHarness) {
    let mut tasks = Vec::new();
    for i in 0..16 {
        let manager = Arc::clone(&ctx.manager);
        let executable = ctx.probe.succeed(&format!("attempt-{i}"));
        tasks.push(tokio::spawn(async move {
            manager.enqueue("PopulateDatabase", executable).await
        }));
    }

    let mut accepted = 0;
    let mut conflicts = 0;
    for task in tasks {
        match task.await.unwrap() {
            Ok(_) => accepted += 1,
            Err(e) if e.is_conflict() => conflicts += 1,
            Err(e) => panic!("unexpected error: {e}"),
        }
    }

    assert_eq!(accepted, 1);
    assert_eq!(conflicts, 15);
    assert_eq!(ctx.manager.list_jobs().len(), 1);
    assert_eq!(ctx.manager.queued_len(), 1);
}

#[test_context(EngineHarness)]
#[tokio::test]
async fn enqueue_wakes_an_idle_worker(ctx: &EngineHarness) {
    ctx.start_worker_with(
        JobWorkerConfig::default().with_poll_interval(Duration::from_secs(3600)),
    );
    // Let the worker find the queue empty and go to sleep.
    tokio::time::sleep(Duration::from_millis(50)).await;

    let id = ctx
        .manager
        .enqueue("Wake", ctx.probe.succeed("Wake"))
        .await
        .unwrap();

    assert_eq!(ctx.terminal(id).await.status, JobStatus::Completed);
}
