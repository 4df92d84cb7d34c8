//! Tests for scheduler drain and shutdown.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;

use cutout_runtime::device::MockDeviceBackend;
use cutout_runtime::engine::mock::MockEngine;
use cutout_runtime::engine::ImageInput;
use cutout_runtime::scheduler::{
    BatchEvent, BatchSummary, DiscardSink, JobSpec, Scheduler, SchedulerConfig, SubmitError,
};
use cutout_runtime::shutdown::{ShutdownResult, ShutdownState};

fn start(devices: usize, engine: &MockEngine) -> Arc<Scheduler> {
    Scheduler::start(
        SchedulerConfig::default(),
        Arc::new(MockDeviceBackend::new(devices)),
        Arc::new(engine.clone()),
    )
}

fn image(name: &str) -> JobSpec {
    JobSpec::new(ImageInput::new(name, vec![9]))
}

#[tokio::test]
async fn test_in_flight_jobs_finish_before_stop() {
    let engine = MockEngine::with_delay(Duration::from_millis(30));
    let scheduler = start(2, &engine);

    let a = scheduler.submit_job(image("a.png")).unwrap();
    let b = scheduler.submit_job(image("b.png")).unwrap();
    assert_eq!(scheduler.in_flight(), 2);

    let result = scheduler.shutdown(Duration::from_secs(5)).await;
    assert_eq!(result, ShutdownResult::Complete);
    assert_eq!(scheduler.shutdown_state(), ShutdownState::Stopped);

    assert!(a.result().await.unwrap().is_success());
    assert!(b.result().await.unwrap().is_success());
    assert_eq!(engine.dispatches().len(), 2);
}

#[tokio::test]
async fn test_submissions_rejected_once_draining() {
    let engine = MockEngine::with_delay(Duration::from_millis(30));
    let scheduler = start(1, &engine);
    let handle = scheduler.submit_job(image("a.png")).unwrap();

    let stopper = scheduler.clone();
    let stop = tokio::spawn(async move { stopper.shutdown(Duration::from_secs(5)).await });
    tokio::time::sleep(Duration::from_millis(5)).await;

    assert!(!scheduler.is_accepting());
    assert!(matches!(scheduler.submit_job(image("late.png")), Err(SubmitError::ShuttingDown)));
    assert!(matches!(
        scheduler.submit_batch(vec![image("late.png")], Arc::new(DiscardSink)),
        Err(SubmitError::ShuttingDown)
    ));

    assert_eq!(stop.await.unwrap(), ShutdownResult::Complete);
    assert!(handle.result().await.unwrap().is_success());
    assert_eq!(engine.attempts_for("late.png"), 0);
}

#[tokio::test]
async fn test_pending_batches_drain_before_stop() {
    let engine = MockEngine::with_delay(Duration::from_millis(5));
    let scheduler = start(1, &engine);

    let first = scheduler
        .submit_batch(vec![image("a0.png"), image("a1.png")], Arc::new(DiscardSink))
        .unwrap();
    let second = scheduler
        .submit_batch(vec![image("b0.png")], Arc::new(DiscardSink))
        .unwrap();

    assert_eq!(scheduler.shutdown(Duration::from_secs(5)).await, ShutdownResult::Complete);
    assert_eq!(first.summary().await.unwrap().succeeded, 2);
    assert_eq!(second.summary().await.unwrap().succeeded, 1);
}

#[tokio::test]
async fn test_timeout_reports_failure_for_stuck_jobs() {
    let engine = MockEngine::with_delay(Duration::from_secs(10));
    let scheduler = start(1, &engine);

    let running = scheduler.submit_job(image("stuck.png")).unwrap();
    let queued = scheduler.submit_job(image("queued.png")).unwrap();
    tokio::time::sleep(Duration::from_millis(5)).await;

    let result = scheduler.shutdown(Duration::from_millis(50)).await;
    assert!(matches!(result, ShutdownResult::Timeout { .. }));

    let running = running.result().await.unwrap();
    assert!(!running.is_success());
    let queued = queued.result().await.unwrap();
    assert!(!queued.is_success());
    assert_eq!(queued.attempts, 0);
}

async fn within<T>(fut: impl std::future::Future<Output = T>) -> T {
    tokio::time::timeout(Duration::from_secs(5), fut)
        .await
        .expect("timed out")
}

/// Drain a batch sink channel into its per-job failures and completion.
fn drain_events(rx: &mut mpsc::UnboundedReceiver<BatchEvent>) -> (Vec<bool>, Vec<BatchSummary>) {
    let mut jobs = Vec::new();
    let mut completions = Vec::new();
    while let Ok(event) = rx.try_recv() {
        match event {
            BatchEvent::Job { result, .. } => jobs.push(result.is_success()),
            BatchEvent::Complete(summary) => completions.push(summary),
        }
    }
    (jobs, completions)
}

#[tokio::test]
async fn test_timeout_fails_batch_still_waiting_its_turn() {
    let engine = MockEngine::with_delay(Duration::from_secs(10));
    let scheduler = start(1, &engine);

    let (a_tx, mut a_rx) = mpsc::unbounded_channel();
    let a = scheduler.submit_batch(vec![image("a0.png")], Arc::new(a_tx)).unwrap();
    let (b_tx, mut b_rx) = mpsc::unbounded_channel();
    let b = scheduler
        .submit_batch(vec![image("b0.png"), image("b1.png")], Arc::new(b_tx))
        .unwrap();
    tokio::time::sleep(Duration::from_millis(5)).await;

    let result = scheduler.shutdown(Duration::from_millis(50)).await;
    assert!(matches!(result, ShutdownResult::Timeout { .. }));

    let a = within(a.summary()).await.unwrap();
    assert_eq!((a.total, a.succeeded, a.failed), (1, 0, 1));
    let b = within(b.summary()).await.unwrap();
    assert_eq!((b.total, b.succeeded, b.failed), (2, 0, 2));

    let (jobs, completions) = drain_events(&mut a_rx);
    assert_eq!(jobs, vec![false]);
    assert_eq!(completions.len(), 1);

    let (jobs, completions) = drain_events(&mut b_rx);
    assert_eq!(jobs, vec![false, false]);
    assert_eq!(completions.len(), 1);
    assert_eq!(completions[0].succeeded + completions[0].failed, completions[0].total);
    assert_eq!(engine.attempts_for("b0.png"), 0);
    assert_eq!(engine.attempts_for("b1.png"), 0);
    assert_eq!(scheduler.pending_batches(), 0);
}

#[tokio::test]
async fn test_timeout_completes_every_queued_batch() {
    let engine = MockEngine::with_delay(Duration::from_secs(10));
    let scheduler = start(2, &engine);

    let running = scheduler
        .submit_batch(vec![image("r0.png"), image("r1.png"), image("r2.png")], Arc::new(DiscardSink))
        .unwrap();
    let mut waiting = Vec::new();
    for (index, size) in [2usize, 0, 1].into_iter().enumerate() {
        let items = (0..size).map(|i| image(&format!("w{}-{}.png", index, i))).collect();
        let (tx, rx) = mpsc::unbounded_channel();
        waiting.push((scheduler.submit_batch(items, Arc::new(tx)).unwrap(), rx, size));
    }
    tokio::time::sleep(Duration::from_millis(5)).await;
    assert_eq!(scheduler.pending_batches(), 3);

    let result = scheduler.shutdown(Duration::from_millis(50)).await;
    assert!(matches!(result, ShutdownResult::Timeout { .. }));

    let running = within(running.summary()).await.unwrap();
    assert_eq!(running.succeeded + running.failed, running.total);
    assert_eq!(running.succeeded, 0);

    for (handle, mut rx, size) in waiting {
        let summary = within(handle.summary()).await.unwrap();
        assert_eq!(summary.total, size);
        assert_eq!(summary.failed, size);
        assert_eq!(summary.succeeded + summary.failed, summary.total);

        let (jobs, completions) = drain_events(&mut rx);
        assert_eq!(jobs.len(), size);
        assert!(jobs.iter().all(|ok| !ok));
        assert_eq!(completions, vec![summary]);
    }
}

#[tokio::test]
async fn test_shutdown_on_idle_scheduler() {
    let engine = MockEngine::new();
    let scheduler = start(3, &engine);
    assert_eq!(scheduler.shutdown(Duration::from_secs(1)).await, ShutdownResult::Complete);
    assert!(matches!(scheduler.submit_job(image("x.png")), Err(SubmitError::ShuttingDown)));
}
