//! Tests for the device worker retry loop.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;

use super::*;
use crate::device::MockDeviceBackend;
use crate::engine::mock::MockEngine;
use crate::engine::ImageInput;
use crate::scheduler::job::{JobId, JobResult, JobSpec};

const FAST: RetryPolicy = RetryPolicy { max_attempts: 2, backoff: Duration::from_millis(1) };

struct Fixture {
    queue: Arc<JobQueue>,
    registry: Arc<DeviceRegistry>,
    engine: MockEngine,
    results: mpsc::UnboundedReceiver<JobResult>,
    tx: mpsc::UnboundedSender<JobResult>,
    worker: JoinHandle<()>,
}

fn fixture() -> Fixture {
    let engine = MockEngine::new();
    let registry = Arc::new(DeviceRegistry::new(
        Arc::new(MockDeviceBackend::new(1)),
        Arc::new(engine.clone()),
    ));
    let queue = Arc::new(JobQueue::new(1));
    let worker = spawn_worker(0, queue.clone(), registry.clone(), FAST);
    let (tx, results) = mpsc::unbounded_channel();
    Fixture { queue, registry, engine, results, tx, worker }
}

impl Fixture {
    fn push(&self, id: u64, filename: &str) {
        let spec = JobSpec::new(ImageInput::new(filename, vec![4, 2]));
        self.queue.push(0, Job::new(JobId(id), spec, Arc::new(self.tx.clone()), None));
    }

    async fn next_result(&mut self) -> JobResult {
        tokio::time::timeout(Duration::from_secs(2), self.results.recv())
            .await
            .expect("worker produced no result")
            .expect("result channel closed")
    }

    fn resets(&self) -> u64 {
        self.registry.status()[0].resets
    }
}

#[tokio::test]
async fn success_reports_device_and_output() {
    let mut fx = fixture();
    fx.push(1, "cat.png");

    let result = fx.next_result().await;
    assert!(result.is_success());
    assert_eq!(result.attempts, 1);
    assert_eq!(result.device, Some(DeviceId::Accelerator(0)));
    assert_eq!(result.output().unwrap().filename, "cat-no-bg.jpg");
}

#[tokio::test]
async fn transient_fault_retried_after_reset() {
    let mut fx = fixture();
    fx.engine.script_faults("flaky.png", vec![EngineFault::TransientRecoverable("illegal memory access".into())]);
    fx.push(1, "flaky.png");

    let result = fx.next_result().await;
    assert!(result.is_success());
    assert_eq!(result.attempts, 2);
    assert_eq!(fx.resets(), 1);
    assert_eq!(fx.registry.status()[0].faults, 1);
}

#[tokio::test]
async fn persistent_transient_fault_fails_after_one_reset() {
    let mut fx = fixture();
    let fault = EngineFault::TransientRecoverable("illegal memory access".into());
    fx.engine.script_faults("broken.png", vec![fault.clone(), fault]);
    fx.push(1, "broken.png");

    let result = fx.next_result().await;
    assert!(!result.is_success());
    assert_eq!(result.attempts, 2);
    assert!(result.error().unwrap().contains("persisted after 2 attempts"));
    assert_eq!(fx.resets(), 1);
    assert_eq!(fx.engine.attempts_for("broken.png"), 2);
}

#[tokio::test]
async fn fatal_fault_not_retried() {
    let mut fx = fixture();
    fx.engine.script_faults("corrupt.png", vec![EngineFault::Fatal("cannot decode image".into())]);
    fx.push(1, "corrupt.png");

    let result = fx.next_result().await;
    assert!(!result.is_success());
    assert_eq!(result.attempts, 1);
    assert!(result.error().unwrap().contains("cannot decode image"));
    assert_eq!(fx.resets(), 0);
}

#[tokio::test]
async fn failure_does_not_stop_worker() {
    let mut fx = fixture();
    fx.engine.script_faults("bad.png", vec![EngineFault::Fatal("bad".into())]);
    fx.push(1, "bad.png");
    fx.push(2, "good.png");

    assert!(!fx.next_result().await.is_success());
    let second = fx.next_result().await;
    assert!(second.is_success());
    assert_eq!(second.job_id, JobId(2));
}

#[tokio::test]
async fn worker_exits_on_sentinel() {
    let mut fx = fixture();
    fx.push(1, "a.png");
    fx.queue.push_shutdown(0);

    assert!(fx.next_result().await.is_success());
    tokio::time::timeout(Duration::from_secs(1), &mut fx.worker).await.unwrap().unwrap();
    assert_eq!(fx.queue.unfinished(), 0);
}
