//! Device worker loop: one per device, one job at a time.

use std::sync::Arc;
use std::time::{Duration, Instant};

use thiserror::Error;
use tokio::task::JoinHandle;
use tracing::Instrument;

use super::job::{Job, JobOutcome, JobState};
use super::queue::{Dequeued, JobQueue};
use crate::device::{DeviceId, DeviceRegistry};
use crate::engine::{EngineFault, ProcessedImage};
use crate::telemetry::{self, JobSpan, SpanExt};

/// Retry behaviour for transient device faults.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total dispatch attempts, including the first.
    pub max_attempts: u32,
    /// Pause between the device reset and the re-dispatch.
    pub backoff: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self { max_attempts: 2, backoff: Duration::from_millis(500) }
    }
}

#[derive(Debug, Error)]
pub enum DispatchError {
    #[error("{0}")]
    Engine(EngineFault),

    #[error("transient device fault persisted after {attempts} attempts: {last}")]
    Exhausted { attempts: u32, last: String },
}

/// Spawn the worker for device slot `lane`.
pub(crate) fn spawn_worker(
    lane: usize,
    queue: Arc<JobQueue>,
    registry: Arc<DeviceRegistry>,
    policy: RetryPolicy,
) -> JoinHandle<()> {
    tokio::spawn(async move { worker_loop(lane, &queue, &registry, policy).await })
}

async fn worker_loop(lane: usize, queue: &JobQueue, registry: &DeviceRegistry, policy: RetryPolicy) {
    let device = registry.device(lane).map_or(DeviceId::Cpu, |d| d.id);
    tracing::info!(device = %device, "device worker started");
    loop {
        match queue.next(lane).await {
            Dequeued::Job(job, _ack) => execute_job(lane, device, registry, policy, job).await,
            Dequeued::Shutdown => break,
        }
    }
    tracing::info!(device = %device, "device worker stopped");
}

async fn execute_job(
    lane: usize,
    device: DeviceId,
    registry: &DeviceRegistry,
    policy: RetryPolicy,
    mut job: Job,
) {
    let span = JobSpan::new(job.id.0, device, &job.input.filename);
    tracing::debug!(
        parent: &span,
        queued_ms = job.enqueued_at.elapsed().as_millis() as u64,
        "job picked up"
    );
    let start = Instant::now();
    let result = dispatch_with_retry(lane, device, registry, policy, &mut job)
        .instrument(span.clone())
        .await;
    let latency_ms = start.elapsed().as_millis() as u64;

    span.record("attempts", job.attempts);
    span.record("latency_ms", latency_ms);
    span.record_result(&result);
    registry.record_outcome(lane, result.is_ok());
    telemetry::record_job_outcome(device, result.is_ok(), latency_ms);

    let outcome = match result {
        Ok(image) => JobOutcome::Succeeded(image),
        Err(e) => {
            tracing::warn!(parent: &span, error = %e, state = ?JobState::Failed, "job failed");
            JobOutcome::Failed { error: e.to_string() }
        }
    };
    job.complete(Some(device), outcome);
}

async fn dispatch_with_retry(
    lane: usize,
    device: DeviceId,
    registry: &DeviceRegistry,
    policy: RetryPolicy,
    job: &mut Job,
) -> Result<ProcessedImage, DispatchError> {
    loop {
        job.attempts += 1;
        let mut lease = registry.acquire_index(lane).await;
        tracing::debug!(attempt = job.attempts, state = ?JobState::Dispatched, "dispatching");

        let fault = match lease.process(&job.input, &job.params).await {
            Ok(image) => return Ok(image),
            Err(fault) => fault,
        };
        if !fault.is_transient() {
            return Err(DispatchError::Engine(fault));
        }

        registry.record_fault(lane);
        if job.attempts >= policy.max_attempts {
            return Err(DispatchError::Exhausted {
                attempts: job.attempts,
                last: fault.message().to_string(),
            });
        }

        tracing::warn!(
            attempt = job.attempts,
            error = %fault,
            state = ?JobState::Retrying,
            "transient device fault, resetting device"
        );
        telemetry::record_job_retry(device);
        if let Err(e) = lease.reset().await {
            tracing::warn!(error = %e, "device reset incomplete");
        }
        drop(lease);
        tokio::time::sleep(policy.backoff).await;
    }
}

#[cfg(test)]
#[path = "worker_tests.rs"]
mod tests;
