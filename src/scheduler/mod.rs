//! Device-worker scheduler and batch pipeline.
//!
//! One worker per device drains that device's job lane. A single coordinator
//! fans batches out one at a time and waits for each to finish before the
//! next, so uploads of later batches overlap with processing of the current
//! one.

mod batch;
mod chunking;
mod coordinator;
mod job;
mod queue;
mod sink;
mod worker;

pub use batch::{BatchHandle, BatchId, BatchRequest, BatchSummary, BatchTracker};
pub use chunking::{ChunkPolicy, ChunkReport};
pub use job::{IdGenerator, Job, JobId, JobOutcome, JobResult, JobSpec, JobState};
pub use queue::{AckGuard, Dequeued, JobQueue};
pub use sink::{BatchEvent, BatchSink, DiscardSink, JobHandle, OneshotSink, ResultSink};
pub use worker::{DispatchError, RetryPolicy};

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use thiserror::Error;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use coordinator::{BatchCommand, CoordinatorContext, CoordinatorState, PendingBatch};
use crate::device::{DeviceBackend, DeviceId, DeviceRegistry};
use crate::engine::{InputError, ProcessingEngine};
use crate::shutdown::{ShutdownCoordinator, ShutdownResult, ShutdownState};

#[derive(Debug, Error)]
pub enum SubmitError {
    #[error("Invalid image: {0}")]
    Invalid(#[from] InputError),

    #[error("Invalid image at position {index}: {source}")]
    InvalidItem { index: usize, source: InputError },

    #[error("Scheduler is shutting down")]
    ShuttingDown,

    #[error("Scheduler stopped before delivering a result")]
    Closed,
}

#[derive(Debug, Clone, PartialEq)]
pub struct SchedulerConfig {
    pub retry: RetryPolicy,
    pub chunk: ChunkPolicy,
    pub shutdown_timeout: Duration,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            retry: RetryPolicy::default(),
            chunk: ChunkPolicy::default(),
            shutdown_timeout: Duration::from_secs(30),
        }
    }
}

/// Process-scoped scheduler. Construct once with [`Scheduler::start`] and
/// share by `Arc`.
pub struct Scheduler {
    config: SchedulerConfig,
    registry: Arc<DeviceRegistry>,
    queue: Arc<JobQueue>,
    batches: mpsc::UnboundedSender<BatchCommand>,
    coordinator: Arc<CoordinatorState>,
    shutdown: ShutdownCoordinator,
    ids: Arc<IdGenerator>,
    next_batch: AtomicU64,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl Scheduler {
    /// Discover devices and spawn one worker per device plus the
    /// coordinator. Must be called inside a tokio runtime.
    pub fn start(
        config: SchedulerConfig,
        backend: Arc<dyn DeviceBackend>,
        engine: Arc<dyn ProcessingEngine>,
    ) -> Arc<Self> {
        Self::with_registry(config, Arc::new(DeviceRegistry::new(backend, engine)))
    }

    pub fn with_registry(config: SchedulerConfig, registry: Arc<DeviceRegistry>) -> Arc<Self> {
        let lanes = registry.device_count();
        let queue = Arc::new(JobQueue::new(lanes));
        let ids = Arc::new(IdGenerator::new());
        let coordinator = Arc::new(CoordinatorState::default());
        let (batches, rx) = mpsc::unbounded_channel();

        let mut tasks = Vec::with_capacity(lanes + 1);
        for lane in 0..lanes {
            tasks.push(worker::spawn_worker(lane, queue.clone(), registry.clone(), config.retry));
        }
        tasks.push(coordinator::spawn_coordinator(
            rx,
            CoordinatorContext {
                queue: queue.clone(),
                registry: registry.clone(),
                ids: ids.clone(),
                state: coordinator.clone(),
            },
        ));
        tracing::info!(devices = lanes, "scheduler started");

        Arc::new(Self {
            config,
            registry,
            queue,
            batches,
            coordinator,
            shutdown: ShutdownCoordinator::new(),
            ids,
            next_batch: AtomicU64::new(1),
            tasks: Mutex::new(tasks),
        })
    }

    /// Submit one job and get an awaitable handle to its result.
    pub fn submit_job(&self, spec: JobSpec) -> Result<JobHandle, SubmitError> {
        let (sink, rx) = OneshotSink::channel();
        let (id, device) = self.enqueue(spec, sink)?;
        Ok(JobHandle::new(id, device, rx))
    }

    /// Submit one job whose result goes to `sink`.
    pub fn submit_job_with_sink(
        &self,
        spec: JobSpec,
        sink: Arc<dyn ResultSink>,
    ) -> Result<JobId, SubmitError> {
        self.enqueue(spec, sink).map(|(id, _)| id)
    }

    fn enqueue(&self, spec: JobSpec, sink: Arc<dyn ResultSink>) -> Result<(JobId, DeviceId), SubmitError> {
        let flight = self.shutdown.track().ok_or(SubmitError::ShuttingDown)?;
        spec.input.validate()?;
        let lane = self.registry.resolve(spec.affinity);
        let device = self.registry.device(lane).map_or(DeviceId::Cpu, |d| d.id);
        let id = self.ids.next();
        tracing::debug!(job_id = %id, device = %device, "job queued");
        self.queue.push(lane, Job::new(id, spec, sink, Some(flight)));
        Ok((id, device))
    }

    /// Reserve a batch id ahead of submission (streaming uploads announce
    /// the id before the batch is complete).
    pub fn allocate_batch_id(&self) -> BatchId {
        BatchId(self.next_batch.fetch_add(1, Ordering::Relaxed))
    }

    pub fn submit_batch(
        &self,
        items: Vec<JobSpec>,
        sink: Arc<dyn BatchSink>,
    ) -> Result<BatchHandle, SubmitError> {
        self.submit(BatchRequest::new(items, sink))
    }

    /// Queue a batch behind those already submitted. Returns immediately.
    pub fn submit(&self, request: BatchRequest) -> Result<BatchHandle, SubmitError> {
        let flight = self.shutdown.track().ok_or(SubmitError::ShuttingDown)?;
        for (index, spec) in request.items.iter().enumerate() {
            spec.input
                .validate()
                .map_err(|source| SubmitError::InvalidItem { index, source })?;
        }

        let id = request.id.unwrap_or_else(|| self.allocate_batch_id());
        let tracker = BatchTracker::new(id, request.items.len(), request.sink, Some(flight));
        let handle = tracker.handle();

        let pending = PendingBatch::new(
            tracker,
            request.items,
            request.live_params,
            self.ids.clone(),
            self.coordinator.clone(),
        );
        if let Err(mpsc::error::SendError(command)) = self.batches.send(BatchCommand::Run(pending)) {
            if let BatchCommand::Run(pending) = command {
                pending.reject();
            }
            return Err(SubmitError::Closed);
        }
        tracing::info!(batch_id = %id, total = handle.total(), "batch queued");
        Ok(handle)
    }

    /// Batch currently being processed by the coordinator.
    pub fn current_batch(&self) -> Option<BatchId> {
        self.coordinator.current()
    }

    /// Batches submitted but not yet picked up by the coordinator.
    pub fn pending_batches(&self) -> usize {
        self.coordinator.pending()
    }

    pub fn queue_depth(&self) -> usize {
        self.queue.depth()
    }

    pub fn is_accepting(&self) -> bool {
        self.shutdown.is_accepting()
    }

    pub fn shutdown_state(&self) -> ShutdownState {
        self.shutdown.state()
    }

    pub fn in_flight(&self) -> u32 {
        self.shutdown.in_flight_count()
    }

    pub fn registry(&self) -> &Arc<DeviceRegistry> {
        &self.registry
    }

    pub fn config(&self) -> &SchedulerConfig {
        &self.config
    }

    /// Stop accepting work, drain what was accepted, then stop every task.
    ///
    /// Tasks still running at the deadline are aborted; their jobs report
    /// failure, as do the items of batches the coordinator never reached.
    pub async fn shutdown(&self, timeout: Duration) -> ShutdownResult {
        let deadline = tokio::time::Instant::now() + timeout;
        if self.shutdown.begin() {
            tracing::info!(in_flight = self.shutdown.in_flight_count(), "scheduler draining");
        }
        let result = self.shutdown.wait_for_drain(timeout).await;

        let _ = self.batches.send(BatchCommand::Shutdown);
        for lane in 0..self.queue.lane_count() {
            self.queue.push_shutdown(lane);
        }

        let tasks = std::mem::take(&mut *self.tasks.lock());
        let aborts: Vec<_> = tasks.iter().map(|t| t.abort_handle()).collect();
        let remaining = deadline.saturating_duration_since(tokio::time::Instant::now());
        if tokio::time::timeout(remaining, futures::future::join_all(tasks)).await.is_err() {
            tracing::warn!("scheduler tasks did not stop before deadline, aborting");
            for abort in aborts {
                abort.abort();
            }
        }
        let abandoned = self.queue.drain();
        if abandoned > 0 {
            tracing::warn!(abandoned, "queued jobs abandoned at shutdown");
        }

        self.shutdown.finish();
        tracing::info!(result = ?result, "scheduler stopped");
        result
    }

    /// [`Scheduler::shutdown`] with the configured timeout.
    pub async fn shutdown_default(&self) -> ShutdownResult {
        self.shutdown(self.config.shutdown_timeout).await
    }
}
