//! Batches and batch completion tracking.

use std::fmt;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tokio::sync::watch;

use super::job::{JobResult, JobSpec};
use super::sink::{BatchSink, ResultSink};
use super::SubmitError;
use crate::engine::ProcessingParams;
use crate::shutdown::ShutdownGuard;
use crate::telemetry;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct BatchId(pub u64);

impl fmt::Display for BatchId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Final counts of a batch. `succeeded + failed == total`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BatchSummary {
    pub batch_id: BatchId,
    pub total: usize,
    pub succeeded: usize,
    pub failed: usize,
}

/// A batch ready for submission.
pub struct BatchRequest {
    pub(crate) id: Option<BatchId>,
    pub(crate) items: Vec<JobSpec>,
    pub(crate) sink: Arc<dyn BatchSink>,
    pub(crate) live_params: Option<watch::Receiver<ProcessingParams>>,
}

impl BatchRequest {
    pub fn new(items: Vec<JobSpec>, sink: Arc<dyn BatchSink>) -> Self {
        Self { id: None, items, sink, live_params: None }
    }

    /// Use an id reserved with `Scheduler::allocate_batch_id`.
    pub fn with_id(mut self, id: BatchId) -> Self {
        self.id = Some(id);
        self
    }

    /// Parameters for every item are read from `params` when the batch is
    /// fanned out, replacing the per-item values.
    pub fn with_live_params(mut self, params: watch::Receiver<ProcessingParams>) -> Self {
        self.live_params = Some(params);
        self
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }
}

/// Awaitable summary of a submitted batch.
#[derive(Debug)]
pub struct BatchHandle {
    id: BatchId,
    total: usize,
    rx: watch::Receiver<Option<BatchSummary>>,
}

impl BatchHandle {
    pub fn id(&self) -> BatchId {
        self.id
    }

    pub fn total(&self) -> usize {
        self.total
    }

    pub fn is_complete(&self) -> bool {
        self.rx.borrow().is_some()
    }

    pub async fn summary(mut self) -> Result<BatchSummary, SubmitError> {
        let summary = *self
            .rx
            .wait_for(Option::is_some)
            .await
            .map_err(|_| SubmitError::Closed)?;
        summary.ok_or(SubmitError::Closed)
    }
}

/// Owns the completion counters of one batch.
///
/// `record_completion` is the only mutator and is called once per job; the
/// call that brings `completed` to `total` delivers the summary.
pub struct BatchTracker {
    id: BatchId,
    total: usize,
    succeeded: AtomicUsize,
    failed: AtomicUsize,
    completed: AtomicUsize,
    sink: Arc<dyn BatchSink>,
    done: watch::Sender<Option<BatchSummary>>,
    flight: Mutex<Option<ShutdownGuard>>,
}

impl BatchTracker {
    pub(crate) fn new(
        id: BatchId,
        total: usize,
        sink: Arc<dyn BatchSink>,
        flight: Option<ShutdownGuard>,
    ) -> Arc<Self> {
        let (done, _) = watch::channel(None);
        Arc::new(Self {
            id,
            total,
            succeeded: AtomicUsize::new(0),
            failed: AtomicUsize::new(0),
            completed: AtomicUsize::new(0),
            sink,
            done,
            flight: Mutex::new(flight),
        })
    }

    pub fn id(&self) -> BatchId {
        self.id
    }

    pub fn total(&self) -> usize {
        self.total
    }

    pub fn completed(&self) -> usize {
        self.completed.load(Ordering::Acquire)
    }

    pub(crate) fn handle(&self) -> BatchHandle {
        BatchHandle { id: self.id, total: self.total, rx: self.done.subscribe() }
    }

    pub(crate) fn subscribe(&self) -> watch::Receiver<Option<BatchSummary>> {
        self.done.subscribe()
    }

    /// Forward one job result, then count it.
    pub fn record_completion(&self, result: JobResult) {
        let counter = if result.is_success() { &self.succeeded } else { &self.failed };
        self.sink.job_finished(self.id, result);
        counter.fetch_add(1, Ordering::Relaxed);

        let completed = self.completed.fetch_add(1, Ordering::AcqRel) + 1;
        if completed == self.total {
            self.finish();
        } else if completed > self.total {
            tracing::error!(batch_id = %self.id, completed, total = self.total, "batch over-completed");
        }
    }

    /// Complete a batch with no jobs.
    pub fn complete_empty(&self) {
        if self.total == 0 {
            self.finish();
        }
    }

    fn finish(&self) {
        let summary = BatchSummary {
            batch_id: self.id,
            total: self.total,
            succeeded: self.succeeded.load(Ordering::Acquire),
            failed: self.failed.load(Ordering::Acquire),
        };
        tracing::info!(
            batch_id = %summary.batch_id,
            total = summary.total,
            succeeded = summary.succeeded,
            failed = summary.failed,
            "batch complete"
        );
        self.sink.batch_complete(&summary);
        self.done.send_replace(Some(summary));
        telemetry::record_batch_complete();
        self.flight.lock().take();
    }
}

/// Per-job sink routing results into a batch's tracker.
pub(crate) struct BatchJobSink(pub(crate) Arc<BatchTracker>);

impl ResultSink for BatchJobSink {
    fn deliver(&self, result: JobResult) {
        self.0.record_completion(result);
    }
}
