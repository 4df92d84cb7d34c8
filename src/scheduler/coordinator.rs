//! Batch coordinator: one batch in flight at a time.
//!
//! Batches are fanned out in submission order. The coordinator waits for the
//! current batch's summary before touching the next one, while workers keep
//! draining the job queue independently.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use parking_lot::RwLock;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;

use super::batch::{BatchId, BatchJobSink, BatchTracker};
use super::job::{IdGenerator, Job, JobSpec};
use super::queue::JobQueue;
use crate::device::DeviceRegistry;
use crate::engine::ProcessingParams;
use crate::telemetry;

/// A submitted batch waiting for its turn.
///
/// A batch dropped before the coordinator fans it out (a stopped or aborted
/// coordinator drops its whole backlog) fails every item through its
/// tracker, so the sink still sees one result per job and the summary.
pub(crate) struct PendingBatch {
    tracker: Arc<BatchTracker>,
    items: Vec<JobSpec>,
    live_params: Option<watch::Receiver<ProcessingParams>>,
    ids: Arc<IdGenerator>,
    state: Arc<CoordinatorState>,
    settled: bool,
}

impl PendingBatch {
    pub fn new(
        tracker: Arc<BatchTracker>,
        items: Vec<JobSpec>,
        live_params: Option<watch::Receiver<ProcessingParams>>,
        ids: Arc<IdGenerator>,
        state: Arc<CoordinatorState>,
    ) -> Self {
        state.enqueued();
        Self { tracker, items, live_params, ids, state, settled: false }
    }

    /// Take the items for fan-out.
    fn dispatch(&mut self) -> Vec<JobSpec> {
        self.settle();
        std::mem::take(&mut self.items)
    }

    /// Discard a batch that was never handed to the caller.
    pub fn reject(mut self) {
        self.settle();
    }

    fn settle(&mut self) {
        if !self.settled {
            self.settled = true;
            self.state.dequeued();
        }
    }
}

impl Drop for PendingBatch {
    fn drop(&mut self) {
        if self.settled {
            return;
        }
        self.settle();
        let items = std::mem::take(&mut self.items);
        tracing::warn!(batch_id = %self.tracker.id(), jobs = items.len(), "batch abandoned before dispatch");
        if items.is_empty() {
            self.tracker.complete_empty();
            return;
        }
        for spec in items {
            // Never queued, so dropping it reports the failure.
            drop(Job::new(self.ids.next(), spec, Arc::new(BatchJobSink(self.tracker.clone())), None));
        }
    }
}

pub(crate) enum BatchCommand {
    Run(PendingBatch),
    Shutdown,
}

/// Coordinator state visible to the scheduler facade.
#[derive(Default)]
pub(crate) struct CoordinatorState {
    current: RwLock<Option<BatchId>>,
    pending: AtomicUsize,
}

impl CoordinatorState {
    pub fn current(&self) -> Option<BatchId> {
        *self.current.read()
    }

    pub fn pending(&self) -> usize {
        self.pending.load(Ordering::Acquire)
    }

    pub fn enqueued(&self) {
        let depth = self.pending.fetch_add(1, Ordering::AcqRel) + 1;
        telemetry::record_batch_queue_depth(depth);
    }

    pub fn dequeued(&self) {
        let depth = self.pending.fetch_sub(1, Ordering::AcqRel).saturating_sub(1);
        telemetry::record_batch_queue_depth(depth);
    }
}

pub(crate) struct CoordinatorContext {
    pub queue: Arc<JobQueue>,
    pub registry: Arc<DeviceRegistry>,
    pub ids: Arc<IdGenerator>,
    pub state: Arc<CoordinatorState>,
}

pub(crate) fn spawn_coordinator(
    rx: mpsc::UnboundedReceiver<BatchCommand>,
    ctx: CoordinatorContext,
) -> JoinHandle<()> {
    tokio::spawn(async move { coordinator_loop(rx, &ctx).await })
}

async fn coordinator_loop(mut rx: mpsc::UnboundedReceiver<BatchCommand>, ctx: &CoordinatorContext) {
    tracing::info!("batch coordinator started");
    while let Some(command) = rx.recv().await {
        match command {
            BatchCommand::Run(batch) => run_batch(batch, ctx).await,
            BatchCommand::Shutdown => break,
        }
    }
    // Anything still queued is dropped with the receiver and fails its items.
    rx.close();
    tracing::info!("batch coordinator stopped");
}

async fn run_batch(mut batch: PendingBatch, ctx: &CoordinatorContext) {
    let items = batch.dispatch();
    let tracker = batch.tracker.clone();
    let mut done = tracker.subscribe();
    *ctx.state.current.write() = Some(tracker.id());
    tracing::info!(batch_id = %tracker.id(), total = tracker.total(), "batch dispatch started");

    if items.is_empty() {
        tracker.complete_empty();
    } else {
        // Resolved once, here, so config changes only reach later batches.
        let live = batch.live_params.as_ref().map(|rx| *rx.borrow());
        for mut spec in items {
            if let Some(params) = live {
                spec.params = params;
            }
            let lane = ctx.registry.resolve(spec.affinity);
            let job = Job::new(ctx.ids.next(), spec, Arc::new(BatchJobSink(tracker.clone())), None);
            ctx.queue.push(lane, job);
        }
    }

    if done.wait_for(Option::is_some).await.is_err() {
        tracing::error!(batch_id = %tracker.id(), "batch tracker closed before completion");
    }
    *ctx.state.current.write() = None;
}
