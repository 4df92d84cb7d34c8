//! Result delivery from workers back to submitters.

use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::{mpsc, oneshot};

use super::batch::{BatchId, BatchSummary};
use super::job::{JobId, JobResult};
use super::SubmitError;
use crate::device::DeviceId;

/// Receives the terminal result of a job. Called exactly once per job, from
/// the worker task, so implementations must not block.
pub trait ResultSink: Send + Sync {
    fn deliver(&self, result: JobResult);
}

impl ResultSink for mpsc::UnboundedSender<JobResult> {
    fn deliver(&self, result: JobResult) {
        if self.send(result).is_err() {
            tracing::debug!("job result receiver dropped");
        }
    }
}

/// Single-use sink backing [`JobHandle`].
pub struct OneshotSink {
    tx: Mutex<Option<oneshot::Sender<JobResult>>>,
}

impl OneshotSink {
    pub fn channel() -> (Arc<Self>, oneshot::Receiver<JobResult>) {
        let (tx, rx) = oneshot::channel();
        (Arc::new(Self { tx: Mutex::new(Some(tx)) }), rx)
    }
}

impl ResultSink for OneshotSink {
    fn deliver(&self, result: JobResult) {
        if let Some(tx) = self.tx.lock().take() {
            let _ = tx.send(result);
        }
    }
}

/// Awaitable result of a directly submitted job.
#[derive(Debug)]
pub struct JobHandle {
    id: JobId,
    device: DeviceId,
    rx: oneshot::Receiver<JobResult>,
}

impl JobHandle {
    pub(crate) fn new(id: JobId, device: DeviceId, rx: oneshot::Receiver<JobResult>) -> Self {
        Self { id, device, rx }
    }

    pub fn id(&self) -> JobId {
        self.id
    }

    /// Device the job was assigned to at submission.
    pub fn device(&self) -> DeviceId {
        self.device
    }

    pub async fn result(self) -> Result<JobResult, SubmitError> {
        self.rx.await.map_err(|_| SubmitError::Closed)
    }
}

/// Receives per-job results and the final summary of a batch.
///
/// Every `job_finished` call for a batch happens before its
/// `batch_complete`.
pub trait BatchSink: Send + Sync {
    fn job_finished(&self, batch_id: BatchId, result: JobResult);
    fn batch_complete(&self, summary: &BatchSummary);
}

/// Channel form of [`BatchSink`] callbacks.
#[derive(Debug, Clone)]
pub enum BatchEvent {
    Job { batch_id: BatchId, result: JobResult },
    Complete(BatchSummary),
}

impl BatchSink for mpsc::UnboundedSender<BatchEvent> {
    fn job_finished(&self, batch_id: BatchId, result: JobResult) {
        let _ = self.send(BatchEvent::Job { batch_id, result });
    }

    fn batch_complete(&self, summary: &BatchSummary) {
        let _ = self.send(BatchEvent::Complete(*summary));
    }
}

/// Sink for callers that only await the summary.
#[derive(Debug, Default, Clone, Copy)]
pub struct DiscardSink;

impl BatchSink for DiscardSink {
    fn job_finished(&self, _batch_id: BatchId, _result: JobResult) {}
    fn batch_complete(&self, _summary: &BatchSummary) {}
}
