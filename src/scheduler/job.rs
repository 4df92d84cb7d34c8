//! Jobs, job results and identifiers.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;

use serde::{Deserialize, Serialize};

use super::sink::ResultSink;
use crate::device::DeviceId;
use crate::engine::{ImageInput, ProcessedImage, ProcessingParams};
use crate::shutdown::ShutdownGuard;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct JobId(pub u64);

impl fmt::Display for JobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Monotonic job id source shared by direct submission and batch fan-out.
#[derive(Debug)]
pub struct IdGenerator {
    next: AtomicU64,
}

impl IdGenerator {
    pub fn new() -> Self {
        Self { next: AtomicU64::new(1) }
    }

    pub fn next(&self) -> JobId {
        JobId(self.next.fetch_add(1, Ordering::Relaxed))
    }
}

impl Default for IdGenerator {
    fn default() -> Self {
        Self::new()
    }
}

/// What a submitter asks for.
#[derive(Debug, Clone)]
pub struct JobSpec {
    pub input: ImageInput,
    pub params: ProcessingParams,
    /// Pin to a device; `None` takes the next round-robin device.
    pub affinity: Option<DeviceId>,
    /// Opaque submitter label echoed back on the result.
    pub tag: Option<String>,
}

impl JobSpec {
    pub fn new(input: ImageInput) -> Self {
        Self { input, params: ProcessingParams::default(), affinity: None, tag: None }
    }

    pub fn with_params(mut self, params: ProcessingParams) -> Self {
        self.params = params;
        self
    }

    pub fn on_device(mut self, device: DeviceId) -> Self {
        self.affinity = Some(device);
        self
    }

    pub fn with_tag(mut self, tag: impl Into<String>) -> Self {
        self.tag = Some(tag.into());
        self
    }
}

/// Per-job lifecycle, as seen in logs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobState {
    Queued,
    Dispatched,
    Retrying,
    Succeeded,
    Failed,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JobOutcome {
    Succeeded(ProcessedImage),
    Failed { error: String },
}

/// Terminal result of one job. Exactly one is delivered per accepted job.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JobResult {
    pub job_id: JobId,
    pub tag: Option<String>,
    /// Input filename
    pub filename: String,
    /// Device that produced the outcome; `None` if the job never ran.
    pub device: Option<DeviceId>,
    pub attempts: u32,
    pub outcome: JobOutcome,
}

impl JobResult {
    pub fn is_success(&self) -> bool {
        matches!(self.outcome, JobOutcome::Succeeded(_))
    }

    pub fn state(&self) -> JobState {
        if self.is_success() {
            JobState::Succeeded
        } else {
            JobState::Failed
        }
    }

    pub fn output(&self) -> Option<&ProcessedImage> {
        match &self.outcome {
            JobOutcome::Succeeded(image) => Some(image),
            JobOutcome::Failed { .. } => None,
        }
    }

    pub fn error(&self) -> Option<&str> {
        match &self.outcome {
            JobOutcome::Succeeded(_) => None,
            JobOutcome::Failed { error } => Some(error),
        }
    }
}

/// A job on its way through the queue.
///
/// A job that is dropped without [`Job::complete`] still reports a failure
/// to its sink.
pub struct Job {
    pub id: JobId,
    pub tag: Option<String>,
    pub input: ImageInput,
    pub params: ProcessingParams,
    pub affinity: Option<DeviceId>,
    pub attempts: u32,
    pub enqueued_at: Instant,
    sink: Option<Arc<dyn ResultSink>>,
    _flight: Option<ShutdownGuard>,
}

impl fmt::Debug for Job {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Job")
            .field("id", &self.id)
            .field("filename", &self.input.filename)
            .field("affinity", &self.affinity)
            .field("attempts", &self.attempts)
            .finish()
    }
}

impl Job {
    pub(crate) fn new(
        id: JobId,
        spec: JobSpec,
        sink: Arc<dyn ResultSink>,
        flight: Option<ShutdownGuard>,
    ) -> Self {
        Self {
            id,
            tag: spec.tag,
            input: spec.input,
            params: spec.params,
            affinity: spec.affinity,
            attempts: 0,
            enqueued_at: Instant::now(),
            sink: Some(sink),
            _flight: flight,
        }
    }

    /// Deliver the terminal result and consume the job.
    pub fn complete(mut self, device: Option<DeviceId>, outcome: JobOutcome) {
        self.deliver(device, outcome);
    }

    fn deliver(&mut self, device: Option<DeviceId>, outcome: JobOutcome) {
        if let Some(sink) = self.sink.take() {
            sink.deliver(JobResult {
                job_id: self.id,
                tag: self.tag.take(),
                filename: self.input.filename.clone(),
                device,
                attempts: self.attempts,
                outcome,
            });
        }
    }
}

impl Drop for Job {
    fn drop(&mut self) {
        if self.sink.is_some() {
            tracing::warn!(job_id = %self.id, "job dropped before completion");
            self.deliver(None, JobOutcome::Failed {
                error: "job abandoned before completion".to_string(),
            });
        }
    }
}
