//! Load shedding for very large uploads.
//!
//! A logical upload is split into fixed-size batches submitted one after the
//! other. Between chunks device caches are released and, when a chunk mostly
//! failed, every device is reset before continuing.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;

use super::job::{JobResult, JobSpec};
use super::sink::BatchEvent;
use super::{Scheduler, SubmitError};

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ChunkPolicy {
    pub chunk_size: usize,
    /// Pause before submitting the next chunk.
    pub cooldown: Duration,
    /// Failure ratio above which all devices are reset.
    pub failure_threshold: f64,
    /// Pause after a reset.
    pub reset_delay: Duration,
}

impl Default for ChunkPolicy {
    fn default() -> Self {
        Self {
            chunk_size: 108,
            cooldown: Duration::from_secs(2),
            failure_threshold: 0.5,
            reset_delay: Duration::from_secs(1),
        }
    }
}

impl ChunkPolicy {
    /// Decide on a chunk's final counts.
    pub fn should_reset(&self, failed: usize, chunk_len: usize) -> bool {
        chunk_len > 0 && failed as f64 / chunk_len as f64 > self.failure_threshold
    }
}

/// Outcome of a chunked run. `results` are in submission order.
#[derive(Debug, Clone)]
pub struct ChunkReport {
    pub results: Vec<JobResult>,
    pub total: usize,
    pub succeeded: usize,
    pub failed: usize,
    pub chunks: usize,
    pub resets: usize,
}

impl Scheduler {
    /// Run `items` in chunks sized by the scheduler's configured policy.
    pub async fn run_chunked(&self, items: Vec<JobSpec>) -> Result<ChunkReport, SubmitError> {
        let policy = self.config().chunk;
        self.run_chunked_with(items, &policy).await
    }

    /// Run `items` as a sequence of chunk-sized batches.
    ///
    /// All items are validated up front; nothing is submitted if any is
    /// invalid.
    pub async fn run_chunked_with(
        &self,
        items: Vec<JobSpec>,
        policy: &ChunkPolicy,
    ) -> Result<ChunkReport, SubmitError> {
        for (index, spec) in items.iter().enumerate() {
            spec.input
                .validate()
                .map_err(|source| SubmitError::InvalidItem { index, source })?;
        }

        let total = items.len();
        let chunk_size = policy.chunk_size.max(1);
        let chunk_count = total.div_ceil(chunk_size);
        let mut report = ChunkReport {
            results: Vec::with_capacity(total),
            total,
            succeeded: 0,
            failed: 0,
            chunks: 0,
            resets: 0,
        };

        let mut remaining = items.into_iter();
        for chunk_index in 0..chunk_count {
            let chunk: Vec<JobSpec> = remaining.by_ref().take(chunk_size).collect();
            let chunk_len = chunk.len();
            tracing::info!(chunk = chunk_index + 1, of = chunk_count, size = chunk_len, "submitting chunk");

            let (tx, mut rx) = mpsc::unbounded_channel();
            let summary = self.submit_batch(chunk, Arc::new(tx))?.summary().await?;

            let mut results = Vec::with_capacity(chunk_len);
            while let Ok(event) = rx.try_recv() {
                if let BatchEvent::Job { result, .. } = event {
                    results.push(result);
                }
            }
            results.sort_by_key(|r| r.job_id);
            report.results.extend(results);
            report.succeeded += summary.succeeded;
            report.failed += summary.failed;
            report.chunks += 1;

            self.registry().release_all_caches();

            if policy.should_reset(summary.failed, chunk_len) {
                tracing::warn!(
                    chunk = chunk_index + 1,
                    failed = summary.failed,
                    size = chunk_len,
                    "chunk failure rate over threshold, resetting all devices"
                );
                if let Err(e) = self.registry().reset_all().await {
                    tracing::warn!(error = %e, "reset after failed chunk incomplete");
                }
                report.resets += 1;
                tokio::time::sleep(policy.reset_delay).await;
            }

            if chunk_index + 1 < chunk_count {
                tokio::time::sleep(policy.cooldown).await;
            }
        }

        Ok(report)
    }
}
