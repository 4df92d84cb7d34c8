//! Job spans and result recording.

use tracing::{info_span, Span};

use crate::device::DeviceId;

/// Extension trait for recording an operation's outcome on a span.
pub trait SpanExt {
    fn record_result<T, E>(&self, result: &Result<T, E>)
    where
        E: std::fmt::Display;
}

impl SpanExt for Span {
    fn record_result<T, E>(&self, result: &Result<T, E>)
    where
        E: std::fmt::Display,
    {
        match result {
            Ok(_) => {
                self.record("status", "ok");
            }
            Err(e) => {
                self.record("status", "error");
                self.record("error.message", e.to_string().as_str());
            }
        }
    }
}

/// Factory for per-job spans.
pub struct JobSpan;

impl JobSpan {
    /// `attempts`, `status`, `error.message` and `latency_ms` are filled in
    /// once the job is terminal.
    pub fn new(job_id: u64, device: DeviceId, filename: &str) -> Span {
        info_span!(
            "cutout_job",
            job_id,
            device = %device,
            filename = %filename,
            attempts = tracing::field::Empty,
            status = tracing::field::Empty,
            error.message = tracing::field::Empty,
            latency_ms = tracing::field::Empty,
        )
    }
}
