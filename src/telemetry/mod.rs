//! Telemetry for the cutout runtime.
//!
//! Structured logging, job spans and metrics. Metrics go through the
//! `metrics` facade; installing an exporter is left to the embedding process.

mod logging;
mod metrics;
mod spans;

pub use logging::{init_logging, LogConfig, LogError, LogFormat};
pub use metrics::{
    init_metrics, record_batch_complete, record_batch_queue_depth, record_device_reset,
    record_job_outcome, record_job_queue_depth, record_job_retry,
};
pub use spans::{JobSpan, SpanExt};
