//! Metric names and recording helpers.

use crate::device::DeviceId;

pub const JOBS_TOTAL: &str = "cutout_jobs_total";
pub const JOB_RETRIES_TOTAL: &str = "cutout_job_retries_total";
pub const DEVICE_RESETS_TOTAL: &str = "cutout_device_resets_total";
pub const BATCHES_TOTAL: &str = "cutout_batches_total";
pub const JOB_QUEUE_DEPTH: &str = "cutout_job_queue_depth";
pub const BATCH_QUEUE_DEPTH: &str = "cutout_batch_queue_depth";
pub const JOB_LATENCY_MS: &str = "cutout_job_latency_ms";

/// Register metric descriptions with the installed recorder.
pub fn init_metrics() {
    metrics::describe_counter!(JOBS_TOTAL, "Jobs reaching a terminal state, by device and outcome");
    metrics::describe_counter!(JOB_RETRIES_TOTAL, "Job re-dispatches after a transient device fault");
    metrics::describe_counter!(DEVICE_RESETS_TOTAL, "Device resets, by device and recreation outcome");
    metrics::describe_counter!(BATCHES_TOTAL, "Batches whose summary has been delivered");
    metrics::describe_gauge!(JOB_QUEUE_DEPTH, "Jobs waiting for a device worker");
    metrics::describe_gauge!(BATCH_QUEUE_DEPTH, "Batches waiting for the coordinator");
    metrics::describe_histogram!(JOB_LATENCY_MS, "Wall time from dispatch to terminal result");
}

pub fn record_job_outcome(device: DeviceId, succeeded: bool, latency_ms: u64) {
    let outcome = if succeeded { "succeeded" } else { "failed" };
    metrics::counter!(JOBS_TOTAL, "device" => device.to_string(), "outcome" => outcome).increment(1);
    metrics::histogram!(JOB_LATENCY_MS, "device" => device.to_string()).record(latency_ms as f64);
}

pub fn record_job_retry(device: DeviceId) {
    metrics::counter!(JOB_RETRIES_TOTAL, "device" => device.to_string()).increment(1);
}

pub fn record_device_reset(device: DeviceId, ok: bool) {
    let ok = if ok { "true" } else { "false" };
    metrics::counter!(DEVICE_RESETS_TOTAL, "device" => device.to_string(), "ok" => ok).increment(1);
}

pub fn record_batch_complete() {
    metrics::counter!(BATCHES_TOTAL).increment(1);
}

pub fn record_job_queue_depth(depth: usize) {
    metrics::gauge!(JOB_QUEUE_DEPTH).set(depth as f64);
}

pub fn record_batch_queue_depth(depth: usize) {
    metrics::gauge!(BATCH_QUEUE_DEPTH).set(depth as f64);
}
