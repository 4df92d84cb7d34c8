//! Tests for chunked runs of large uploads.

use std::sync::Arc;
use std::time::Duration;

use cutout_runtime::device::MockDeviceBackend;
use cutout_runtime::engine::mock::MockEngine;
use cutout_runtime::engine::{EngineFault, ImageInput};
use cutout_runtime::scheduler::{ChunkPolicy, JobSpec, Scheduler, SchedulerConfig, SubmitError};

fn policy(chunk_size: usize) -> ChunkPolicy {
    ChunkPolicy {
        chunk_size,
        cooldown: Duration::from_millis(1),
        failure_threshold: 0.5,
        reset_delay: Duration::from_millis(1),
    }
}

fn images(prefix: &str, count: usize) -> Vec<JobSpec> {
    (0..count)
        .map(|i| JobSpec::new(ImageInput::new(format!("{}{}.png", prefix, i), vec![1, 1])))
        .collect()
}

fn start(devices: usize, engine: &MockEngine) -> Arc<Scheduler> {
    Scheduler::start(
        SchedulerConfig::default(),
        Arc::new(MockDeviceBackend::new(devices)),
        Arc::new(engine.clone()),
    )
}

#[tokio::test]
async fn test_chunks_cover_every_item_in_order() {
    let engine = MockEngine::new();
    let scheduler = start(2, &engine);

    let report = scheduler.run_chunked_with(images("img", 7), &policy(3)).await.unwrap();

    assert_eq!(report.chunks, 3);
    assert_eq!(report.total, 7);
    assert_eq!(report.succeeded, 7);
    assert_eq!(report.resets, 0);
    let names: Vec<_> = report.results.iter().map(|r| r.filename.as_str()).collect();
    assert_eq!(names, ["img0.png", "img1.png", "img2.png", "img3.png", "img4.png", "img5.png", "img6.png"]);
}

#[tokio::test]
async fn test_mostly_failed_chunk_resets_all_devices() {
    let engine = MockEngine::new();
    for name in ["img0.png", "img1.png", "img2.png"] {
        engine.script_faults(name, vec![EngineFault::Fatal("decoder crashed".into())]);
    }
    let scheduler = start(2, &engine);

    let report = scheduler.run_chunked_with(images("img", 8), &policy(4)).await.unwrap();

    assert_eq!(report.chunks, 2);
    assert_eq!(report.failed, 3);
    assert_eq!(report.succeeded, 5);
    assert_eq!(report.resets, 1);
    for status in scheduler.registry().status() {
        assert_eq!(status.resets, 1, "device {} not reset", status.id);
    }
}

#[tokio::test]
async fn test_half_failed_chunk_is_not_reset() {
    let engine = MockEngine::new();
    for name in ["img0.png", "img1.png"] {
        engine.script_faults(name, vec![EngineFault::Fatal("bad pixels".into())]);
    }
    let scheduler = start(1, &engine);

    let report = scheduler.run_chunked_with(images("img", 4), &policy(4)).await.unwrap();
    assert_eq!(report.failed, 2);
    assert_eq!(report.resets, 0);
}

#[tokio::test]
async fn test_invalid_item_submits_nothing() {
    let engine = MockEngine::new();
    let scheduler = start(1, &engine);

    let mut items = images("img", 5);
    items[3] = JobSpec::new(ImageInput::new("empty.png", Vec::new()));

    let err = scheduler.run_chunked_with(items, &policy(2)).await.unwrap_err();
    assert!(matches!(err, SubmitError::InvalidItem { index: 3, .. }));
    assert!(engine.dispatches().is_empty());
}

#[tokio::test]
async fn test_caches_released_after_each_chunk() {
    let engine = MockEngine::new();
    let backend = Arc::new(MockDeviceBackend::new(1));
    let scheduler = Scheduler::start(SchedulerConfig::default(), backend.clone(), Arc::new(engine.clone()));

    scheduler.run_chunked_with(images("img", 4), &policy(2)).await.unwrap();

    // One release per dispatch plus one per chunk boundary.
    let device = scheduler.registry().devices()[0].id;
    assert!(backend.release_count(device) >= 4 + 2);
}

#[tokio::test]
async fn test_configured_policy_drives_default_run() {
    let engine = MockEngine::new();
    let config = SchedulerConfig { chunk: policy(2), ..Default::default() };
    let scheduler = Scheduler::start(config, Arc::new(MockDeviceBackend::new(1)), Arc::new(engine.clone()));

    let report = scheduler.run_chunked(images("img", 5)).await.unwrap();

    assert_eq!(report.chunks, 3);
    assert_eq!(report.total, 5);
    assert_eq!(report.succeeded, 5);
}
