// Copyright 2024-2026 Cutout Runtime Contributors
// Licensed under the Apache License, Version 2.0

//! Device listing and a synthetic end-to-end scheduler check.

use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::device::{detect_backend, DeviceInfo};
use crate::engine::mock::MockEngine;
use crate::engine::ImageInput;
use crate::scheduler::{DiscardSink, JobSpec};
use crate::{Runtime, RuntimeConfig};

/// Print the devices the scheduler would register. Returns an exit code.
pub fn run_devices(json: bool) -> i32 {
    let backend = detect_backend();
    let mut devices = backend.discover();
    if devices.is_empty() {
        devices.push(DeviceInfo::cpu());
    }

    if json {
        match serde_json::to_string_pretty(&devices) {
            Ok(out) => println!("{}", out),
            Err(e) => {
                eprintln!("Failed to encode device list: {}", e);
                return 1;
            }
        }
    } else {
        println!("Backend: {}", backend.name());
        for device in &devices {
            let memory = if device.total_memory > 0 {
                format!("{} MiB", device.total_memory / (1024 * 1024))
            } else {
                "-".to_string()
            };
            println!("  {:<8} {:<10} {:<10} {}", device.id.to_string(), device.kind.to_string(), memory, device.name);
        }
    }
    0
}

/// Push `jobs` synthetic images through the scheduler on the detected
/// devices, using the in-process mock engine. Returns an exit code.
pub async fn run_selftest(jobs: usize) -> i32 {
    let config = RuntimeConfig::from_env();
    tracing::debug!(
        max_attempts = config.scheduler.retry.max_attempts,
        chunk_size = config.scheduler.chunk.chunk_size,
        "selftest configuration"
    );
    let engine = MockEngine::with_delay(Duration::from_millis(5));
    let runtime = Runtime::start(config, detect_backend(), Arc::new(engine.clone()));

    let items: Vec<JobSpec> = (0..jobs)
        .map(|i| JobSpec::new(ImageInput::new(format!("selftest_{}.png", i), vec![0u8; 64])))
        .collect();

    let start = Instant::now();
    let summary = match runtime.scheduler.submit_batch(items, Arc::new(DiscardSink)) {
        Ok(handle) => handle.summary().await,
        Err(e) => Err(e),
    };
    let elapsed = start.elapsed();
    runtime.shutdown().await;

    match summary {
        Ok(summary) => {
            println!(
                "{} jobs on {} device(s): {} succeeded, {} failed in {:?}",
                summary.total,
                runtime.scheduler.registry().device_count(),
                summary.succeeded,
                summary.failed,
                elapsed
            );
            if engine.max_concurrency_per_device() > 1 {
                eprintln!("FAIL: concurrent engine calls observed on one device");
                return 1;
            }
            if summary.failed == 0 { 0 } else { 1 }
        }
        Err(e) => {
            eprintln!("Self-test failed: {}", e);
            1
        }
    }
}
