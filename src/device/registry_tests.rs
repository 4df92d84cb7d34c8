//! Tests for device leasing, round-robin selection and reset.

use std::sync::Arc;
use std::time::Duration;

use super::*;
use crate::device::{CpuBackend, MockDeviceBackend};
use crate::engine::mock::MockEngine;

fn registry(devices: usize) -> (DeviceRegistry, Arc<MockDeviceBackend>, MockEngine) {
    let backend = Arc::new(MockDeviceBackend::new(devices));
    let engine = MockEngine::new();
    let registry = DeviceRegistry::new(backend.clone(), Arc::new(engine.clone()));
    (registry, backend, engine)
}

fn image(name: &str) -> ImageInput {
    ImageInput::new(name, vec![1, 2, 3])
}

#[test]
fn cpu_fallback_when_no_accelerators() {
    let registry = DeviceRegistry::new(Arc::new(CpuBackend), Arc::new(MockEngine::new()));
    assert_eq!(registry.device_count(), 1);
    assert!(!registry.has_accelerators());
    assert_eq!(registry.devices()[0].id, DeviceId::Cpu);
}

#[test]
fn round_robin_wraps() {
    let (registry, _, _) = registry(3);
    let picks: Vec<usize> = (0..7).map(|_| registry.resolve(None)).collect();
    assert_eq!(picks, vec![0, 1, 2, 0, 1, 2, 0]);
}

#[test]
fn hints_resolve() {
    let (registry, _, _) = registry(2);
    assert_eq!(registry.resolve(Some(DeviceId::Accelerator(1))), 1);
    assert_eq!(registry.resolve(Some(DeviceId::Accelerator(5))), 1);
    // CPU hint on an accelerator registry falls back to round-robin
    assert_eq!(registry.resolve(Some(DeviceId::Cpu)), 0);
    assert_eq!(registry.resolve(Some(DeviceId::Cpu)), 1);

    let cpu_only = DeviceRegistry::new(Arc::new(CpuBackend), Arc::new(MockEngine::new()));
    assert_eq!(cpu_only.resolve(Some(DeviceId::Accelerator(3))), 0);
    assert_eq!(cpu_only.resolve(None), 0);
}

#[tokio::test]
async fn session_created_lazily_once() {
    let (registry, _, engine) = registry(1);
    assert_eq!(engine.sessions_created(), 0);

    for name in ["a.png", "b.png"] {
        let mut lease = registry.acquire(None).await;
        lease.process(&image(name), &ProcessingParams::default()).await.unwrap();
    }
    assert_eq!(engine.sessions_created(), 1);
    assert!(registry.status()[0].session_ready);
}

#[tokio::test]
async fn lease_drop_releases_cache() {
    let (registry, backend, _) = registry(1);
    {
        let _lease = registry.acquire(None).await;
    }
    assert_eq!(backend.release_count(DeviceId::Accelerator(0)), 1);
}

#[tokio::test]
async fn leases_are_exclusive_per_device() {
    let (registry, _, _) = registry(1);
    let registry = Arc::new(registry);

    let held = registry.acquire(None).await;
    let other = {
        let registry = registry.clone();
        tokio::spawn(async move {
            let lease = registry.acquire(None).await;
            lease.id()
        })
    };
    tokio::time::sleep(Duration::from_millis(20)).await;
    assert!(!other.is_finished());

    drop(held);
    assert_eq!(other.await.unwrap(), DeviceId::Accelerator(0));
}

#[tokio::test]
async fn reset_recreates_session() {
    let (registry, backend, engine) = registry(2);
    let id = DeviceId::Accelerator(1);

    registry.reset(id).await.unwrap();

    let status = &registry.status()[1];
    assert_eq!(status.resets, 1);
    assert!(status.session_ready);
    assert!(status.last_reset.is_some());
    assert_eq!(backend.synchronize_count(id), 1);
    assert_eq!(engine.sessions_created(), 1);
    assert_eq!(registry.status()[0].resets, 0);
}

#[tokio::test]
async fn reset_tolerates_synchronize_failure() {
    let (registry, backend, _) = registry(1);
    backend.set_fail_synchronize(true);
    assert!(registry.reset(DeviceId::Accelerator(0)).await.is_ok());
}

#[tokio::test]
async fn failed_recreation_is_retried_lazily() {
    let (registry, _, engine) = registry(1);
    let id = DeviceId::Accelerator(0);
    engine.fail_session_creation(1);

    let err = registry.reset(id).await.unwrap_err();
    assert!(matches!(err, DeviceError::SessionInit { .. }));
    assert_eq!(registry.needs_reinit(), vec![id]);

    let mut lease = registry.acquire(Some(id)).await;
    lease.process(&image("x.png"), &ProcessingParams::default()).await.unwrap();
    drop(lease);
    assert!(registry.needs_reinit().is_empty());
}

#[tokio::test]
async fn reset_unknown_device_is_rejected() {
    let (registry, _, _) = registry(1);
    let err = registry.reset(DeviceId::Accelerator(4)).await.unwrap_err();
    assert!(matches!(err, DeviceError::InvalidId(_)));
}

#[tokio::test]
async fn reset_all_touches_every_device() {
    let (registry, _, _) = registry(3);
    registry.reset_all().await.unwrap();
    assert!(registry.status().iter().all(|s| s.resets == 1));
}

#[tokio::test]
async fn reset_bumps_generation() {
    let (registry, _, _) = registry(1);
    let before = registry.acquire(None).await.generation();
    registry.reset(DeviceId::Accelerator(0)).await.unwrap();
    let after = registry.acquire(None).await.generation();
    assert_eq!(after, before + 1);
}
