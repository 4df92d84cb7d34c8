// Copyright 2024-2026 Cutout Runtime Contributors
// Licensed under the Apache License, Version 2.0

//! Device backend trait and implementations (CPU, mock, CUDA).

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::Mutex;

use super::types::{DeviceError, DeviceId, DeviceInfo, DeviceKind};

/// Hardware operations the registry needs from a device family.
///
/// Session handles live in the registry; a backend only enumerates devices and
/// performs driver-level housekeeping on them.
pub trait DeviceBackend: Send + Sync {
    fn name(&self) -> &str;

    /// Enumerate accelerators. An empty list makes the registry fall back to CPU.
    fn discover(&self) -> Vec<DeviceInfo>;

    /// Block until all pending operations on the device have drained.
    fn synchronize(&self, device: &DeviceInfo) -> Result<(), DeviceError>;

    /// Return cached device memory to the driver. Must not fail.
    fn release_cache(&self, device: &DeviceInfo);
}

/// Pick the best backend compiled into this build.
pub fn detect_backend() -> Arc<dyn DeviceBackend> {
    #[cfg(feature = "cuda")]
    {
        let cuda = CudaBackend::new();
        if !cuda.discover().is_empty() {
            return Arc::new(cuda);
        }
    }
    Arc::new(CpuBackend)
}

// -- CPU backend --------------------------------------------------------------

/// Backend with no accelerators; the registry registers the CPU device.
#[derive(Debug, Default, Clone, Copy)]
pub struct CpuBackend;

impl DeviceBackend for CpuBackend {
    fn name(&self) -> &str {
        "cpu"
    }

    fn discover(&self) -> Vec<DeviceInfo> {
        Vec::new()
    }

    fn synchronize(&self, _device: &DeviceInfo) -> Result<(), DeviceError> {
        Ok(())
    }

    fn release_cache(&self, _device: &DeviceInfo) {}
}

// -- Mock backend (testing + benchmarks) --------------------------------------

#[derive(Debug, Default, Clone, Copy)]
struct MockCounters {
    synchronized: u64,
    released: u64,
}

/// Simulated accelerators with per-device housekeeping counters.
pub struct MockDeviceBackend {
    devices: Vec<DeviceInfo>,
    counters: Mutex<HashMap<DeviceId, MockCounters>>,
    fail_synchronize: Mutex<bool>,
}

impl MockDeviceBackend {
    /// `count` simulated accelerators. Zero behaves like the CPU backend.
    pub fn new(count: usize) -> Self {
        let devices = (0..count)
            .map(|index| DeviceInfo {
                id: DeviceId::Accelerator(index),
                kind: DeviceKind::Simulated,
                name: format!("Simulated accelerator {}", index),
                total_memory: 8 * 1024 * 1024 * 1024,
            })
            .collect();
        Self {
            devices,
            counters: Mutex::new(HashMap::new()),
            fail_synchronize: Mutex::new(false),
        }
    }

    /// Make every subsequent `synchronize` call fail.
    pub fn set_fail_synchronize(&self, fail: bool) {
        *self.fail_synchronize.lock() = fail;
    }

    pub fn synchronize_count(&self, id: DeviceId) -> u64 {
        self.counters.lock().get(&id).map_or(0, |c| c.synchronized)
    }

    pub fn release_count(&self, id: DeviceId) -> u64 {
        self.counters.lock().get(&id).map_or(0, |c| c.released)
    }
}

impl DeviceBackend for MockDeviceBackend {
    fn name(&self) -> &str {
        "mock"
    }

    fn discover(&self) -> Vec<DeviceInfo> {
        self.devices.clone()
    }

    fn synchronize(&self, device: &DeviceInfo) -> Result<(), DeviceError> {
        if *self.fail_synchronize.lock() {
            return Err(DeviceError::Synchronize {
                device: device.id,
                reason: "simulated driver failure".to_string(),
            });
        }
        self.counters.lock().entry(device.id).or_default().synchronized += 1;
        Ok(())
    }

    fn release_cache(&self, device: &DeviceInfo) {
        self.counters.lock().entry(device.id).or_default().released += 1;
    }
}

// -- CUDA backend -------------------------------------------------------------

#[cfg(feature = "cuda")]
pub struct CudaBackend {
    contexts: Mutex<HashMap<usize, Arc<cudarc::driver::CudaDevice>>>,
}

#[cfg(feature = "cuda")]
impl CudaBackend {
    pub fn new() -> Self {
        Self { contexts: Mutex::new(HashMap::new()) }
    }

    fn context(&self, ordinal: usize) -> Result<Arc<cudarc::driver::CudaDevice>, DeviceError> {
        let mut contexts = self.contexts.lock();
        if let Some(ctx) = contexts.get(&ordinal) {
            return Ok(ctx.clone());
        }
        let ctx = cudarc::driver::CudaDevice::new(ordinal)
            .map_err(|e| DeviceError::BackendUnavailable(e.to_string()))?;
        contexts.insert(ordinal, ctx.clone());
        Ok(ctx)
    }
}

#[cfg(feature = "cuda")]
impl Default for CudaBackend {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(feature = "cuda")]
impl DeviceBackend for CudaBackend {
    fn name(&self) -> &str {
        "cuda"
    }

    fn discover(&self) -> Vec<DeviceInfo> {
        let count = match cudarc::driver::CudaDevice::count() {
            Ok(n) => n.max(0) as usize,
            Err(e) => {
                tracing::warn!(error = %e, "CUDA driver unavailable");
                return Vec::new();
            }
        };
        (0..count)
            .filter_map(|ordinal| match self.context(ordinal) {
                Ok(ctx) => Some(DeviceInfo {
                    id: DeviceId::Accelerator(ordinal),
                    kind: DeviceKind::Cuda,
                    name: ctx
                        .name()
                        .unwrap_or_else(|_| format!("CUDA device {}", ordinal)),
                    total_memory: 0,
                }),
                Err(e) => {
                    tracing::warn!(ordinal, error = %e, "skipping CUDA device");
                    None
                }
            })
            .collect()
    }

    fn synchronize(&self, device: &DeviceInfo) -> Result<(), DeviceError> {
        let DeviceId::Accelerator(ordinal) = device.id else {
            return Ok(());
        };
        self.context(ordinal)?
            .synchronize()
            .map_err(|e| DeviceError::Synchronize { device: device.id, reason: e.to_string() })
    }

    fn release_cache(&self, device: &DeviceInfo) {
        // cudarc frees on drop; synchronizing is all that is left to do here.
        if let Err(e) = self.synchronize(device) {
            tracing::debug!(device = %device.id, error = %e, "cache release sync failed");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cpu_backend_has_no_accelerators() {
        assert!(CpuBackend.discover().is_empty());
        assert!(CpuBackend.synchronize(&DeviceInfo::cpu()).is_ok());
    }

    #[test]
    fn test_mock_backend_discovery() {
        let backend = MockDeviceBackend::new(3);
        let devices = backend.discover();
        assert_eq!(devices.len(), 3);
        assert_eq!(devices[2].id, DeviceId::Accelerator(2));
        assert_eq!(devices[0].kind, DeviceKind::Simulated);
    }

    #[test]
    fn test_mock_backend_counters() {
        let backend = MockDeviceBackend::new(1);
        let device = backend.discover().remove(0);

        backend.synchronize(&device).unwrap();
        backend.release_cache(&device);
        backend.release_cache(&device);

        assert_eq!(backend.synchronize_count(device.id), 1);
        assert_eq!(backend.release_count(device.id), 2);
    }

    #[test]
    fn test_mock_backend_sync_failure() {
        let backend = MockDeviceBackend::new(1);
        let device = backend.discover().remove(0);
        backend.set_fail_synchronize(true);

        let result = backend.synchronize(&device);
        assert!(matches!(result, Err(DeviceError::Synchronize { .. })));
        assert_eq!(backend.synchronize_count(device.id), 0);
    }

    #[test]
    fn test_detect_backend_without_cuda_is_cpu() {
        #[cfg(not(feature = "cuda"))]
        assert_eq!(detect_backend().name(), "cpu");
    }
}
