// Copyright 2024-2026 Cutout Runtime Contributors
// Licensed under the Apache License, Version 2.0

//! Compute device discovery, leasing and reset.
//!
//! The registry owns one slot per device. A slot holds the device's engine
//! session behind an async mutex, so holding a [`DeviceLease`] is the only way
//! to run work on a device and at most one lease exists per device at a time.

mod backend;
mod registry;
mod types;

pub use backend::{detect_backend, CpuBackend, DeviceBackend, MockDeviceBackend};
#[cfg(feature = "cuda")]
pub use backend::CudaBackend;
pub use registry::{DeviceLease, DeviceRegistry, DeviceStatus};
pub use types::{DeviceError, DeviceId, DeviceInfo, DeviceKind};
