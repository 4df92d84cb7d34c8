// Copyright 2024-2026 Cutout Runtime Contributors
// Licensed under the Apache License, Version 2.0

//! Device identity, descriptors and errors.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Identity of one schedulable compute unit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DeviceId {
    /// Accelerator by driver ordinal.
    Accelerator(usize),
    /// The implicit CPU fallback device.
    Cpu,
}

impl fmt::Display for DeviceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DeviceId::Accelerator(index) => write!(f, "gpu:{}", index),
            DeviceId::Cpu => write!(f, "cpu"),
        }
    }
}

impl FromStr for DeviceId {
    type Err = DeviceError;

    /// Accepts `cpu`, `gpu:N`, `cuda:N` or a bare ordinal.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim().to_ascii_lowercase();
        if s == "cpu" {
            return Ok(DeviceId::Cpu);
        }
        let ordinal = s
            .strip_prefix("gpu:")
            .or_else(|| s.strip_prefix("cuda:"))
            .unwrap_or(&s);
        ordinal
            .parse::<usize>()
            .map(DeviceId::Accelerator)
            .map_err(|_| DeviceError::InvalidId(s.clone()))
    }
}

/// Hardware family a device belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DeviceKind {
    /// NVIDIA CUDA accelerator
    Cuda,
    /// In-process simulated accelerator (tests, benchmarks)
    Simulated,
    /// CPU fallback
    Cpu,
}

impl fmt::Display for DeviceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DeviceKind::Cuda => write!(f, "CUDA"),
            DeviceKind::Simulated => write!(f, "Simulated"),
            DeviceKind::Cpu => write!(f, "CPU"),
        }
    }
}

/// Static description of a discovered device.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceInfo {
    pub id: DeviceId,
    pub kind: DeviceKind,
    pub name: String,
    /// Total device memory in bytes (0 when unknown or not applicable)
    pub total_memory: u64,
}

impl DeviceInfo {
    /// The implicit CPU fallback device.
    pub fn cpu() -> Self {
        Self {
            id: DeviceId::Cpu,
            kind: DeviceKind::Cpu,
            name: format!("CPU ({} cores)", num_cpus::get()),
            total_memory: 0,
        }
    }

    pub fn is_accelerator(&self) -> bool {
        self.kind != DeviceKind::Cpu
    }
}

/// Device-level error types.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum DeviceError {
    #[error("Invalid device id: {0}")]
    InvalidId(String),

    #[error("Failed to create session on {device}: {reason}")]
    SessionInit { device: DeviceId, reason: String },

    #[error("Failed to synchronize {device}: {reason}")]
    Synchronize { device: DeviceId, reason: String },

    #[error("Device backend unavailable: {0}")]
    BackendUnavailable(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_device_id_display() {
        assert_eq!(DeviceId::Accelerator(2).to_string(), "gpu:2");
        assert_eq!(DeviceId::Cpu.to_string(), "cpu");
    }

    #[test]
    fn test_device_id_parse() {
        assert_eq!("cpu".parse::<DeviceId>().unwrap(), DeviceId::Cpu);
        assert_eq!("GPU:1".parse::<DeviceId>().unwrap(), DeviceId::Accelerator(1));
        assert_eq!("cuda:3".parse::<DeviceId>().unwrap(), DeviceId::Accelerator(3));
        assert_eq!("0".parse::<DeviceId>().unwrap(), DeviceId::Accelerator(0));
        assert!(matches!("tpu".parse::<DeviceId>(), Err(DeviceError::InvalidId(_))));
    }

    #[test]
    fn test_cpu_info() {
        let info = DeviceInfo::cpu();
        assert_eq!(info.id, DeviceId::Cpu);
        assert!(!info.is_accelerator());
        assert!(info.name.starts_with("CPU"));
    }
}
