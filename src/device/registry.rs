// Copyright 2024-2026 Cutout Runtime Contributors
// Licensed under the Apache License, Version 2.0

//! Device registry: per-device session slots, round-robin selection and reset.

use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::{Mutex, MutexGuard};

use super::backend::DeviceBackend;
use super::types::{DeviceError, DeviceId, DeviceInfo, DeviceKind};
use crate::engine::{EngineFault, EngineSession, ImageInput, ProcessedImage, ProcessingEngine, ProcessingParams};
use crate::telemetry;

struct SlotState {
    session: Option<Box<dyn EngineSession>>,
    /// Bumped on every reset.
    generation: u64,
}

#[derive(Default)]
struct SlotStats {
    session_ready: AtomicBool,
    faults: AtomicU64,
    resets: AtomicU64,
    succeeded: AtomicU64,
    failed: AtomicU64,
    last_reset: parking_lot::Mutex<Option<DateTime<Utc>>>,
}

struct DeviceSlot {
    info: DeviceInfo,
    state: Mutex<SlotState>,
    stats: SlotStats,
}

/// Point-in-time view of one device.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeviceStatus {
    pub id: DeviceId,
    pub kind: DeviceKind,
    pub name: String,
    pub session_ready: bool,
    pub faults: u64,
    pub resets: u64,
    pub jobs_succeeded: u64,
    pub jobs_failed: u64,
    pub last_reset: Option<DateTime<Utc>>,
}

/// All devices known to this process, discovered once at construction.
pub struct DeviceRegistry {
    backend: Arc<dyn DeviceBackend>,
    engine: Arc<dyn ProcessingEngine>,
    slots: Vec<DeviceSlot>,
    next: AtomicUsize,
    has_accelerators: bool,
}

impl DeviceRegistry {
    /// Discover devices through `backend`. With no accelerators a single CPU
    /// device is registered.
    pub fn new(backend: Arc<dyn DeviceBackend>, engine: Arc<dyn ProcessingEngine>) -> Self {
        let mut devices = backend.discover();
        let has_accelerators = !devices.is_empty();
        if !has_accelerators {
            devices.push(DeviceInfo::cpu());
        }
        tracing::info!(
            backend = backend.name(),
            engine = engine.name(),
            devices = devices.len(),
            "device registry initialized"
        );

        let slots = devices
            .into_iter()
            .map(|info| DeviceSlot {
                info,
                state: Mutex::new(SlotState { session: None, generation: 0 }),
                stats: SlotStats::default(),
            })
            .collect();

        Self { backend, engine, slots, next: AtomicUsize::new(0), has_accelerators }
    }

    pub fn device_count(&self) -> usize {
        self.slots.len()
    }

    pub fn devices(&self) -> Vec<DeviceInfo> {
        self.slots.iter().map(|s| s.info.clone()).collect()
    }

    pub fn device(&self, index: usize) -> Option<&DeviceInfo> {
        self.slots.get(index).map(|s| &s.info)
    }

    pub fn has_accelerators(&self) -> bool {
        self.has_accelerators
    }

    /// Map an affinity hint to a slot index.
    ///
    /// Accelerator indices wrap modulo the device count. On a CPU-only
    /// registry every hint maps to the CPU. A CPU hint on an accelerator
    /// registry, or no hint, takes the next round-robin slot.
    pub fn resolve(&self, hint: Option<DeviceId>) -> usize {
        match hint {
            Some(_) if !self.has_accelerators => 0,
            Some(DeviceId::Accelerator(index)) => index % self.slots.len(),
            _ => self.next_index(),
        }
    }

    fn next_index(&self) -> usize {
        let len = self.slots.len();
        self.next
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |n| Some((n + 1) % len))
            .unwrap_or_else(|n| n)
    }

    /// Lease the device for `hint`, waiting while another holder uses it.
    pub async fn acquire(&self, hint: Option<DeviceId>) -> DeviceLease<'_> {
        self.acquire_index(self.resolve(hint)).await
    }

    /// Lease the device at slot `index` (taken modulo the device count).
    pub async fn acquire_index(&self, index: usize) -> DeviceLease<'_> {
        let slot = &self.slots[index % self.slots.len()];
        let state = slot.state.lock().await;
        DeviceLease { registry: self, slot, state }
    }

    /// Quiesce the device and recreate its session.
    ///
    /// On recreation failure the slot is left empty and the next dispatch
    /// retries construction.
    pub async fn reset(&self, id: DeviceId) -> Result<(), DeviceError> {
        let index = self.index_of(id).ok_or_else(|| DeviceError::InvalidId(id.to_string()))?;
        self.acquire_index(index).await.reset().await
    }

    /// Reset every device in turn. Returns the first recreation error, after
    /// attempting all devices.
    pub async fn reset_all(&self) -> Result<(), DeviceError> {
        let mut first_err = None;
        for index in 0..self.slots.len() {
            if let Err(e) = self.acquire_index(index).await.reset().await {
                first_err.get_or_insert(e);
            }
        }
        match first_err {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }

    /// Return cached memory on every device without touching sessions.
    pub fn release_all_caches(&self) {
        for slot in &self.slots {
            self.backend.release_cache(&slot.info);
        }
    }

    pub fn index_of(&self, id: DeviceId) -> Option<usize> {
        self.slots.iter().position(|s| s.info.id == id)
    }

    pub fn record_fault(&self, index: usize) {
        if let Some(slot) = self.slots.get(index) {
            slot.stats.faults.fetch_add(1, Ordering::Relaxed);
        }
    }

    pub fn record_outcome(&self, index: usize, succeeded: bool) {
        if let Some(slot) = self.slots.get(index) {
            let counter = if succeeded { &slot.stats.succeeded } else { &slot.stats.failed };
            counter.fetch_add(1, Ordering::Relaxed);
        }
    }

    /// Devices whose session must be rebuilt before the next job.
    pub fn needs_reinit(&self) -> Vec<DeviceId> {
        self.slots
            .iter()
            .filter(|s| {
                s.stats.resets.load(Ordering::Relaxed) > 0
                    && !s.stats.session_ready.load(Ordering::Acquire)
            })
            .map(|s| s.info.id)
            .collect()
    }

    pub fn status(&self) -> Vec<DeviceStatus> {
        self.slots
            .iter()
            .map(|slot| DeviceStatus {
                id: slot.info.id,
                kind: slot.info.kind,
                name: slot.info.name.clone(),
                session_ready: slot.stats.session_ready.load(Ordering::Acquire),
                faults: slot.stats.faults.load(Ordering::Relaxed),
                resets: slot.stats.resets.load(Ordering::Relaxed),
                jobs_succeeded: slot.stats.succeeded.load(Ordering::Relaxed),
                jobs_failed: slot.stats.failed.load(Ordering::Relaxed),
                last_reset: *slot.stats.last_reset.lock(),
            })
            .collect()
    }
}

/// Exclusive use of one device. Dropping the lease releases cached device
/// memory and frees the device for the next holder.
pub struct DeviceLease<'a> {
    registry: &'a DeviceRegistry,
    slot: &'a DeviceSlot,
    state: MutexGuard<'a, SlotState>,
}

impl<'a> DeviceLease<'a> {
    pub fn device(&self) -> &DeviceInfo {
        &self.slot.info
    }

    pub fn id(&self) -> DeviceId {
        self.slot.info.id
    }

    pub fn generation(&self) -> u64 {
        self.state.generation
    }

    /// Run one image through this device's session, creating it if needed.
    pub async fn process(
        &mut self,
        image: &ImageInput,
        params: &ProcessingParams,
    ) -> Result<ProcessedImage, EngineFault> {
        if self.state.session.is_none() {
            let session = self.registry.engine.create_session(&self.slot.info).await?;
            self.state.session = Some(session);
            self.slot.stats.session_ready.store(true, Ordering::Release);
            tracing::debug!(device = %self.slot.info.id, "engine session created");
        }
        match self.state.session.as_mut() {
            Some(session) => session.process(image, params).await,
            None => Err(EngineFault::Fatal(format!("no session on {}", self.slot.info.id))),
        }
    }

    /// Synchronize, drop the session, release cache and recreate the session.
    pub async fn reset(&mut self) -> Result<(), DeviceError> {
        let slot = self.slot;
        let backend = &self.registry.backend;

        if let Err(e) = backend.synchronize(&slot.info) {
            tracing::warn!(device = %slot.info.id, error = %e, "synchronize before reset failed");
        }
        self.state.session = None;
        slot.stats.session_ready.store(false, Ordering::Release);
        backend.release_cache(&slot.info);
        self.state.generation += 1;
        slot.stats.resets.fetch_add(1, Ordering::Relaxed);
        *slot.stats.last_reset.lock() = Some(Utc::now());

        match self.registry.engine.create_session(&slot.info).await {
            Ok(session) => {
                self.state.session = Some(session);
                slot.stats.session_ready.store(true, Ordering::Release);
                telemetry::record_device_reset(slot.info.id, true);
                tracing::info!(device = %slot.info.id, generation = self.state.generation, "device reset");
                Ok(())
            }
            Err(fault) => {
                telemetry::record_device_reset(slot.info.id, false);
                tracing::warn!(
                    device = %slot.info.id,
                    error = %fault,
                    "session recreation failed; will retry on next dispatch"
                );
                Err(DeviceError::SessionInit { device: slot.info.id, reason: fault.message().to_string() })
            }
        }
    }
}

impl Drop for DeviceLease<'_> {
    fn drop(&mut self) {
        self.registry.backend.release_cache(&self.slot.info);
    }
}

#[cfg(test)]
#[path = "registry_tests.rs"]
mod tests;
