//! Cutout Runtime
//!
//! Device-worker scheduler and batch pipeline for background-removal jobs.
//! The pixel-level model is an external engine behind
//! [`engine::ProcessingEngine`]; this crate decides which device runs which
//! image, when, and what happens when a device faults.
//!
//! # Guarantees
//!
//! - **Exclusive devices**: at most one engine call in flight per device
//! - **Ordered batches**: one batch dispatched at a time, in submission order,
//!   while later batches keep uploading
//! - **No silent drops**: every accepted job yields exactly one terminal
//!   result, and a batch summary fires only after all of its jobs have
//!   reached a terminal state, including at a shutdown that hits its deadline

pub mod cli;
pub mod config;
pub mod device;
pub mod engine;
pub mod health;
pub mod scheduler;
pub mod session;
pub mod shutdown;
pub mod telemetry;

use std::sync::Arc;

use device::DeviceBackend;
use engine::ProcessingEngine;
use health::{HealthChecker, HealthConfig, HealthReport};
use scheduler::{Scheduler, SchedulerConfig};
use session::{Outbound, StreamSession};
use shutdown::ShutdownResult;
use tokio::sync::mpsc;

#[derive(Debug, Clone)]
pub struct RuntimeConfig {
    pub scheduler: SchedulerConfig,
    pub health: HealthConfig,
    /// Batch size assumed for streaming clients that do not announce one.
    pub default_batch_size: usize,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            scheduler: SchedulerConfig::default(),
            health: HealthConfig::default(),
            default_batch_size: 20,
        }
    }
}

impl RuntimeConfig {
    /// Read the `CUTOUT_*` environment variables, defaulting the rest.
    pub fn from_env() -> Self {
        config::load().into()
    }
}

impl From<config::EnvConfig> for RuntimeConfig {
    fn from(env: config::EnvConfig) -> Self {
        Self {
            scheduler: env.scheduler,
            health: env.health,
            default_batch_size: env.default_batch_size,
        }
    }
}

/// A running scheduler plus the pieces a transport layer needs.
pub struct Runtime {
    pub scheduler: Arc<Scheduler>,
    pub health: HealthChecker,
    default_batch_size: usize,
}

impl Runtime {
    /// Start the scheduler. Must be called inside a tokio runtime.
    pub fn start(
        config: RuntimeConfig,
        backend: Arc<dyn DeviceBackend>,
        engine: Arc<dyn ProcessingEngine>,
    ) -> Self {
        telemetry::init_metrics();
        Self {
            scheduler: Scheduler::start(config.scheduler, backend, engine),
            health: HealthChecker::new(config.health),
            default_batch_size: config.default_batch_size,
        }
    }

    /// New streaming session bound to this runtime's scheduler.
    pub fn open_session(&self) -> (StreamSession, mpsc::UnboundedReceiver<Outbound>) {
        StreamSession::new(self.scheduler.clone(), self.default_batch_size)
    }

    pub fn health_report(&self) -> HealthReport {
        self.health.report(&self.scheduler)
    }

    pub async fn shutdown(&self) -> ShutdownResult {
        self.scheduler.shutdown_default().await
    }
}
