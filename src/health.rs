//! Health reporting for orchestrators and operators.

use std::time::Instant;

use serde::{Deserialize, Serialize};

use crate::device::DeviceStatus;
use crate::scheduler::{BatchId, Scheduler};
use crate::shutdown::ShutdownState;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum HealthState {
    Healthy,
    Degraded,
    Unhealthy,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthReport {
    pub state: HealthState,
    pub ready: bool,
    pub accepting_jobs: bool,
    pub devices: Vec<DeviceStatus>,
    pub job_queue_depth: usize,
    pub pending_batches: usize,
    pub current_batch: Option<BatchId>,
    pub uptime_secs: u64,
}

#[derive(Debug, Clone)]
pub struct HealthConfig {
    /// Queue depth at which the runtime reports itself degraded.
    pub max_queue_depth: usize,
}

impl Default for HealthConfig {
    fn default() -> Self {
        Self { max_queue_depth: 1000 }
    }
}

pub struct HealthChecker {
    config: HealthConfig,
    start_time: Instant,
}

impl HealthChecker {
    pub fn new(config: HealthConfig) -> Self {
        Self { config, start_time: Instant::now() }
    }

    pub fn is_alive(&self) -> bool {
        true
    }

    /// Ready when running and the queue is below threshold.
    pub fn is_ready(&self, shutdown_state: ShutdownState, queue_depth: usize) -> bool {
        shutdown_state == ShutdownState::Running && queue_depth < self.config.max_queue_depth
    }

    pub fn report(&self, scheduler: &Scheduler) -> HealthReport {
        let shutdown_state = scheduler.shutdown_state();
        let queue_depth = scheduler.queue_depth();
        let devices = scheduler.registry().status();
        let needs_reinit = !scheduler.registry().needs_reinit().is_empty();

        HealthReport {
            state: self.compute_state(shutdown_state, queue_depth, needs_reinit),
            ready: self.is_ready(shutdown_state, queue_depth),
            accepting_jobs: shutdown_state == ShutdownState::Running,
            devices,
            job_queue_depth: queue_depth,
            pending_batches: scheduler.pending_batches(),
            current_batch: scheduler.current_batch(),
            uptime_secs: self.start_time.elapsed().as_secs(),
        }
    }

    fn compute_state(
        &self,
        shutdown_state: ShutdownState,
        queue_depth: usize,
        needs_reinit: bool,
    ) -> HealthState {
        if shutdown_state != ShutdownState::Running {
            return HealthState::Unhealthy;
        }
        if needs_reinit || queue_depth >= self.config.max_queue_depth {
            return HealthState::Degraded;
        }
        HealthState::Healthy
    }
}

impl Default for HealthChecker {
    fn default() -> Self {
        Self::new(HealthConfig::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_compute_state() {
        let checker = HealthChecker::new(HealthConfig { max_queue_depth: 10 });
        assert_eq!(checker.compute_state(ShutdownState::Running, 0, false), HealthState::Healthy);
        assert_eq!(checker.compute_state(ShutdownState::Running, 10, false), HealthState::Degraded);
        assert_eq!(checker.compute_state(ShutdownState::Running, 0, true), HealthState::Degraded);
        assert_eq!(checker.compute_state(ShutdownState::Draining, 0, false), HealthState::Unhealthy);
    }

    #[test]
    fn test_readiness() {
        let checker = HealthChecker::new(HealthConfig { max_queue_depth: 2 });
        assert!(checker.is_ready(ShutdownState::Running, 1));
        assert!(!checker.is_ready(ShutdownState::Running, 2));
        assert!(!checker.is_ready(ShutdownState::Stopped, 0));
    }
}
