//! Scriptable in-process engine for tests and benchmarks.
//!
//! Echoes the input bytes back as the "processed" image. Faults can be
//! scripted per filename and every dispatch is recorded with its device and
//! time window.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use parking_lot::Mutex;

use super::{EngineFault, EngineSession, ImageInput, ProcessedImage, ProcessingEngine, ProcessingParams};
use crate::device::{DeviceId, DeviceInfo};

/// One recorded engine call.
#[derive(Debug, Clone)]
pub struct DispatchRecord {
    pub device: DeviceId,
    pub filename: String,
    pub started: Instant,
    pub finished: Instant,
    pub succeeded: bool,
}

#[derive(Default)]
struct MockState {
    delay: Duration,
    script: Mutex<HashMap<String, VecDeque<EngineFault>>>,
    session_failures: AtomicUsize,
    sessions_created: AtomicUsize,
    log: Mutex<Vec<DispatchRecord>>,
    active: Mutex<HashMap<DeviceId, usize>>,
    max_overlap: AtomicUsize,
}

/// Mock engine. Clones share state.
#[derive(Clone, Default)]
pub struct MockEngine {
    state: Arc<MockState>,
}

impl MockEngine {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every call sleeps for `delay` while holding its device.
    pub fn with_delay(delay: Duration) -> Self {
        Self { state: Arc::new(MockState { delay, ..Default::default() }) }
    }

    /// Calls for `filename` fail with `faults` in order, then succeed.
    pub fn script_faults(&self, filename: &str, faults: Vec<EngineFault>) {
        self.state.script.lock().insert(filename.to_string(), faults.into());
    }

    /// The next `count` session creations fail.
    pub fn fail_session_creation(&self, count: usize) {
        self.state.session_failures.store(count, Ordering::SeqCst);
    }

    pub fn sessions_created(&self) -> usize {
        self.state.sessions_created.load(Ordering::SeqCst)
    }

    pub fn dispatches(&self) -> Vec<DispatchRecord> {
        self.state.log.lock().clone()
    }

    pub fn dispatch_count(&self, device: DeviceId) -> usize {
        self.state.log.lock().iter().filter(|r| r.device == device).count()
    }

    pub fn attempts_for(&self, filename: &str) -> usize {
        self.state.log.lock().iter().filter(|r| r.filename == filename).count()
    }

    /// Highest number of simultaneous calls observed on any single device.
    pub fn max_concurrency_per_device(&self) -> usize {
        self.state.max_overlap.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ProcessingEngine for MockEngine {
    fn name(&self) -> &str {
        "mock"
    }

    async fn create_session(
        &self,
        device: &DeviceInfo,
    ) -> Result<Box<dyn EngineSession>, EngineFault> {
        let failing = self
            .state
            .session_failures
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if failing {
            return Err(EngineFault::Fatal(format!("model failed to load on {}", device.id)));
        }
        self.state.sessions_created.fetch_add(1, Ordering::SeqCst);
        Ok(Box::new(MockSession { device: device.id, state: self.state.clone() }))
    }
}

struct MockSession {
    device: DeviceId,
    state: Arc<MockState>,
}

impl MockSession {
    fn enter(&self) {
        let mut active = self.state.active.lock();
        let count = active.entry(self.device).or_insert(0);
        *count += 1;
        self.state.max_overlap.fetch_max(*count, Ordering::SeqCst);
    }

    fn exit(&self) {
        if let Some(count) = self.state.active.lock().get_mut(&self.device) {
            *count = count.saturating_sub(1);
        }
    }
}

#[async_trait]
impl EngineSession for MockSession {
    async fn process(
        &mut self,
        image: &ImageInput,
        params: &ProcessingParams,
    ) -> Result<ProcessedImage, EngineFault> {
        self.enter();
        let started = Instant::now();
        if !self.state.delay.is_zero() {
            tokio::time::sleep(self.state.delay).await;
        }
        let fault = self
            .state
            .script
            .lock()
            .get_mut(&image.filename)
            .and_then(|faults| faults.pop_front());
        self.state.log.lock().push(DispatchRecord {
            device: self.device,
            filename: image.filename.clone(),
            started,
            finished: Instant::now(),
            succeeded: fault.is_none(),
        });
        self.exit();

        match fault {
            Some(fault) => Err(fault),
            None => Ok(ProcessedImage {
                data: image.data.clone(),
                format: params.format,
                filename: params.output_filename(&image.filename),
            }),
        }
    }
}
