//! Processing engine adapter boundary.
//!
//! The background-removal model itself is an external collaborator. This
//! module defines the contract the scheduler needs from it: one session per
//! device, one image per call, and a typed fault classification.

mod error;
mod input;
pub mod mock;
mod params;

pub use error::EngineFault;
pub use input::{ImageInput, InputError, ProcessedImage, DEFAULT_FILENAME, MAX_IMAGE_BYTES};
pub use params::{BackgroundColor, OutputFormat, ParamsError, ProcessingParams, Watermark};

use async_trait::async_trait;

use crate::device::DeviceInfo;

/// Factory for per-device engine sessions (one loaded model per device).
#[async_trait]
pub trait ProcessingEngine: Send + Sync {
    fn name(&self) -> &str;

    /// Load the model onto `device`. Called lazily on first use and again
    /// after every device reset.
    async fn create_session(
        &self,
        device: &DeviceInfo,
    ) -> Result<Box<dyn EngineSession>, EngineFault>;
}

/// A model instance bound to one device.
///
/// Sessions are not required to be thread-safe: the registry guarantees at
/// most one call in flight per session.
#[async_trait]
pub trait EngineSession: Send {
    async fn process(
        &mut self,
        image: &ImageInput,
        params: &ProcessingParams,
    ) -> Result<ProcessedImage, EngineFault>;
}
