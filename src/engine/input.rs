//! Image payloads going into and coming out of the engine.

use thiserror::Error;

use super::params::OutputFormat;

/// Largest accepted upload (64 MiB).
pub const MAX_IMAGE_BYTES: usize = 64 * 1024 * 1024;

/// Filename used when the submitter does not provide one.
pub const DEFAULT_FILENAME: &str = "processed_image";

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum InputError {
    #[error("Image payload is empty")]
    Empty,

    #[error("Image too large: {size} bytes (max {max})")]
    TooLarge { size: usize, max: usize },

    #[error("File must be an image (content type '{0}')")]
    NotAnImage(String),
}

/// One uploaded image.
#[derive(Clone)]
pub struct ImageInput {
    pub filename: String,
    pub data: Vec<u8>,
    /// MIME type declared by the uploader, if any
    pub content_type: Option<String>,
}

impl std::fmt::Debug for ImageInput {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ImageInput")
            .field("filename", &self.filename)
            .field("bytes", &self.data.len())
            .field("content_type", &self.content_type)
            .finish()
    }
}

impl ImageInput {
    pub fn new(filename: impl Into<String>, data: Vec<u8>) -> Self {
        let filename = filename.into();
        let filename = if filename.is_empty() { DEFAULT_FILENAME.to_string() } else { filename };
        Self { filename, data, content_type: None }
    }

    pub fn with_content_type(mut self, content_type: impl Into<String>) -> Self {
        self.content_type = Some(content_type.into());
        self
    }

    /// Reject payloads that can never be processed.
    pub fn validate(&self) -> Result<(), InputError> {
        if self.data.is_empty() {
            return Err(InputError::Empty);
        }
        if self.data.len() > MAX_IMAGE_BYTES {
            return Err(InputError::TooLarge { size: self.data.len(), max: MAX_IMAGE_BYTES });
        }
        if let Some(ct) = &self.content_type {
            if !ct.starts_with("image/") {
                return Err(InputError::NotAnImage(ct.clone()));
            }
        }
        Ok(())
    }
}

/// Encoded result produced by the engine.
#[derive(Clone, PartialEq, Eq)]
pub struct ProcessedImage {
    pub data: Vec<u8>,
    pub format: OutputFormat,
    pub filename: String,
}

impl std::fmt::Debug for ProcessedImage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProcessedImage")
            .field("filename", &self.filename)
            .field("format", &self.format)
            .field("bytes", &self.data.len())
            .finish()
    }
}

impl ProcessedImage {
    pub fn mime_type(&self) -> &'static str {
        self.format.mime_type()
    }
}
