//! Processing engine fault types.
//!
//! The engine adapter classifies every failure at its own boundary. The
//! scheduler only ever branches on the variant, never on message text.

use thiserror::Error;

/// Error text fragments that identify device memory corruption in runtimes
/// that only report failures as strings.
const TRANSIENT_MARKERS: &[&str] = &[
    "illegal memory access",
    "cudaerrorillegaladdress",
    "unspecified launch failure",
];

/// Failure reported by an engine session.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum EngineFault {
    /// Device state is believed corrupt; a reset may fix it.
    #[error("Transient device fault: {0}")]
    TransientRecoverable(String),

    /// Anything else. Never retried.
    #[error("Processing failed: {0}")]
    Fatal(String),
}

impl EngineFault {
    /// Returns true if a device reset and retry is worthwhile.
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::TransientRecoverable(_))
    }

    pub fn message(&self) -> &str {
        match self {
            Self::TransientRecoverable(msg) | Self::Fatal(msg) => msg,
        }
    }

    /// Classify a runtime error message for adapters wrapping text-only APIs.
    pub fn classify_message(message: impl Into<String>) -> Self {
        let message = message.into();
        let lower = message.to_ascii_lowercase();
        if TRANSIENT_MARKERS.iter().any(|m| lower.contains(m)) {
            Self::TransientRecoverable(message)
        } else {
            Self::Fatal(message)
        }
    }
}
