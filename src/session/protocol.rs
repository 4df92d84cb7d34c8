//! Streaming batch protocol messages.
//!
//! Text frames carry JSON objects tagged by `type`; image payloads travel in
//! binary frames. Field names are camelCase on the wire.

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::device::DeviceId;
use crate::engine::{BackgroundColor, OutputFormat, Watermark};
use crate::scheduler::BatchId;

/// Largest accepted text frame (64 KiB).
pub const MAX_TEXT_FRAME: usize = 64 * 1024;

#[derive(Debug, Error)]
pub enum ProtocolError {
    #[error("Malformed message: {0}")]
    Malformed(String),

    #[error("Text frame too large: {size} bytes (max {max})")]
    FrameTooLarge { size: usize, max: usize },

    #[error("Failed to encode message: {0}")]
    Encode(String),
}

/// Partial processing configuration. Absent fields keep their value.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConfigUpdate {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub background_color: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file_type: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub watermark: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub batch_size: Option<usize>,
}

/// Client to runtime.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientMessage {
    Config(ConfigUpdate),
    #[serde(rename_all = "camelCase")]
    BatchStart {
        #[serde(default)]
        batch_size: Option<usize>,
    },
    /// Announces the binary frame that follows.
    #[serde(rename_all = "camelCase")]
    ImageMetadata {
        #[serde(default)]
        filename: Option<String>,
        #[serde(default)]
        task_id: Option<u64>,
        #[serde(default)]
        content_type: Option<String>,
    },
    #[serde(rename_all = "camelCase")]
    BatchEnd {
        #[serde(default)]
        batch_id: Option<BatchId>,
    },
    Close,
}

impl ClientMessage {
    pub fn parse(text: &str) -> Result<Self, ProtocolError> {
        if text.len() > MAX_TEXT_FRAME {
            return Err(ProtocolError::FrameTooLarge { size: text.len(), max: MAX_TEXT_FRAME });
        }
        serde_json::from_str(text).map_err(|e| ProtocolError::Malformed(e.to_string()))
    }
}

/// Per-job result as reported to the client.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JobResultEvent {
    pub task_id: u64,
    pub batch_id: BatchId,
    pub success: bool,
    pub filename: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub format: Option<OutputFormat>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mime_type: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub device: Option<DeviceId>,
    pub attempts: u32,
}

/// Runtime to client.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerEvent {
    #[serde(rename_all = "camelCase")]
    BatchStarted { batch_id: BatchId },
    #[serde(rename_all = "camelCase")]
    ImageReceived { task_id: u64, filename: String },
    #[serde(rename_all = "camelCase")]
    Error {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        task_id: Option<u64>,
        message: String,
    },
    #[serde(rename_all = "camelCase")]
    BatchQueued { batch_id: BatchId, message: String },
    #[serde(rename_all = "camelCase")]
    ConfigUpdated {
        background_color: BackgroundColor,
        file_type: OutputFormat,
        watermark: Watermark,
        batch_size: usize,
    },
    JobResult(JobResultEvent),
    #[serde(rename_all = "camelCase")]
    BatchComplete { batch_id: BatchId, total: usize, successful: usize, failed: usize },
}

impl ServerEvent {
    pub fn error(task_id: Option<u64>, message: impl Into<String>) -> Self {
        Self::Error { task_id, message: message.into() }
    }

    pub fn to_json(&self) -> Result<String, ProtocolError> {
        serde_json::to_string(self).map_err(|e| ProtocolError::Encode(e.to_string()))
    }
}

/// One frame for the transport to send.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outbound {
    Event(ServerEvent),
    /// Processed image bytes, sent right after the matching `job_result`.
    Image { task_id: u64, data: Vec<u8> },
}
