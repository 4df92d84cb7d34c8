//! Transport-independent state machine for one streaming upload connection.
//!
//! The transport feeds every received frame to [`StreamSession::handle_frame`]
//! and forwards whatever appears on the outbound channel. Uploads are
//! acknowledged from `handle_frame` itself, so acknowledgements never wait on
//! processing of earlier batches.

use std::sync::Arc;

use tokio::sync::{mpsc, watch};
use uuid::Uuid;

use super::protocol::{ClientMessage, ConfigUpdate, JobResultEvent, Outbound, ServerEvent};
use crate::engine::{ImageInput, ProcessingParams};
use crate::scheduler::{BatchId, BatchRequest, BatchSink, BatchSummary, JobResult, JobSpec, Scheduler};

/// One frame received from the client.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Frame {
    Text(String),
    Binary(Vec<u8>),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionControl {
    Continue,
    Close,
}

struct OpenBatch {
    id: BatchId,
    declared: usize,
    items: Vec<JobSpec>,
}

/// Metadata waiting for its binary frame.
struct PendingImage {
    task_id: u64,
    filename: String,
    content_type: Option<String>,
}

pub struct StreamSession {
    id: Uuid,
    scheduler: Arc<Scheduler>,
    outbound: mpsc::UnboundedSender<Outbound>,
    params: watch::Sender<ProcessingParams>,
    batch_size: usize,
    next_task: u64,
    open: Option<OpenBatch>,
    pending: Option<PendingImage>,
    batches_submitted: usize,
}

impl StreamSession {
    pub fn new(
        scheduler: Arc<Scheduler>,
        default_batch_size: usize,
    ) -> (Self, mpsc::UnboundedReceiver<Outbound>) {
        let (outbound, rx) = mpsc::unbounded_channel();
        let (params, _) = watch::channel(ProcessingParams::default());
        let session = Self {
            id: Uuid::new_v4(),
            scheduler,
            outbound,
            params,
            batch_size: default_batch_size.max(1),
            next_task: 0,
            open: None,
            pending: None,
            batches_submitted: 0,
        };
        tracing::info!(session_id = %session.id, "streaming session opened");
        (session, rx)
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn params(&self) -> ProcessingParams {
        *self.params.borrow()
    }

    pub fn batch_size(&self) -> usize {
        self.batch_size
    }

    pub fn open_batch(&self) -> Option<BatchId> {
        self.open.as_ref().map(|b| b.id)
    }

    pub fn batches_submitted(&self) -> usize {
        self.batches_submitted
    }

    pub fn handle_frame(&mut self, frame: Frame) -> SessionControl {
        match frame {
            Frame::Binary(data) => {
                self.handle_binary(data);
                SessionControl::Continue
            }
            Frame::Text(text) => {
                if let Some(pending) = self.pending.take() {
                    self.send(ServerEvent::error(Some(pending.task_id), "Expected binary image data"));
                }
                self.handle_text(&text)
            }
        }
    }

    /// Connection is going away. An unfinished batch is discarded.
    pub fn close(&mut self) {
        if let Some(open) = self.open.take() {
            tracing::warn!(
                session_id = %self.id,
                batch_id = %open.id,
                uploaded = open.items.len(),
                "discarding batch that was never ended"
            );
        }
        self.pending = None;
        tracing::info!(session_id = %self.id, batches = self.batches_submitted, "streaming session closed");
    }

    fn handle_text(&mut self, text: &str) -> SessionControl {
        let message = match ClientMessage::parse(text) {
            Ok(message) => message,
            Err(e) => {
                tracing::debug!(session_id = %self.id, error = %e, "bad client message");
                self.send(ServerEvent::error(None, e.to_string()));
                return SessionControl::Continue;
            }
        };

        match message {
            ClientMessage::Config(update) => self.on_config(update),
            ClientMessage::BatchStart { batch_size } => self.on_batch_start(batch_size),
            ClientMessage::ImageMetadata { filename, task_id, content_type } => {
                self.on_image_metadata(filename, task_id, content_type)
            }
            ClientMessage::BatchEnd { batch_id } => self.on_batch_end(batch_id),
            ClientMessage::Close => {
                self.close();
                return SessionControl::Close;
            }
        }
        SessionControl::Continue
    }

    fn on_config(&mut self, update: ConfigUpdate) {
        let merged = self.params().merge(
            update.background_color.as_deref(),
            update.file_type.as_deref(),
            update.watermark.as_deref(),
        );
        let params = match merged {
            Ok(params) => params,
            Err(e) => {
                self.send(ServerEvent::error(None, e.to_string()));
                return;
            }
        };
        self.params.send_replace(params);
        if let Some(size) = update.batch_size.filter(|&n| n > 0) {
            self.batch_size = size;
        }
        self.send(ServerEvent::ConfigUpdated {
            background_color: params.background,
            file_type: params.format,
            watermark: params.watermark,
            batch_size: self.batch_size,
        });
    }

    fn on_batch_start(&mut self, batch_size: Option<usize>) {
        if let Some(open) = self.open.take() {
            tracing::warn!(batch_id = %open.id, "batch_start before batch_end; queueing the open batch");
            self.submit_open(open);
        }
        let id = self.scheduler.allocate_batch_id();
        let declared = batch_size.unwrap_or(self.batch_size);
        tracing::debug!(session_id = %self.id, batch_id = %id, declared, "batch upload started");
        self.open = Some(OpenBatch { id, declared, items: Vec::with_capacity(declared) });
        self.send(ServerEvent::BatchStarted { batch_id: id });
    }

    fn on_image_metadata(
        &mut self,
        filename: Option<String>,
        task_id: Option<u64>,
        content_type: Option<String>,
    ) {
        let task_id = task_id.unwrap_or(self.next_task);
        self.next_task = self.next_task.max(task_id.saturating_add(1));
        if self.open.is_none() {
            self.send(ServerEvent::error(Some(task_id), "No batch in progress; send batch_start first"));
            return;
        }
        let filename = filename
            .filter(|f| !f.is_empty())
            .unwrap_or_else(|| format!("image_{}.jpg", task_id));
        self.pending = Some(PendingImage { task_id, filename, content_type });
    }

    fn handle_binary(&mut self, data: Vec<u8>) {
        let Some(pending) = self.pending.take() else {
            self.send(ServerEvent::error(None, "Unexpected binary frame without image_metadata"));
            return;
        };

        let mut input = ImageInput::new(pending.filename.clone(), data);
        if let Some(content_type) = pending.content_type {
            input = input.with_content_type(content_type);
        }
        if let Err(e) = input.validate() {
            self.send(ServerEvent::error(Some(pending.task_id), e.to_string()));
            return;
        }

        let Some(open) = self.open.as_mut() else {
            self.send(ServerEvent::error(Some(pending.task_id), "No batch in progress"));
            return;
        };
        open.items.push(JobSpec::new(input).with_tag(pending.task_id.to_string()));
        self.send(ServerEvent::ImageReceived { task_id: pending.task_id, filename: pending.filename });
    }

    fn on_batch_end(&mut self, batch_id: Option<BatchId>) {
        let Some(open) = self.open.take() else {
            self.send(ServerEvent::error(None, "batch_end without an open batch"));
            return;
        };
        if let Some(id) = batch_id.filter(|&id| id != open.id) {
            self.send(ServerEvent::error(None, format!("Unknown batch {}", id)));
            self.open = Some(open);
            return;
        }
        self.submit_open(open);
    }

    fn submit_open(&mut self, open: OpenBatch) {
        let id = open.id;
        if open.items.len() != open.declared {
            tracing::debug!(batch_id = %id, declared = open.declared, uploaded = open.items.len(), "batch size differs from announcement");
        }
        let sink = Arc::new(SessionSink { outbound: self.outbound.clone() });
        let request = BatchRequest::new(open.items, sink)
            .with_id(id)
            .with_live_params(self.params.subscribe());

        match self.scheduler.submit(request) {
            Ok(handle) => {
                self.batches_submitted += 1;
                tracing::info!(session_id = %self.id, batch_id = %id, total = handle.total(), "batch queued");
                self.send(ServerEvent::BatchQueued {
                    batch_id: id,
                    message: "Batch queued for processing".to_string(),
                });
            }
            Err(e) => {
                tracing::warn!(session_id = %self.id, batch_id = %id, error = %e, "batch rejected");
                self.send(ServerEvent::error(None, e.to_string()));
            }
        }
    }

    fn send(&self, event: ServerEvent) {
        let _ = self.outbound.send(Outbound::Event(event));
    }
}

/// Turns batch callbacks into outbound frames.
struct SessionSink {
    outbound: mpsc::UnboundedSender<Outbound>,
}

impl BatchSink for SessionSink {
    fn job_finished(&self, batch_id: BatchId, result: JobResult) {
        let task_id = result.tag.as_deref().and_then(|t| t.parse().ok()).unwrap_or(result.job_id.0);
        let output = result.output();
        let event = JobResultEvent {
            task_id,
            batch_id,
            success: result.is_success(),
            filename: output.map_or_else(|| result.filename.clone(), |o| o.filename.clone()),
            format: output.map(|o| o.format),
            mime_type: output.map(|o| o.mime_type().to_string()),
            error: result.error().map(str::to_string),
            device: result.device,
            attempts: result.attempts,
        };
        let _ = self.outbound.send(Outbound::Event(ServerEvent::JobResult(event)));
        if let crate::scheduler::JobOutcome::Succeeded(image) = result.outcome {
            let _ = self.outbound.send(Outbound::Image { task_id, data: image.data });
        }
    }

    fn batch_complete(&self, summary: &BatchSummary) {
        let _ = self.outbound.send(Outbound::Event(ServerEvent::BatchComplete {
            batch_id: summary.batch_id,
            total: summary.total,
            successful: summary.succeeded,
            failed: summary.failed,
        }));
    }
}
