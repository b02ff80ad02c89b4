use std::time::{SystemTime, UNIX_EPOCH};

use crossbeam_channel::{unbounded, Receiver, Sender};
use serde::Serialize;
use tracing::info;

use mc_schema::{HistoryEvent, HistoryEventKind, JobId, JobStatus};

/// Structured lifecycle notification emitted for every job transition.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TelemetryEvent {
    pub timestamp_ms: u64,
    pub name: String,
    pub job_id: JobId,
    pub status: JobStatus,
    pub attempt: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
}

impl TelemetryEvent {
    pub fn from_history(event: &HistoryEvent) -> Self {
        Self {
            timestamp_ms: event.timestamp_ms,
            name: event_name(event.kind).to_string(),
            job_id: event.job_id,
            status: event.status,
            attempt: event.attempt,
            detail: event.detail.clone(),
        }
    }
}

fn event_name(kind: HistoryEventKind) -> &'static str {
    match kind {
        HistoryEventKind::Submitted => "job.submitted",
        HistoryEventKind::Started => "job.started",
        HistoryEventKind::Succeeded => "job.succeeded",
        HistoryEventKind::Failed => "job.failed",
        HistoryEventKind::TimedOut => "job.timed_out",
        HistoryEventKind::Retrying => "job.retrying",
    }
}

/// Destination for runtime telemetry.
pub trait TelemetrySink: Send + Sync {
    fn emit(&self, event: &TelemetryEvent);
}

/// Writes telemetry through `tracing`.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingTelemetry;

impl TelemetrySink for TracingTelemetry {
    fn emit(&self, event: &TelemetryEvent) {
        info!(
            target: "mc_assist::telemetry",
            job = %event.job_id,
            status = %event.status,
            attempt = event.attempt,
            detail = event.detail.as_deref().unwrap_or(""),
            "{}",
            event.name
        );
    }
}

/// Forwards telemetry over a channel so another thread can consume it.
#[derive(Debug, Clone)]
pub struct ChannelTelemetry {
    sender: Sender<TelemetryEvent>,
}

impl ChannelTelemetry {
    pub fn new(sender: Sender<TelemetryEvent>) -> Self {
        Self { sender }
    }

    pub fn channel() -> (Self, Receiver<TelemetryEvent>) {
        let (sender, receiver) = unbounded();
        (Self::new(sender), receiver)
    }
}

impl TelemetrySink for ChannelTelemetry {
    fn emit(&self, event: &TelemetryEvent) {
        // A dropped receiver just means nobody is listening any more.
        let _ = self.sender.send(event.clone());
    }
}

pub(crate) fn timestamp_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}
