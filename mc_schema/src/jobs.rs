use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::UnknownVariant;

/// Identifier assigned to a command job at submission.
#[derive(
    Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct JobId(pub u64);

impl fmt::Display for JobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "job-{}", self.0)
    }
}

impl FromStr for JobId {
    type Err = UnknownVariant;

    /// Accepts both the display form (`job-42`) and the bare number (`42`).
    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let trimmed = value.trim();
        let digits = trimmed.strip_prefix("job-").unwrap_or(trimmed);
        digits
            .parse::<u64>()
            .map(JobId)
            .map_err(|_| UnknownVariant::new("job id", value))
    }
}

/// Lifecycle status of a command job.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    Queued,
    Running,
    Succeeded,
    Failed,
    TimedOut,
}

impl JobStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            JobStatus::Queued => "queued",
            JobStatus::Running => "running",
            JobStatus::Succeeded => "succeeded",
            JobStatus::Failed => "failed",
            JobStatus::TimedOut => "timed_out",
        }
    }

    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            JobStatus::Succeeded | JobStatus::Failed | JobStatus::TimedOut
        )
    }

    /// Position in the lifecycle. A job may only move to an equal or higher rank,
    /// and never leaves a terminal status.
    pub fn rank(self) -> u8 {
        match self {
            JobStatus::Queued => 0,
            JobStatus::Running => 1,
            JobStatus::Succeeded | JobStatus::Failed | JobStatus::TimedOut => 2,
        }
    }

    pub fn can_transition_to(self, next: JobStatus) -> bool {
        if self.is_terminal() {
            return false;
        }
        next.rank() >= self.rank()
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Read-only snapshot of a command job as seen by callers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommandJob {
    pub id: JobId,
    pub command: String,
    pub submitted_at_ms: u64,
    pub status: JobStatus,
    pub attempt: u32,
    pub max_attempts: u32,
    pub stdout: Option<String>,
    pub error: Option<String>,
    pub finished_at_ms: Option<u64>,
}

impl CommandJob {
    pub fn queued(id: JobId, command: String, submitted_at_ms: u64, max_attempts: u32) -> Self {
        Self {
            id,
            command,
            submitted_at_ms,
            status: JobStatus::Queued,
            attempt: 0,
            max_attempts,
            stdout: None,
            error: None,
            finished_at_ms: None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }
}

/// Kind of lifecycle transition recorded in history.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HistoryEventKind {
    Submitted,
    Started,
    Succeeded,
    Failed,
    TimedOut,
    Retrying,
}

impl HistoryEventKind {
    pub fn as_str(self) -> &'static str {
        match self {
            HistoryEventKind::Submitted => "submitted",
            HistoryEventKind::Started => "started",
            HistoryEventKind::Succeeded => "succeeded",
            HistoryEventKind::Failed => "failed",
            HistoryEventKind::TimedOut => "timed_out",
            HistoryEventKind::Retrying => "retrying",
        }
    }
}

impl fmt::Display for HistoryEventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One job lifecycle transition.
///
/// `status` is the job status *after* the transition. A `timed_out` event whose
/// status is still `running` marks an abandoned attempt that will be retried.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HistoryEvent {
    #[serde(default)]
    pub seq: u64,
    pub job_id: JobId,
    pub kind: HistoryEventKind,
    pub status: JobStatus,
    pub attempt: u32,
    pub timestamp_ms: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
}

impl HistoryEvent {
    pub fn new(
        job_id: JobId,
        kind: HistoryEventKind,
        status: JobStatus,
        attempt: u32,
        timestamp_ms: u64,
        detail: Option<String>,
    ) -> Self {
        Self {
            seq: 0,
            job_id,
            kind,
            status,
            attempt,
            timestamp_ms,
            detail,
        }
    }

    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }
}
