use std::collections::VecDeque;
use std::fs::{self, File, OpenOptions};
use std::io::{self, BufRead, BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use thiserror::Error;
use tracing::{info, warn};

use mc_schema::{HistoryEvent, JobId};

#[derive(Debug, Error)]
pub enum HistoryError {
    #[error("failed to open history log {path:?}: {source}")]
    Open {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("failed to write history log {path:?}: {source}")]
    Write {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("failed to encode history event: {0}")]
    Encode(#[from] serde_json::Error),
}

/// Append-only record of job lifecycle events.
///
/// Events always land in a bounded in-memory ring. When a log file is
/// attached each event is also written as one JSON line; a write failure is
/// returned to the caller but the in-memory copy is kept.
pub struct HistoryStore {
    inner: Mutex<HistoryInner>,
}

struct HistoryInner {
    capacity: usize,
    ring: VecDeque<HistoryEvent>,
    next_seq: u64,
    log: Option<HistoryLog>,
    replayed: Vec<HistoryEvent>,
}

struct HistoryLog {
    path: PathBuf,
    writer: Box<dyn Write + Send>,
}

impl HistoryStore {
    pub fn in_memory(capacity: usize) -> Self {
        Self::from_parts(capacity, None, Vec::new())
    }

    /// Open (or create) the log at `path` and replay its events.
    ///
    /// Replay happens here and only here. Malformed lines are skipped.
    pub fn open(path: impl AsRef<Path>, capacity: usize) -> Result<Self, HistoryError> {
        let path = path.as_ref().to_path_buf();
        let open_err = |source| HistoryError::Open {
            path: path.clone(),
            source,
        };

        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent).map_err(open_err)?;
        }

        let replayed = match File::open(&path) {
            Ok(file) => replay(&path, file),
            Err(err) if err.kind() == io::ErrorKind::NotFound => Vec::new(),
            Err(err) => return Err(open_err(err)),
        };

        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .map_err(open_err)?;

        info!(
            target: "mc_assist::history",
            path = %path.display(),
            replayed = replayed.len(),
            "history.opened"
        );

        let log = HistoryLog {
            path,
            writer: Box::new(BufWriter::new(file)),
        };
        Ok(Self::from_parts(capacity, Some(log), replayed))
    }

    /// Replay the log at `path` without attaching a writer. Nothing is
    /// created on disk and later appends stay in memory, so another process
    /// can keep writing to the same log. A missing file reads as empty.
    pub fn read_only(path: impl AsRef<Path>, capacity: usize) -> Result<Self, HistoryError> {
        let path = path.as_ref();
        let replayed = match File::open(path) {
            Ok(file) => replay(path, file),
            Err(err) if err.kind() == io::ErrorKind::NotFound => Vec::new(),
            Err(source) => {
                return Err(HistoryError::Open {
                    path: path.to_path_buf(),
                    source,
                })
            }
        };
        info!(
            target: "mc_assist::history",
            path = %path.display(),
            replayed = replayed.len(),
            "history.opened=read_only"
        );
        Ok(Self::from_parts(capacity, None, replayed))
    }

    #[cfg(test)]
    pub(crate) fn with_writer(
        path: impl Into<PathBuf>,
        writer: impl Write + Send + 'static,
        capacity: usize,
    ) -> Self {
        let log = HistoryLog {
            path: path.into(),
            writer: Box::new(writer),
        };
        Self::from_parts(capacity, Some(log), Vec::new())
    }

    fn from_parts(capacity: usize, log: Option<HistoryLog>, replayed: Vec<HistoryEvent>) -> Self {
        let capacity = capacity.max(1);
        let next_seq = replayed.iter().map(|e| e.seq).max().map_or(1, |seq| seq + 1);
        let skip = replayed.len().saturating_sub(capacity);
        let ring = replayed.iter().skip(skip).cloned().collect();
        Self {
            inner: Mutex::new(HistoryInner {
                capacity,
                ring,
                next_seq,
                log,
                replayed,
            }),
        }
    }

    /// Record `event`, assigning its sequence number.
    pub fn append(&self, mut event: HistoryEvent) -> Result<HistoryEvent, HistoryError> {
        let mut inner = self.inner.lock().expect("history mutex poisoned");
        event.seq = inner.next_seq;
        inner.next_seq += 1;
        if inner.ring.len() == inner.capacity {
            inner.ring.pop_front();
        }
        inner.ring.push_back(event.clone());

        // Written and flushed while the lock is held, so lines land in seq order.
        if let Some(log) = inner.log.as_mut() {
            log.write(&event)?;
        }
        Ok(event)
    }

    /// Most recent events first.
    pub fn recent(&self, limit: usize) -> Vec<HistoryEvent> {
        let inner = self.inner.lock().expect("history mutex poisoned");
        inner.ring.iter().rev().take(limit).cloned().collect()
    }

    /// Events for one job in the order they were recorded.
    pub fn events_for(&self, job_id: JobId) -> Vec<HistoryEvent> {
        let inner = self.inner.lock().expect("history mutex poisoned");
        inner
            .ring
            .iter()
            .filter(|event| event.job_id == job_id)
            .cloned()
            .collect()
    }

    pub fn len(&self) -> usize {
        self.inner.lock().expect("history mutex poisoned").ring.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn log_path(&self) -> Option<PathBuf> {
        let inner = self.inner.lock().expect("history mutex poisoned");
        inner.log.as_ref().map(|log| log.path.clone())
    }

    /// Hand out the events read from disk at open time. Later calls return an
    /// empty list, so rebuilding state from them can only happen once.
    pub fn take_replayed(&self) -> Vec<HistoryEvent> {
        let mut inner = self.inner.lock().expect("history mutex poisoned");
        std::mem::take(&mut inner.replayed)
    }
}

impl HistoryLog {
    fn write(&mut self, event: &HistoryEvent) -> Result<(), HistoryError> {
        let line = serde_json::to_string(event)?;
        let write_err = |source| HistoryError::Write {
            path: self.path.clone(),
            source,
        };
        writeln!(self.writer, "{line}").map_err(write_err)?;
        self.writer.flush().map_err(write_err)
    }
}

fn replay(path: &Path, file: File) -> Vec<HistoryEvent> {
    let mut events = Vec::new();
    for (index, line) in BufReader::new(file).lines().enumerate() {
        let line = match line {
            Ok(line) => line,
            Err(err) => {
                warn!(
                    target: "mc_assist::history",
                    path = %path.display(),
                    line = index + 1,
                    error = %err,
                    "history.replay_stopped=read_error"
                );
                break;
            }
        };
        if line.trim().is_empty() {
            continue;
        }
        match serde_json::from_str::<HistoryEvent>(&line) {
            Ok(event) => events.push(event),
            Err(err) => warn!(
                target: "mc_assist::history",
                path = %path.display(),
                line = index + 1,
                error = %err,
                "history.replay_skipped=malformed_line"
            ),
        }
    }
    events
}
