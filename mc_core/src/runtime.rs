use std::collections::HashMap;
use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, RwLock};
use std::time::Duration;

use rand::Rng;
use thiserror::Error;
use tokio::runtime::Handle;
use tokio::sync::Notify;
use tracing::{debug, warn};

use mc_schema::{CommandJob, HistoryEvent, HistoryEventKind, JobId, JobStatus};

use crate::adapters::GameCommandAdapter;
use crate::history::{HistoryError, HistoryStore};
use crate::telemetry::{timestamp_ms, TelemetryEvent, TelemetrySink, TracingTelemetry};

pub const INTERRUPTED_ERROR: &str = "interrupted: runtime restarted before completion";

#[derive(Debug, Error)]
pub enum RuntimeError {
    #[error("invalid command: {0}")]
    InvalidCommand(String),
    #[error("invalid argument: {0}")]
    InvalidArgument(String),
    #[error("job {0} not found")]
    NotFound(JobId),
    #[error("job {job_id} still {status} when the wait deadline passed")]
    WaitTimedOut { job_id: JobId, status: JobStatus },
    #[error("command runtime must be built inside a tokio runtime")]
    NoAsyncRuntime,
}

/// Bounded retry with exponential backoff.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_millis(250),
            max_delay: Duration::from_secs(5),
        }
    }
}

impl RetryPolicy {
    /// Un-jittered delay after the given (1-based) failed attempt.
    pub fn exponential(&self, attempt: u32) -> Duration {
        let factor = 2u32.saturating_pow(attempt.saturating_sub(1));
        self.base_delay.saturating_mul(factor).min(self.max_delay)
    }

    /// Equal jitter: half of the exponential delay is fixed, the other half is
    /// drawn uniformly.
    pub fn backoff(&self, attempt: u32) -> Duration {
        let ceiling = self.exponential(attempt).as_millis() as u64;
        let fixed = ceiling / 2;
        let spread = ceiling - fixed;
        let jitter = rand::thread_rng().gen_range(0..=spread);
        Duration::from_millis(fixed + jitter)
    }

    fn validate(&self) -> Result<(), RuntimeError> {
        if self.max_attempts == 0 {
            return Err(RuntimeError::InvalidArgument(
                "max_attempts must be at least 1".to_string(),
            ));
        }
        if self.base_delay > self.max_delay {
            return Err(RuntimeError::InvalidArgument(format!(
                "base_delay {}ms exceeds max_delay {}ms",
                self.base_delay.as_millis(),
                self.max_delay.as_millis()
            )));
        }
        Ok(())
    }
}

/// Per-submission overrides. `None` falls back to the runtime settings.
#[derive(Debug, Clone, Copy, Default)]
pub struct SubmitOptions {
    pub retry: Option<RetryPolicy>,
    pub timeout: Option<Duration>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RuntimeSettings {
    pub retry: RetryPolicy,
    pub default_timeout: Duration,
}

impl Default for RuntimeSettings {
    fn default() -> Self {
        Self {
            retry: RetryPolicy::default(),
            default_timeout: Duration::from_secs(5),
        }
    }
}

fn validate_timeout(timeout: Duration) -> Result<(), RuntimeError> {
    if timeout.is_zero() {
        return Err(RuntimeError::InvalidArgument(
            "timeout must be greater than zero".to_string(),
        ));
    }
    Ok(())
}

pub struct CommandRuntimeBuilder {
    adapter: Arc<dyn GameCommandAdapter>,
    history: Option<Arc<HistoryStore>>,
    telemetry: Option<Arc<dyn TelemetrySink>>,
    settings: RuntimeSettings,
}

impl CommandRuntimeBuilder {
    pub fn history(mut self, history: Arc<HistoryStore>) -> Self {
        self.history = Some(history);
        self
    }

    pub fn telemetry(mut self, telemetry: Arc<dyn TelemetrySink>) -> Self {
        self.telemetry = Some(telemetry);
        self
    }

    pub fn settings(mut self, settings: RuntimeSettings) -> Self {
        self.settings = settings;
        self
    }

    /// Must be called from within a tokio runtime; jobs are spawned on it.
    pub fn build(self) -> Result<CommandRuntime, RuntimeError> {
        self.settings.retry.validate()?;
        validate_timeout(self.settings.default_timeout)?;
        let handle = Handle::try_current().map_err(|_| RuntimeError::NoAsyncRuntime)?;

        let inner = RuntimeInner {
            adapter: self.adapter,
            history: self
                .history
                .unwrap_or_else(|| Arc::new(HistoryStore::in_memory(512))),
            telemetry: self
                .telemetry
                .unwrap_or_else(|| Arc::new(TracingTelemetry)),
            settings: self.settings,
            jobs: RwLock::new(HashMap::new()),
            next_id: AtomicU64::new(1),
            changed: Notify::new(),
            handle,
        };
        inner.restore();
        Ok(CommandRuntime {
            inner: Arc::new(inner),
        })
    }
}

/// Owns the job table and drives every submitted command to a terminal status.
///
/// Cloning is cheap; clones share the same table, history and adapter.
#[derive(Clone)]
pub struct CommandRuntime {
    inner: Arc<RuntimeInner>,
}

struct RuntimeInner {
    adapter: Arc<dyn GameCommandAdapter>,
    history: Arc<HistoryStore>,
    telemetry: Arc<dyn TelemetrySink>,
    settings: RuntimeSettings,
    jobs: RwLock<HashMap<JobId, CommandJob>>,
    next_id: AtomicU64,
    changed: Notify,
    handle: Handle,
}

impl CommandRuntime {
    pub fn builder(adapter: Arc<dyn GameCommandAdapter>) -> CommandRuntimeBuilder {
        CommandRuntimeBuilder {
            adapter,
            history: None,
            telemetry: None,
            settings: RuntimeSettings::default(),
        }
    }

    pub fn new(
        adapter: Arc<dyn GameCommandAdapter>,
        history: Arc<HistoryStore>,
        settings: RuntimeSettings,
    ) -> Result<Self, RuntimeError> {
        Self::builder(adapter)
            .history(history)
            .settings(settings)
            .build()
    }

    pub fn settings(&self) -> &RuntimeSettings {
        &self.inner.settings
    }

    pub fn submit(&self, command: &str) -> Result<JobId, RuntimeError> {
        self.submit_command(command, SubmitOptions::default())
    }

    /// Enqueue `command` and return immediately; execution happens on a
    /// spawned task.
    pub fn submit_command(
        &self,
        command: &str,
        options: SubmitOptions,
    ) -> Result<JobId, RuntimeError> {
        if command.trim().is_empty() {
            return Err(RuntimeError::InvalidCommand(
                "command must not be empty".to_string(),
            ));
        }
        let retry = options.retry.unwrap_or(self.inner.settings.retry);
        retry.validate()?;
        let timeout = options
            .timeout
            .unwrap_or(self.inner.settings.default_timeout);
        validate_timeout(timeout)?;

        let id = JobId(self.inner.next_id.fetch_add(1, Ordering::SeqCst));
        let job = CommandJob::queued(id, command.to_string(), timestamp_ms(), retry.max_attempts);
        let event = HistoryEvent::new(
            id,
            HistoryEventKind::Submitted,
            JobStatus::Queued,
            0,
            job.submitted_at_ms,
            Some(job.command.clone()),
        );
        self.inner.publish(job, event);

        let inner = Arc::clone(&self.inner);
        let command = command.to_string();
        self.inner
            .handle
            .spawn(async move { inner.drive(id, command, retry, timeout).await });
        Ok(id)
    }

    pub fn get_job(&self, job_id: JobId) -> Result<CommandJob, RuntimeError> {
        self.inner
            .snapshot(job_id)
            .ok_or(RuntimeError::NotFound(job_id))
    }

    /// Newest submissions first, across every status.
    pub fn list_recent_jobs(&self, limit: usize) -> Result<Vec<CommandJob>, RuntimeError> {
        let jobs: Vec<CommandJob> = {
            let table = self.inner.jobs.read().expect("job table poisoned");
            table.values().cloned().collect()
        };
        newest_first(jobs, limit)
    }

    /// Resolve once `job_id` reaches a terminal status, or fail with
    /// `WaitTimedOut` after `deadline`.
    pub async fn wait_for_terminal(
        &self,
        job_id: JobId,
        deadline: Duration,
    ) -> Result<CommandJob, RuntimeError> {
        match tokio::time::timeout(deadline, self.await_terminal(job_id)).await {
            Ok(result) => result,
            Err(_) => {
                let job = self.get_job(job_id)?;
                if job.is_terminal() {
                    Ok(job)
                } else {
                    Err(RuntimeError::WaitTimedOut {
                        job_id,
                        status: job.status,
                    })
                }
            }
        }
    }

    async fn await_terminal(&self, job_id: JobId) -> Result<CommandJob, RuntimeError> {
        loop {
            // Registered before the check so a transition in between still wakes us.
            let changed = self.inner.changed.notified();
            let job = self.get_job(job_id)?;
            if job.is_terminal() {
                return Ok(job);
            }
            changed.await;
        }
    }

    pub fn history(&self) -> &HistoryStore {
        &self.inner.history
    }

    pub fn events_for(&self, job_id: JobId) -> Vec<HistoryEvent> {
        self.inner.history.events_for(job_id)
    }
}

impl RuntimeInner {
    fn snapshot(&self, job_id: JobId) -> Option<CommandJob> {
        let table = self.jobs.read().expect("job table poisoned");
        table.get(&job_id).cloned()
    }

    /// Record the event, then make the new snapshot visible.
    fn publish(&self, job: CommandJob, event: HistoryEvent) {
        let event = match self.history.append(event.clone()) {
            Ok(recorded) => recorded,
            Err(err) => {
                warn!(
                    target: "mc_assist::runtime",
                    job = %job.id,
                    kind = %event.kind,
                    error = %err,
                    "history.append_failed"
                );
                event
            }
        };
        {
            let mut table = self.jobs.write().expect("job table poisoned");
            table.insert(job.id, job);
        }
        self.telemetry.emit(&TelemetryEvent::from_history(&event));
        self.changed.notify_waiters();
    }

    fn transition(
        &self,
        job_id: JobId,
        kind: HistoryEventKind,
        detail: Option<String>,
        apply: impl FnOnce(&mut CommandJob),
    ) -> Option<CommandJob> {
        let mut job = self.snapshot(job_id)?;
        let previous = job.status;
        apply(&mut job);
        if !previous.can_transition_to(job.status) {
            warn!(
                target: "mc_assist::runtime",
                job = %job_id,
                from = %previous,
                to = %job.status,
                "job.transition_rejected"
            );
            return None;
        }
        let event = HistoryEvent::new(job_id, kind, job.status, job.attempt, timestamp_ms(), detail);
        self.publish(job.clone(), event);
        Some(job)
    }

    async fn drive(&self, job_id: JobId, command: String, retry: RetryPolicy, timeout: Duration) {
        loop {
            let started = self.transition(job_id, HistoryEventKind::Started, None, |job| {
                job.status = JobStatus::Running;
                job.attempt += 1;
            });
            let Some(started) = started else {
                return;
            };
            let attempt = started.attempt;
            debug!(
                target: "mc_assist::runtime",
                job = %job_id,
                attempt,
                adapter = self.adapter.name(),
                "job.dispatch"
            );

            let error = match tokio::time::timeout(timeout, self.adapter.execute(&command)).await {
                Ok(Ok(stdout)) => {
                    self.transition(
                        job_id,
                        HistoryEventKind::Succeeded,
                        Some(stdout.clone()),
                        |job| {
                            job.status = JobStatus::Succeeded;
                            job.stdout = Some(stdout);
                            job.finished_at_ms = Some(timestamp_ms());
                        },
                    );
                    return;
                }
                Ok(Err(err)) => AttemptError::Failed(err.to_string()),
                Err(_) => {
                    self.adapter.cancel(&command);
                    AttemptError::TimedOut(format!(
                        "attempt {attempt} timed out after {}ms",
                        timeout.as_millis()
                    ))
                }
            };

            if attempt >= retry.max_attempts {
                let (kind, status, message) = error.into_final();
                self.transition(job_id, kind, Some(message.clone()), |job| {
                    job.status = status;
                    job.error = Some(message);
                    job.finished_at_ms = Some(timestamp_ms());
                });
                return;
            }

            let delay = retry.backoff(attempt);
            let (kind, message) = match error {
                AttemptError::Failed(message) => (
                    HistoryEventKind::Retrying,
                    format!("{message}; retrying in {}ms", delay.as_millis()),
                ),
                AttemptError::TimedOut(message) => (HistoryEventKind::TimedOut, message),
            };
            warn!(
                target: "mc_assist::runtime",
                job = %job_id,
                attempt,
                delay_ms = delay.as_millis() as u64,
                detail = %message,
                "job.attempt_failed"
            );
            if self.transition(job_id, kind, Some(message), |_| {}).is_none() {
                return;
            }
            tokio::time::sleep(delay).await;
        }
    }

    /// Rebuild snapshots from a replayed log and close jobs that never
    /// finished.
    fn restore(&self) {
        let replayed = self.history.take_replayed();
        if replayed.is_empty() {
            return;
        }

        let jobs = rebuild_jobs(&replayed, self.settings.retry.max_attempts);

        let max_id = jobs.keys().map(|id| id.0).max().unwrap_or(0);
        self.next_id.store(max_id + 1, Ordering::SeqCst);

        let mut orphans: Vec<CommandJob> = jobs
            .values()
            .filter(|job| !job.is_terminal())
            .cloned()
            .collect();
        orphans.sort_by_key(|job| job.id);
        {
            let mut table = self.jobs.write().expect("job table poisoned");
            *table = jobs;
        }
        debug!(
            target: "mc_assist::runtime",
            events = replayed.len(),
            orphans = orphans.len(),
            "runtime.restored"
        );

        for job in orphans {
            warn!(
                target: "mc_assist::runtime",
                job = %job.id,
                status = %job.status,
                "runtime.replay_closed=orphaned_job"
            );
            self.transition(
                job.id,
                HistoryEventKind::Failed,
                Some(INTERRUPTED_ERROR.to_string()),
                |job| {
                    job.status = JobStatus::Failed;
                    job.error = Some(INTERRUPTED_ERROR.to_string());
                    job.finished_at_ms = Some(timestamp_ms());
                },
            );
        }
    }
}

enum AttemptError {
    Failed(String),
    TimedOut(String),
}

impl AttemptError {
    fn into_final(self) -> (HistoryEventKind, JobStatus, String) {
        match self {
            AttemptError::Failed(message) => {
                (HistoryEventKind::Failed, JobStatus::Failed, message)
            }
            AttemptError::TimedOut(message) => {
                (HistoryEventKind::TimedOut, JobStatus::TimedOut, message)
            }
        }
    }
}

/// Read-only view of a durable job log.
///
/// Jobs are rebuilt from the replayed events exactly as a restarting runtime
/// would, except that unfinished jobs keep their last recorded status and
/// nothing is appended. Safe to open while another process owns the log.
pub struct HistoryView {
    jobs: HashMap<JobId, CommandJob>,
    history: HistoryStore,
}

impl HistoryView {
    pub fn open(
        path: impl AsRef<Path>,
        capacity: usize,
        default_attempts: u32,
    ) -> Result<Self, HistoryError> {
        let history = HistoryStore::read_only(path, capacity)?;
        Ok(Self::from_store(history, default_attempts))
    }

    /// Build the view from whatever `history` replayed when it was opened.
    pub fn from_store(history: HistoryStore, default_attempts: u32) -> Self {
        let replayed = history.take_replayed();
        let jobs = rebuild_jobs(&replayed, default_attempts);
        Self { jobs, history }
    }

    pub fn get_job(&self, job_id: JobId) -> Result<CommandJob, RuntimeError> {
        self.jobs
            .get(&job_id)
            .cloned()
            .ok_or(RuntimeError::NotFound(job_id))
    }

    pub fn list_recent_jobs(&self, limit: usize) -> Result<Vec<CommandJob>, RuntimeError> {
        newest_first(self.jobs.values().cloned().collect(), limit)
    }

    pub fn history(&self) -> &HistoryStore {
        &self.history
    }

    pub fn events_for(&self, job_id: JobId) -> Vec<HistoryEvent> {
        self.history.events_for(job_id)
    }
}

fn newest_first(mut jobs: Vec<CommandJob>, limit: usize) -> Result<Vec<CommandJob>, RuntimeError> {
    if limit < 1 {
        return Err(RuntimeError::InvalidArgument(
            "limit must be at least 1".to_string(),
        ));
    }
    jobs.sort_by(|a, b| (b.submitted_at_ms, b.id).cmp(&(a.submitted_at_ms, a.id)));
    jobs.truncate(limit);
    Ok(jobs)
}

fn rebuild_jobs(events: &[HistoryEvent], default_attempts: u32) -> HashMap<JobId, CommandJob> {
    let mut jobs: HashMap<JobId, CommandJob> = HashMap::new();
    for event in events {
        let job = jobs.entry(event.job_id).or_insert_with(|| {
            CommandJob::queued(
                event.job_id,
                String::new(),
                event.timestamp_ms,
                default_attempts,
            )
        });
        apply_replayed(job, event);
    }
    jobs
}

fn apply_replayed(job: &mut CommandJob, event: &HistoryEvent) {
    if job.is_terminal() {
        return;
    }
    job.attempt = job.attempt.max(event.attempt);
    job.max_attempts = job.max_attempts.max(job.attempt);
    if job.status.can_transition_to(event.status) {
        job.status = event.status;
    }
    match event.kind {
        HistoryEventKind::Submitted => {
            job.command = event.detail.clone().unwrap_or_default();
            job.submitted_at_ms = event.timestamp_ms;
        }
        HistoryEventKind::Succeeded => {
            job.stdout = event.detail.clone();
        }
        HistoryEventKind::Failed | HistoryEventKind::TimedOut if event.is_terminal() => {
            job.error = event.detail.clone();
        }
        _ => {}
    }
    if job.is_terminal() {
        job.finished_at_ms = Some(event.timestamp_ms);
    }
}

#[cfg(test)]
mod tests {
    use std::collections::VecDeque;
    use std::fs;
    use std::io::{self, Write};
    use std::sync::atomic::AtomicUsize;
    use std::sync::Mutex;

    use async_trait::async_trait;

    use super::*;
    use crate::adapters::{AdapterError, EchoAdapter};
    use crate::telemetry::ChannelTelemetry;

    const WAIT: Duration = Duration::from_secs(5);

    fn fast_settings(max_attempts: u32) -> RuntimeSettings {
        RuntimeSettings {
            retry: RetryPolicy {
                max_attempts,
                base_delay: Duration::from_millis(1),
                max_delay: Duration::from_millis(4),
            },
            default_timeout: Duration::from_secs(2),
        }
    }

    /// Fails with the scripted messages in order, then succeeds.
    struct ScriptedAdapter {
        failures: Mutex<VecDeque<String>>,
    }

    impl ScriptedAdapter {
        fn failing(messages: &[&str]) -> Self {
            Self {
                failures: Mutex::new(messages.iter().map(|m| m.to_string()).collect()),
            }
        }
    }

    #[async_trait]
    impl GameCommandAdapter for ScriptedAdapter {
        fn name(&self) -> &str {
            "scripted"
        }

        async fn execute(&self, command: &str) -> Result<String, AdapterError> {
            let next = self.failures.lock().unwrap().pop_front();
            match next {
                Some(message) => Err(AdapterError::Rejected(message)),
                None => Ok(format!("ok: {command}")),
            }
        }
    }

    struct SlowAdapter {
        delay: Duration,
        cancels: AtomicUsize,
    }

    #[async_trait]
    impl GameCommandAdapter for SlowAdapter {
        fn name(&self) -> &str {
            "slow"
        }

        async fn execute(&self, _command: &str) -> Result<String, AdapterError> {
            tokio::time::sleep(self.delay).await;
            Ok("late".to_string())
        }

        fn cancel(&self, _command: &str) {
            self.cancels.fetch_add(1, Ordering::SeqCst);
        }
    }

    /// Holds one command until released; everything else returns at once.
    struct GatedAdapter {
        held: &'static str,
        entered: Notify,
        gate: Notify,
    }

    impl GatedAdapter {
        fn holding(held: &'static str) -> Self {
            Self {
                held,
                entered: Notify::new(),
                gate: Notify::new(),
            }
        }
    }

    #[async_trait]
    impl GameCommandAdapter for GatedAdapter {
        fn name(&self) -> &str {
            "gated"
        }

        async fn execute(&self, command: &str) -> Result<String, AdapterError> {
            if command == self.held {
                self.entered.notify_one();
                self.gate.notified().await;
            }
            Ok(format!("done: {command}"))
        }
    }

    struct BrokenDisk;

    impl Write for BrokenDisk {
        fn write(&mut self, _: &[u8]) -> io::Result<usize> {
            Err(io::Error::other("no space left on device"))
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    fn runtime_with(adapter: Arc<dyn GameCommandAdapter>, max_attempts: u32) -> CommandRuntime {
        CommandRuntime::builder(adapter)
            .settings(fast_settings(max_attempts))
            .build()
            .unwrap()
    }

    fn kinds(runtime: &CommandRuntime, id: JobId) -> Vec<HistoryEventKind> {
        runtime.events_for(id).iter().map(|e| e.kind).collect()
    }

    #[test]
    fn exponential_backoff_doubles_and_caps() {
        let policy = RetryPolicy {
            max_attempts: 5,
            base_delay: Duration::from_millis(100),
            max_delay: Duration::from_millis(350),
        };
        assert_eq!(policy.exponential(1), Duration::from_millis(100));
        assert_eq!(policy.exponential(2), Duration::from_millis(200));
        assert_eq!(policy.exponential(3), Duration::from_millis(350));
        assert_eq!(policy.exponential(40), Duration::from_millis(350));
        for _ in 0..50 {
            let delay = policy.backoff(2);
            assert!(
                delay >= Duration::from_millis(100) && delay <= Duration::from_millis(200),
                "jittered delay {delay:?} outside equal-jitter window"
            );
        }
    }

    #[test]
    fn building_outside_tokio_is_rejected() {
        let result = CommandRuntime::builder(Arc::new(EchoAdapter)).build();
        assert!(matches!(result, Err(RuntimeError::NoAsyncRuntime)));
    }

    #[tokio::test]
    async fn successful_command_records_three_events() {
        let runtime = runtime_with(Arc::new(EchoAdapter), 3);
        let id = runtime.submit("say hello").unwrap();
        let job = runtime.wait_for_terminal(id, WAIT).await.unwrap();

        assert_eq!(job.status, JobStatus::Succeeded);
        assert_eq!(job.attempt, 1);
        assert_eq!(job.stdout.as_deref(), Some("executed: say hello"));
        assert!(job.error.is_none());
        assert!(job.finished_at_ms.is_some());
        assert_eq!(
            kinds(&runtime, id),
            vec![
                HistoryEventKind::Submitted,
                HistoryEventKind::Started,
                HistoryEventKind::Succeeded
            ]
        );
    }

    #[tokio::test]
    async fn transient_failures_are_retried_until_success() {
        let adapter = ScriptedAdapter::failing(&["busy", "busy"]);
        let runtime = runtime_with(Arc::new(adapter), 3);
        let id = runtime.submit("time set day").unwrap();
        let job = runtime.wait_for_terminal(id, WAIT).await.unwrap();

        assert_eq!(job.status, JobStatus::Succeeded);
        assert_eq!(job.attempt, 3);
        assert!(job.error.is_none(), "error is only set on failure");
        assert_eq!(
            kinds(&runtime, id),
            vec![
                HistoryEventKind::Submitted,
                HistoryEventKind::Started,
                HistoryEventKind::Retrying,
                HistoryEventKind::Started,
                HistoryEventKind::Retrying,
                HistoryEventKind::Started,
                HistoryEventKind::Succeeded
            ]
        );
        let retry = &runtime.events_for(id)[2];
        assert!(retry.detail.as_deref().unwrap().contains("retrying in"));
    }

    #[tokio::test]
    async fn exhausted_retries_fail_with_last_error() {
        let adapter = ScriptedAdapter::failing(&["first", "second", "third"]);
        let runtime = runtime_with(Arc::new(adapter), 2);
        let id = runtime.submit("give @p diamond").unwrap();
        let job = runtime.wait_for_terminal(id, WAIT).await.unwrap();

        assert_eq!(job.status, JobStatus::Failed);
        assert_eq!(job.attempt, 2);
        assert_eq!(job.max_attempts, 2);
        assert!(job.error.as_deref().unwrap().contains("second"));
        assert!(job.stdout.is_none());
        assert_eq!(
            kinds(&runtime, id).last(),
            Some(&HistoryEventKind::Failed)
        );
    }

    #[tokio::test]
    async fn hung_adapter_times_out_and_is_cancelled() {
        let adapter = Arc::new(SlowAdapter {
            delay: Duration::from_secs(10),
            cancels: AtomicUsize::new(0),
        });
        let runtime = runtime_with(adapter.clone(), 2);
        let options = SubmitOptions {
            retry: None,
            timeout: Some(Duration::from_millis(20)),
        };
        let id = runtime.submit_command("locate village", options).unwrap();
        let job = runtime.wait_for_terminal(id, WAIT).await.unwrap();

        assert_eq!(job.status, JobStatus::TimedOut);
        assert_eq!(job.attempt, 2);
        assert!(job.error.as_deref().unwrap().contains("timed out"));
        assert_eq!(adapter.cancels.load(Ordering::SeqCst), 2);

        let timeouts: Vec<_> = runtime
            .events_for(id)
            .into_iter()
            .filter(|e| e.kind == HistoryEventKind::TimedOut)
            .collect();
        assert_eq!(timeouts.len(), 2);
        assert_eq!(timeouts[0].status, JobStatus::Running, "first timeout is retried");
        assert_eq!(timeouts[1].status, JobStatus::TimedOut);
    }

    #[tokio::test]
    async fn statuses_in_history_never_regress() {
        let adapter = ScriptedAdapter::failing(&["nope"]);
        let runtime = runtime_with(Arc::new(adapter), 3);
        let id = runtime.submit("weather clear").unwrap();
        runtime.wait_for_terminal(id, WAIT).await.unwrap();

        let events = runtime.events_for(id);
        for pair in events.windows(2) {
            assert!(pair[0].seq < pair[1].seq);
            assert!(pair[0].status.rank() <= pair[1].status.rank());
        }
    }

    #[tokio::test]
    async fn invalid_submissions_never_enter_the_table() {
        let runtime = runtime_with(Arc::new(EchoAdapter), 3);
        assert!(matches!(
            runtime.submit("   "),
            Err(RuntimeError::InvalidCommand(_))
        ));

        let zero_attempts = SubmitOptions {
            retry: Some(RetryPolicy {
                max_attempts: 0,
                ..RetryPolicy::default()
            }),
            timeout: None,
        };
        assert!(matches!(
            runtime.submit_command("say hi", zero_attempts),
            Err(RuntimeError::InvalidArgument(_))
        ));

        let zero_timeout = SubmitOptions {
            retry: None,
            timeout: Some(Duration::ZERO),
        };
        assert!(matches!(
            runtime.submit_command("say hi", zero_timeout),
            Err(RuntimeError::InvalidArgument(_))
        ));
        assert!(runtime.history().is_empty());
        assert!(matches!(
            runtime.get_job(JobId(1)),
            Err(RuntimeError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn recent_jobs_are_newest_first_and_limited() {
        let runtime = runtime_with(Arc::new(EchoAdapter), 1);
        let ids: Vec<JobId> = ["say a", "say b", "say c"]
            .iter()
            .map(|cmd| runtime.submit(cmd).unwrap())
            .collect();
        for id in &ids {
            runtime.wait_for_terminal(*id, WAIT).await.unwrap();
        }

        let recent = runtime.list_recent_jobs(2).unwrap();
        assert_eq!(recent.len(), 2);
        assert_eq!(recent[0].id, ids[2]);
        assert_eq!(recent[1].id, ids[1]);
        assert_eq!(runtime.list_recent_jobs(10).unwrap().len(), 3);
        assert!(matches!(
            runtime.list_recent_jobs(0),
            Err(RuntimeError::InvalidArgument(_))
        ));
    }

    #[tokio::test]
    async fn wait_reports_deadline_with_current_status() {
        let adapter = Arc::new(SlowAdapter {
            delay: Duration::from_secs(10),
            cancels: AtomicUsize::new(0),
        });
        let runtime = runtime_with(adapter, 1);
        let id = runtime.submit("fill ~ ~ ~ ~ ~ ~ stone").unwrap();
        let err = runtime
            .wait_for_terminal(id, Duration::from_millis(30))
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            RuntimeError::WaitTimedOut {
                status: JobStatus::Running,
                ..
            }
        ));
    }

    #[tokio::test]
    async fn telemetry_sees_every_transition() {
        let (sink, receiver) = ChannelTelemetry::channel();
        let runtime = CommandRuntime::builder(Arc::new(EchoAdapter))
            .settings(fast_settings(3))
            .telemetry(Arc::new(sink))
            .build()
            .unwrap();
        let id = runtime.submit("say hi").unwrap();
        runtime.wait_for_terminal(id, WAIT).await.unwrap();

        let names: Vec<String> = receiver.try_iter().map(|event| event.name).collect();
        assert_eq!(names, vec!["job.submitted", "job.started", "job.succeeded"]);
    }

    #[tokio::test]
    async fn replay_restores_finished_jobs_and_closes_orphans() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("history.jsonl");
        {
            let store = HistoryStore::open(&path, 64).unwrap();
            let record = |job: u64, kind, status, attempt, detail: Option<&str>| {
                store
                    .append(HistoryEvent::new(
                        JobId(job),
                        kind,
                        status,
                        attempt,
                        1_000 + job,
                        detail.map(str::to_string),
                    ))
                    .unwrap();
            };
            record(3, HistoryEventKind::Submitted, JobStatus::Queued, 0, Some("say done"));
            record(3, HistoryEventKind::Started, JobStatus::Running, 1, None);
            record(3, HistoryEventKind::Succeeded, JobStatus::Succeeded, 1, Some("done"));
            record(7, HistoryEventKind::Submitted, JobStatus::Queued, 0, Some("say lost"));
            record(7, HistoryEventKind::Started, JobStatus::Running, 1, None);
        }

        let history = Arc::new(HistoryStore::open(&path, 64).unwrap());
        let runtime =
            CommandRuntime::new(Arc::new(EchoAdapter), history, fast_settings(3)).unwrap();

        let finished = runtime.get_job(JobId(3)).unwrap();
        assert_eq!(finished.status, JobStatus::Succeeded);
        assert_eq!(finished.stdout.as_deref(), Some("done"));
        assert_eq!(finished.command, "say done");

        let orphan = runtime.get_job(JobId(7)).unwrap();
        assert_eq!(orphan.status, JobStatus::Failed);
        assert_eq!(orphan.error.as_deref(), Some(INTERRUPTED_ERROR));
        assert_eq!(
            kinds(&runtime, JobId(7)).last(),
            Some(&HistoryEventKind::Failed)
        );

        let next = runtime.submit("say again").unwrap();
        assert_eq!(next, JobId(8));
    }

    #[tokio::test]
    async fn slow_command_does_not_hold_up_other_jobs() {
        let adapter = Arc::new(GatedAdapter::holding("fill ~ ~ ~ ~50 ~50 ~50 stone"));
        let runtime = runtime_with(adapter.clone(), 1);
        let options = SubmitOptions {
            retry: None,
            timeout: Some(Duration::from_secs(30)),
        };
        let held = runtime
            .submit_command("fill ~ ~ ~ ~50 ~50 ~50 stone", options)
            .unwrap();
        adapter.entered.notified().await;

        let quick = runtime.submit("say still responsive").unwrap();
        let quick_job = runtime.wait_for_terminal(quick, WAIT).await.unwrap();
        assert_eq!(quick_job.status, JobStatus::Succeeded);
        assert_eq!(
            runtime.get_job(held).unwrap().status,
            JobStatus::Running,
            "held job must still be in flight while the other one finished"
        );

        adapter.gate.notify_one();
        let held_job = runtime.wait_for_terminal(held, WAIT).await.unwrap();
        assert_eq!(held_job.status, JobStatus::Succeeded);
        assert_eq!(
            held_job.stdout.as_deref(),
            Some("done: fill ~ ~ ~ ~50 ~50 ~50 stone")
        );
    }

    #[tokio::test]
    async fn history_write_failure_leaves_job_intact() {
        let history = Arc::new(HistoryStore::with_writer(
            "/var/lib/mc/jobs.jsonl",
            BrokenDisk,
            64,
        ));
        let runtime =
            CommandRuntime::new(Arc::new(EchoAdapter), history, fast_settings(3)).unwrap();
        let id = runtime.submit("time set day").unwrap();
        let job = runtime.wait_for_terminal(id, WAIT).await.unwrap();

        assert_eq!(job.status, JobStatus::Succeeded);
        assert_eq!(job.attempt, 1);
        assert_eq!(job.stdout.as_deref(), Some("executed: time set day"));
        assert!(job.error.is_none());
        assert_eq!(runtime.get_job(id).unwrap(), job);
        assert_eq!(
            kinds(&runtime, id),
            vec![
                HistoryEventKind::Submitted,
                HistoryEventKind::Started,
                HistoryEventKind::Succeeded
            ]
        );
    }

    #[test]
    fn history_view_keeps_unfinished_jobs_open() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("history.jsonl");
        {
            let store = HistoryStore::open(&path, 64).unwrap();
            for (kind, status, attempt) in [
                (HistoryEventKind::Submitted, JobStatus::Queued, 0),
                (HistoryEventKind::Started, JobStatus::Running, 1),
            ] {
                let detail = (kind == HistoryEventKind::Submitted).then(|| "say busy".to_string());
                store
                    .append(HistoryEvent::new(JobId(4), kind, status, attempt, 2_000, detail))
                    .unwrap();
            }
        }
        let before = fs::read_to_string(&path).unwrap();

        let view = HistoryView::open(&path, 64, 3).unwrap();
        let job = view.get_job(JobId(4)).unwrap();
        assert_eq!(job.status, JobStatus::Running);
        assert_eq!(job.command, "say busy");
        assert!(job.error.is_none());
        assert_eq!(view.list_recent_jobs(5).unwrap(), vec![job]);
        assert_eq!(view.events_for(JobId(4)).len(), 2);
        assert!(matches!(
            view.get_job(JobId(5)),
            Err(RuntimeError::NotFound(_))
        ));
        assert_eq!(fs::read_to_string(&path).unwrap(), before, "view must not write");
    }
}
