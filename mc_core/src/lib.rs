//! Command job runtime for the assistant.
//!
//! Commands submitted through [`CommandRuntime`] run on spawned tokio tasks
//! against a [`GameCommandAdapter`], with bounded retries, per-attempt
//! timeouts and an append-only [`HistoryStore`]. Configuration loading and
//! the seed log reader live here too so binaries only need this crate and
//! `mc_seed`.

pub mod adapters;
pub mod config;
pub mod history;
pub mod runtime;
pub mod seed_log;
pub mod telemetry;

pub use mc_schema::{CommandJob, HistoryEvent, HistoryEventKind, JobId, JobStatus};

pub use adapters::{AdapterError, EchoAdapter, GameCommandAdapter, TcpGameAdapter};
pub use config::{
    load_assistant_config, load_assistant_config_from_env, AdapterConfig, AdapterKind,
    AssistantConfig, ConfigError, HistoryConfig, LocatorBackendKind, LocatorConfig,
    RuntimeConfig, SeedConfig, BUILTIN_ASSISTANT_CONFIG, CONFIG_PATH_ENV,
};
pub use history::{HistoryError, HistoryStore};
pub use runtime::{
    CommandRuntime, CommandRuntimeBuilder, HistoryView, RetryPolicy, RuntimeError,
    RuntimeSettings, SubmitOptions, INTERRUPTED_ERROR,
};
pub use seed_log::{SeedLogError, SeedLogReader};
pub use telemetry::{ChannelTelemetry, TelemetryEvent, TelemetrySink, TracingTelemetry};
