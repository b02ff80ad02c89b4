use std::{
    env, fs, io,
    path::{Path, PathBuf},
    sync::Arc,
    time::Duration,
};

use serde::Deserialize;
use thiserror::Error;

use mc_seed::{
    CubiomesCliLocator, DemoLocator, GrammarError, LocatorBackend, ProgressThreshold,
    QueryResolver, RequirementEngine, SeedLogGrammar, SeedStatusParser, StubLocator,
    DEFAULT_LOCATOR_TIMEOUT,
};

use crate::adapters::{EchoAdapter, GameCommandAdapter, TcpGameAdapter};
use crate::history::{HistoryError, HistoryStore};
use crate::runtime::{HistoryView, RetryPolicy, RuntimeSettings};
use crate::seed_log::SeedLogReader;

pub const BUILTIN_ASSISTANT_CONFIG: &str = include_str!("data/assistant_config.json");
pub const CONFIG_PATH_ENV: &str = "MC_ASSISTANT_CONFIG_PATH";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to parse assistant config: {0}")]
    Parse(#[from] serde_json::Error),
    #[error("failed to read assistant config from {path:?}: {source}")]
    ReadFailed {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("invalid assistant config: {0}")]
    Invalid(String),
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct AssistantConfig {
    runtime: RuntimeConfig,
    history: HistoryConfig,
    adapter: AdapterConfig,
    locator: LocatorConfig,
    seed: SeedConfig,
}

impl AssistantConfig {
    pub fn builtin() -> Arc<Self> {
        Arc::new(
            serde_json::from_str(BUILTIN_ASSISTANT_CONFIG)
                .expect("builtin assistant config should parse"),
        )
    }

    pub fn from_json_str(json: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(json)
    }

    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let contents = fs::read_to_string(path).map_err(|source| ConfigError::ReadFailed {
            path: path.to_path_buf(),
            source,
        })?;
        let config = AssistantConfig::from_json_str(&contents)?;
        Ok(config)
    }

    pub fn runtime(&self) -> &RuntimeConfig {
        &self.runtime
    }

    pub fn history(&self) -> &HistoryConfig {
        &self.history
    }

    pub fn adapter(&self) -> &AdapterConfig {
        &self.adapter
    }

    pub fn locator(&self) -> &LocatorConfig {
        &self.locator
    }

    pub fn seed(&self) -> &SeedConfig {
        &self.seed
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct RuntimeConfig {
    pub default_timeout_ms: u64,
    pub max_attempts: u32,
    pub base_delay_ms: u64,
    pub max_delay_ms: u64,
}

impl RuntimeConfig {
    pub fn settings(&self) -> RuntimeSettings {
        RuntimeSettings {
            retry: RetryPolicy {
                max_attempts: self.max_attempts,
                base_delay: Duration::from_millis(self.base_delay_ms),
                max_delay: Duration::from_millis(self.max_delay_ms),
            },
            default_timeout: Duration::from_millis(self.default_timeout_ms),
        }
    }
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            default_timeout_ms: 5_000,
            max_attempts: 3,
            base_delay_ms: 250,
            max_delay_ms: 5_000,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct HistoryConfig {
    pub capacity: usize,
    /// JSON Lines file; `None` keeps history in memory only.
    pub log_path: Option<PathBuf>,
}

impl HistoryConfig {
    pub fn open_store(&self) -> Result<HistoryStore, HistoryError> {
        match &self.log_path {
            Some(path) => HistoryStore::open(path, self.capacity),
            None => Ok(HistoryStore::in_memory(self.capacity)),
        }
    }

    /// Read-only replay of the configured log for inspection commands.
    pub fn open_view(&self, default_attempts: u32) -> Result<HistoryView, HistoryError> {
        match &self.log_path {
            Some(path) => HistoryView::open(path, self.capacity, default_attempts),
            None => Ok(HistoryView::from_store(
                HistoryStore::in_memory(self.capacity),
                default_attempts,
            )),
        }
    }
}

impl Default for HistoryConfig {
    fn default() -> Self {
        Self {
            capacity: 512,
            log_path: None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AdapterKind {
    Echo,
    Tcp,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct AdapterConfig {
    pub kind: AdapterKind,
    pub endpoint: String,
    pub command_prefix: String,
    pub connect_timeout_ms: u64,
}

impl AdapterConfig {
    pub fn build(&self) -> Arc<dyn GameCommandAdapter> {
        match self.kind {
            AdapterKind::Echo => Arc::new(EchoAdapter),
            AdapterKind::Tcp => Arc::new(
                TcpGameAdapter::new(self.endpoint.clone(), self.command_prefix.clone())
                    .with_connect_timeout(Duration::from_millis(self.connect_timeout_ms)),
            ),
        }
    }
}

impl Default for AdapterConfig {
    fn default() -> Self {
        Self {
            kind: AdapterKind::Echo,
            endpoint: "127.0.0.1:25575".to_string(),
            command_prefix: "/".to_string(),
            connect_timeout_ms: 2_000,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LocatorBackendKind {
    Stub,
    Demo,
    Cubiomes,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LocatorConfig {
    pub backend: LocatorBackendKind,
    pub cubiomes_bin: Option<PathBuf>,
    pub minecraft_version: String,
    /// Upper bound on one cubiomes run.
    pub timeout_ms: u64,
}

impl LocatorConfig {
    pub fn build(&self) -> Result<Box<dyn LocatorBackend>, ConfigError> {
        match self.backend {
            LocatorBackendKind::Stub => Ok(Box::new(StubLocator)),
            LocatorBackendKind::Demo => Ok(Box::new(DemoLocator)),
            LocatorBackendKind::Cubiomes => {
                let binary = self.cubiomes_bin.clone().ok_or_else(|| {
                    ConfigError::Invalid(
                        "locator.cubiomes_bin is required for the cubiomes backend".to_string(),
                    )
                })?;
                if self.timeout_ms == 0 {
                    return Err(ConfigError::Invalid(
                        "locator.timeout_ms must be greater than zero".to_string(),
                    ));
                }
                Ok(Box::new(
                    CubiomesCliLocator::new(binary, self.minecraft_version.clone())
                        .with_timeout(Duration::from_millis(self.timeout_ms)),
                ))
            }
        }
    }
}

impl Default for LocatorConfig {
    fn default() -> Self {
        Self {
            backend: LocatorBackendKind::Stub,
            cubiomes_bin: None,
            minecraft_version: mc_schema::DEFAULT_MINECRAFT_VERSION.to_string(),
            timeout_ms: DEFAULT_LOCATOR_TIMEOUT.as_millis() as u64,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SeedConfig {
    pub log_path: Option<PathBuf>,
    pub tail_lines: usize,
    pub grammar: SeedLogGrammar,
    pub thresholds: Vec<ProgressThreshold>,
}

impl SeedConfig {
    pub fn parser(&self) -> Result<SeedStatusParser, GrammarError> {
        SeedStatusParser::new(&self.grammar)
    }

    pub fn engine(&self) -> RequirementEngine {
        RequirementEngine::new(self.thresholds.clone())
    }

    pub fn resolver(&self) -> QueryResolver {
        QueryResolver::new(self.engine())
    }

    pub fn reader(&self) -> Option<SeedLogReader> {
        self.log_path.as_ref().map(SeedLogReader::new)
    }
}

impl Default for SeedConfig {
    fn default() -> Self {
        Self {
            log_path: None,
            tail_lines: 50,
            grammar: SeedLogGrammar::default(),
            thresholds: RequirementEngine::default().thresholds().to_vec(),
        }
    }
}

/// Load from `path` when given, else from the copy next to the crate sources,
/// falling back to the embedded config.
pub fn load_assistant_config(path: Option<PathBuf>) -> (Arc<AssistantConfig>, Option<PathBuf>) {
    let default_path =
        PathBuf::from(env!("CARGO_MANIFEST_DIR")).join("src/data/assistant_config.json");
    let candidate = path.unwrap_or(default_path);

    match AssistantConfig::from_file(&candidate) {
        Ok(config) => {
            tracing::info!(
                target: "mc_assist::config",
                path = %candidate.display(),
                "assistant_config.loaded=file"
            );
            return (Arc::new(config), Some(candidate));
        }
        Err(err) => {
            tracing::warn!(
                target: "mc_assist::config",
                path = %candidate.display(),
                error = %err,
                "assistant_config.load_failed"
            );
        }
    }

    let config = AssistantConfig::builtin();
    tracing::info!(
        target: "mc_assist::config",
        "assistant_config.loaded=builtin"
    );
    (config, None)
}

pub fn load_assistant_config_from_env() -> (Arc<AssistantConfig>, Option<PathBuf>) {
    let override_path = env::var(CONFIG_PATH_ENV).ok().map(PathBuf::from);
    load_assistant_config(override_path)
}

#[cfg(test)]
mod tests {
    use super::*;
    use mc_seed::ThresholdRule;

    #[test]
    fn builtin_matches_defaults() {
        let config = AssistantConfig::builtin();
        assert_eq!(config.runtime().settings(), RuntimeSettings::default());
        assert_eq!(config.history().capacity, 512);
        assert!(config.history().log_path.is_none());
        assert_eq!(config.adapter().kind, AdapterKind::Echo);
        assert_eq!(config.locator().backend, LocatorBackendKind::Stub);
        assert_eq!(config.locator().minecraft_version, "1.20.1");
        assert_eq!(config.locator().timeout_ms, 30_000);
        assert_eq!(config.seed().tail_lines, 50);
        assert_eq!(
            config.seed().engine(),
            RequirementEngine::default(),
            "builtin thresholds should match the engine defaults"
        );
    }

    #[test]
    fn partial_json_keeps_remaining_defaults() {
        let config = AssistantConfig::from_json_str(
            r#"{
                "runtime": { "max_attempts": 5 },
                "adapter": { "kind": "tcp", "endpoint": "10.0.0.2:4711" },
                "seed": { "thresholds": [ { "metric": "observations", "rule": { "at_least": 8 } } ] }
            }"#,
        )
        .unwrap();
        let settings = config.runtime().settings();
        assert_eq!(settings.retry.max_attempts, 5);
        assert_eq!(settings.default_timeout, Duration::from_secs(5));
        assert_eq!(config.adapter().build().name(), "tcp");
        assert_eq!(config.adapter().command_prefix, "/");
        let thresholds = config.seed().engine().thresholds().to_vec();
        assert_eq!(thresholds.len(), 1);
        assert_eq!(thresholds[0].rule, ThresholdRule::AtLeast(8.0));
    }

    #[test]
    fn grammar_override_is_compiled_lazily() {
        let config = AssistantConfig::from_json_str(
            r#"{ "seed": { "grammar": { "confirmed": ["(unclosed"] } } }"#,
        )
        .unwrap();
        assert!(matches!(
            config.seed().parser(),
            Err(GrammarError::InvalidPattern { .. })
        ));
    }

    #[test]
    fn cubiomes_backend_requires_binary() {
        let config =
            AssistantConfig::from_json_str(r#"{ "locator": { "backend": "cubiomes" } }"#).unwrap();
        assert!(matches!(
            config.locator().build(),
            Err(ConfigError::Invalid(_))
        ));

        let config = AssistantConfig::from_json_str(
            r#"{ "locator": { "backend": "cubiomes", "cubiomes_bin": "/opt/cubiomes/locate" } }"#,
        )
        .unwrap();
        assert_eq!(config.locator().build().unwrap().name(), "cubiomes-cli");

        let config = AssistantConfig::from_json_str(
            r#"{ "locator": { "backend": "cubiomes", "cubiomes_bin": "/opt/cubiomes/locate", "timeout_ms": 0 } }"#,
        )
        .unwrap();
        assert!(matches!(
            config.locator().build(),
            Err(ConfigError::Invalid(_))
        ));
    }

    #[test]
    fn unreadable_path_falls_back_to_builtin() {
        let dir = tempfile::tempdir().unwrap();
        let missing = dir.path().join("nope.json");
        assert!(matches!(
            AssistantConfig::from_file(&missing),
            Err(ConfigError::ReadFailed { .. })
        ));
        let (config, source) = load_assistant_config(Some(missing));
        assert!(source.is_none());
        assert_eq!(config.runtime().max_attempts, 3);
    }

    #[test]
    fn file_config_is_loaded_with_its_path() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("assistant.json");
        fs::write(&path, r#"{ "history": { "capacity": 16 } }"#).unwrap();
        let (config, source) = load_assistant_config(Some(path.clone()));
        assert_eq!(source, Some(path));
        assert_eq!(config.history().capacity, 16);
    }
}
