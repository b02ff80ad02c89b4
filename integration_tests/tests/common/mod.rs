#![allow(dead_code)]

use std::path::PathBuf;
use std::sync::atomic::{AtomicU32, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, Once};

use async_trait::async_trait;
use tokio::sync::Notify;
use mc_core::{
    load_assistant_config_from_env, AdapterError, AssistantConfig, CommandRuntime,
    GameCommandAdapter, HistoryStore, CONFIG_PATH_ENV,
};
use mc_schema::{LocatorQuery, LocatorResult};
use mc_seed::{LocatorBackend, LocatorError};

static INIT: Once = Once::new();

/// Point the config loader at the fast test config once per test binary.
pub fn test_config() -> Arc<AssistantConfig> {
    INIT.call_once(|| {
        let config_path = PathBuf::from(env!("CARGO_MANIFEST_DIR"))
            .join("tests")
            .join("fixtures")
            .join("test_assistant_config.json");

        debug_assert!(
            config_path.exists(),
            "missing test assistant config at {}",
            config_path.display()
        );

        std::env::set_var(CONFIG_PATH_ENV, &config_path);
    });
    let (config, source) = load_assistant_config_from_env();
    assert!(source.is_some(), "test config should load from the fixture");
    config
}

pub fn runtime_with(adapter: Arc<dyn GameCommandAdapter>) -> CommandRuntime {
    runtime_with_history(adapter, Arc::new(HistoryStore::in_memory(256)))
}

pub fn runtime_with_history(
    adapter: Arc<dyn GameCommandAdapter>,
    history: Arc<HistoryStore>,
) -> CommandRuntime {
    let config = test_config();
    CommandRuntime::new(adapter, history, config.runtime().settings())
        .expect("runtime should build inside the test runtime")
}

/// Fails the first `failures` calls, then succeeds.
pub struct FlakyAdapter {
    failures: u32,
    calls: AtomicU32,
}

impl FlakyAdapter {
    pub fn new(failures: u32) -> Self {
        Self {
            failures,
            calls: AtomicU32::new(0),
        }
    }

    pub fn calls(&self) -> u32 {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl GameCommandAdapter for FlakyAdapter {
    fn name(&self) -> &str {
        "flaky"
    }

    async fn execute(&self, command: &str) -> Result<String, AdapterError> {
        let call = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
        if call <= self.failures {
            return Err(AdapterError::Rejected(format!("bridge busy (call {call})")));
        }
        Ok(format!("ran {command}"))
    }
}

/// Blocks every command until `release` is called.
#[derive(Default)]
pub struct GatedAdapter {
    entered: Notify,
    gate: Notify,
}

impl GatedAdapter {
    /// Resolves once a command is waiting on the gate.
    pub async fn entered(&self) {
        self.entered.notified().await;
    }

    pub fn release(&self) {
        self.gate.notify_one();
    }
}

#[async_trait]
impl GameCommandAdapter for GatedAdapter {
    fn name(&self) -> &str {
        "gated"
    }

    async fn execute(&self, command: &str) -> Result<String, AdapterError> {
        self.entered.notify_one();
        self.gate.notified().await;
        Ok(format!("ran {command}"))
    }
}

/// Backend that answers with a fixed payload and records what it was asked.
pub struct RecordingBackend {
    payload: serde_json::Value,
    calls: AtomicUsize,
    last: Mutex<Option<LocatorQuery>>,
}

impl RecordingBackend {
    pub fn answering(payload: serde_json::Value) -> Self {
        Self {
            payload,
            calls: AtomicUsize::new(0),
            last: Mutex::new(None),
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn last_query(&self) -> Option<LocatorQuery> {
        self.last.lock().expect("recording mutex poisoned").clone()
    }
}

#[async_trait]
impl LocatorBackend for RecordingBackend {
    fn name(&self) -> &str {
        "recording"
    }

    async fn nearest(&self, query: &LocatorQuery) -> Result<LocatorResult, LocatorError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        *self.last.lock().expect("recording mutex poisoned") = Some(query.clone());
        LocatorResult::from_payload(
            self.payload.clone(),
            (query.origin_x, query.origin_z),
            self.name(),
        )
        .map_err(|source| LocatorError::Payload {
            source,
            raw: self.payload.to_string(),
        })
    }
}
