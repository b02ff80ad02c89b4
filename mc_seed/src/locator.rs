use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;
use tokio::process::Command;
use tracing::{debug, warn};

use mc_schema::{Dimension, LocatorQuery, LocatorResult, PayloadError, QueryKind};

use crate::requirements::BackendReadiness;

/// Failure reported by a locator backend.
///
/// Variants carry whatever raw diagnostic the backend produced (stderr, the
/// unparsed stdout) so callers can show it verbatim.
#[derive(Debug, Error)]
pub enum LocatorError {
    #[error("locator query has no resolved seed")]
    SeedUnresolved,
    #[error("locator backend '{backend}' cannot answer: {reason}")]
    Unsupported { backend: String, reason: String },
    #[error("failed to launch locator {binary:?}: {source}")]
    Spawn {
        binary: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("locator {binary:?} did not answer within {after_ms}ms")]
    TimedOut { binary: PathBuf, after_ms: u64 },
    #[error("locator exited with {status}: {stderr}")]
    Exit { status: String, stderr: String },
    #[error("locator printed malformed JSON: {source}")]
    MalformedJson {
        #[source]
        source: serde_json::Error,
        raw: String,
    },
    #[error("locator output rejected: {source}")]
    Payload {
        #[source]
        source: PayloadError,
        raw: String,
    },
}

impl LocatorError {
    /// Raw backend output attached to the failure, if any.
    pub fn diagnostic(&self) -> Option<&str> {
        match self {
            LocatorError::Exit { stderr, .. } => Some(stderr),
            LocatorError::MalformedJson { raw, .. } | LocatorError::Payload { raw, .. } => Some(raw),
            _ => None,
        }
    }
}

/// Computes nearest structure or biome coordinates for a resolved seed.
#[async_trait]
pub trait LocatorBackend: Send + Sync {
    fn name(&self) -> &str;

    fn readiness(&self, _kind: QueryKind) -> BackendReadiness {
        BackendReadiness::Ready
    }

    async fn nearest(&self, query: &LocatorQuery) -> Result<LocatorResult, LocatorError>;
}

/// Placeholder used until a real backend is configured.
#[derive(Debug, Default, Clone)]
pub struct StubLocator;

const STUB_REASON: &str = "no locator backend configured; select demo or cubiomes";

#[async_trait]
impl LocatorBackend for StubLocator {
    fn name(&self) -> &str {
        "stub"
    }

    fn readiness(&self, _kind: QueryKind) -> BackendReadiness {
        BackendReadiness::unavailable(self.name(), STUB_REASON)
    }

    async fn nearest(&self, _query: &LocatorQuery) -> Result<LocatorResult, LocatorError> {
        Err(LocatorError::Unsupported {
            backend: self.name().to_string(),
            reason: STUB_REASON.to_string(),
        })
    }
}

/// Deterministic locator for demos. Coordinates are derived from the seed
/// arithmetically and bear no relation to real world generation.
#[derive(Debug, Default, Clone)]
pub struct DemoLocator;

#[async_trait]
impl LocatorBackend for DemoLocator {
    fn name(&self) -> &str {
        "demo"
    }

    async fn nearest(&self, query: &LocatorQuery) -> Result<LocatorResult, LocatorError> {
        let seed = query.seed.ok_or(LocatorError::SeedUnresolved)?;
        let (x, z) = match query.kind {
            QueryKind::Structure => {
                if !query.target_name.eq_ignore_ascii_case("village")
                    || query.dimension != Dimension::Overworld
                {
                    return Err(LocatorError::Unsupported {
                        backend: self.name().to_string(),
                        reason: format!(
                            "demo only knows overworld villages, not {} in the {}",
                            query.target_name, query.dimension
                        ),
                    });
                }
                (
                    seed.rem_euclid(4000) - 2000,
                    seed.div_euclid(7).rem_euclid(4000) - 2000,
                )
            }
            QueryKind::Biome => (
                seed.rem_euclid(8000) - 4000,
                seed.div_euclid(13).rem_euclid(8000) - 4000,
            ),
        };
        let mut result = LocatorResult::new(x, z, (query.origin_x, query.origin_z), self.name());
        result.extra.insert(
            "warning".to_string(),
            "demo locator only; coordinates are not real".into(),
        );
        Ok(result)
    }
}

/// Locator backed by an external cubiomes-compatible CLI.
///
/// The binary is invoked as
/// `<bin> nearest-structure|nearest-biome --seed S --structure|--biome NAME
/// --x X --z Z --dimension D --version V --json` and must print a JSON object
/// with at least numeric `x` and `z`. A run that outlives the timeout is
/// killed.
#[derive(Debug, Clone)]
pub struct CubiomesCliLocator {
    binary: PathBuf,
    minecraft_version: String,
    timeout: Duration,
}

pub const DEFAULT_LOCATOR_TIMEOUT: Duration = Duration::from_secs(30);

impl CubiomesCliLocator {
    pub fn new(binary: impl Into<PathBuf>, minecraft_version: impl Into<String>) -> Self {
        Self {
            binary: binary.into(),
            minecraft_version: minecraft_version.into(),
            timeout: DEFAULT_LOCATOR_TIMEOUT,
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn binary(&self) -> &Path {
        &self.binary
    }

    /// A query pinned to a version wins over the backend default.
    fn version_for<'a>(&'a self, query: &'a LocatorQuery) -> &'a str {
        if query.minecraft_version.is_empty() {
            &self.minecraft_version
        } else {
            &query.minecraft_version
        }
    }

    fn arguments(&self, query: &LocatorQuery, seed: i64) -> Vec<String> {
        let (mode, target_flag) = match query.kind {
            QueryKind::Structure => ("nearest-structure", "--structure"),
            QueryKind::Biome => ("nearest-biome", "--biome"),
        };
        vec![
            mode.to_string(),
            "--seed".to_string(),
            seed.to_string(),
            target_flag.to_string(),
            query.target_name.clone(),
            "--x".to_string(),
            query.origin_x.to_string(),
            "--z".to_string(),
            query.origin_z.to_string(),
            "--dimension".to_string(),
            query.dimension.to_string(),
            "--version".to_string(),
            self.version_for(query).to_string(),
            "--json".to_string(),
        ]
    }
}

#[async_trait]
impl LocatorBackend for CubiomesCliLocator {
    fn name(&self) -> &str {
        "cubiomes-cli"
    }

    fn readiness(&self, _kind: QueryKind) -> BackendReadiness {
        if self.binary.as_os_str().is_empty() {
            return BackendReadiness::unavailable(self.name(), "locator binary path is empty");
        }
        BackendReadiness::Ready
    }

    async fn nearest(&self, query: &LocatorQuery) -> Result<LocatorResult, LocatorError> {
        let seed = query.seed.ok_or(LocatorError::SeedUnresolved)?;
        let args = self.arguments(query, seed);
        debug!(
            target: "mc_assist::locator",
            binary = %self.binary.display(),
            ?args,
            "locator.invoke"
        );

        let mut command = Command::new(&self.binary);
        command.args(&args).stdin(Stdio::null()).kill_on_drop(true);
        // Dropping the timed-out future drops the child, which kills it.
        let output = match tokio::time::timeout(self.timeout, command.output()).await {
            Ok(output) => output.map_err(|source| LocatorError::Spawn {
                binary: self.binary.clone(),
                source,
            })?,
            Err(_) => {
                let after_ms = self.timeout.as_millis() as u64;
                warn!(
                    target: "mc_assist::locator",
                    binary = %self.binary.display(),
                    after_ms,
                    "locator.failed=timed_out"
                );
                return Err(LocatorError::TimedOut {
                    binary: self.binary.clone(),
                    after_ms,
                });
            }
        };

        let stdout = String::from_utf8_lossy(&output.stdout).into_owned();
        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
            warn!(
                target: "mc_assist::locator",
                status = %output.status,
                %stderr,
                "locator.failed=exit_status"
            );
            return Err(LocatorError::Exit {
                status: output.status.to_string(),
                stderr,
            });
        }

        let payload: serde_json::Value = serde_json::from_str(stdout.trim())
            .map_err(|source| LocatorError::MalformedJson {
                source,
                raw: stdout.clone(),
            })?;
        let mut result =
            LocatorResult::from_payload(payload, (query.origin_x, query.origin_z), self.name())
                .map_err(|source| LocatorError::Payload {
                    source,
                    raw: stdout.clone(),
                })?;
        result
            .extra
            .entry("version")
            .or_insert_with(|| self.version_for(query).into());
        Ok(result)
    }
}
