//! Data contracts shared by the assistant crates.
//!
//! Everything here is plain data: job snapshots and history events produced
//! by the command runtime, plus the seed facts and locator query types used
//! by the seed intelligence layer. Behaviour lives in `mc_core` and `mc_seed`.

mod jobs;
mod world;

pub use jobs::{CommandJob, HistoryEvent, HistoryEventKind, JobId, JobStatus};
pub use world::{
    Dimension, LocatorQuery, LocatorResult, PayloadError, QueryKind, SeedFacts,
    DEFAULT_MINECRAFT_VERSION,
};

use thiserror::Error;

/// Error returned when a textual enum value cannot be recognised.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("unknown {kind} '{value}'")]
pub struct UnknownVariant {
    pub kind: &'static str,
    pub value: String,
}

impl UnknownVariant {
    pub(crate) fn new(kind: &'static str, value: &str) -> Self {
        Self {
            kind,
            value: value.to_string(),
        }
    }
}
