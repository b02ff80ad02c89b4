//! Seed intelligence for the assistant.
//!
//! This crate turns seed-cracker progress logs into [`SeedFacts`], explains
//! which requirements still block a locator query, and answers nearest
//! structure/biome queries through a pluggable [`LocatorBackend`]. It has no
//! dependency on the command runtime in `mc_core`.

pub mod locator;
pub mod requirements;
pub mod resolver;
pub mod seed_status;

pub use mc_schema::{Dimension, LocatorQuery, LocatorResult, QueryKind, SeedFacts};

pub use locator::{
    CubiomesCliLocator, DemoLocator, LocatorBackend, LocatorError, StubLocator,
    DEFAULT_LOCATOR_TIMEOUT,
};
pub use requirements::{
    missing_for, BackendReadiness, ProgressThreshold, Requirement, RequirementEngine,
    ThresholdRule,
};
pub use resolver::{QueryResolver, Resolution};
pub use seed_status::{
    parse_seed_status, GrammarError, MetricPattern, SeedLogGrammar, SeedStatusParser,
};
