use serde::Serialize;
use tracing::{debug, info, warn};

use mc_schema::{LocatorQuery, LocatorResult, SeedFacts};

use crate::locator::{LocatorBackend, LocatorError};
use crate::requirements::{Requirement, RequirementEngine};

/// Outcome of a locator query that did not fail.
///
/// `Missing` is a normal answer: the query cannot run yet and the list says why.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "outcome", content = "data", rename_all = "snake_case")]
pub enum Resolution {
    Located(LocatorResult),
    Missing(Vec<Requirement>),
}

impl Resolution {
    pub fn located(&self) -> Option<&LocatorResult> {
        match self {
            Resolution::Located(result) => Some(result),
            Resolution::Missing(_) => None,
        }
    }

    pub fn missing(&self) -> &[Requirement] {
        match self {
            Resolution::Located(_) => &[],
            Resolution::Missing(missing) => missing,
        }
    }
}

/// Answers nearest structure/biome queries once the seed is known.
#[derive(Debug, Clone, Default)]
pub struct QueryResolver {
    engine: RequirementEngine,
}

impl QueryResolver {
    pub fn new(engine: RequirementEngine) -> Self {
        Self { engine }
    }

    pub fn engine(&self) -> &RequirementEngine {
        &self.engine
    }

    /// Resolve `query` against `backend`.
    ///
    /// The backend is only called when no requirement is missing. Backend
    /// failures are returned as-is and never retried here.
    pub async fn resolve(
        &self,
        mut query: LocatorQuery,
        facts: &SeedFacts,
        backend: &dyn LocatorBackend,
    ) -> Result<Resolution, LocatorError> {
        let readiness = backend.readiness(query.kind);
        let missing = self.engine.missing_for(facts, query.kind, &readiness);
        if !missing.is_empty() {
            debug!(
                target: "mc_assist::resolver",
                kind = %query.kind,
                target_name = %query.target_name,
                missing = missing.len(),
                first = missing[0].code(),
                "query.short_circuit=missing_requirements"
            );
            return Ok(Resolution::Missing(missing));
        }

        let seed = match facts.seed() {
            Some(seed) if facts.is_cracked() => seed,
            _ => return Ok(Resolution::Missing(vec![Requirement::SeedNotCracked])),
        };
        query.seed = Some(seed);

        match backend.nearest(&query).await {
            Ok(result) => {
                info!(
                    target: "mc_assist::resolver",
                    backend = backend.name(),
                    kind = %query.kind,
                    target_name = %query.target_name,
                    x = result.x,
                    z = result.z,
                    distance = result.distance,
                    "query.located"
                );
                Ok(Resolution::Located(result))
            }
            Err(err) => {
                warn!(
                    target: "mc_assist::resolver",
                    backend = backend.name(),
                    error = %err,
                    "query.failed=locator_error"
                );
                Err(err)
            }
        }
    }
}
