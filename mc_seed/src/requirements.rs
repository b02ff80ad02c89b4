use std::fmt;

use serde::{Deserialize, Serialize};

use mc_schema::{QueryKind, SeedFacts};

/// Whether a locator backend can serve a given query kind right now.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BackendReadiness {
    Ready,
    Unavailable { backend: String, reason: String },
}

impl BackendReadiness {
    pub fn unavailable(backend: impl Into<String>, reason: impl Into<String>) -> Self {
        BackendReadiness::Unavailable {
            backend: backend.into(),
            reason: reason.into(),
        }
    }

    pub fn is_ready(&self) -> bool {
        matches!(self, BackendReadiness::Ready)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ThresholdRule {
    AtLeast(f64),
    AtMost(f64),
}

impl ThresholdRule {
    pub fn is_met(self, value: f64) -> bool {
        match self {
            ThresholdRule::AtLeast(bound) => value >= bound,
            ThresholdRule::AtMost(bound) => value <= bound,
        }
    }
}

impl fmt::Display for ThresholdRule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ThresholdRule::AtLeast(bound) => write!(f, "at least {bound}"),
            ThresholdRule::AtMost(bound) => write!(f, "at most {bound}"),
        }
    }
}

/// A progress metric that must reach a bound before the cracker output is
/// considered good enough.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProgressThreshold {
    pub metric: String,
    pub rule: ThresholdRule,
    /// Restrict the threshold to one query kind; `None` applies to both.
    #[serde(default)]
    pub applies_to: Option<QueryKind>,
}

impl ProgressThreshold {
    pub fn new(metric: impl Into<String>, rule: ThresholdRule) -> Self {
        Self {
            metric: metric.into(),
            rule,
            applies_to: None,
        }
    }

    fn applies(&self, kind: QueryKind) -> bool {
        self.applies_to.map_or(true, |only| only == kind)
    }
}

/// One unmet precondition for answering a locator query.
///
/// Variants are declared in priority order: seed presence, then backend
/// configuration, then progress quality.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "requirement", rename_all = "snake_case")]
pub enum Requirement {
    SeedNotCracked,
    SeedUnconfirmed {
        candidate: i64,
    },
    LocatorUnavailable {
        backend: String,
        reason: String,
    },
    ProgressBelowThreshold {
        metric: String,
        current: Option<f64>,
        required: ThresholdRule,
    },
    ReportedByCracker {
        need: String,
    },
}

impl Requirement {
    /// Stable machine-readable identifier.
    pub fn code(&self) -> &'static str {
        match self {
            Requirement::SeedNotCracked => "seed_not_cracked",
            Requirement::SeedUnconfirmed { .. } => "seed_unconfirmed",
            Requirement::LocatorUnavailable { .. } => "locator_unavailable",
            Requirement::ProgressBelowThreshold { .. } => "progress_below_threshold",
            Requirement::ReportedByCracker { .. } => "reported_by_cracker",
        }
    }

    pub fn priority(&self) -> u8 {
        match self {
            Requirement::SeedNotCracked | Requirement::SeedUnconfirmed { .. } => 0,
            Requirement::LocatorUnavailable { .. } => 1,
            Requirement::ProgressBelowThreshold { .. } | Requirement::ReportedByCracker { .. } => 2,
        }
    }
}

impl fmt::Display for Requirement {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Requirement::SeedNotCracked => f.write_str("seed not cracked yet"),
            Requirement::SeedUnconfirmed { candidate } => {
                write!(f, "seed {candidate} is a candidate, not confirmed")
            }
            Requirement::LocatorUnavailable { backend, reason } => {
                write!(f, "locator backend '{backend}' unavailable: {reason}")
            }
            Requirement::ProgressBelowThreshold {
                metric,
                current: Some(current),
                required,
            } => write!(f, "{metric} is {current}, needs {required}"),
            Requirement::ProgressBelowThreshold {
                metric,
                current: None,
                required,
            } => write!(f, "{metric} not reported yet, needs {required}"),
            Requirement::ReportedByCracker { need } => write!(f, "seed cracker still needs {need}"),
        }
    }
}

/// Computes the ordered list of requirements blocking a locator query.
#[derive(Debug, Clone, PartialEq)]
pub struct RequirementEngine {
    thresholds: Vec<ProgressThreshold>,
}

impl Default for RequirementEngine {
    fn default() -> Self {
        Self {
            thresholds: vec![
                ProgressThreshold::new("observations", ThresholdRule::AtLeast(5.0)),
                ProgressThreshold::new("candidates", ThresholdRule::AtMost(1.0)),
            ],
        }
    }
}

/// [`RequirementEngine::missing_for`] with the default thresholds and a ready backend.
pub fn missing_for(facts: &SeedFacts, kind: QueryKind) -> Vec<Requirement> {
    RequirementEngine::default().missing_for(facts, kind, &BackendReadiness::Ready)
}

impl RequirementEngine {
    pub fn new(thresholds: Vec<ProgressThreshold>) -> Self {
        Self { thresholds }
    }

    pub fn thresholds(&self) -> &[ProgressThreshold] {
        &self.thresholds
    }

    /// An empty result means the query may proceed.
    pub fn missing_for(
        &self,
        facts: &SeedFacts,
        kind: QueryKind,
        backend: &BackendReadiness,
    ) -> Vec<Requirement> {
        let mut missing = Vec::new();

        match (facts.seed(), facts.is_cracked()) {
            (None, _) => missing.push(Requirement::SeedNotCracked),
            (Some(candidate), false) => missing.push(Requirement::SeedUnconfirmed { candidate }),
            (Some(_), true) => {}
        }

        if let BackendReadiness::Unavailable { backend, reason } = backend {
            missing.push(Requirement::LocatorUnavailable {
                backend: backend.clone(),
                reason: reason.clone(),
            });
        }

        // Progress only matters while the cracker is still working.
        if !facts.is_cracked() {
            for threshold in self.thresholds.iter().filter(|t| t.applies(kind)) {
                let current = facts.progress(&threshold.metric);
                if current.map_or(true, |value| !threshold.rule.is_met(value)) {
                    missing.push(Requirement::ProgressBelowThreshold {
                        metric: threshold.metric.clone(),
                        current,
                        required: threshold.rule,
                    });
                }
            }
            missing.extend(
                facts
                    .reported_missing()
                    .iter()
                    .map(|need| Requirement::ReportedByCracker { need: need.clone() }),
            );
        }

        missing
    }
}
