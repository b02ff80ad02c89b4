use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::UnknownVariant;

pub const DEFAULT_MINECRAFT_VERSION: &str = "1.20.1";

/// What the seed cracker has established so far.
///
/// A seed may be known as a candidate before it is confirmed; only a confirmed
/// seed counts as cracked. The constructors keep `cracked` from ever being set
/// without a seed.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct SeedFacts {
    seed: Option<i64>,
    cracked: bool,
    progress_fields: BTreeMap<String, f64>,
    reported_missing: Vec<String>,
}

impl SeedFacts {
    pub fn unknown() -> Self {
        Self::default()
    }

    pub fn candidate(seed: i64) -> Self {
        Self {
            seed: Some(seed),
            ..Self::default()
        }
    }

    pub fn confirmed(seed: i64) -> Self {
        Self {
            seed: Some(seed),
            cracked: true,
            ..Self::default()
        }
    }

    pub fn with_progress(mut self, metric: impl Into<String>, value: f64) -> Self {
        self.record_progress(metric, value);
        self
    }

    pub fn seed(&self) -> Option<i64> {
        self.seed
    }

    pub fn is_cracked(&self) -> bool {
        self.cracked
    }

    pub fn is_candidate(&self) -> bool {
        self.seed.is_some() && !self.cracked
    }

    pub fn progress(&self, metric: &str) -> Option<f64> {
        self.progress_fields.get(metric).copied()
    }

    pub fn progress_fields(&self) -> &BTreeMap<String, f64> {
        &self.progress_fields
    }

    pub fn reported_missing(&self) -> &[String] {
        &self.reported_missing
    }

    /// Record an unconfirmed seed. Ignored once a seed has been confirmed.
    pub fn record_candidate(&mut self, seed: i64) {
        if !self.cracked {
            self.seed = Some(seed);
        }
    }

    pub fn record_confirmed(&mut self, seed: i64) {
        self.seed = Some(seed);
        self.cracked = true;
    }

    pub fn record_progress(&mut self, metric: impl Into<String>, value: f64) {
        self.progress_fields.insert(metric.into(), value);
    }

    pub fn record_missing(&mut self, need: impl Into<String>) {
        let need = need.into();
        if !self.reported_missing.contains(&need) {
            self.reported_missing.push(need);
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QueryKind {
    Structure,
    Biome,
}

impl QueryKind {
    pub fn as_str(self) -> &'static str {
        match self {
            QueryKind::Structure => "structure",
            QueryKind::Biome => "biome",
        }
    }
}

impl fmt::Display for QueryKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for QueryKind {
    type Err = UnknownVariant;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "structure" => Ok(QueryKind::Structure),
            "biome" => Ok(QueryKind::Biome),
            _ => Err(UnknownVariant::new("query kind", value)),
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Dimension {
    Overworld,
    Nether,
    End,
}

impl Dimension {
    pub fn as_str(self) -> &'static str {
        match self {
            Dimension::Overworld => "overworld",
            Dimension::Nether => "nether",
            Dimension::End => "end",
        }
    }
}

impl fmt::Display for Dimension {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Dimension {
    type Err = UnknownVariant;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "overworld" | "minecraft:overworld" => Ok(Dimension::Overworld),
            "nether" | "the_nether" | "minecraft:the_nether" => Ok(Dimension::Nether),
            "end" | "the_end" | "minecraft:the_end" => Ok(Dimension::End),
            _ => Err(UnknownVariant::new("dimension", value)),
        }
    }
}

/// A nearest-structure or nearest-biome request.
///
/// `seed` stays `None` until the resolver fills it from confirmed seed facts.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LocatorQuery {
    pub kind: QueryKind,
    pub target_name: String,
    pub origin_x: i64,
    pub origin_z: i64,
    pub dimension: Dimension,
    pub seed: Option<i64>,
    pub minecraft_version: String,
}

impl LocatorQuery {
    pub fn new(
        kind: QueryKind,
        target_name: impl Into<String>,
        origin_x: i64,
        origin_z: i64,
        dimension: Dimension,
    ) -> Self {
        Self {
            kind,
            target_name: target_name.into(),
            origin_x,
            origin_z,
            dimension,
            seed: None,
            minecraft_version: DEFAULT_MINECRAFT_VERSION.to_string(),
        }
    }

    pub fn structure(
        target_name: impl Into<String>,
        origin_x: i64,
        origin_z: i64,
        dimension: Dimension,
    ) -> Self {
        Self::new(QueryKind::Structure, target_name, origin_x, origin_z, dimension)
    }

    pub fn biome(
        target_name: impl Into<String>,
        origin_x: i64,
        origin_z: i64,
        dimension: Dimension,
    ) -> Self {
        Self::new(QueryKind::Biome, target_name, origin_x, origin_z, dimension)
    }

    pub fn with_version(mut self, version: impl Into<String>) -> Self {
        self.minecraft_version = version.into();
        self
    }

    pub fn with_seed(mut self, seed: i64) -> Self {
        self.seed = Some(seed);
        self
    }
}

/// Error returned when a backend payload lacks usable coordinates.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PayloadError {
    #[error("locator payload is not a JSON object")]
    NotAnObject,
    #[error("locator payload missing field '{0}'")]
    MissingField(&'static str),
    #[error("locator payload field '{0}' is not numeric")]
    NonNumeric(&'static str),
    #[error("locator payload field '{0}' is not a whole block coordinate in range")]
    OutOfRange(&'static str),
}

/// Nearest match reported by a locator backend.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LocatorResult {
    pub x: i64,
    pub z: i64,
    pub distance: f64,
    pub source: String,
    #[serde(default, skip_serializing_if = "serde_json::Map::is_empty")]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

impl LocatorResult {
    pub fn new(x: i64, z: i64, origin: (i64, i64), source: impl Into<String>) -> Self {
        Self {
            x,
            z,
            distance: planar_distance(origin, (x, z)),
            source: source.into(),
            extra: serde_json::Map::new(),
        }
    }

    /// Build a result from a backend JSON object. `x` and `z` are required;
    /// every other field is kept in `extra`.
    pub fn from_payload(
        payload: serde_json::Value,
        origin: (i64, i64),
        source: impl Into<String>,
    ) -> Result<Self, PayloadError> {
        let serde_json::Value::Object(mut fields) = payload else {
            return Err(PayloadError::NotAnObject);
        };
        let x = take_coordinate(&mut fields, "x")?;
        let z = take_coordinate(&mut fields, "z")?;
        let mut result = Self::new(x, z, origin, source);
        result.extra = fields;
        Ok(result)
    }
}

fn take_coordinate(
    fields: &mut serde_json::Map<String, serde_json::Value>,
    name: &'static str,
) -> Result<i64, PayloadError> {
    // 2^63, the first float past i64::MAX.
    const I64_BOUND: f64 = 9_223_372_036_854_775_808.0;

    let value = fields.remove(name).ok_or(PayloadError::MissingField(name))?;
    if let Some(coordinate) = value.as_i64() {
        return Ok(coordinate);
    }
    let float = value.as_f64().ok_or(PayloadError::NonNumeric(name))?;
    if !float.is_finite() || float.fract() != 0.0 || float < -I64_BOUND || float >= I64_BOUND {
        return Err(PayloadError::OutOfRange(name));
    }
    Ok(float as i64)
}

// Subtracting in f64 keeps extreme coordinates from overflowing.
fn planar_distance(from: (i64, i64), to: (i64, i64)) -> f64 {
    let dx = to.0 as f64 - from.0 as f64;
    let dz = to.1 as f64 - from.1 as f64;
    dx.hypot(dz)
}
