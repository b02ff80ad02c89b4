use once_cell::sync::Lazy;
use regex::Regex;
use serde::Deserialize;
use thiserror::Error;

use mc_schema::SeedFacts;

/// Line patterns recognised in seed-cracker output.
///
/// Every pattern must expose the interesting value as capture group 1.
/// Patterns are plain regex strings so the grammar can be swapped through
/// configuration when the cracker changes its log format.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SeedLogGrammar {
    pub confirmed: Vec<String>,
    pub candidate: Vec<String>,
    pub metrics: Vec<MetricPattern>,
    pub missing: Vec<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct MetricPattern {
    pub name: String,
    pub pattern: String,
}

impl MetricPattern {
    fn new(name: &str, pattern: &str) -> Self {
        Self {
            name: name.to_string(),
            pattern: pattern.to_string(),
        }
    }
}

impl Default for SeedLogGrammar {
    fn default() -> Self {
        Self {
            confirmed: vec![
                r"(?i)\bcracked\s+seed\s*[:=]\s*(-?\d+)".to_string(),
                r"(?i)\bseed\s+(?:found|cracked)\s*[:=]\s*(-?\d+)".to_string(),
                r"(?i)\bworld\s+seed\s*[:=]\s*(-?\d+)".to_string(),
                r"(?i)^\W*seed\s*[:=]\s*(-?\d+)".to_string(),
            ],
            candidate: vec![
                r"(?i)\b(?:candidate|possible)\s+seed\s*[:=]\s*(-?\d+)".to_string(),
                r"(?i)\bseed\s+candidate\s*[:=]\s*(-?\d+)".to_string(),
            ],
            metrics: vec![
                MetricPattern::new(
                    "candidates",
                    r"(?i)\b(?:candidates?(?:\s+remaining)?|possible\s+seeds)\s*[:=]\s*(\d+(?:\.\d+)?)",
                ),
                MetricPattern::new(
                    "observations",
                    r"(?i)\b(?:observations?|pillars?|structures?)\s*[:=]\s*(\d+(?:\.\d+)?)",
                ),
                MetricPattern::new(
                    "chunks_scanned",
                    r"(?i)\bchunks?\s+scanned\s*[:=]\s*(\d+(?:\.\d+)?)",
                ),
            ],
            missing: vec![
                r"(?i)\bmissing\s*[:=]\s*(.+)".to_string(),
                r"(?i)\bstill\s+need\s*[:=]\s*(.+)".to_string(),
                r"(?i)\bnot\s+enough\s+data\s*[:=]\s*(.+)".to_string(),
            ],
        }
    }
}

#[derive(Debug, Error)]
pub enum GrammarError {
    #[error("invalid {section} pattern '{pattern}': {source}")]
    InvalidPattern {
        section: &'static str,
        pattern: String,
        #[source]
        source: regex::Error,
    },
    #[error("{section} pattern '{pattern}' has no capture group")]
    MissingCapture {
        section: &'static str,
        pattern: String,
    },
}

/// Compiled form of a [`SeedLogGrammar`].
#[derive(Debug, Clone)]
pub struct SeedStatusParser {
    confirmed: Vec<Regex>,
    candidate: Vec<Regex>,
    metrics: Vec<(String, Regex)>,
    missing: Vec<Regex>,
}

static DEFAULT_PARSER: Lazy<SeedStatusParser> = Lazy::new(|| {
    SeedStatusParser::new(&SeedLogGrammar::default())
        .expect("builtin seed log grammar should compile")
});

/// Parse seed-cracker output with the built-in grammar.
pub fn parse_seed_status(text: &str) -> SeedFacts {
    DEFAULT_PARSER.parse(text)
}

impl SeedStatusParser {
    pub fn new(grammar: &SeedLogGrammar) -> Result<Self, GrammarError> {
        let metrics = grammar
            .metrics
            .iter()
            .map(|metric| {
                compile("metrics", &metric.pattern).map(|regex| (metric.name.clone(), regex))
            })
            .collect::<Result<Vec<_>, GrammarError>>()?;
        Ok(Self {
            confirmed: compile_all("confirmed", &grammar.confirmed)?,
            candidate: compile_all("candidate", &grammar.candidate)?,
            metrics,
            missing: compile_all("missing", &grammar.missing)?,
        })
    }

    /// Fold `text` line by line into a [`SeedFacts`].
    ///
    /// Never fails: lines that match nothing, or whose captured value does not
    /// parse, are skipped.
    pub fn parse(&self, text: &str) -> SeedFacts {
        let mut facts = SeedFacts::unknown();
        for line in text.lines() {
            self.apply_line(line, &mut facts);
        }
        facts
    }

    fn apply_line(&self, line: &str, facts: &mut SeedFacts) {
        // Candidate patterns win on a line so "candidate seed: N" is never
        // mistaken for a bare "seed: N" confirmation.
        if let Some(seed) = first_capture(&self.candidate, line).and_then(parse_seed) {
            facts.record_candidate(seed);
        } else if let Some(seed) = first_capture(&self.confirmed, line).and_then(parse_seed) {
            facts.record_confirmed(seed);
        }

        for (name, pattern) in &self.metrics {
            let value = pattern
                .captures(line)
                .and_then(|caps| caps.get(1))
                .and_then(|m| m.as_str().parse::<f64>().ok());
            if let Some(value) = value {
                facts.record_progress(name.as_str(), value);
            }
        }

        if let Some(list) = first_capture(&self.missing, line) {
            for need in list.split(',') {
                let need = need.trim_matches(|c: char| c.is_whitespace() || c == '.');
                if !need.is_empty() {
                    facts.record_missing(need);
                }
            }
        }
    }
}

fn compile(section: &'static str, pattern: &str) -> Result<Regex, GrammarError> {
    let regex = Regex::new(pattern).map_err(|source| GrammarError::InvalidPattern {
        section,
        pattern: pattern.to_string(),
        source,
    })?;
    if regex.captures_len() < 2 {
        return Err(GrammarError::MissingCapture {
            section,
            pattern: pattern.to_string(),
        });
    }
    Ok(regex)
}

fn compile_all(section: &'static str, patterns: &[String]) -> Result<Vec<Regex>, GrammarError> {
    patterns
        .iter()
        .map(|pattern| compile(section, pattern))
        .collect()
}

fn first_capture<'a>(patterns: &[Regex], line: &'a str) -> Option<&'a str> {
    patterns
        .iter()
        .find_map(|pattern| pattern.captures(line).and_then(|caps| caps.get(1)))
        .map(|m| m.as_str())
}

fn parse_seed(value: &str) -> Option<i64> {
    value.parse::<i64>().ok()
}
