//! Parsing of client-supplied filter chains.
//!
//! Accepted shapes, as a JSON array:
//!
//! ```json
//! ["grayscale", {"type": "blur", "value": 2}, {"kind": "brightness", "value": "-20"}]
//! ```
//!
//! Everything is validated here so that no invalid step ever reaches a job.

use serde::Deserialize;

use super::types::{FilterKind, FilterStep};
use crate::{Error, Result};

/// Upper bound on the number of steps in one job.
pub const MAX_FILTER_STEPS: usize = 32;

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum RawEntry {
    Name(String),
    Step(RawFilterStep),
}

#[derive(Debug, Deserialize)]
struct RawFilterStep {
    #[serde(alias = "type")]
    kind: String,
    #[serde(default)]
    value: Option<serde_json::Value>,
}

fn parse_kind(index: usize, name: &str) -> Result<FilterKind> {
    name.trim()
        .parse::<FilterKind>()
        .map_err(|_| Error::validation(format!("filters[{index}]: unknown filter kind '{name}'")))
}

fn parse_value(index: usize, value: Option<serde_json::Value>) -> Result<Option<f64>> {
    match value {
        None | Some(serde_json::Value::Null) => Ok(None),
        Some(serde_json::Value::Number(n)) => n
            .as_f64()
            .map(Some)
            .ok_or_else(|| Error::validation(format!("filters[{index}]: value out of range"))),
        Some(serde_json::Value::String(s)) if s.trim().is_empty() => Ok(None),
        Some(serde_json::Value::String(s)) => s.trim().parse::<f64>().map(Some).map_err(|_| {
            Error::validation(format!("filters[{index}]: value '{s}' is not numeric"))
        }),
        Some(other) => Err(Error::validation(format!(
            "filters[{index}]: value must be a number, got {other}"
        ))),
    }
}

/// Parse and validate a JSON filter chain.
pub fn parse_filter_steps(json: &str) -> Result<Vec<FilterStep>> {
    let entries: Vec<RawEntry> = serde_json::from_str(json)
        .map_err(|e| Error::validation(format!("filters must be a JSON array: {e}")))?;

    if entries.is_empty() {
        return Err(Error::validation("at least one filter step is required"));
    }
    if entries.len() > MAX_FILTER_STEPS {
        return Err(Error::validation(format!(
            "too many filter steps: {} (max {MAX_FILTER_STEPS})",
            entries.len()
        )));
    }

    entries
        .into_iter()
        .enumerate()
        .map(|(index, entry)| {
            let (kind, value) = match entry {
                RawEntry::Name(name) => (parse_kind(index, &name)?, None),
                RawEntry::Step(step) => (
                    parse_kind(index, &step.kind)?,
                    parse_value(index, step.value)?,
                ),
            };
            FilterStep::new(kind, value).map_err(|e| match e {
                Error::Validation(msg) => Error::validation(format!("filters[{index}]: {msg}")),
                other => other,
            })
        })
        .collect()
}
