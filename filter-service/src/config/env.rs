//! Environment variable lookup.

use std::collections::HashMap;
use std::fmt::Display;
use std::str::FromStr;

use crate::{Error, Result};

/// Where configuration variables come from.
#[derive(Debug, Clone)]
pub enum EnvSource {
    /// The process environment.
    Process,
    /// A fixed map, for tests and embedding.
    Map(HashMap<String, String>),
}

impl EnvSource {
    pub fn process() -> Self {
        Self::Process
    }

    pub fn from_pairs<'a>(pairs: impl IntoIterator<Item = (&'a str, &'a str)>) -> Self {
        Self::Map(
            pairs
                .into_iter()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect(),
        )
    }

    /// Trimmed, non-empty value of a variable.
    pub fn string(&self, key: &str) -> Option<String> {
        let raw = match self {
            Self::Process => std::env::var(key).ok(),
            Self::Map(map) => map.get(key).cloned(),
        };
        raw.map(|v| v.trim().to_string()).filter(|v| !v.is_empty())
    }

    /// Parse a variable, using `default` when it is unset.
    pub fn parse<T>(&self, key: &str, default: T) -> Result<T>
    where
        T: FromStr,
        T::Err: Display,
    {
        match self.string(key) {
            None => Ok(default),
            Some(value) => value
                .parse()
                .map_err(|e| Error::config(format!("{key}='{value}' is invalid: {e}"))),
        }
    }

    /// Parse a boolean flag. Accepts true/false, 1/0, yes/no, on/off.
    pub fn flag(&self, key: &str, default: bool) -> Result<bool> {
        match self.string(key) {
            None => Ok(default),
            Some(value) => match value.to_ascii_lowercase().as_str() {
                "true" | "1" | "yes" | "on" => Ok(true),
                "false" | "0" | "no" | "off" => Ok(false),
                _ => Err(Error::config(format!(
                    "{key}='{value}' is invalid: expected a boolean"
                ))),
            },
        }
    }
}
