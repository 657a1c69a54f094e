//! Shared deterministic types for the session loop.
//!
//! These types define the contracts between the loop and its collaborators.
//! They carry no I/O and must stay deterministic across runs.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;

/// Which agent the next session runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Mode {
    /// First-run setup: the agent creates the feature checklist.
    Bootstrap,
    /// Ongoing feature work against an existing checklist.
    Incremental,
}

impl Mode {
    /// Mode a fresh run starts in, given whether the checklist has any records.
    pub fn initial(checklist_populated: bool) -> Self {
        if checklist_populated {
            Mode::Incremental
        } else {
            Mode::Bootstrap
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Mode::Bootstrap => "bootstrap",
            Mode::Incremental => "incremental",
        }
    }

    /// Name of the agent role run in this mode.
    pub fn agent_label(self) -> &'static str {
        match self {
            Mode::Bootstrap => "initializer",
            Mode::Incremental => "coding",
        }
    }
}

impl fmt::Display for Mode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// How the loop decides it is done.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RunMode {
    /// Stop after the first session.
    #[default]
    Demo,
    /// Keep going until every feature passes (or the bound is hit).
    Production,
}

impl RunMode {
    pub fn as_str(self) -> &'static str {
        match self {
            RunMode::Demo => "demo",
            RunMode::Production => "production",
        }
    }
}

impl fmt::Display for RunMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for RunMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "demo" => Ok(RunMode::Demo),
            "production" => Ok(RunMode::Production),
            other => Err(format!(
                "unknown run mode '{other}' (expected 'demo' or 'production')"
            )),
        }
    }
}

/// One persisted feature-test entry.
///
/// Only `passes` drives the loop. Everything else the agent writes is
/// ignored, so a record never fails to load: identifiers of any JSON type are
/// kept as text and a `passes` that is not `true` counts as not passing.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct FeatureRecord {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub identifier: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    pub passes: bool,
}

impl FeatureRecord {
    /// Read a record out of whatever JSON value the agent wrote.
    pub fn from_value(value: &Value) -> Self {
        Self {
            identifier: text_field(value, &["identifier", "id"]),
            description: text_field(value, &["description", "name"]),
            passes: value.get("passes").and_then(Value::as_bool).unwrap_or(false),
        }
    }
}

impl<'de> Deserialize<'de> for FeatureRecord {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let value = Value::deserialize(deserializer)?;
        Ok(Self::from_value(&value))
    }
}

fn text_field(value: &Value, keys: &[&str]) -> Option<String> {
    keys.iter()
        .filter_map(|key| value.get(key))
        .find(|field| !field.is_null())
        .map(|field| match field {
            Value::String(text) => text.clone(),
            other => other.to_string(),
        })
}

/// What a successful agent invocation reports back.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct InvocationOutcome {
    /// Freeform summary for the progress log, if the agent produced one.
    pub summary: Option<String>,
}
