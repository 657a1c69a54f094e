//! Read-only view of the feature checklist (`feature_list.json`).
//!
//! The agent owns this file and rewrites it between sessions. The loop only
//! reads it, and treats anything it cannot read as "not yet initialized".

use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::Deserialize;
use tracing::{debug, warn};

use crate::core::snapshot::ChecklistSnapshot;
use crate::core::types::FeatureRecord;

/// Shapes the agent is known to write.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum ChecklistDocument {
    List(Vec<FeatureRecord>),
    Wrapped {
        #[serde(alias = "tests")]
        features: Vec<FeatureRecord>,
    },
}

impl ChecklistDocument {
    fn into_records(self) -> Vec<FeatureRecord> {
        match self {
            ChecklistDocument::List(records) => records,
            ChecklistDocument::Wrapped { features } => features,
        }
    }
}

#[derive(Debug, Clone)]
pub struct ChecklistStore {
    path: PathBuf,
}

impl ChecklistStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Current pass/total counts. Absent or corrupt files yield `(0, 0)`.
    pub fn snapshot(&self) -> ChecklistSnapshot {
        ChecklistSnapshot::from_records(&self.records())
    }

    /// True only when the checklist has at least one record.
    pub fn exists_and_populated(&self) -> bool {
        self.snapshot().is_initialized()
    }

    /// All records, or none if the file cannot be used.
    pub fn records(&self) -> Vec<FeatureRecord> {
        match self.load() {
            Ok(records) => records,
            Err(err) => {
                warn!(path = %self.path.display(), err = %format!("{err:#}"), "ignoring unreadable checklist");
                Vec::new()
            }
        }
    }

    fn load(&self) -> Result<Vec<FeatureRecord>> {
        let contents = match fs::read_to_string(&self.path) {
            Ok(contents) => contents,
            Err(err) if err.kind() == ErrorKind::NotFound => {
                debug!(path = %self.path.display(), "checklist not created yet");
                return Ok(Vec::new());
            }
            Err(err) => {
                return Err(err).with_context(|| format!("read {}", self.path.display()));
            }
        };
        let document: ChecklistDocument = serde_json::from_str(&contents)
            .with_context(|| format!("parse {}", self.path.display()))?;
        let records = document.into_records();
        debug!(path = %self.path.display(), records = records.len(), "checklist loaded");
        Ok(records)
    }
}
