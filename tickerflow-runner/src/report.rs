//! Run report: per-stage status strings, run id, classification summary.

use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use tickerflow_core::{TickerClassification, WriteMode};

/// Current schema version for persisted reports.
pub const SCHEMA_VERSION: u32 = 1;

/// Stage names used as report keys.
pub mod stage {
    pub const LOADING_DATA: &str = "loading_data";
    pub const RUN_ARTIFACTS: &str = "run_artifacts";
    pub const WRITING_MODE: &str = "writing_mode";
    pub const WRITING_DATA: &str = "writing_data";
    pub const WATERMARKS: &str = "watermarks";
}

/// Ticker sets of one run, as reported.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClassificationSummary {
    pub new: BTreeSet<String>,
    pub updated: BTreeSet<String>,
    pub missing: BTreeSet<String>,
    pub current: BTreeSet<String>,
}

impl From<&TickerClassification> for ClassificationSummary {
    fn from(c: &TickerClassification) -> Self {
        Self {
            new: c.new.clone(),
            updated: c.updated.clone(),
            missing: c.missing.clone(),
            current: c.current.clone(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunReport {
    #[serde(default = "default_schema_version")]
    pub schema_version: u32,
    pub run_id: String,
    pub stages: BTreeMap<String, String>,
    pub mode: Option<WriteMode>,
    pub summary: ClassificationSummary,
    pub rows_loaded: usize,
    pub rows_written: usize,
    pub watermarks_updated: usize,
}

fn default_schema_version() -> u32 {
    SCHEMA_VERSION
}

impl RunReport {
    pub fn new(run_id: impl Into<String>) -> Self {
        Self {
            schema_version: SCHEMA_VERSION,
            run_id: run_id.into(),
            stages: BTreeMap::new(),
            mode: None,
            summary: ClassificationSummary::default(),
            rows_loaded: 0,
            rows_written: 0,
            watermarks_updated: 0,
        }
    }

    pub fn stage(&mut self, name: &str, status: impl Into<String>) {
        self.stages.insert(name.to_string(), status.into());
    }

    pub fn status(&self, name: &str) -> Option<&str> {
        self.stages.get(name).map(String::as_str)
    }

    pub fn skipped_write(&self) -> bool {
        self.mode.is_some_and(|m| m.skip_writing())
    }

    pub fn to_json(&self) -> Result<String> {
        serde_json::to_string_pretty(self).context("failed to serialize RunReport to JSON")
    }

    /// Write the report to `{dir}/{run_id}.json`.
    pub fn save(&self, dir: &Path) -> Result<PathBuf> {
        std::fs::create_dir_all(dir)
            .with_context(|| format!("failed to create report dir {}", dir.display()))?;
        let path = dir.join(format!("{}.json", self.run_id));
        std::fs::write(&path, self.to_json()?)
            .with_context(|| format!("failed to write {}", path.display()))?;
        Ok(path)
    }
}
