//! Serializable run configuration.
//!
//! ```toml
//! input_dir = "raw/2024-02"
//! store_root = "StockData"
//! watermark_dir = "artifacts"
//! report_dir = "reports"       # optional
//! ```

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file {path}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("invalid TOML in config: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("input folder not found: {}", .0.display())]
    InputNotFound(PathBuf),

    #[error("invalid config: {0}")]
    Invalid(String),
}

/// Everything needed to execute one ETL run.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct EtlConfig {
    /// Folder with one `<TICKER>.csv` per ticker.
    pub input_dir: PathBuf,

    /// Root of the partitioned Parquet store.
    #[serde(default = "default_store_root")]
    pub store_root: PathBuf,

    /// Root of the watermark/run-artifact document store.
    #[serde(default = "default_watermark_dir")]
    pub watermark_dir: PathBuf,

    /// If set, each run report is also written to `{report_dir}/{run_id}.json`.
    #[serde(default)]
    pub report_dir: Option<PathBuf>,
}

fn default_store_root() -> PathBuf {
    PathBuf::from("StockData")
}

fn default_watermark_dir() -> PathBuf {
    PathBuf::from("artifacts")
}

impl EtlConfig {
    pub fn new(input_dir: impl Into<PathBuf>) -> Self {
        Self {
            input_dir: input_dir.into(),
            store_root: default_store_root(),
            watermark_dir: default_watermark_dir(),
            report_dir: None,
        }
    }

    pub fn from_toml(s: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(s)?)
    }

    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml(&content)
    }

    /// Check paths before a run touches anything.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !self.input_dir.is_dir() {
            return Err(ConfigError::InputNotFound(self.input_dir.clone()));
        }
        if self.store_root.as_os_str().is_empty() {
            return Err(ConfigError::Invalid("store_root must not be empty".into()));
        }
        if self.watermark_dir.as_os_str().is_empty() {
            return Err(ConfigError::Invalid("watermark_dir must not be empty".into()));
        }
        if self.store_root == self.watermark_dir {
            return Err(ConfigError::Invalid(
                "store_root and watermark_dir must be different directories".into(),
            ));
        }
        Ok(())
    }
}
