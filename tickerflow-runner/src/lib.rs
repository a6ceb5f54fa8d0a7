//! TickerFlow Runner: run orchestration on top of `tickerflow-core`.
//!
//! This crate provides:
//! - TOML run configuration with path validation
//! - The run orchestrator (load → reconcile → write → watermarks)
//! - Run reports with per-stage status strings
//! - CSV / JSON / table export of watermark records and run artifacts

pub mod config;
pub mod etl;
pub mod export;
pub mod report;

pub use config::{ConfigError, EtlConfig};
pub use etl::{generate_run_id, run_etl, EtlRun, RunError};
pub use export::{
    export_runs_json, export_watermarks_csv, export_watermarks_json, format_run_table,
    format_watermark_table,
};
pub use report::{ClassificationSummary, RunReport};
