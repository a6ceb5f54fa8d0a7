//! Run orchestrator: load, reconcile, write, aggregate, report.
//!
//! Two entry points:
//! - `run_etl()`: builds the JSON watermark store and Parquet partition store
//!   from an [`EtlConfig`]. Used by the CLI.
//! - `EtlRun::execute()`: runs against injected stores. Used by tests and
//!   embedders.
//!
//! Watermarks are only advanced after the partitioned write succeeded. A
//! failure between the two leaves data written and watermarks stale; the
//! next run that writes those tickers recounts them from the store and
//! converges.

use std::collections::BTreeSet;
use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};

use chrono::NaiveDateTime;
use thiserror::Error;
use tracing::{info, info_span, warn};

use tickerflow_core::store::JsonWatermarkStore;
use tickerflow_core::watermark::{self, OldestDateScope};
use tickerflow_core::{
    BarFrame, EtlError, IncrementalMode, InputLoader, ParquetPartitionStore, PartitionFilter,
    PartitionSink, Reconciler, Reconciliation, WatermarkRecord, WatermarkStore, WriteMode,
};

use crate::config::{ConfigError, EtlConfig};
use crate::report::{stage, RunReport};

static RUN_SEQ: AtomicU64 = AtomicU64::new(0);

/// Errors from a run.
#[derive(Debug, Error)]
pub enum RunError {
    #[error("config error: {0}")]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Etl(#[from] EtlError),

    /// Data was written, the watermark update afterwards failed. Not rolled back.
    #[error("data for run {} was written but its watermarks were not updated: {source}", .report.run_id)]
    WatermarkUpdate {
        report: Box<RunReport>,
        source: EtlError,
    },

    #[error("failed to save run report: {0}")]
    Report(anyhow::Error),
}

/// One ETL run over injected stores.
pub struct EtlRun<'a> {
    config: &'a EtlConfig,
    store: &'a dyn WatermarkStore,
    sink: &'a dyn PartitionSink,
}

impl<'a> EtlRun<'a> {
    pub fn new(
        config: &'a EtlConfig,
        store: &'a dyn WatermarkStore,
        sink: &'a dyn PartitionSink,
    ) -> Self {
        Self {
            config,
            store,
            sink,
        }
    }

    /// Execute the run. A skipped write is a success.
    pub fn execute(&self) -> Result<RunReport, RunError> {
        let started = chrono::Local::now().naive_local();
        self.config.validate()?;

        let frame = InputLoader::new(&self.config.input_dir)?.load()?;
        let run_id = generate_run_id(&self.config.input_dir, &frame, started)?;

        let span = info_span!("etl_run", run_id = %run_id);
        let _guard = span.enter();

        let report = self.execute_loaded(frame, &run_id, started)?;

        if let Some(dir) = &self.config.report_dir {
            let path = report.save(dir).map_err(RunError::Report)?;
            info!(path = %path.display(), "run report saved");
        }
        Ok(report)
    }

    fn execute_loaded(
        &self,
        frame: BarFrame,
        run_id: &str,
        started: NaiveDateTime,
    ) -> Result<RunReport, RunError> {
        let mut report = RunReport::new(run_id);
        report.rows_loaded = frame.height();
        report.stage(stage::LOADING_DATA, "Successful");

        let rec = Reconciler::new(self.store).reconcile(frame, run_id, started)?;
        report.mode = Some(rec.mode);
        report.summary = (&rec.classification).into();
        report.stage(
            stage::RUN_ARTIFACTS,
            if rec.mode.is_bootstrap() {
                "First run artifacts created successfully"
            } else {
                "Run artifacts added successfully"
            },
        );

        if rec.skip_writing() {
            info!("data is up-to-date, skipping write");
            report.stage(stage::WRITING_MODE, "Data already up-to-date. Write skipped");
        } else {
            report.stage(stage::WRITING_MODE, rec.mode.label());
            let outcome = self.sink.write(&rec.filtered, rec.mode)?;
            report.rows_written = outcome.rows_received;
            report.stage(
                stage::WRITING_DATA,
                format!(
                    "Successful: {} partitions, {} rows ({} new)",
                    outcome.partitions_written.len(),
                    outcome.rows_received,
                    outcome.rows_added
                ),
            );
        }

        let records = match self.watermark_records(&rec) {
            Ok(records) => records,
            Err(source) => return Err(self.watermark_failure(report, source)),
        };
        if let Err(source) = self.store.upsert_records(&records) {
            return Err(self.watermark_failure(report, source));
        }

        report.watermarks_updated = records.len();
        report.stage(
            stage::WATERMARKS,
            match rec.mode {
                WriteMode::Bootstrap => "First watermarks created successfully",
                WriteMode::Incremental(IncrementalMode::Delta) => "Watermarks updated successfully",
                WriteMode::Incremental(IncrementalMode::NoOp) => "Watermarks already current",
            },
        );

        info!(
            mode = rec.mode.label(),
            rows_written = report.rows_written,
            watermarks = report.watermarks_updated,
            "run complete"
        );
        Ok(report)
    }

    /// Records to upsert after a successful write.
    ///
    /// Bootstrap aggregates the whole store. Incremental runs recount every
    /// stored partition of the tickers they wrote, so rows from earlier runs
    /// whose watermark update failed are counted too.
    fn watermark_records(&self, rec: &Reconciliation) -> Result<Vec<WatermarkRecord>, EtlError> {
        match rec.mode {
            WriteMode::Bootstrap => {
                let stored = self.sink.scan(&PartitionFilter::all())?;
                let aggregates = watermark::aggregate(&stored, OldestDateScope::AllTickers)?;
                Ok(watermark::bootstrap_records(&aggregates))
            }
            WriteMode::Incremental(IncrementalMode::NoOp) => Ok(Vec::new()),
            WriteMode::Incremental(IncrementalMode::Delta) => {
                let written =
                    PartitionFilter::all().tickers(rec.classification.to_write().cloned());
                let stored = self.sink.scan(&written)?;
                let with_oldest =
                    watermark::needs_oldest_date(&rec.classification.new, &rec.snapshot);
                let aggregates =
                    watermark::aggregate(&stored, OldestDateScope::NewTickers(&with_oldest))?;
                Ok(watermark::incremental_records(&rec.snapshot, &aggregates))
            }
        }
    }

    fn watermark_failure(&self, mut report: RunReport, source: EtlError) -> RunError {
        warn!(error = %source, "watermark update failed after data write; the next run that writes these tickers recounts them");
        report.stage(stage::WATERMARKS, format!("Failed: {source}"));
        RunError::WatermarkUpdate {
            report: Box::new(report),
            source,
        }
    }
}

/// Run with the on-disk stores named in `config`.
pub fn run_etl(config: &EtlConfig) -> Result<RunReport, RunError> {
    let store = JsonWatermarkStore::new(&config.watermark_dir);
    let sink = ParquetPartitionStore::new(&config.store_root);
    EtlRun::new(config, &store, &sink).execute()
}

/// Unique, time-sortable run id: `{YYYYMMDDTHHMMSS}-{12 hex}`.
///
/// The hash covers the input folder, the start time, a process-local
/// sequence number and the loaded tickers and row count.
pub fn generate_run_id(
    input_dir: &Path,
    frame: &BarFrame,
    started: NaiveDateTime,
) -> Result<String, EtlError> {
    let tickers: BTreeSet<String> = frame.tickers()?;
    let seq = RUN_SEQ.fetch_add(1, Ordering::Relaxed);

    let mut hasher = blake3::Hasher::new();
    hasher.update(input_dir.to_string_lossy().as_bytes());
    hasher.update(
        &started
            .and_utc()
            .timestamp_nanos_opt()
            .unwrap_or_default()
            .to_le_bytes(),
    );
    hasher.update(&std::process::id().to_le_bytes());
    hasher.update(&seq.to_le_bytes());
    hasher.update(&(frame.height() as u64).to_le_bytes());
    for ticker in &tickers {
        hasher.update(ticker.as_bytes());
    }
    let hash = hasher.finalize().to_hex();

    Ok(format!("{}-{}", started.format("%Y%m%dT%H%M%S"), &hash[..12]))
}
