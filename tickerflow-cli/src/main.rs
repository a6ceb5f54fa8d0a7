//! TickerFlow CLI: run the incremental ETL and inspect its watermark store.
//!
//! Commands:
//! - `run`: load an input folder, reconcile against the watermarks, write
//!   the delta and print the run report as JSON
//! - `watermarks`: list per-ticker watermark records
//! - `runs`: list recorded run artifacts

use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use tracing::error;
use tracing_subscriber::EnvFilter;

use tickerflow_core::{JsonWatermarkStore, WatermarkStore};
use tickerflow_runner::{
    export_runs_json, export_watermarks_csv, export_watermarks_json, format_run_table,
    format_watermark_table, run_etl, EtlConfig, RunError,
};

#[derive(Parser)]
#[command(
    name = "tickerflow",
    about = "TickerFlow: incremental ETL for per-ticker price bars"
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Ingest an input folder and write only what changed.
    Run {
        /// Path to a TOML config file.
        #[arg(long)]
        config: Option<PathBuf>,

        /// Input folder with one <TICKER>.csv per ticker (overrides config).
        #[arg(long)]
        input: Option<PathBuf>,

        /// Root of the partitioned Parquet store (overrides config).
        #[arg(long)]
        store: Option<PathBuf>,

        /// Root of the watermark document store (overrides config).
        #[arg(long)]
        watermarks: Option<PathBuf>,

        /// Also write the run report to this directory.
        #[arg(long)]
        report_dir: Option<PathBuf>,
    },
    /// List per-ticker watermark records.
    Watermarks {
        /// Root of the watermark document store.
        #[arg(long, default_value = "artifacts")]
        watermarks: PathBuf,

        /// Output format.
        #[arg(long, value_enum, default_value_t = OutputFormat::Table)]
        format: OutputFormat,
    },
    /// List recorded run artifacts, oldest first.
    Runs {
        /// Root of the watermark document store.
        #[arg(long, default_value = "artifacts")]
        watermarks: PathBuf,

        /// Print JSON instead of one line per run.
        #[arg(long, default_value_t = false)]
        json: bool,
    },
}

#[derive(Clone, Copy, ValueEnum)]
enum OutputFormat {
    Table,
    Csv,
    Json,
}

fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    let result = match cli.command {
        Commands::Run {
            config,
            input,
            store,
            watermarks,
            report_dir,
        } => run_cmd(config, input, store, watermarks, report_dir),
        Commands::Watermarks { watermarks, format } => watermarks_cmd(watermarks, format),
        Commands::Runs { watermarks, json } => runs_cmd(watermarks, json),
    };

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!("{e:#}");
            ExitCode::FAILURE
        }
    }
}

fn run_cmd(
    config: Option<PathBuf>,
    input: Option<PathBuf>,
    store: Option<PathBuf>,
    watermarks: Option<PathBuf>,
    report_dir: Option<PathBuf>,
) -> Result<()> {
    let mut cfg = match (&config, &input) {
        (Some(path), _) => EtlConfig::load(path)?,
        (None, Some(input)) => EtlConfig::new(input),
        (None, None) => anyhow::bail!("either --config or --input is required"),
    };
    if let Some(input) = input {
        cfg.input_dir = input;
    }
    if let Some(store) = store {
        cfg.store_root = store;
    }
    if let Some(watermarks) = watermarks {
        cfg.watermark_dir = watermarks;
    }
    if report_dir.is_some() {
        cfg.report_dir = report_dir;
    }

    match run_etl(&cfg) {
        Ok(report) => {
            println!("{}", report.to_json()?);
            Ok(())
        }
        Err(RunError::WatermarkUpdate { report, source }) => {
            // Data is on disk; print what happened before failing.
            println!("{}", report.to_json()?);
            Err(source).context("watermark update failed after data was written")
        }
        Err(e) => Err(e.into()),
    }
}

fn watermarks_cmd(root: PathBuf, format: OutputFormat) -> Result<()> {
    let store = JsonWatermarkStore::new(root);
    let records: Vec<_> = store.read_snapshot()?.into_values().collect();

    match format {
        OutputFormat::Table => print!("{}", format_watermark_table(&records)),
        OutputFormat::Csv => print!("{}", export_watermarks_csv(&records)?),
        OutputFormat::Json => println!("{}", export_watermarks_json(&records)?),
    }
    Ok(())
}

fn runs_cmd(root: PathBuf, json: bool) -> Result<()> {
    let runs = JsonWatermarkStore::new(root).list_runs()?;
    if json {
        println!("{}", export_runs_json(&runs)?);
    } else if runs.is_empty() {
        println!("no runs recorded");
    } else {
        print!("{}", format_run_table(&runs));
    }
    Ok(())
}
