//! Watermark and run-artifact export: CSV, JSON and a plain-text table.

use anyhow::{Context, Result};

use tickerflow_core::{RunArtifact, WatermarkRecord};

const DATE_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

// ─── CSV export ─────────────────────────────────────────────────────

/// Export watermark records as CSV with a header row.
pub fn export_watermarks_csv(records: &[WatermarkRecord]) -> Result<String> {
    let mut wtr = csv::Writer::from_writer(vec![]);

    wtr.write_record(["ticker", "row_count", "oldest_date", "latest_date"])?;
    for r in records {
        wtr.write_record([
            r.ticker.clone(),
            r.row_count.to_string(),
            format_date(r.oldest_date),
            format_date(r.latest_date),
        ])?;
    }

    let bytes = wtr.into_inner().context("failed to flush CSV writer")?;
    String::from_utf8(bytes).context("CSV output is not valid UTF-8")
}

// ─── JSON export ────────────────────────────────────────────────────

pub fn export_watermarks_json(records: &[WatermarkRecord]) -> Result<String> {
    serde_json::to_string_pretty(records).context("failed to serialize watermark records")
}

pub fn export_runs_json(runs: &[RunArtifact]) -> Result<String> {
    serde_json::to_string_pretty(runs).context("failed to serialize run artifacts")
}

// ─── Table ──────────────────────────────────────────────────────────

/// Fixed-width table for terminal output.
pub fn format_watermark_table(records: &[WatermarkRecord]) -> String {
    let width = records
        .iter()
        .map(|r| r.ticker.len())
        .max()
        .unwrap_or(0)
        .max("TICKER".len());

    let mut out = format!(
        "{:<width$}  {:>10}  {:<19}  {:<19}\n",
        "TICKER", "ROWS", "OLDEST", "LATEST"
    );
    for r in records {
        out.push_str(&format!(
            "{:<width$}  {:>10}  {:<19}  {:<19}\n",
            r.ticker,
            r.row_count,
            format_date(r.oldest_date),
            format_date(r.latest_date),
        ));
    }
    out
}

/// One line per run: id, time, counts, skip flag.
pub fn format_run_table(runs: &[RunArtifact]) -> String {
    let mut out = String::new();
    for run in runs {
        out.push_str(&format!(
            "{}  {}  new={} updated={} missing={}{}\n",
            run.run_id,
            run.created_at.format(DATE_FORMAT),
            run.tickers_new.len(),
            run.tickers_updated.len(),
            run.tickers_missing.len(),
            if run.skip_writing { "  (write skipped)" } else { "" },
        ));
    }
    out
}

fn format_date(date: Option<chrono::NaiveDateTime>) -> String {
    date.map(|d| d.format(DATE_FORMAT).to_string())
        .unwrap_or_default()
}
