//! Raw input loading.
//!
//! One CSV file per ticker, header `date, open, high, low, close, volume`.
//! The ticker is the file stem (`AAPL.csv` → `AAPL`). Files are parsed in
//! parallel; the result is a single frame ordered by `(ticker, date_time)`.

use std::fs;
use std::path::{Path, PathBuf};

use chrono::{NaiveDate, NaiveDateTime};
use rayon::prelude::*;
use tracing::info;

use crate::domain::Bar;
use crate::error::{EtlError, Result};
use crate::frame::BarFrame;
use crate::schema::{self, validate_raw_header};

/// Timestamp layouts accepted in the `date` column.
const TIMESTAMP_FORMATS: &[&str] = &[
    "%Y-%m-%d %H:%M:%S",
    "%Y-%m-%dT%H:%M:%S",
    "%Y-%m-%d %H:%M:%S%.f",
    "%Y-%m-%dT%H:%M:%S%.f",
    "%Y-%m-%d %H:%M",
];

pub struct InputLoader {
    folder: PathBuf,
}

impl InputLoader {
    /// Fails with [`EtlError::Config`] when `folder` is not an existing directory.
    pub fn new(folder: impl Into<PathBuf>) -> Result<Self> {
        let folder = folder.into();
        if !folder.is_dir() {
            return Err(EtlError::Config(folder));
        }
        Ok(Self { folder })
    }

    pub fn folder(&self) -> &Path {
        &self.folder
    }

    /// Input files in name order: visible `*.csv` files directly in the folder.
    pub fn input_files(&self) -> Result<Vec<PathBuf>> {
        let entries = fs::read_dir(&self.folder).map_err(|_| EtlError::Config(self.folder.clone()))?;

        let mut files = Vec::new();
        for entry in entries {
            let path = entry.map_err(|_| EtlError::Config(self.folder.clone()))?.path();
            let hidden = path
                .file_name()
                .and_then(|n| n.to_str())
                .map_or(true, |n| n.starts_with('.'));
            let is_csv = path
                .extension()
                .and_then(|e| e.to_str())
                .is_some_and(|e| e.eq_ignore_ascii_case("csv"));
            if path.is_file() && is_csv && !hidden {
                files.push(path);
            }
        }
        files.sort();
        Ok(files)
    }

    /// Load every input file into one sorted frame.
    ///
    /// Fails with [`EtlError::EmptyInput`] when no rows were loaded at all.
    pub fn load(&self) -> Result<BarFrame> {
        let files = self.input_files()?;

        let per_file: Vec<Vec<Bar>> = files
            .par_iter()
            .map(|path| read_ticker_file(path))
            .collect::<Result<_>>()?;

        let bars: Vec<Bar> = per_file.into_iter().flatten().collect();
        if bars.is_empty() {
            return Err(EtlError::EmptyInput(self.folder.clone()));
        }

        let frame = BarFrame::from_bars(&bars)?.sorted()?;
        info!(
            files = files.len(),
            rows = frame.height(),
            folder = %self.folder.display(),
            "stock data loaded"
        );
        Ok(frame)
    }
}

/// Ticker name for a source file: its base name without extension.
pub fn ticker_from_path(path: &Path) -> Option<String> {
    path.file_stem()
        .and_then(|s| s.to_str())
        .filter(|s| !s.is_empty())
        .map(str::to_string)
}

/// Parse a `date` cell. A bare date means midnight.
pub fn parse_timestamp(raw: &str) -> Option<NaiveDateTime> {
    let raw = raw.trim();
    TIMESTAMP_FORMATS
        .iter()
        .find_map(|fmt| NaiveDateTime::parse_from_str(raw, fmt).ok())
        .or_else(|| {
            NaiveDate::parse_from_str(raw, "%Y-%m-%d")
                .ok()
                .and_then(|d| d.and_hms_opt(0, 0, 0))
        })
}

fn read_ticker_file(path: &Path) -> Result<Vec<Bar>> {
    let file_label = path.display().to_string();
    let parse_err = |line: u64, reason: String| EtlError::Parse {
        file: file_label.clone(),
        line,
        reason,
    };

    let ticker =
        ticker_from_path(path).ok_or_else(|| parse_err(0, "cannot derive ticker from file name".into()))?;

    let mut reader = csv::ReaderBuilder::new()
        .has_headers(true)
        .trim(csv::Trim::All)
        .from_path(path)
        .map_err(|e| parse_err(0, e.to_string()))?;

    let headers = reader
        .headers()
        .map_err(|e| parse_err(1, e.to_string()))?
        .clone();
    validate_raw_header(headers.iter())?;

    let position = |name: &str| {
        headers
            .iter()
            .position(|h| h.eq_ignore_ascii_case(name))
            .ok_or_else(|| parse_err(1, format!("missing column '{name}'")))
    };
    let idx_date = position(schema::DATE)?;
    let idx_open = position(schema::OPEN)?;
    let idx_high = position(schema::HIGH)?;
    let idx_low = position(schema::LOW)?;
    let idx_close = position(schema::CLOSE)?;
    let idx_volume = position(schema::VOLUME)?;

    let mut bars = Vec::new();
    for record in reader.records() {
        let record = record.map_err(|e| parse_err(e.position().map_or(0, |p| p.line()), e.to_string()))?;
        let line = record.position().map_or(0, |p| p.line());
        let field = |i: usize| record.get(i).unwrap_or("");

        let date_time = parse_timestamp(field(idx_date))
            .ok_or_else(|| parse_err(line, format!("unparseable date '{}'", field(idx_date))))?;

        let price = |i: usize| {
            parse_price(field(i)).map_err(|raw| parse_err(line, format!("unparseable price '{raw}'")))
        };
        let volume = parse_volume(field(idx_volume))
            .map_err(|raw| parse_err(line, format!("unparseable volume '{raw}'")))?;

        bars.push(Bar {
            ticker: ticker.clone(),
            date_time,
            open: price(idx_open)?,
            high: price(idx_high)?,
            low: price(idx_low)?,
            close: price(idx_close)?,
            volume,
        });
    }
    Ok(bars)
}

/// Empty prices load as NaN, matching a nullable column. Anything else must
/// parse; the raw cell comes back as the error.
fn parse_price(raw: &str) -> std::result::Result<f64, &str> {
    if raw.is_empty() {
        return Ok(f64::NAN);
    }
    raw.parse().map_err(|_| raw)
}

/// Empty volume loads as 0. Whole numbers written as floats (`1200.0`) are
/// accepted.
fn parse_volume(raw: &str) -> std::result::Result<i64, &str> {
    if raw.is_empty() {
        return Ok(0);
    }
    raw.parse::<i64>()
        .ok()
        .or_else(|| {
            raw.parse::<f64>()
                .ok()
                .filter(|v| v.is_finite() && v.fract() == 0.0)
                .map(|v| v as i64)
        })
        .ok_or(raw)
}
