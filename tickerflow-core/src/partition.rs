//! Partitioned Parquet store.
//!
//! Layout: `{root}/ticker={TICKER}/year={YYYY}/month={M}/data.parquet`
//!
//! - Bootstrap writes replace every partition under the root
//! - Delta writes merge into the partitions present in the frame and leave
//!   every other partition untouched
//! - Writes are atomic per partition (write to .tmp, rename into place)
//! - Rows are unique per `(ticker, date_time)` inside a partition; on merge the
//!   incoming row wins

use std::collections::{BTreeMap, BTreeSet};
use std::fs;
use std::path::{Path, PathBuf};

use chrono::NaiveDateTime;
use polars::prelude::*;
use tracing::{debug, info};

use crate::domain::{Bar, IncrementalMode, WriteMode};
use crate::error::{EtlError, Result};
use crate::frame::BarFrame;

const DATA_FILE: &str = "data.parquet";

/// One `(ticker, year, month)` partition.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PartitionKey {
    pub ticker: String,
    pub year: i32,
    pub month: i32,
}

impl PartitionKey {
    pub fn new(ticker: impl Into<String>, year: i32, month: i32) -> Self {
        Self {
            ticker: ticker.into(),
            year,
            month,
        }
    }

    /// `ticker={T}/year={Y}/month={M}`
    pub fn relative_dir(&self) -> PathBuf {
        PathBuf::from(format!("ticker={}", self.ticker))
            .join(format!("year={}", self.year))
            .join(format!("month={}", self.month))
    }
}

/// Restricts a scan to a subset of partitions. `None` means no restriction.
#[derive(Debug, Clone, Default)]
pub struct PartitionFilter {
    pub tickers: Option<BTreeSet<String>>,
    /// `(year, month)` pairs.
    pub months: Option<BTreeSet<(i32, i32)>>,
}

impl PartitionFilter {
    pub fn all() -> Self {
        Self::default()
    }

    pub fn tickers<I, S>(mut self, tickers: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.tickers = Some(tickers.into_iter().map(Into::into).collect());
        self
    }

    pub fn month(mut self, year: i32, month: i32) -> Self {
        self.months
            .get_or_insert_with(BTreeSet::new)
            .insert((year, month));
        self
    }

    fn allows_ticker(&self, ticker: &str) -> bool {
        self.tickers.as_ref().map_or(true, |t| t.contains(ticker))
    }

    fn allows_month(&self, year: i32, month: i32) -> bool {
        self.months
            .as_ref()
            .map_or(true, |m| m.contains(&(year, month)))
    }

    pub fn matches(&self, key: &PartitionKey) -> bool {
        self.allows_ticker(&key.ticker) && self.allows_month(key.year, key.month)
    }
}

/// What a write did.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct WriteOutcome {
    pub partitions_written: Vec<PartitionKey>,
    /// Rows handed to the writer.
    pub rows_received: usize,
    /// Rows that were not already stored in their partition.
    pub rows_added: usize,
}

/// Storage capability used by the orchestrator: write a frame in a given
/// mode, read partitions back.
pub trait PartitionSink: Send + Sync {
    fn write(&self, frame: &BarFrame, mode: WriteMode) -> Result<WriteOutcome>;

    fn scan(&self, filter: &PartitionFilter) -> Result<BarFrame>;
}

/// The Parquet-backed partitioned store.
pub struct ParquetPartitionStore {
    root: PathBuf,
}

impl ParquetPartitionStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn partition_path(&self, key: &PartitionKey) -> PathBuf {
        self.root.join(key.relative_dir()).join(DATA_FILE)
    }

    /// All partitions currently on disk, in key order.
    pub fn list_partitions(&self) -> Result<Vec<PartitionKey>> {
        let mut keys = Vec::new();
        if !self.root.exists() {
            return Ok(keys);
        }

        for (ticker, ticker_dir) in hive_children(&self.root, "ticker")? {
            for (year, year_dir) in hive_children(&ticker_dir, "year")? {
                let Ok(year) = year.parse::<i32>() else { continue };
                for (month, month_dir) in hive_children(&year_dir, "month")? {
                    let Ok(month) = month.parse::<i32>() else { continue };
                    if month_dir.join(DATA_FILE).is_file() {
                        keys.push(PartitionKey::new(ticker.clone(), year, month));
                    }
                }
            }
        }

        keys.sort();
        Ok(keys)
    }

    /// Remove every `ticker=*` directory under the root.
    fn clear(&self) -> Result<()> {
        if !self.root.exists() {
            return Ok(());
        }
        for (_, dir) in hive_children(&self.root, "ticker").map_err(as_write_error)? {
            fs::remove_dir_all(&dir)
                .map_err(|e| EtlError::Write(format!("remove {}: {e}", dir.display())))?;
        }
        Ok(())
    }

    fn read_partition(&self, key: &PartitionKey) -> Result<Option<BarFrame>> {
        let path = self.partition_path(key);
        if !path.exists() {
            return Ok(None);
        }
        read_parquet(&path).map(Some)
    }

    /// Merge `incoming` into the partition and replace its file.
    ///
    /// Returns the number of rows that were not stored before.
    fn merge_partition(&self, key: &PartitionKey, incoming: &BarFrame, replace: bool) -> Result<usize> {
        let mut merged: BTreeMap<NaiveDateTime, Bar> = BTreeMap::new();
        if !replace {
            if let Some(existing) = self.read_partition(key).map_err(as_write_error)? {
                for bar in existing.to_bars()? {
                    merged.insert(bar.date_time, bar);
                }
            }
        }
        let before = merged.len();

        for bar in incoming.to_bars()? {
            merged.insert(bar.date_time, bar);
        }
        let added = merged.len() - before;

        let bars: Vec<Bar> = merged.into_values().collect();
        let frame = BarFrame::from_bars(&bars)?;

        let path = self.partition_path(key);
        if let Some(dir) = path.parent() {
            fs::create_dir_all(dir)
                .map_err(|e| EtlError::Write(format!("create {}: {e}", dir.display())))?;
        }
        let tmp_path = path.with_extension("parquet.tmp");
        write_parquet(frame.as_dataframe(), &tmp_path)?;
        fs::rename(&tmp_path, &path).map_err(|e| {
            let _ = fs::remove_file(&tmp_path);
            EtlError::Write(format!("atomic rename failed: {e}"))
        })?;

        debug!(partition = %key.relative_dir().display(), rows = bars.len(), added, "partition written");
        Ok(added)
    }
}

impl PartitionSink for ParquetPartitionStore {
    fn write(&self, frame: &BarFrame, mode: WriteMode) -> Result<WriteOutcome> {
        let replace = match mode {
            WriteMode::Incremental(IncrementalMode::NoOp) => return Ok(WriteOutcome::default()),
            WriteMode::Incremental(IncrementalMode::Delta) => false,
            WriteMode::Bootstrap => {
                self.clear()?;
                true
            }
        };

        let mut outcome = WriteOutcome {
            rows_received: frame.height(),
            ..WriteOutcome::default()
        };
        for (key, part) in frame.partitions()? {
            outcome.rows_added += self.merge_partition(&key, &part, replace)?;
            outcome.partitions_written.push(key);
        }

        info!(
            mode = mode.label(),
            partitions = outcome.partitions_written.len(),
            rows = outcome.rows_received,
            added = outcome.rows_added,
            root = %self.root.display(),
            "partitioned data saved"
        );
        Ok(outcome)
    }

    fn scan(&self, filter: &PartitionFilter) -> Result<BarFrame> {
        let mut out = BarFrame::empty()?;
        for key in self.list_partitions()? {
            if !filter.matches(&key) {
                continue;
            }
            if let Some(part) = self.read_partition(&key)? {
                out.vstack(&part)?;
            }
        }
        out.sorted()
    }
}

/// Children of `dir` named `{name}=value`, as `(value, path)`.
fn hive_children(dir: &Path, name: &str) -> Result<Vec<(String, PathBuf)>> {
    let prefix = format!("{name}=");
    let entries = fs::read_dir(dir)
        .map_err(|e| EtlError::Scan(format!("read dir {}: {e}", dir.display())))?;

    let mut children = Vec::new();
    for entry in entries {
        let entry = entry.map_err(|e| EtlError::Scan(format!("dir entry: {e}")))?;
        let path = entry.path();
        if !path.is_dir() {
            continue;
        }
        let file_name = entry.file_name();
        if let Some(value) = file_name.to_str().and_then(|n| n.strip_prefix(&prefix)) {
            children.push((value.to_string(), path));
        }
    }
    children.sort();
    Ok(children)
}

fn as_write_error(e: EtlError) -> EtlError {
    match e {
        EtlError::Write(_) => e,
        other => EtlError::Write(other.to_string()),
    }
}

fn write_parquet(df: &DataFrame, path: &Path) -> Result<()> {
    let file = fs::File::create(path)
        .map_err(|e| EtlError::Write(format!("create {}: {e}", path.display())))?;
    ParquetWriter::new(file)
        .finish(&mut df.clone())
        .map_err(|e| EtlError::Write(format!("write parquet {}: {e}", path.display())))?;
    Ok(())
}

fn read_parquet(path: &Path) -> Result<BarFrame> {
    let file = fs::File::open(path)
        .map_err(|e| EtlError::Scan(format!("open {}: {e}", path.display())))?;
    let df = ParquetReader::new(file)
        .finish()
        .map_err(|e| EtlError::Scan(format!("read {}: {e}", path.display())))?;
    BarFrame::from_dataframe(df).map_err(|e| EtlError::Scan(format!("{}: {e}", path.display())))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn bar(ticker: &str, ts: &str, close: f64) -> Bar {
        Bar {
            ticker: ticker.into(),
            date_time: NaiveDateTime::parse_from_str(ts, "%Y-%m-%d %H:%M:%S").unwrap(),
            open: close,
            high: close,
            low: close,
            close,
            volume: 1,
        }
    }

    fn frame(bars: &[Bar]) -> BarFrame {
        BarFrame::from_bars(bars).unwrap()
    }

    #[test]
    fn partition_key_layout() {
        let key = PartitionKey::new("AAPL", 2024, 2);
        assert_eq!(
            key.relative_dir(),
            PathBuf::from("ticker=AAPL").join("year=2024").join("month=2")
        );
    }

    #[test]
    fn filter_matching() {
        let key = PartitionKey::new("AAPL", 2024, 2);
        assert!(PartitionFilter::all().matches(&key));
        assert!(PartitionFilter::all().tickers(["AAPL"]).matches(&key));
        assert!(!PartitionFilter::all().tickers(["MSFT"]).matches(&key));
        assert!(PartitionFilter::all().month(2024, 2).matches(&key));
        assert!(!PartitionFilter::all().month(2024, 3).matches(&key));
    }

    #[test]
    fn filter_months_are_year_month_pairs() {
        let filter = PartitionFilter::all().month(2023, 12).month(2024, 1);
        assert!(filter.matches(&PartitionKey::new("AAPL", 2023, 12)));
        assert!(filter.matches(&PartitionKey::new("AAPL", 2024, 1)));
        assert!(!filter.matches(&PartitionKey::new("AAPL", 2023, 1)));
        assert!(!filter.matches(&PartitionKey::new("AAPL", 2024, 12)));
    }

    #[test]
    fn noop_writes_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let store = ParquetPartitionStore::new(dir.path().join("StockData"));
        let outcome = store
            .write(
                &frame(&[bar("AAPL", "2024-01-02 00:00:00", 1.0)]),
                WriteMode::Incremental(IncrementalMode::NoOp),
            )
            .unwrap();
        assert_eq!(outcome, WriteOutcome::default());
        assert!(store.list_partitions().unwrap().is_empty());
    }

    #[test]
    fn bootstrap_writes_and_scans_back() {
        let dir = tempfile::tempdir().unwrap();
        let store = ParquetPartitionStore::new(dir.path());
        let input = frame(&[
            bar("AAPL", "2024-01-31 00:00:00", 1.0),
            bar("AAPL", "2024-02-01 00:00:00", 2.0),
            bar("MSFT", "2024-02-01 00:00:00", 3.0),
        ]);

        let outcome = store.write(&input, WriteMode::Bootstrap).unwrap();
        assert_eq!(outcome.partitions_written.len(), 3);
        assert_eq!(outcome.rows_added, 3);

        let all = store.scan(&PartitionFilter::all()).unwrap();
        assert_eq!(all.height(), 3);
        let feb = store.scan(&PartitionFilter::all().month(2024, 2)).unwrap();
        assert_eq!(feb.height(), 2);
    }

    #[test]
    fn bootstrap_replaces_previous_partitions() {
        let dir = tempfile::tempdir().unwrap();
        let store = ParquetPartitionStore::new(dir.path());
        store
            .write(&frame(&[bar("OLD", "2020-01-01 00:00:00", 1.0)]), WriteMode::Bootstrap)
            .unwrap();
        store
            .write(&frame(&[bar("AAPL", "2024-01-01 00:00:00", 1.0)]), WriteMode::Bootstrap)
            .unwrap();

        let keys = store.list_partitions().unwrap();
        assert_eq!(keys, vec![PartitionKey::new("AAPL", 2024, 1)]);
    }

    #[test]
    fn delta_merges_and_dedupes() {
        let dir = tempfile::tempdir().unwrap();
        let store = ParquetPartitionStore::new(dir.path());
        store
            .write(
                &frame(&[
                    bar("AAPL", "2024-02-01 00:00:00", 1.0),
                    bar("AAPL", "2024-02-02 00:00:00", 1.0),
                ]),
                WriteMode::Bootstrap,
            )
            .unwrap();

        let outcome = store
            .write(
                &frame(&[
                    bar("AAPL", "2024-02-02 00:00:00", 5.0),
                    bar("AAPL", "2024-02-03 00:00:00", 6.0),
                ]),
                WriteMode::Incremental(IncrementalMode::Delta),
            )
            .unwrap();
        assert_eq!(outcome.rows_received, 2);
        assert_eq!(outcome.rows_added, 1);

        let bars = store.scan(&PartitionFilter::all()).unwrap().to_bars().unwrap();
        assert_eq!(bars.len(), 3);
        assert_eq!(bars[1].close, 5.0, "incoming row replaces the stored one");
    }
}
