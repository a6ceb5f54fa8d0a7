//! Domain types: bars, watermark records, run artifacts, write modes.

use std::collections::{BTreeMap, BTreeSet};

use chrono::{Datelike, NaiveDate, NaiveDateTime};
use serde::{Deserialize, Serialize};

/// One normalized price bar.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Bar {
    pub ticker: String,
    pub date_time: NaiveDateTime,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    pub volume: i64,
}

impl Bar {
    pub fn date(&self) -> NaiveDate {
        self.date_time.date()
    }

    /// Time of day formatted as `HH:MM:SS`.
    pub fn time(&self) -> String {
        self.date_time.format("%H:%M:%S").to_string()
    }

    pub fn year(&self) -> i32 {
        self.date_time.year()
    }

    pub fn month(&self) -> i32 {
        self.date_time.month() as i32
    }
}

/// Persisted high/low-water marks for one ticker.
///
/// Created as a stub (zero rows, no dates) on the bootstrap run, then filled
/// in by aggregation. Never deleted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WatermarkRecord {
    pub ticker: String,
    pub row_count: u64,
    pub oldest_date: Option<NaiveDateTime>,
    pub latest_date: Option<NaiveDateTime>,
}

impl WatermarkRecord {
    pub fn stub(ticker: impl Into<String>) -> Self {
        Self {
            ticker: ticker.into(),
            row_count: 0,
            oldest_date: None,
            latest_date: None,
        }
    }

    /// `oldest_date <= latest_date` whenever both are known.
    pub fn is_consistent(&self) -> bool {
        match (self.oldest_date, self.latest_date) {
            (Some(oldest), Some(latest)) => oldest <= latest,
            _ => true,
        }
    }
}

/// Watermark records keyed by ticker, as read at the start of a run.
pub type WatermarkSnapshot = BTreeMap<String, WatermarkRecord>;

/// Audit record of one run's classification outcome. Written once.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunArtifact {
    pub run_id: String,
    pub created_at: NaiveDateTime,
    pub tickers_missing: BTreeSet<String>,
    pub tickers_new: BTreeSet<String>,
    pub tickers_updated: BTreeSet<String>,
    pub skip_writing: bool,
}

/// How the partitioned store is written on this run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "mode", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum WriteMode {
    /// First run against an empty watermark store: full overwrite.
    Bootstrap,
    /// Any later run: partition-scoped writes, or nothing at all.
    Incremental(IncrementalMode),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum IncrementalMode {
    /// Every input ticker is already current.
    NoOp,
    /// Only partitions present in the filtered frame are written.
    Delta,
}

impl WriteMode {
    pub fn skip_writing(&self) -> bool {
        matches!(self, WriteMode::Incremental(IncrementalMode::NoOp))
    }

    pub fn is_bootstrap(&self) -> bool {
        matches!(self, WriteMode::Bootstrap)
    }

    pub fn label(&self) -> &'static str {
        match self {
            WriteMode::Bootstrap => "overwrite",
            WriteMode::Incremental(IncrementalMode::Delta) => "append",
            WriteMode::Incremental(IncrementalMode::NoOp) => "skip",
        }
    }
}

/// Partition of all known tickers for one run.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TickerClassification {
    pub new: BTreeSet<String>,
    pub updated: BTreeSet<String>,
    pub missing: BTreeSet<String>,
    pub current: BTreeSet<String>,
}

impl TickerClassification {
    /// Tickers whose rows must be written this run.
    pub fn to_write(&self) -> impl Iterator<Item = &String> {
        self.new.iter().chain(self.updated.iter())
    }

    /// True when no ticker appears in more than one set.
    pub fn is_disjoint(&self) -> bool {
        let sets = [&self.new, &self.updated, &self.missing, &self.current];
        sets.iter().enumerate().all(|(i, a)| {
            sets.iter()
                .skip(i + 1)
                .all(|b| a.intersection(b).next().is_none())
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ts(s: &str) -> NaiveDateTime {
        NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S").unwrap()
    }

    #[test]
    fn bar_derives_calendar_fields() {
        let bar = Bar {
            ticker: "AAPL".into(),
            date_time: ts("2024-02-15 09:30:00"),
            open: 1.0,
            high: 1.0,
            low: 1.0,
            close: 1.0,
            volume: 10,
        };
        assert_eq!(bar.year(), 2024);
        assert_eq!(bar.month(), 2);
        assert_eq!(bar.time(), "09:30:00");
        assert_eq!(bar.date(), NaiveDate::from_ymd_opt(2024, 2, 15).unwrap());
    }

    #[test]
    fn stub_is_consistent() {
        assert!(WatermarkRecord::stub("AAPL").is_consistent());
        let inverted = WatermarkRecord {
            ticker: "AAPL".into(),
            row_count: 2,
            oldest_date: Some(ts("2024-02-01 00:00:00")),
            latest_date: Some(ts("2024-01-01 00:00:00")),
        };
        assert!(!inverted.is_consistent());
    }

    #[test]
    fn write_mode_flags() {
        assert!(WriteMode::Bootstrap.is_bootstrap());
        assert!(!WriteMode::Bootstrap.skip_writing());
        assert!(WriteMode::Incremental(IncrementalMode::NoOp).skip_writing());
        assert!(!WriteMode::Incremental(IncrementalMode::Delta).skip_writing());
        assert_eq!(WriteMode::Incremental(IncrementalMode::Delta).label(), "append");
    }

    #[test]
    fn write_mode_serializes_tagged() {
        let json = serde_json::to_string(&WriteMode::Incremental(IncrementalMode::NoOp)).unwrap();
        assert_eq!(json, r#"{"type":"INCREMENTAL","mode":"NO_OP"}"#);
        let back: WriteMode = serde_json::from_str(&json).unwrap();
        assert!(back.skip_writing());
    }

    #[test]
    fn classification_disjointness_check() {
        let mut c = TickerClassification::default();
        c.new.insert("MSFT".into());
        c.updated.insert("AAPL".into());
        assert!(c.is_disjoint());
        c.current.insert("AAPL".into());
        assert!(!c.is_disjoint());
    }
}
