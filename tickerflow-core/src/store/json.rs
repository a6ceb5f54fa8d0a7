//! Directory-of-JSON-documents watermark store.
//!
//! Layout:
//! - `{root}/watermarks/{TICKER}.json`
//! - `{root}/runs/{RUN_ID}.json`
//!
//! Documents are written atomically (write to .tmp, rename into place). A
//! root that does not exist yet reads as an empty store.

use std::collections::BTreeSet;
use std::fs;
use std::path::{Path, PathBuf};

use serde::de::DeserializeOwned;
use serde::Serialize;
use tracing::debug;

use super::WatermarkStore;
use crate::domain::{RunArtifact, WatermarkRecord, WatermarkSnapshot};
use crate::error::{EtlError, Result};

pub struct JsonWatermarkStore {
    root: PathBuf,
}

impl JsonWatermarkStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn watermark_dir(&self) -> PathBuf {
        self.root.join("watermarks")
    }

    fn runs_dir(&self) -> PathBuf {
        self.root.join("runs")
    }

    fn watermark_path(&self, ticker: &str) -> PathBuf {
        self.watermark_dir().join(format!("{ticker}.json"))
    }

    fn run_path(&self, run_id: &str) -> PathBuf {
        self.runs_dir().join(format!("{run_id}.json"))
    }
}

impl WatermarkStore for JsonWatermarkStore {
    fn read_snapshot(&self) -> Result<WatermarkSnapshot> {
        let records: Vec<WatermarkRecord> = read_documents(&self.watermark_dir())?;
        Ok(records
            .into_iter()
            .map(|r| (r.ticker.clone(), r))
            .collect())
    }

    fn upsert_records(&self, records: &[WatermarkRecord]) -> Result<()> {
        for record in records {
            write_document(&self.watermark_path(&record.ticker), record)?;
        }
        debug!(count = records.len(), "watermark records upserted");
        Ok(())
    }

    fn create_bootstrap(&self, tickers: &BTreeSet<String>) -> Result<usize> {
        let mut created = 0;
        for ticker in tickers {
            let path = self.watermark_path(ticker);
            if path.exists() {
                continue;
            }
            write_document(&path, &WatermarkRecord::stub(ticker.as_str()))?;
            created += 1;
        }
        Ok(created)
    }

    fn record_run(&self, artifact: &RunArtifact) -> Result<()> {
        let path = self.run_path(&artifact.run_id);
        if path.exists() {
            return Err(EtlError::StoreWrite(format!(
                "run '{}' is already recorded",
                artifact.run_id
            )));
        }
        write_document(&path, artifact)
    }

    fn list_runs(&self) -> Result<Vec<RunArtifact>> {
        let mut runs: Vec<RunArtifact> = read_documents(&self.runs_dir())?;
        runs.sort_by(|a, b| {
            a.created_at
                .cmp(&b.created_at)
                .then_with(|| a.run_id.cmp(&b.run_id))
        });
        Ok(runs)
    }
}

/// Read every `*.json` document in `dir`. A missing directory yields nothing.
fn read_documents<T: DeserializeOwned>(dir: &Path) -> Result<Vec<T>> {
    if !dir.exists() {
        return Ok(Vec::new());
    }

    let entries = fs::read_dir(dir)
        .map_err(|e| EtlError::StoreRead(format!("read dir {}: {e}", dir.display())))?;

    let mut docs = Vec::new();
    for entry in entries {
        let path = entry
            .map_err(|e| EtlError::StoreRead(format!("dir entry: {e}")))?
            .path();
        if path.extension().and_then(|e| e.to_str()) != Some("json") {
            continue;
        }
        let content = fs::read_to_string(&path)
            .map_err(|e| EtlError::StoreRead(format!("read {}: {e}", path.display())))?;
        let doc = serde_json::from_str(&content)
            .map_err(|e| EtlError::StoreRead(format!("parse {}: {e}", path.display())))?;
        docs.push(doc);
    }
    Ok(docs)
}

fn write_document<T: Serialize>(path: &Path, doc: &T) -> Result<()> {
    if let Some(dir) = path.parent() {
        fs::create_dir_all(dir)
            .map_err(|e| EtlError::StoreWrite(format!("create {}: {e}", dir.display())))?;
    }
    let json = serde_json::to_string_pretty(doc)
        .map_err(|e| EtlError::StoreWrite(format!("serialize: {e}")))?;

    let tmp_path = path.with_extension("json.tmp");
    fs::write(&tmp_path, json)
        .map_err(|e| EtlError::StoreWrite(format!("write {}: {e}", tmp_path.display())))?;
    fs::rename(&tmp_path, path).map_err(|e| {
        let _ = fs::remove_file(&tmp_path);
        EtlError::StoreWrite(format!("atomic rename failed: {e}"))
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDateTime;

    fn ts(s: &str) -> NaiveDateTime {
        NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S").unwrap()
    }

    fn record(ticker: &str, rows: u64) -> WatermarkRecord {
        WatermarkRecord {
            ticker: ticker.into(),
            row_count: rows,
            oldest_date: Some(ts("2024-01-02 00:00:00")),
            latest_date: Some(ts("2024-01-31 00:00:00")),
        }
    }

    #[test]
    fn missing_root_is_empty_snapshot() {
        let dir = tempfile::tempdir().unwrap();
        let store = JsonWatermarkStore::new(dir.path().join("nothing-here"));
        assert!(store.read_snapshot().unwrap().is_empty());
        assert!(store.list_runs().unwrap().is_empty());
    }

    #[test]
    fn upsert_then_read() {
        let dir = tempfile::tempdir().unwrap();
        let store = JsonWatermarkStore::new(dir.path());

        store.upsert_records(&[record("AAPL", 10)]).unwrap();
        store.upsert_records(&[record("AAPL", 12), record("MSFT", 3)]).unwrap();

        let snapshot = store.read_snapshot().unwrap();
        assert_eq!(snapshot.len(), 2);
        assert_eq!(snapshot["AAPL"].row_count, 12);
        assert_eq!(snapshot["MSFT"].latest_date, Some(ts("2024-01-31 00:00:00")));
    }

    #[test]
    fn bootstrap_stubs_do_not_overwrite() {
        let dir = tempfile::tempdir().unwrap();
        let store = JsonWatermarkStore::new(dir.path());
        store.upsert_records(&[record("AAPL", 10)]).unwrap();

        let tickers = BTreeSet::from(["AAPL".to_string(), "MSFT".to_string()]);
        assert_eq!(store.create_bootstrap(&tickers).unwrap(), 1);

        let snapshot = store.read_snapshot().unwrap();
        assert_eq!(snapshot["AAPL"].row_count, 10);
        assert_eq!(snapshot["MSFT"], WatermarkRecord::stub("MSFT"));
    }

    #[test]
    fn run_ids_are_write_once() {
        let dir = tempfile::tempdir().unwrap();
        let store = JsonWatermarkStore::new(dir.path());
        let artifact = RunArtifact {
            run_id: "run-1".into(),
            created_at: ts("2024-02-15 18:00:00"),
            tickers_missing: BTreeSet::new(),
            tickers_new: BTreeSet::from(["AAPL".to_string()]),
            tickers_updated: BTreeSet::new(),
            skip_writing: false,
        };

        store.record_run(&artifact).unwrap();
        let err = store.record_run(&artifact).unwrap_err();
        assert!(matches!(err, EtlError::StoreWrite(_)));
        assert_eq!(store.list_runs().unwrap(), vec![artifact]);
    }

    #[test]
    fn corrupt_document_is_read_error() {
        let dir = tempfile::tempdir().unwrap();
        let store = JsonWatermarkStore::new(dir.path());
        fs::create_dir_all(dir.path().join("watermarks")).unwrap();
        fs::write(dir.path().join("watermarks/AAPL.json"), "{not json").unwrap();

        let err = store.read_snapshot().unwrap_err();
        assert!(matches!(err, EtlError::StoreRead(_)));
    }
}
