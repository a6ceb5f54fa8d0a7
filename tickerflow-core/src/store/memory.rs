//! In-memory watermark store with failure injection, for tests and dry runs.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;

use super::WatermarkStore;
use crate::domain::{RunArtifact, WatermarkRecord, WatermarkSnapshot};
use crate::error::{EtlError, Result};

#[derive(Default)]
struct Inner {
    records: WatermarkSnapshot,
    runs: BTreeMap<String, RunArtifact>,
}

#[derive(Default)]
pub struct MemoryWatermarkStore {
    inner: Mutex<Inner>,
    fail_reads: AtomicBool,
    fail_writes: AtomicBool,
}

impl MemoryWatermarkStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_records(records: impl IntoIterator<Item = WatermarkRecord>) -> Self {
        let store = Self::new();
        if let Ok(mut inner) = store.inner.lock() {
            inner.records = records.into_iter().map(|r| (r.ticker.clone(), r)).collect();
        }
        store
    }

    /// Make every subsequent read fail with `StoreRead`.
    pub fn set_fail_reads(&self, fail: bool) {
        self.fail_reads.store(fail, Ordering::SeqCst);
    }

    /// Make every subsequent write fail with `StoreWrite`.
    pub fn set_fail_writes(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::SeqCst);
    }

    fn check_write(&self) -> Result<()> {
        if self.fail_writes.load(Ordering::SeqCst) {
            return Err(EtlError::StoreWrite("injected write failure".into()));
        }
        Ok(())
    }

    fn read_lock(&self) -> Result<std::sync::MutexGuard<'_, Inner>> {
        if self.fail_reads.load(Ordering::SeqCst) {
            return Err(EtlError::StoreRead("injected read failure".into()));
        }
        self.inner
            .lock()
            .map_err(|_| EtlError::StoreRead("store lock poisoned".into()))
    }

    fn write_lock(&self) -> Result<std::sync::MutexGuard<'_, Inner>> {
        self.check_write()?;
        self.inner
            .lock()
            .map_err(|_| EtlError::StoreWrite("store lock poisoned".into()))
    }
}

impl WatermarkStore for MemoryWatermarkStore {
    fn read_snapshot(&self) -> Result<WatermarkSnapshot> {
        Ok(self.read_lock()?.records.clone())
    }

    fn upsert_records(&self, records: &[WatermarkRecord]) -> Result<()> {
        let mut inner = self.write_lock()?;
        for record in records {
            inner.records.insert(record.ticker.clone(), record.clone());
        }
        Ok(())
    }

    fn create_bootstrap(&self, tickers: &BTreeSet<String>) -> Result<usize> {
        let mut inner = self.write_lock()?;
        let mut created = 0;
        for ticker in tickers {
            if !inner.records.contains_key(ticker) {
                inner
                    .records
                    .insert(ticker.clone(), WatermarkRecord::stub(ticker.as_str()));
                created += 1;
            }
        }
        Ok(created)
    }

    fn record_run(&self, artifact: &RunArtifact) -> Result<()> {
        let mut inner = self.write_lock()?;
        if inner.runs.contains_key(&artifact.run_id) {
            return Err(EtlError::StoreWrite(format!(
                "run '{}' is already recorded",
                artifact.run_id
            )));
        }
        inner.runs.insert(artifact.run_id.clone(), artifact.clone());
        Ok(())
    }

    fn list_runs(&self) -> Result<Vec<RunArtifact>> {
        let mut runs: Vec<RunArtifact> = self.read_lock()?.runs.values().cloned().collect();
        runs.sort_by(|a, b| {
            a.created_at
                .cmp(&b.created_at)
                .then_with(|| a.run_id.cmp(&b.run_id))
        });
        Ok(runs)
    }
}
