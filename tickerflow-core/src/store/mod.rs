//! Watermark store: one document per ticker plus one artifact per run.
//!
//! The `WatermarkStore` trait abstracts over where the documents live so the
//! reconciler can be exercised against an in-memory store in tests. Read
//! failures surface as [`EtlError::StoreRead`](crate::error::EtlError::StoreRead),
//! write failures as [`EtlError::StoreWrite`](crate::error::EtlError::StoreWrite).

pub mod json;
pub mod memory;

use std::collections::BTreeSet;

use crate::domain::{RunArtifact, WatermarkRecord, WatermarkSnapshot};
use crate::error::Result;

pub use json::JsonWatermarkStore;
pub use memory::MemoryWatermarkStore;

pub trait WatermarkStore: Send + Sync {
    /// Every watermark record, keyed by ticker.
    fn read_snapshot(&self) -> Result<WatermarkSnapshot>;

    /// Create or replace one record per ticker.
    fn upsert_records(&self, records: &[WatermarkRecord]) -> Result<()>;

    /// Create a zero-row stub for each ticker that has no record yet.
    ///
    /// Returns the number of stubs created.
    fn create_bootstrap(&self, tickers: &BTreeSet<String>) -> Result<usize>;

    /// Persist a run artifact. A run id can only be recorded once.
    fn record_run(&self, artifact: &RunArtifact) -> Result<()>;

    /// All recorded runs, oldest first.
    fn list_runs(&self) -> Result<Vec<RunArtifact>>;
}
