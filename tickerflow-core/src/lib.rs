//! TickerFlow Core: incremental reconciliation of per-ticker bar files.
//!
//! This crate contains the ETL core:
//! - Fixed raw/normalized column layout
//! - Input loader (one CSV per ticker, ticker from file name)
//! - Polars-backed bar frame with group-by, filter and partition split
//! - Watermark store trait with JSON-document and in-memory backends
//! - Reconciliation engine: new / updated / missing / current, write mode
//! - Partitioned Parquet store (`ticker=/year=/month=`)
//! - Per-ticker aggregation and watermark merge rules

pub mod domain;
pub mod error;
pub mod frame;
pub mod loader;
pub mod partition;
pub mod reconcile;
pub mod schema;
pub mod store;
pub mod watermark;

pub use domain::{
    Bar, IncrementalMode, RunArtifact, TickerClassification, WatermarkRecord, WatermarkSnapshot,
    WriteMode,
};
pub use error::EtlError;
pub use frame::BarFrame;
pub use loader::InputLoader;
pub use partition::{ParquetPartitionStore, PartitionFilter, PartitionKey, PartitionSink, WriteOutcome};
pub use reconcile::{classify, Classified, Reconciler, Reconciliation, WatermarkUpdateRequest};
pub use store::{JsonWatermarkStore, MemoryWatermarkStore, WatermarkStore};
