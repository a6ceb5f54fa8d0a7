//! Structured error types for the ETL core.
//!
//! Each variant maps to one failure class of a run. All of them are fatal to
//! the run that raised them; none are retried here.

use std::path::PathBuf;

use polars::prelude::PolarsError;
use thiserror::Error;

use crate::schema::SchemaError;

#[derive(Debug, Error)]
pub enum EtlError {
    /// Bad input location, raised before anything is read.
    #[error("input folder not found: {}", .0.display())]
    Config(PathBuf),

    /// The input folder produced zero rows.
    #[error("the stock data in '{}' is empty", .0.display())]
    EmptyInput(PathBuf),

    #[error("malformed input in {file} (line {line}): {reason}")]
    Parse {
        file: String,
        line: u64,
        reason: String,
    },

    #[error("schema error: {0}")]
    Schema(#[from] SchemaError),

    /// Watermark snapshot could not be read. Aborts before any write.
    #[error("watermark store read failed: {0}")]
    StoreRead(String),

    /// Partitioned write failed. Aborts before the watermark upsert.
    #[error("could not save partitioned data: {0}")]
    Write(String),

    #[error("could not read partitioned data: {0}")]
    Scan(String),

    /// Watermark upsert failed after data was written.
    #[error("watermark store write failed: {0}")]
    StoreWrite(String),

    #[error("frame error: {0}")]
    Frame(String),
}

impl From<PolarsError> for EtlError {
    fn from(e: PolarsError) -> Self {
        EtlError::Frame(e.to_string())
    }
}

pub type Result<T> = std::result::Result<T, EtlError>;
