//! Column layout contract for raw input files and the normalized bar frame.
//!
//! Raw files carry `date, open, high, low, close, volume`. The loader turns
//! them into the normalized layout below, which is also what every Parquet
//! partition stores.
//!
//! - Sort order: ascending by `(ticker, date_time)`
//! - Partitioning: Hive-style `ticker=XXX/year=YYYY/month=M/` directories
//! - Timestamps: naive, millisecond precision, as found in the source files

use polars::prelude::*;

/// Columns expected in the header row of every raw input file.
pub const RAW_COLUMNS: &[&str] = &["date", "open", "high", "low", "close", "volume"];

/// Columns the store is partitioned by, outermost first.
pub const PARTITION_COLUMNS: &[&str] = &["ticker", "year", "month"];

pub const TICKER: &str = "ticker";
pub const DATE_TIME: &str = "date_time";
pub const YEAR: &str = "year";
pub const MONTH: &str = "month";
pub const DATE: &str = "date";
pub const TIME: &str = "time";
pub const OPEN: &str = "open";
pub const HIGH: &str = "high";
pub const LOW: &str = "low";
pub const CLOSE: &str = "close";
pub const VOLUME: &str = "volume";

/// Normalized bar schema.
pub struct BarSchema;

impl BarSchema {
    /// Column order of the normalized frame.
    pub const COLUMNS: [&'static str; 11] = [
        TICKER, DATE_TIME, YEAR, MONTH, DATE, TIME, OPEN, HIGH, LOW, CLOSE, VOLUME,
    ];

    pub fn schema() -> Schema {
        Schema::from_iter(vec![
            Field::new(TICKER.into(), DataType::String),
            Field::new(
                DATE_TIME.into(),
                DataType::Datetime(TimeUnit::Milliseconds, None),
            ),
            Field::new(YEAR.into(), DataType::Int32),
            Field::new(MONTH.into(), DataType::Int32),
            Field::new(DATE.into(), DataType::Date),
            Field::new(TIME.into(), DataType::String),
            Field::new(OPEN.into(), DataType::Float64),
            Field::new(HIGH.into(), DataType::Float64),
            Field::new(LOW.into(), DataType::Float64),
            Field::new(CLOSE.into(), DataType::Float64),
            Field::new(VOLUME.into(), DataType::Int64),
        ])
    }

    /// Validate a DataFrame against the normalized schema.
    pub fn validate(df: &DataFrame) -> Result<(), SchemaError> {
        let expected = Self::schema();
        let actual = df.schema();

        for field in expected.iter_fields() {
            let actual_dtype = actual
                .get(field.name())
                .ok_or_else(|| SchemaError::MissingColumn(field.name().to_string()))?;
            if actual_dtype != field.dtype() {
                return Err(SchemaError::TypeMismatch {
                    column: field.name().to_string(),
                    expected: field.dtype().clone(),
                    actual: actual_dtype.clone(),
                });
            }
        }

        Ok(())
    }
}

/// Check a raw CSV header against [`RAW_COLUMNS`].
///
/// Column names are compared case-insensitively after trimming; extra
/// trailing columns are rejected too, since the layout is fixed.
pub fn validate_raw_header<'a>(
    header: impl IntoIterator<Item = &'a str>,
) -> Result<(), SchemaError> {
    let found: Vec<String> = header
        .into_iter()
        .map(|h| h.trim().to_ascii_lowercase())
        .collect();

    for expected in RAW_COLUMNS {
        if !found.iter().any(|h| h == expected) {
            return Err(SchemaError::MissingColumn((*expected).to_string()));
        }
    }
    if found.len() != RAW_COLUMNS.len() {
        return Err(SchemaError::UnexpectedColumns(found));
    }
    Ok(())
}

#[derive(Debug, thiserror::Error)]
pub enum SchemaError {
    #[error("missing required column: {0}")]
    MissingColumn(String),

    #[error("type mismatch in column {column}: expected {expected:?}, got {actual:?}")]
    TypeMismatch {
        column: String,
        expected: DataType,
        actual: DataType,
    },

    #[error("unexpected columns in header: {0:?}")]
    UnexpectedColumns(Vec<String>),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn schema_has_all_normalized_columns() {
        let schema = BarSchema::schema();
        for name in BarSchema::COLUMNS {
            assert!(schema.contains(name), "missing {name}");
        }
        assert_eq!(schema.len(), BarSchema::COLUMNS.len());
    }

    #[test]
    fn partition_columns_are_part_of_schema() {
        let schema = BarSchema::schema();
        for name in PARTITION_COLUMNS {
            assert!(schema.contains(name));
        }
    }

    #[test]
    fn raw_header_accepts_fixed_layout() {
        assert!(validate_raw_header(["date", "open", "high", "low", "close", "volume"]).is_ok());
        assert!(validate_raw_header([" Date", "Open", "HIGH", "low", "close", "Volume "]).is_ok());
    }

    #[test]
    fn raw_header_rejects_missing_column() {
        let err = validate_raw_header(["date", "open", "high", "low", "close"]).unwrap_err();
        assert!(matches!(err, SchemaError::MissingColumn(ref c) if c == "volume"));
    }

    #[test]
    fn raw_header_rejects_extra_column() {
        let err = validate_raw_header([
            "date", "open", "high", "low", "close", "volume", "adj_close",
        ])
        .unwrap_err();
        assert!(matches!(err, SchemaError::UnexpectedColumns(_)));
    }

    #[test]
    fn validate_rejects_wrong_type() {
        let df = DataFrame::new(vec![Column::new(TICKER.into(), &[1i64])]).unwrap();
        let err = BarSchema::validate(&df).unwrap_err();
        assert!(matches!(err, SchemaError::TypeMismatch { .. }));
    }
}
