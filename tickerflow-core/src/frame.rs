//! Polars-backed bar frame.
//!
//! `BarFrame` is the only tabular type the reconciliation logic sees. It
//! keeps the normalized column layout from [`crate::schema`] and exposes the
//! handful of bulk operations the pipeline needs: group-by aggregates,
//! ticker filters and the partition split used by the writer.

use std::collections::{BTreeMap, BTreeSet};

use chrono::{DateTime, NaiveDate, NaiveDateTime};
use polars::prelude::*;

use crate::domain::Bar;
use crate::error::{EtlError, Result};
use crate::partition::PartitionKey;
use crate::schema::{self, BarSchema};

/// Per-ticker statistics over a frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TickerStats {
    pub ticker: String,
    pub row_count: u64,
    pub min_date_time: NaiveDateTime,
    pub max_date_time: NaiveDateTime,
}

#[derive(Debug, Clone)]
pub struct BarFrame {
    df: DataFrame,
}

impl BarFrame {
    /// An empty frame with the normalized schema.
    pub fn empty() -> Result<Self> {
        Self::from_bars(&[])
    }

    /// Build a frame from bars, in the order given.
    pub fn from_bars(bars: &[Bar]) -> Result<Self> {
        let epoch = epoch();
        let tickers: Vec<&str> = bars.iter().map(|b| b.ticker.as_str()).collect();
        let date_times: Vec<i64> = bars
            .iter()
            .map(|b| b.date_time.and_utc().timestamp_millis())
            .collect();
        let years: Vec<i32> = bars.iter().map(|b| b.year()).collect();
        let months: Vec<i32> = bars.iter().map(|b| b.month()).collect();
        let dates: Vec<i32> = bars
            .iter()
            .map(|b| (b.date() - epoch).num_days() as i32)
            .collect();
        let times: Vec<String> = bars.iter().map(|b| b.time()).collect();
        let opens: Vec<f64> = bars.iter().map(|b| b.open).collect();
        let highs: Vec<f64> = bars.iter().map(|b| b.high).collect();
        let lows: Vec<f64> = bars.iter().map(|b| b.low).collect();
        let closes: Vec<f64> = bars.iter().map(|b| b.close).collect();
        let volumes: Vec<i64> = bars.iter().map(|b| b.volume).collect();

        let df = DataFrame::new(vec![
            Column::new(schema::TICKER.into(), tickers),
            Column::new(schema::DATE_TIME.into(), date_times)
                .cast(&DataType::Datetime(TimeUnit::Milliseconds, None))?,
            Column::new(schema::YEAR.into(), years),
            Column::new(schema::MONTH.into(), months),
            Column::new(schema::DATE.into(), dates).cast(&DataType::Date)?,
            Column::new(schema::TIME.into(), times),
            Column::new(schema::OPEN.into(), opens),
            Column::new(schema::HIGH.into(), highs),
            Column::new(schema::LOW.into(), lows),
            Column::new(schema::CLOSE.into(), closes),
            Column::new(schema::VOLUME.into(), volumes),
        ])?;

        Ok(Self { df })
    }

    /// Wrap an existing DataFrame, checking it against the normalized schema.
    ///
    /// Columns are reordered to the canonical layout.
    pub fn from_dataframe(df: DataFrame) -> Result<Self> {
        BarSchema::validate(&df)?;
        let df = df.select(BarSchema::COLUMNS)?;
        Ok(Self { df })
    }

    pub fn as_dataframe(&self) -> &DataFrame {
        &self.df
    }

    pub fn into_dataframe(self) -> DataFrame {
        self.df
    }

    pub fn height(&self) -> usize {
        self.df.height()
    }

    pub fn is_empty(&self) -> bool {
        self.df.height() == 0
    }

    /// Sort by `(ticker, date_time)` ascending, keeping input order for ties.
    pub fn sorted(self) -> Result<Self> {
        let df = self
            .df
            .lazy()
            .sort(
                [schema::TICKER, schema::DATE_TIME],
                SortMultipleOptions::default()
                    .with_order_descending_multi([false, false])
                    .with_maintain_order(true),
            )
            .collect()?;
        Ok(Self { df })
    }

    /// Append the rows of `other`.
    pub fn vstack(&mut self, other: &BarFrame) -> Result<()> {
        self.df.vstack_mut(&other.df)?;
        Ok(())
    }

    /// Distinct tickers present in the frame.
    pub fn tickers(&self) -> Result<BTreeSet<String>> {
        let tickers = self.df.column(schema::TICKER)?.str()?;
        Ok(tickers.into_iter().flatten().map(str::to_string).collect())
    }

    /// Latest `date_time` per ticker (group-by max).
    pub fn latest_by_ticker(&self) -> Result<BTreeMap<String, NaiveDateTime>> {
        let out = self
            .df
            .clone()
            .lazy()
            .group_by([col(schema::TICKER)])
            .agg([col(schema::DATE_TIME).max().alias("latest_date")])
            .collect()?;

        let tickers = out.column(schema::TICKER)?.str()?;
        let latest = out.column("latest_date")?.cast(&DataType::Int64)?;
        let latest = latest.i64()?;

        let mut map = BTreeMap::new();
        for (ticker, millis) in tickers.into_iter().zip(latest.into_iter()) {
            if let (Some(ticker), Some(millis)) = (ticker, millis) {
                map.insert(ticker.to_string(), millis_to_datetime(millis)?);
            }
        }
        Ok(map)
    }

    /// Row count, min and max `date_time` per ticker, ordered by ticker.
    pub fn ticker_stats(&self) -> Result<Vec<TickerStats>> {
        let out = self
            .df
            .clone()
            .lazy()
            .group_by([col(schema::TICKER)])
            .agg([
                len().alias("row_count"),
                col(schema::DATE_TIME).min().alias("oldest_date"),
                col(schema::DATE_TIME).max().alias("latest_date"),
            ])
            .sort([schema::TICKER], SortMultipleOptions::default())
            .collect()?;

        let tickers = out.column(schema::TICKER)?.str()?;
        let counts = out.column("row_count")?.cast(&DataType::UInt64)?;
        let counts = counts.u64()?;
        let oldest = out.column("oldest_date")?.cast(&DataType::Int64)?;
        let oldest = oldest.i64()?;
        let latest = out.column("latest_date")?.cast(&DataType::Int64)?;
        let latest = latest.i64()?;

        let mut stats = Vec::with_capacity(out.height());
        for i in 0..out.height() {
            let (Some(ticker), Some(count), Some(min), Some(max)) =
                (tickers.get(i), counts.get(i), oldest.get(i), latest.get(i))
            else {
                continue;
            };
            stats.push(TickerStats {
                ticker: ticker.to_string(),
                row_count: count,
                min_date_time: millis_to_datetime(min)?,
                max_date_time: millis_to_datetime(max)?,
            });
        }
        Ok(stats)
    }

    /// Drop every row whose ticker is in `excluded`.
    pub fn exclude_tickers(&self, excluded: &BTreeSet<String>) -> Result<Self> {
        if excluded.is_empty() {
            return Ok(self.clone());
        }
        let tickers = self.df.column(schema::TICKER)?.str()?;
        let mask: BooleanChunked = tickers
            .into_iter()
            .map(|t| Some(!t.is_some_and(|t| excluded.contains(t))))
            .collect();
        Ok(Self {
            df: self.df.filter(&mask)?,
        })
    }

    /// Split into one frame per `(ticker, year, month)` partition.
    pub fn partitions(&self) -> Result<BTreeMap<PartitionKey, BarFrame>> {
        let tickers = self.df.column(schema::TICKER)?.str()?;
        let years = self.df.column(schema::YEAR)?.i32()?;
        let months = self.df.column(schema::MONTH)?.i32()?;

        let mut rows: BTreeMap<PartitionKey, Vec<IdxSize>> = BTreeMap::new();
        for i in 0..self.df.height() {
            let (Some(ticker), Some(year), Some(month)) =
                (tickers.get(i), years.get(i), months.get(i))
            else {
                return Err(EtlError::Frame(format!("null partition column at row {i}")));
            };
            rows.entry(PartitionKey::new(ticker, year, month))
                .or_default()
                .push(i as IdxSize);
        }

        let mut parts = BTreeMap::new();
        for (key, idx) in rows {
            let idx = IdxCa::from_vec("idx".into(), idx);
            parts.insert(key, BarFrame { df: self.df.take(&idx)? });
        }
        Ok(parts)
    }

    /// Convert back to bars.
    pub fn to_bars(&self) -> Result<Vec<Bar>> {
        let df = &self.df;
        let tickers = df.column(schema::TICKER)?.str()?;
        let date_times = df.column(schema::DATE_TIME)?.cast(&DataType::Int64)?;
        let date_times = date_times.i64()?;
        let opens = df.column(schema::OPEN)?.f64()?;
        let highs = df.column(schema::HIGH)?.f64()?;
        let lows = df.column(schema::LOW)?.f64()?;
        let closes = df.column(schema::CLOSE)?.f64()?;
        let volumes = df.column(schema::VOLUME)?.i64()?;

        let mut bars = Vec::with_capacity(df.height());
        for i in 0..df.height() {
            let ticker = tickers
                .get(i)
                .ok_or_else(|| EtlError::Frame(format!("null ticker at row {i}")))?;
            let millis = date_times
                .get(i)
                .ok_or_else(|| EtlError::Frame(format!("null date_time at row {i}")))?;
            bars.push(Bar {
                ticker: ticker.to_string(),
                date_time: millis_to_datetime(millis)?,
                open: opens.get(i).unwrap_or(f64::NAN),
                high: highs.get(i).unwrap_or(f64::NAN),
                low: lows.get(i).unwrap_or(f64::NAN),
                close: closes.get(i).unwrap_or(f64::NAN),
                volume: volumes.get(i).unwrap_or(0),
            });
        }
        Ok(bars)
    }
}

fn epoch() -> NaiveDate {
    NaiveDate::default()
}

fn millis_to_datetime(millis: i64) -> Result<NaiveDateTime> {
    DateTime::from_timestamp_millis(millis)
        .map(|dt| dt.naive_utc())
        .ok_or_else(|| EtlError::Frame(format!("timestamp out of range: {millis}")))
}
