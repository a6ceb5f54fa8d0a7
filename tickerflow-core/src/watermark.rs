//! Per-ticker aggregation and watermark record updates.
//!
//! Both run kinds recount from the partitioned store rather than from the
//! input, so a record always matches what is stored for its ticker:
//!
//! - Bootstrap runs aggregate the whole store and set each record outright
//! - Incremental runs aggregate every stored partition of the tickers they
//!   wrote; `row_count` is replaced by the recount, `latest_date` only moves
//!   forward, and an established `oldest_date` is kept

use std::collections::BTreeSet;

use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};

use crate::domain::{WatermarkRecord, WatermarkSnapshot};
use crate::error::Result;
use crate::frame::BarFrame;

/// Aggregate over one ticker's rows in the aggregation scope.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TickerAggregate {
    pub ticker: String,
    pub row_count: u64,
    /// Only computed for tickers in the `new` set.
    pub oldest_date: Option<NaiveDateTime>,
    pub latest_date: NaiveDateTime,
}

/// Which tickers get an `oldest_date` from the aggregation.
#[derive(Debug, Clone, Copy)]
pub enum OldestDateScope<'a> {
    AllTickers,
    NewTickers(&'a BTreeSet<String>),
}

/// Group `frame` by ticker: row count, max date, and min date where in scope.
pub fn aggregate(frame: &BarFrame, scope: OldestDateScope<'_>) -> Result<Vec<TickerAggregate>> {
    Ok(frame
        .ticker_stats()?
        .into_iter()
        .map(|s| {
            let with_oldest = match scope {
                OldestDateScope::AllTickers => true,
                OldestDateScope::NewTickers(new) => new.contains(&s.ticker),
            };
            TickerAggregate {
                oldest_date: with_oldest.then_some(s.min_date_time),
                latest_date: s.max_date_time,
                row_count: s.row_count,
                ticker: s.ticker,
            }
        })
        .collect())
}

/// Tickers whose record should receive an `oldest_date` on an incremental
/// run: the new ones, plus stored records that never got one (bootstrap stubs
/// whose run did not finish).
pub fn needs_oldest_date(new: &BTreeSet<String>, snapshot: &WatermarkSnapshot) -> BTreeSet<String> {
    let unset = snapshot
        .values()
        .filter(|r| r.oldest_date.is_none())
        .map(|r| r.ticker.clone());
    new.iter().cloned().chain(unset).collect()
}

/// Records for a bootstrap run: straight from a full-store aggregate.
pub fn bootstrap_records(aggregates: &[TickerAggregate]) -> Vec<WatermarkRecord> {
    aggregates
        .iter()
        .map(|a| WatermarkRecord {
            ticker: a.ticker.clone(),
            row_count: a.row_count,
            oldest_date: a.oldest_date.or(Some(a.latest_date)),
            latest_date: Some(a.latest_date),
        })
        .collect()
}

/// Records for an incremental run, from a recount of the written tickers'
/// stored partitions.
///
/// Every aggregate yields one record. Tickers without an aggregate are not
/// touched.
pub fn incremental_records(
    snapshot: &WatermarkSnapshot,
    aggregates: &[TickerAggregate],
) -> Vec<WatermarkRecord> {
    aggregates
        .iter()
        .map(|a| {
            let prev = snapshot.get(&a.ticker);
            WatermarkRecord {
                ticker: a.ticker.clone(),
                row_count: a.row_count,
                oldest_date: prev
                    .and_then(|p| p.oldest_date)
                    .or(a.oldest_date)
                    .or(Some(a.latest_date)),
                latest_date: Some(
                    prev.and_then(|p| p.latest_date)
                        .map_or(a.latest_date, |d| d.max(a.latest_date)),
                ),
            }
        })
        .collect()
}
