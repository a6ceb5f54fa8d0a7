//! Property tests for reconciliation and watermark invariants.
//!
//! Uses proptest to verify:
//! 1. Classification: new / updated / current are disjoint and cover the input
//! 2. Bootstrap: an empty snapshot makes every ticker new and writes every row
//! 3. Tie-break: equal latest timestamps always classify as current
//! 4. Idempotence: reclassifying after watermarks caught up is a no-op
//! 5. Monotonic watermarks: an incremental merge never moves `latest_date` back
//!    and never replaces an established `oldest_date`

use std::collections::{BTreeMap, BTreeSet};

use chrono::{Duration, NaiveDate, NaiveDateTime};
use proptest::prelude::*;
use tickerflow_core::reconcile::partition_tickers;
use tickerflow_core::watermark::{self, OldestDateScope, TickerAggregate};
use tickerflow_core::{classify, Bar, BarFrame, WatermarkRecord, WatermarkSnapshot, WriteMode};

// ── Strategies (proptest) ────────────────────────────────────────────

const TICKERS: [&str; 6] = ["AAPL", "MSFT", "NVDA", "TSLA", "AMZN", "META"];

fn base() -> NaiveDateTime {
    NaiveDate::from_ymd_opt(2024, 1, 1)
        .unwrap()
        .and_hms_opt(0, 0, 0)
        .unwrap()
}

fn arb_ticker() -> impl Strategy<Value = String> {
    prop::sample::select(TICKERS.to_vec()).prop_map(str::to_string)
}

/// Day offset from 2024-01-01; spans a few month boundaries.
fn arb_offset() -> impl Strategy<Value = i64> {
    0i64..120
}

/// Per-ticker latest input timestamps.
fn arb_input_latest() -> impl Strategy<Value = BTreeMap<String, NaiveDateTime>> {
    prop::collection::btree_map(arb_ticker(), arb_offset(), 0..6).prop_map(|m| {
        m.into_iter()
            .map(|(t, d)| (t, base() + Duration::days(d)))
            .collect()
    })
}

/// Snapshot entries; `None` offsets produce stubs.
fn arb_snapshot() -> impl Strategy<Value = WatermarkSnapshot> {
    prop::collection::btree_map(arb_ticker(), prop::option::of(arb_offset()), 0..6).prop_map(|m| {
        m.into_iter()
            .map(|(t, d)| {
                let record = match d {
                    None => WatermarkRecord::stub(t.as_str()),
                    Some(d) => WatermarkRecord {
                        ticker: t.clone(),
                        row_count: 1,
                        oldest_date: Some(base()),
                        latest_date: Some(base() + Duration::days(d)),
                    },
                };
                (t, record)
            })
            .collect()
    })
}

/// Distinct `(ticker, day offset)` rows.
fn arb_rows() -> impl Strategy<Value = BTreeSet<(String, i64)>> {
    prop::collection::btree_set((arb_ticker(), arb_offset()), 1..60)
}

fn bars(rows: &BTreeSet<(String, i64)>) -> Vec<Bar> {
    rows.iter()
        .map(|(t, d)| Bar {
            ticker: t.clone(),
            date_time: base() + Duration::days(*d),
            open: 10.0,
            high: 11.0,
            low: 9.0,
            close: 10.5,
            volume: 100,
        })
        .collect()
}

// ── 1. Classification ────────────────────────────────────────────────

proptest! {
    /// Every input ticker lands in exactly one of new / updated / current,
    /// and missing is exactly the stored tickers absent from the input.
    #[test]
    fn classification_is_disjoint_and_exhaustive(
        input in arb_input_latest(),
        snapshot in arb_snapshot(),
    ) {
        let c = partition_tickers(&input, &snapshot);
        prop_assert!(c.is_disjoint());

        let covered: BTreeSet<String> = c.new.iter()
            .chain(&c.updated)
            .chain(&c.current)
            .cloned()
            .collect();
        let input_tickers: BTreeSet<String> = input.keys().cloned().collect();
        prop_assert_eq!(covered, input_tickers);
        prop_assert_eq!(c.new.len() + c.updated.len() + c.current.len(), input.len());

        for t in &c.missing {
            prop_assert!(snapshot.contains_key(t));
            prop_assert!(!input.contains_key(t));
        }
        for t in &c.new {
            prop_assert!(!snapshot.contains_key(t));
        }
    }
}

// ── 2. Bootstrap ─────────────────────────────────────────────────────

proptest! {
    #[test]
    fn empty_snapshot_bootstraps_everything(rows in arb_rows()) {
        let frame = BarFrame::from_bars(&bars(&rows)).unwrap();
        let tickers = frame.tickers().unwrap();

        let out = classify(frame, &WatermarkSnapshot::new()).unwrap();
        prop_assert_eq!(out.mode, WriteMode::Bootstrap);
        prop_assert_eq!(out.classification.new, tickers);
        prop_assert!(out.classification.updated.is_empty());
        prop_assert_eq!(out.filtered.height(), rows.len());
    }
}

// ── 3. Tie-break ─────────────────────────────────────────────────────

proptest! {
    /// Equal input max and stored latest means current, never updated.
    #[test]
    fn equal_latest_is_always_current(ticker in arb_ticker(), offset in arb_offset()) {
        let at = base() + Duration::days(offset);
        let input = BTreeMap::from([(ticker.clone(), at)]);
        let snapshot = WatermarkSnapshot::from([(
            ticker.clone(),
            WatermarkRecord {
                ticker: ticker.clone(),
                row_count: 1,
                oldest_date: Some(base()),
                latest_date: Some(at),
            },
        )]);

        let c = partition_tickers(&input, &snapshot);
        prop_assert!(c.current.contains(&ticker));
        prop_assert!(c.updated.is_empty());
    }
}

// ── 4. Idempotence ───────────────────────────────────────────────────

proptest! {
    /// Once watermarks reflect the input, the same input is a no-op.
    #[test]
    fn rerun_after_bootstrap_is_noop(rows in arb_rows()) {
        let frame = BarFrame::from_bars(&bars(&rows)).unwrap();
        let aggregates = watermark::aggregate(&frame, OldestDateScope::AllTickers).unwrap();
        let snapshot: WatermarkSnapshot = watermark::bootstrap_records(&aggregates)
            .into_iter()
            .map(|r| (r.ticker.clone(), r))
            .collect();

        let out = classify(frame, &snapshot).unwrap();
        prop_assert!(out.skip_writing());
        prop_assert!(out.filtered.is_empty());
        prop_assert_eq!(out.classification.current.len(), snapshot.len());
    }

    /// Row counts from bootstrap records add up to the input row count.
    #[test]
    fn bootstrap_counts_every_row_once(rows in arb_rows()) {
        let frame = BarFrame::from_bars(&bars(&rows)).unwrap();
        let aggregates = watermark::aggregate(&frame, OldestDateScope::AllTickers).unwrap();
        let records = watermark::bootstrap_records(&aggregates);

        let total: u64 = records.iter().map(|r| r.row_count).sum();
        prop_assert_eq!(total, rows.len() as u64);
        for r in &records {
            prop_assert!(r.is_consistent());
        }
    }
}

// ── 5. Monotonic watermarks ──────────────────────────────────────────

proptest! {
    #[test]
    fn incremental_merge_is_monotonic(
        snapshot in arb_snapshot(),
        updates in prop::collection::vec((arb_ticker(), 0u64..50, arb_offset()), 0..6),
    ) {
        let aggregates: Vec<TickerAggregate> = updates
            .into_iter()
            .map(|(ticker, row_count, d)| TickerAggregate {
                ticker,
                row_count,
                oldest_date: None,
                latest_date: base() + Duration::days(d),
            })
            .collect();

        for (agg, merged) in aggregates.iter().zip(watermark::incremental_records(&snapshot, &aggregates)) {
            prop_assert_eq!(&merged.ticker, &agg.ticker);
            prop_assert!(merged.latest_date >= Some(agg.latest_date));
            if let Some(prev) = snapshot.get(&agg.ticker) {
                prop_assert!(merged.latest_date >= prev.latest_date);
                prop_assert_eq!(merged.row_count, agg.row_count);
                if prev.oldest_date.is_some() {
                    prop_assert_eq!(merged.oldest_date, prev.oldest_date);
                }
            }
        }
    }
}
