//! Reconciliation engine: ticker classification and write-mode decision.
//!
//! A run moves through `INIT → CLASSIFIED → {FULL | DELTA} → FILTERED → DONE`:
//!
//! 1. An empty watermark snapshot means a bootstrap run: every input ticker
//!    is new, the whole frame is written with full-overwrite semantics.
//! 2. Otherwise each ticker's newest input row is compared with its stored
//!    `latest_date`. Equality counts as current. Rows of current tickers are
//!    filtered out; everything else is written with partition-scoped merges.
//! 3. When nothing is new or updated the write step is skipped entirely.
//!
//! [`classify`] is the pure part. [`Reconciler`] wraps it with the store
//! reads and writes the run needs (snapshot, bootstrap stubs, run artifact).

use std::collections::{BTreeMap, BTreeSet};

use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::domain::{
    IncrementalMode, RunArtifact, TickerClassification, WatermarkSnapshot, WriteMode,
};
use crate::error::Result;
use crate::frame::BarFrame;
use crate::store::WatermarkStore;

/// Output of [`classify`].
#[derive(Debug, Clone)]
pub struct Classified {
    /// Input rows that must be written.
    pub filtered: BarFrame,
    pub mode: WriteMode,
    pub classification: TickerClassification,
}

impl Classified {
    pub fn skip_writing(&self) -> bool {
        self.mode.skip_writing()
    }
}

/// Classify input tickers against the watermark snapshot.
pub fn classify(frame: BarFrame, snapshot: &WatermarkSnapshot) -> Result<Classified> {
    if snapshot.is_empty() {
        let classification = TickerClassification {
            new: frame.tickers()?,
            ..TickerClassification::default()
        };
        return Ok(Classified {
            filtered: frame,
            mode: WriteMode::Bootstrap,
            classification,
        });
    }

    let input_latest = frame.latest_by_ticker()?;
    let classification = partition_tickers(&input_latest, snapshot);

    let filtered = frame.exclude_tickers(&classification.current)?;
    let mode = if classification.new.is_empty() && classification.updated.is_empty() {
        WriteMode::Incremental(IncrementalMode::NoOp)
    } else {
        WriteMode::Incremental(IncrementalMode::Delta)
    };

    Ok(Classified {
        filtered,
        mode,
        classification,
    })
}

/// Split tickers into new / updated / missing / current.
///
/// A stored record without a `latest_date` (a bootstrap stub that was never
/// completed) never counts as current.
pub fn partition_tickers(
    input_latest: &BTreeMap<String, NaiveDateTime>,
    snapshot: &WatermarkSnapshot,
) -> TickerClassification {
    let mut out = TickerClassification::default();

    for (ticker, latest) in input_latest {
        match snapshot.get(ticker) {
            None => {
                out.new.insert(ticker.clone());
            }
            Some(record) => match record.latest_date {
                Some(stored) if *latest <= stored => {
                    out.current.insert(ticker.clone());
                }
                _ => {
                    out.updated.insert(ticker.clone());
                }
            },
        }
    }

    out.missing = snapshot
        .keys()
        .filter(|t| !input_latest.contains_key(*t))
        .cloned()
        .collect();

    out
}

/// Watermark-update request emitted by a reconciliation, tagged with its run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WatermarkUpdateRequest {
    pub run_id: String,
    pub missing: BTreeSet<String>,
    pub new: BTreeSet<String>,
    pub updated: BTreeSet<String>,
    pub skip_writing: bool,
}

impl WatermarkUpdateRequest {
    pub fn into_artifact(self, created_at: NaiveDateTime) -> RunArtifact {
        RunArtifact {
            run_id: self.run_id,
            created_at,
            tickers_missing: self.missing,
            tickers_new: self.new,
            tickers_updated: self.updated,
            skip_writing: self.skip_writing,
        }
    }
}

/// Everything a run needs after reconciliation.
#[derive(Debug, Clone)]
pub struct Reconciliation {
    pub run_id: String,
    /// Snapshot the classification was computed from.
    pub snapshot: WatermarkSnapshot,
    pub filtered: BarFrame,
    pub mode: WriteMode,
    pub classification: TickerClassification,
}

impl Reconciliation {
    pub fn skip_writing(&self) -> bool {
        self.mode.skip_writing()
    }

    pub fn update_request(&self) -> WatermarkUpdateRequest {
        WatermarkUpdateRequest {
            run_id: self.run_id.clone(),
            missing: self.classification.missing.clone(),
            new: self.classification.new.clone(),
            updated: self.classification.updated.clone(),
            skip_writing: self.skip_writing(),
        }
    }
}

/// Classification plus the store side effects of a run.
pub struct Reconciler<'a> {
    store: &'a dyn WatermarkStore,
}

impl<'a> Reconciler<'a> {
    pub fn new(store: &'a dyn WatermarkStore) -> Self {
        Self { store }
    }

    /// Read the snapshot, classify, and persist the run artifact.
    ///
    /// On bootstrap one stub record per input ticker is created as well.
    /// A snapshot read failure aborts before anything is written.
    pub fn reconcile(
        &self,
        frame: BarFrame,
        run_id: &str,
        now: NaiveDateTime,
    ) -> Result<Reconciliation> {
        let snapshot = self.store.read_snapshot()?;
        let Classified {
            filtered,
            mode,
            classification,
        } = classify(frame, &snapshot)?;

        if mode.is_bootstrap() {
            let created = self.store.create_bootstrap(&classification.new)?;
            info!(run_id, stubs = created, "watermark store bootstrapped");
        }

        let reconciliation = Reconciliation {
            run_id: run_id.to_string(),
            snapshot,
            filtered,
            mode,
            classification,
        };
        self.store
            .record_run(&reconciliation.update_request().into_artifact(now))?;

        let c = &reconciliation.classification;
        info!(
            run_id,
            mode = mode.label(),
            new = c.new.len(),
            updated = c.updated.len(),
            missing = c.missing.len(),
            current = c.current.len(),
            rows = reconciliation.filtered.height(),
            "tickers reconciled"
        );
        Ok(reconciliation)
    }
}
