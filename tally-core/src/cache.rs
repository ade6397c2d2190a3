//! LedgerCache: last confirmed snapshot of the signed-in user's ledger.
//!
//! The cache is a single slot overwritten wholesale by `apply`. It is never
//! patched record-by-record, so what it holds is always exactly what the
//! store last pushed.
//!
//! Staleness guards:
//! - epoch: advanced by `invalidate` on every sign-in / sign-out / user switch.
//!   Snapshots tagged with any other epoch are dropped.
//! - sequence: per-subscription delivery counter. Within an epoch a snapshot
//!   is only applied if its sequence is newer than the last one applied.

use crate::aggregate::{CategoryTotals, aggregate};
use crate::expense::ExpenseRecord;
use log::{debug, warn};
use std::collections::HashSet;
use std::fmt;

/// Session generation counter
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct Epoch(u64);

impl Epoch {
    pub fn value(&self) -> u64 {
        self.0
    }

    fn next(self) -> Self {
        Epoch(self.0 + 1)
    }
}

impl fmt::Display for Epoch {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Complete record set as delivered by one push of the channel
#[derive(Debug, Clone, PartialEq)]
pub struct Snapshot {
    /// Strictly increasing within one subscription
    pub sequence: u64,
    pub records: Vec<ExpenseRecord>,
}

impl Snapshot {
    pub fn new(sequence: u64, records: Vec<ExpenseRecord>) -> Self {
        Self { sequence, records }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ApplyOutcome {
    Applied,
    /// Tagged with a superseded epoch
    StaleEpoch,
    /// Older than (or equal to) the last applied sequence
    OutOfOrder,
}

#[derive(Debug, Default, Clone)]
pub struct LedgerCache {
    epoch: Epoch,
    last_sequence: Option<u64>,
    records: Vec<ExpenseRecord>,
    totals: CategoryTotals,
}

impl LedgerCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn epoch(&self) -> Epoch {
        self.epoch
    }

    /// True once a snapshot has landed in the active epoch
    pub fn is_loaded(&self) -> bool {
        self.last_sequence.is_some()
    }

    pub fn records(&self) -> &[ExpenseRecord] {
        &self.records
    }

    pub fn totals(&self) -> &CategoryTotals {
        &self.totals
    }

    /// Replace the record set if `snapshot` belongs to the active epoch and is
    /// newer than what is already held.
    pub fn apply(&mut self, snapshot: Snapshot, epoch: Epoch) -> ApplyOutcome {
        if epoch != self.epoch {
            warn!(
                "dropping snapshot #{} from epoch {} (active epoch {})",
                snapshot.sequence, epoch, self.epoch
            );
            return ApplyOutcome::StaleEpoch;
        }
        if let Some(last) = self.last_sequence {
            if snapshot.sequence <= last {
                warn!(
                    "dropping out-of-order snapshot #{} (already at #{})",
                    snapshot.sequence, last
                );
                return ApplyOutcome::OutOfOrder;
            }
        }

        let records = dedup_by_id(snapshot.records);
        self.totals = aggregate(&records);
        self.records = records;
        self.last_sequence = Some(snapshot.sequence);
        debug!(
            "applied snapshot #{} ({} records) in epoch {}",
            snapshot.sequence,
            self.records.len(),
            self.epoch
        );
        ApplyOutcome::Applied
    }

    /// Drop every cached record and open a new epoch.
    pub fn invalidate(&mut self) -> Epoch {
        self.epoch = self.epoch.next();
        self.last_sequence = None;
        self.records.clear();
        self.totals = CategoryTotals::new();
        debug!("cache invalidated, epoch now {}", self.epoch);
        self.epoch
    }
}

fn dedup_by_id(records: Vec<ExpenseRecord>) -> Vec<ExpenseRecord> {
    let mut seen = HashSet::with_capacity(records.len());
    let mut out = Vec::with_capacity(records.len());
    for r in records {
        if seen.insert(r.id.clone()) {
            out.push(r);
        } else {
            warn!("snapshot carried duplicate id {}; keeping first", r.id);
        }
    }
    out
}
