//! Per-wallet classification records
//!
//! Everything here is episode-scoped: records are created on a wallet's first
//! transfer within an episode and discarded wholesale at the episode
//! boundary, never one by one.

use rust_decimal::Decimal;
use std::collections::{BTreeSet, HashMap};

use crate::detect::signals::SignalLatches;
use crate::detect::threshold::LatchSet;
use crate::lifecycle::LifecycleState;
use crate::stream::transfer::{Direction, TransferEvent};

/// What the core knows about one wallet in the current episode
#[derive(Debug, Clone)]
pub struct WalletRecord {
    pub address: String,
    pub first_seen: i64,
    pub last_seen: i64,
    pub activity_count: u32,
    /// Distinct one-minute buckets with activity
    pub minute_buckets: BTreeSet<i64>,
    /// Threshold kinds already fired this episode
    pub threshold_latches: LatchSet,
    pub signal_latches: SignalLatches,
    /// Set once, never cleared within the episode
    pub is_early: bool,
    /// Lifecycle state at this wallet's most recent transfer
    pub last_active_state: LifecycleState,
    pub total_in: Decimal,
    pub total_out: Decimal,
}

impl WalletRecord {
    pub fn new(address: impl Into<String>, timestamp: i64, state: LifecycleState) -> Self {
        Self {
            address: address.into(),
            first_seen: timestamp,
            last_seen: timestamp,
            activity_count: 0,
            minute_buckets: BTreeSet::new(),
            threshold_latches: LatchSet::default(),
            signal_latches: SignalLatches::default(),
            is_early: false,
            last_active_state: state,
            total_in: Decimal::ZERO,
            total_out: Decimal::ZERO,
        }
    }

    /// Fold a transfer into the record
    pub fn observe(&mut self, transfer: &TransferEvent, state: LifecycleState) {
        self.first_seen = self.first_seen.min(transfer.timestamp);
        self.last_seen = self.last_seen.max(transfer.timestamp);
        self.activity_count += 1;
        self.minute_buckets.insert(transfer.minute_bucket());
        self.last_active_state = state;
        match transfer.direction {
            Direction::In => self.total_in += transfer.amount,
            Direction::Out => self.total_out += transfer.amount,
        }
    }

    /// Seconds since this wallet last transacted
    pub fn idle_secs(&self, now: i64) -> i64 {
        (now - self.last_seen).max(0)
    }

    /// Longest run of minute buckets whose consecutive gaps stay within `max_gap_secs`
    pub fn longest_bucket_run(&self, max_gap_secs: i64) -> usize {
        let mut longest = 0;
        let mut run = 0;
        let mut previous: Option<i64> = None;
        for bucket in &self.minute_buckets {
            run = match previous {
                Some(prev) if (bucket - prev) * 60 <= max_gap_secs => run + 1,
                _ => 1,
            };
            longest = longest.max(run);
            previous = Some(*bucket);
        }
        longest
    }
}

/// Episode-scoped wallet records.
///
/// Unbounded within an episode by construction; cleared only by
/// [`WalletLedger::clear`] at the episode boundary.
#[derive(Debug, Default)]
pub struct WalletLedger {
    records: HashMap<String, WalletRecord>,
}

impl WalletLedger {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a transfer, creating the wallet's record on first sight
    pub fn observe(&mut self, transfer: &TransferEvent, state: LifecycleState) -> &mut WalletRecord {
        let record = self
            .records
            .entry(transfer.wallet.clone())
            .or_insert_with(|| WalletRecord::new(transfer.wallet.clone(), transfer.timestamp, state));
        record.observe(transfer, state);
        record
    }

    pub fn get(&self, wallet: &str) -> Option<&WalletRecord> {
        self.records.get(wallet)
    }

    pub fn get_mut(&mut self, wallet: &str) -> Option<&mut WalletRecord> {
        self.records.get_mut(wallet)
    }

    pub fn iter(&self) -> impl Iterator<Item = &WalletRecord> {
        self.records.values()
    }

    /// Wallets whose persistence signal has fired
    pub fn persistent_count(&self) -> usize {
        self.records
            .values()
            .filter(|r| r.signal_latches.persistence)
            .count()
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Episode boundary: discard every record together
    pub fn clear(&mut self) {
        self.records.clear();
    }
}
