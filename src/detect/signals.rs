//! Behavioural signal detection
//!
//! TIMING, COORDINATION and PERSISTENCE are wallet signals evaluated once per
//! threshold batch, never once per threshold event. EXHAUSTION is a token
//! signal evaluated against the early cohort.
//!
//! Each kind carries its own latch rule in [`SignalKind::may_fire`]; the
//! per-wallet latch bits live in [`SignalLatches`] on the wallet record and
//! the token-level exhaustion latch lives in the detector. A fired EXHAUSTION
//! stays pending until the lifecycle machine has acted on it.

use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;
use tracing::debug;

use super::episode::{ActivityTape, FlowMix};
use crate::config::SignalConfig;
use crate::lifecycle::LifecycleState;
use crate::wallet::types::{WalletLedger, WalletRecord};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SignalKind {
    Timing,
    Coordination,
    Persistence,
    Exhaustion,
}

impl SignalKind {
    /// Latch transition: may this kind fire, given whether it already fired in its scope?
    ///
    /// COORDINATION re-fires on later transfers; the batching rule is what
    /// keeps it to one per transfer.
    pub fn may_fire(self, already_fired: bool) -> bool {
        match self {
            SignalKind::Timing | SignalKind::Persistence | SignalKind::Exhaustion => !already_fired,
            SignalKind::Coordination => true,
        }
    }
}

impl fmt::Display for SignalKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SignalKind::Timing => write!(f, "TIMING"),
            SignalKind::Coordination => write!(f, "COORDINATION"),
            SignalKind::Persistence => write!(f, "PERSISTENCE"),
            SignalKind::Exhaustion => write!(f, "EXHAUSTION"),
        }
    }
}

/// Per-wallet signal latches, cleared only with the wallet ledger
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SignalLatches {
    /// Early/late classification has been made
    pub timing_checked: bool,
    pub persistence: bool,
    /// Has been part of at least one coordination signal
    pub coordinated: bool,
}

impl SignalLatches {
    /// Apply the latch transition for a wallet-level kind.
    ///
    /// Returns whether the signal may fire and records that it did.
    pub fn admit(&mut self, kind: SignalKind) -> bool {
        let slot = match kind {
            SignalKind::Timing => &mut self.timing_checked,
            SignalKind::Persistence => &mut self.persistence,
            SignalKind::Coordination => &mut self.coordinated,
            SignalKind::Exhaustion => return false,
        };
        let fire = kind.may_fire(*slot);
        if fire {
            *slot = true;
        }
        fire
    }
}

/// Bounded signal payload
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SignalDetail {
    Timing {
        is_early: bool,
        /// First appearance relative to episode start
        delta_secs: i64,
    },
    Coordination {
        wallet_count: usize,
        window_secs: i64,
        /// A few of the other wallets, never the full list
        sample: Vec<String>,
        direction: FlowMix,
    },
    Persistence {
        buckets: usize,
        run: usize,
    },
    Exhaustion {
        silent: usize,
        early: usize,
        fraction: f64,
    },
}

impl SignalDetail {
    pub fn kind(&self) -> SignalKind {
        match self {
            SignalDetail::Timing { .. } => SignalKind::Timing,
            SignalDetail::Coordination { .. } => SignalKind::Coordination,
            SignalDetail::Persistence { .. } => SignalKind::Persistence,
            SignalDetail::Exhaustion { .. } => SignalKind::Exhaustion,
        }
    }
}

/// Output record for one signal
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SignalEvent {
    pub asset: String,
    pub episode_id: u64,
    pub timestamp: i64,
    /// Absent for token-level signals
    pub wallet: Option<String>,
    #[serde(flatten)]
    pub detail: SignalDetail,
}

impl SignalEvent {
    pub fn kind(&self) -> SignalKind {
        self.detail.kind()
    }
}

/// Silent share of the early cohort
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ExhaustionReading {
    pub silent: usize,
    pub early: usize,
    pub fraction: f64,
}

impl From<ExhaustionReading> for SignalDetail {
    fn from(reading: ExhaustionReading) -> Self {
        SignalDetail::Exhaustion {
            silent: reading.silent,
            early: reading.early,
            fraction: reading.fraction,
        }
    }
}

/// Episode context for one threshold batch
#[derive(Debug, Clone, Copy)]
pub struct BatchContext<'a> {
    pub timestamp: i64,
    pub episode_start: i64,
    /// This batch opened the episode
    pub ignites_episode: bool,
    pub tape: &'a ActivityTape,
}

#[derive(Debug, Clone)]
pub struct SignalDetector {
    config: SignalConfig,
    exhaustion_fired: bool,
    pending_exhaustion: Option<ExhaustionReading>,
}

impl SignalDetector {
    pub fn new(config: SignalConfig) -> Self {
        Self {
            config,
            exhaustion_fired: false,
            pending_exhaustion: None,
        }
    }

    /// One signal pass for the wallet behind a threshold batch.
    ///
    /// Expects the batch's own entries to be on the tape already.
    pub fn detect_batch(
        &self,
        record: &mut WalletRecord,
        early_wallets: &mut BTreeSet<String>,
        ctx: &BatchContext<'_>,
    ) -> Vec<SignalDetail> {
        let mut details = Vec::new();

        if let Some(timing) = self.detect_timing(record, early_wallets, ctx) {
            details.push(timing);
        }
        if let Some(coordination) = self.detect_coordination(record, ctx) {
            details.push(coordination);
        }
        if let Some(persistence) = self.detect_persistence(record) {
            details.push(persistence);
        }

        details
    }

    fn detect_timing(
        &self,
        record: &mut WalletRecord,
        early_wallets: &mut BTreeSet<String>,
        ctx: &BatchContext<'_>,
    ) -> Option<SignalDetail> {
        if !record.signal_latches.admit(SignalKind::Timing) {
            return None;
        }
        let delta_secs = record.first_seen - ctx.episode_start;
        let is_early = ctx.ignites_episode || (0..=self.config.early_window_secs).contains(&delta_secs);
        if !is_early {
            debug!(wallet = %record.address, delta_secs, "Wallet classified late");
            return None;
        }

        record.is_early = true;
        early_wallets.insert(record.address.clone());
        Some(SignalDetail::Timing {
            is_early: true,
            delta_secs,
        })
    }

    fn detect_coordination(&self, record: &mut WalletRecord, ctx: &BatchContext<'_>) -> Option<SignalDetail> {
        let window_secs = self.config.coordination_window_secs;
        let wallets = ctx.tape.distinct_wallets(ctx.timestamp, window_secs);
        if wallets.len() < self.config.coordination_min_wallets {
            return None;
        }
        if !record.signal_latches.admit(SignalKind::Coordination) {
            return None;
        }

        let sample = wallets
            .iter()
            .filter(|w| **w != record.address)
            .take(self.config.coordination_sample_size)
            .map(|w| w.to_string())
            .collect();

        Some(SignalDetail::Coordination {
            wallet_count: wallets.len(),
            window_secs,
            sample,
            direction: ctx.tape.flow_mix(ctx.timestamp, window_secs),
        })
    }

    fn detect_persistence(&self, record: &mut WalletRecord) -> Option<SignalDetail> {
        if record.signal_latches.persistence {
            return None;
        }
        let run = record.longest_bucket_run(self.config.persistence_max_gap_secs);
        if run < self.config.persistence_min_buckets {
            return None;
        }
        record.signal_latches.admit(SignalKind::Persistence);
        Some(SignalDetail::Persistence {
            buckets: record.minute_buckets.len(),
            run,
        })
    }

    /// Silent share of the early cohort, if it meets the configured fraction.
    ///
    /// A wallet is silent when it stopped in an earlier phase than `state`
    /// (from the peak on) or has been idle past the fallback. `active`, the
    /// wallet being processed, and anything active within the grace window
    /// are never silent.
    pub fn exhaustion_reading(
        &self,
        ledger: &WalletLedger,
        early_wallets: &BTreeSet<String>,
        state: LifecycleState,
        now: i64,
        active: Option<&str>,
    ) -> Option<ExhaustionReading> {
        if early_wallets.is_empty() {
            return None;
        }

        let silent = early_wallets
            .iter()
            .filter(|wallet| Some(wallet.as_str()) != active)
            .filter(|wallet| match ledger.get(wallet) {
                Some(record) => {
                    let idle = record.idle_secs(now);
                    idle >= self.config.silence_grace_secs
                        && ((state.is_peak_or_later() && record.last_active_state.is_before(state))
                            || idle >= self.config.silence_fallback_secs)
                }
                None => true,
            })
            .count();

        let early = early_wallets.len();
        let fraction = silent as f64 / early as f64;
        (fraction >= self.config.exhaustion_fraction).then_some(ExhaustionReading {
            silent,
            early,
            fraction,
        })
    }

    /// Token-level EXHAUSTION check, run on every evaluation pass.
    ///
    /// Fires at most once per episode. The reading is kept as pending until
    /// [`consume_exhaustion`](Self::consume_exhaustion) is called.
    pub fn check_exhaustion(
        &mut self,
        ledger: &WalletLedger,
        early_wallets: &BTreeSet<String>,
        state: LifecycleState,
        now: i64,
        active: Option<&str>,
    ) -> Option<SignalDetail> {
        if !SignalKind::Exhaustion.may_fire(self.exhaustion_fired) {
            return None;
        }
        let reading = self.exhaustion_reading(ledger, early_wallets, state, now, active)?;
        self.exhaustion_fired = true;
        self.pending_exhaustion = Some(reading);
        debug!(silent = reading.silent, early = reading.early, state = %state, "Exhaustion fired");
        Some(reading.into())
    }

    /// The fired EXHAUSTION reading the lifecycle has not yet acted on
    pub fn pending_exhaustion(&self) -> Option<ExhaustionReading> {
        self.pending_exhaustion
    }

    pub fn consume_exhaustion(&mut self) {
        self.pending_exhaustion = None;
    }

    /// Episode boundary
    pub fn reset(&mut self) {
        self.exhaustion_fired = false;
        self.pending_exhaustion = None;
    }
}
