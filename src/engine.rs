//! Intelligence engine
//!
//! One [`IntelligenceEngine`] per monitored asset. Each transfer runs the full
//! pipeline before the next is accepted:
//!
//! window update -> threshold check -> signal batch -> episode/density ->
//! state evaluation -> severity.
//!
//! Everything the pipeline mutates lives in [`AssetState`], passed around as
//! one owned aggregate. Independent engines never share state.

use rust_decimal::Decimal;
use serde::Serialize;
use std::collections::BTreeSet;
use tracing::{debug, info};

use crate::config::Config;
use crate::detect::episode::{ActivityTape, DensityTracker, EpisodeTracker};
use crate::detect::signals::{BatchContext, SignalDetail, SignalDetector, SignalEvent};
use crate::detect::threshold::{ThresholdDetector, ThresholdEvent, Thresholds};
use crate::error::Result;
use crate::lifecycle::{
    annotate, BatchSummary, Conditions, LifecycleState, SeverityContext, StateMachine, TransitionEvent, Trigger,
};
use crate::stream::transfer::{Direction, TransferEvent};
use crate::wallet::book::WindowBook;
use crate::wallet::types::WalletLedger;

/// Any record the engine emits, in emission order
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum IntelligenceEvent {
    Threshold(ThresholdEvent),
    Signal(SignalEvent),
    Transition(TransitionEvent),
}

impl IntelligenceEvent {
    pub fn timestamp(&self) -> i64 {
        match self {
            IntelligenceEvent::Threshold(e) => e.timestamp,
            IntelligenceEvent::Signal(e) => e.timestamp,
            IntelligenceEvent::Transition(e) => e.timestamp,
        }
    }

    pub fn episode_id(&self) -> u64 {
        match self {
            IntelligenceEvent::Threshold(e) => e.episode_id,
            IntelligenceEvent::Signal(e) => e.episode_id,
            IntelligenceEvent::Transition(e) => e.episode_id,
        }
    }
}

/// Lifetime volume telemetry; never consulted by lifecycle decisions
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct FlowTotals {
    pub inflow: Decimal,
    pub outflow: Decimal,
    pub transfers_in: u64,
    pub transfers_out: u64,
}

impl FlowTotals {
    fn record(&mut self, transfer: &TransferEvent) {
        match transfer.direction {
            Direction::In => {
                self.inflow += transfer.amount;
                self.transfers_in += 1;
            }
            Direction::Out => {
                self.outflow += transfer.amount;
                self.transfers_out += 1;
            }
        }
    }

    pub fn net_flow(&self) -> Decimal {
        self.inflow - self.outflow
    }

    /// Outflow share of total volume, `None` before any volume
    pub fn outflow_ratio(&self) -> Option<Decimal> {
        let total = self.inflow + self.outflow;
        if total.is_zero() {
            None
        } else {
            Some(self.outflow / total)
        }
    }
}

/// The single mutable aggregate for one asset
pub struct AssetState {
    asset: String,
    machine: StateMachine,
    episode: EpisodeTracker,
    density: DensityTracker,
    tape: ActivityTape,
    /// Grows only; cleared with the episode, never by window-book eviction
    early_wallets: BTreeSet<String>,
    ledger: WalletLedger,
    book: WindowBook,
    flow: FlowTotals,
    /// Newest timestamp seen, the engine's notion of "now"
    high_water: Option<i64>,
}

impl AssetState {
    pub fn new(config: &Config) -> Self {
        let retention = [
            config.signals.coordination_window_secs,
            config.episode.density_window_secs,
            config.lifecycle.dissipation_window_secs,
            config.lifecycle.reversal_window_secs,
        ]
        .into_iter()
        .max()
        .unwrap_or(0);

        Self {
            asset: config.asset.id.clone(),
            machine: StateMachine::new(config.lifecycle.clone()),
            episode: EpisodeTracker::new(config.episode.boundary_secs),
            density: DensityTracker::new(config.episode.density_window_secs),
            tape: ActivityTape::new(retention),
            early_wallets: BTreeSet::new(),
            ledger: WalletLedger::new(),
            book: WindowBook::new(config.windows.clone(), config.capacity.max_windowed_wallets),
            flow: FlowTotals::default(),
            high_water: None,
        }
    }

    pub fn asset(&self) -> &str {
        &self.asset
    }

    pub fn state(&self) -> LifecycleState {
        self.machine.state()
    }

    pub fn episode_id(&self) -> u64 {
        self.episode.id()
    }

    pub fn is_episode_open(&self) -> bool {
        self.episode.is_open()
    }

    pub fn episode_start(&self) -> Option<i64> {
        self.episode.started_at()
    }

    pub fn last_threshold_at(&self) -> Option<i64> {
        self.episode.last_threshold_at()
    }

    pub fn episode_max_density(&self) -> usize {
        self.density.episode_max()
    }

    pub fn early_wallets(&self) -> &BTreeSet<String> {
        &self.early_wallets
    }

    pub fn ledger(&self) -> &WalletLedger {
        &self.ledger
    }

    pub fn book(&self) -> &WindowBook {
        &self.book
    }

    pub fn flow(&self) -> &FlowTotals {
        &self.flow
    }

    pub fn now(&self) -> Option<i64> {
        self.high_water
    }

    /// Distinct threshold wallets in the density window ending at the newest timestamp
    pub fn current_density(&self) -> usize {
        self.high_water
            .map_or(0, |now| self.density.measure(&self.tape, now))
    }

    fn advance_to(&mut self, timestamp: i64) -> i64 {
        let now = self.high_water.map_or(timestamp, |hw| hw.max(timestamp));
        self.high_water = Some(now);
        now
    }

    /// Drop everything scoped to the episode, together
    fn reset_episode_scope(&mut self) {
        self.ledger.clear();
        self.book.clear();
        self.early_wallets.clear();
        self.tape.clear();
        self.density.reset();
    }

    fn non_early_wallets(&self) -> usize {
        self.ledger
            .iter()
            .filter(|r| r.signal_latches.timing_checked && !r.is_early)
            .count()
    }
}

/// Stream processor for a single asset
pub struct IntelligenceEngine {
    config: Config,
    thresholds: ThresholdDetector,
    signals: SignalDetector,
    state: AssetState,
}

impl IntelligenceEngine {
    /// Build an engine, resolving thresholds from configuration
    pub fn new(config: &Config) -> Self {
        let thresholds = Thresholds::resolve(&config.thresholds, config.asset.liquidity_estimate);
        Self::with_thresholds(config, thresholds)
    }

    pub fn with_thresholds(config: &Config, thresholds: Thresholds) -> Self {
        info!(asset = %config.asset.id, thresholds = %thresholds, "Intelligence engine ready");
        Self {
            config: config.clone(),
            thresholds: ThresholdDetector::new(thresholds),
            signals: SignalDetector::new(config.signals.clone()),
            state: AssetState::new(config),
        }
    }

    pub fn state(&self) -> &AssetState {
        &self.state
    }

    pub fn thresholds(&self) -> &Thresholds {
        self.thresholds.thresholds()
    }

    /// Run one transfer through the whole pipeline.
    ///
    /// An invalid transfer is rejected before anything is touched, so the
    /// caller can log it and carry on with the next one.
    pub fn process(&mut self, transfer: &TransferEvent) -> Result<Vec<IntelligenceEvent>> {
        transfer.validate()?;

        let now = self.state.advance_to(transfer.timestamp);
        let mut events = Vec::new();
        self.close_expired_episode(now, &mut events);

        let state = &mut self.state;
        let phase = state.machine.state();
        state.flow.record(transfer);
        let sums = state.book.record(transfer);
        let record = state.ledger.observe(transfer, phase);
        let crossings = self.thresholds.check(&sums, &mut record.threshold_latches);

        let mut cond = Conditions {
            now,
            ..Default::default()
        };

        if !crossings.is_empty() {
            let ignites = !state.episode.is_open();
            if ignites {
                state.episode.open(transfer.timestamp);
            }
            state.episode.record_threshold(transfer.timestamp);
            let episode_id = state.episode.id();

            for crossing in crossings {
                state
                    .tape
                    .push(transfer.timestamp, &transfer.wallet, transfer.direction);
                events.push(IntelligenceEvent::Threshold(ThresholdEvent {
                    asset: state.asset.clone(),
                    episode_id,
                    timestamp: transfer.timestamp,
                    wallet: transfer.wallet.clone(),
                    kind: crossing.kind,
                    direction: transfer.direction,
                    value: crossing.value,
                    threshold: crossing.threshold,
                    reference: transfer.reference.clone(),
                }));
            }

            // one signal pass for the whole batch
            let ctx = BatchContext {
                timestamp: transfer.timestamp,
                episode_start: state.episode.started_at().unwrap_or(transfer.timestamp),
                ignites_episode: ignites,
                tape: &state.tape,
            };
            let mut is_early = false;
            let mut details = Vec::new();
            if let Some(record) = state.ledger.get_mut(&transfer.wallet) {
                details = self.signals.detect_batch(record, &mut state.early_wallets, &ctx);
                is_early = record.is_early;
            }

            for detail in details {
                if let SignalDetail::Coordination { wallet_count, .. } = &detail {
                    cond.coordination = Some(*wallet_count);
                }
                debug!(wallet = %transfer.wallet, signal = %detail.kind(), "Signal");
                events.push(IntelligenceEvent::Signal(SignalEvent {
                    asset: state.asset.clone(),
                    episode_id,
                    timestamp: transfer.timestamp,
                    wallet: Some(transfer.wallet.clone()),
                    detail,
                }));
            }

            let density = state.density.measure(&state.tape, now);
            cond.density = density;
            cond.peak_raised = state.density.observe(density);
            cond.batch = Some(BatchSummary {
                wallet: transfer.wallet.clone(),
                is_early,
            });
        } else if state.episode.is_open() {
            cond.density = state.density.measure(&state.tape, now);
        }

        if state.episode.is_open() {
            self.evaluate(cond, Some(&transfer.wallet), &mut events);
        }

        let phase = self.state.machine.state();
        if let Some(record) = self.state.ledger.get_mut(&transfer.wallet) {
            record.last_active_state = phase;
        }

        Ok(events)
    }

    /// Move time forward without a transfer.
    ///
    /// Drives the time-based edges (sustain, dissipation, episode end)
    /// while the stream is idle.
    pub fn advance(&mut self, now: i64) -> Vec<IntelligenceEvent> {
        let now = self.state.advance_to(now);
        let mut events = Vec::new();
        self.close_expired_episode(now, &mut events);

        if self.state.episode.is_open() {
            let cond = Conditions {
                now,
                density: self.state.density.measure(&self.state.tape, now),
                ..Default::default()
            };
            self.evaluate(cond, None, &mut events);
        }
        events
    }

    fn close_expired_episode(&mut self, now: i64, events: &mut Vec<IntelligenceEvent>) {
        let silence = match self.state.episode.expired_silence(now) {
            Some(silence) => silence,
            None => return,
        };

        let episode_id = self.state.episode.id();
        if let Some(transition) = self.state.machine.end_episode(now, silence) {
            events.push(IntelligenceEvent::Transition(TransitionEvent::new(
                &self.state.asset,
                episode_id,
                transition,
                None,
            )));
        }
        self.state.episode.close();
        self.state.reset_episode_scope();
        self.signals.reset();
        info!(episode_id, silence_secs = silence, "Episode state cleared");
    }

    fn evaluate(&mut self, mut cond: Conditions, active: Option<&str>, events: &mut Vec<IntelligenceEvent>) {
        let lifecycle = &self.config.lifecycle;
        let state = &mut self.state;
        let now = cond.now;
        let episode_id = state.episode.id();

        cond.persistent_wallets = state.ledger.persistent_count();
        cond.non_early_wallets = state.non_early_wallets();
        cond.recent_wallets = state.tape.distinct_count(now, lifecycle.dissipation_window_secs);
        cond.burst_wallets = state.tape.distinct_count(now, lifecycle.reversal_window_secs);

        // token-level signal, judged against the state held coming into this pass
        if let Some(detail) =
            self.signals
                .check_exhaustion(&state.ledger, &state.early_wallets, state.machine.state(), now, active)
        {
            events.push(IntelligenceEvent::Signal(SignalEvent {
                asset: state.asset.clone(),
                episode_id,
                timestamp: now,
                wallet: None,
                detail,
            }));
        }
        cond.exhaustion = self.signals.pending_exhaustion();

        for transition in state.machine.evaluate(&cond) {
            if matches!(transition.trigger, Trigger::Exhaustion { .. }) {
                self.signals.consume_exhaustion();
            }

            let ctx = SeverityContext {
                early_wallets: state.early_wallets.len(),
                episode_max_density: state.density.episode_max(),
            };
            let severity = annotate(&transition.trigger, &ctx);
            events.push(IntelligenceEvent::Transition(TransitionEvent::new(
                &state.asset,
                episode_id,
                transition,
                severity,
            )));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::detect::signals::SignalKind;
    use crate::detect::threshold::ThresholdKind;
    use rust_decimal_macros::dec;

    fn engine() -> IntelligenceEngine {
        IntelligenceEngine::new(&Config::default())
    }

    fn transfer(wallet: &str, amount: Decimal, ts: i64) -> TransferEvent {
        TransferEvent::new(wallet, Direction::In, amount, ts, format!("{}-{}", wallet, ts))
    }

    fn thresholds_of(events: &[IntelligenceEvent]) -> Vec<ThresholdKind> {
        events
            .iter()
            .filter_map(|e| match e {
                IntelligenceEvent::Threshold(t) => Some(t.kind),
                _ => None,
            })
            .collect()
    }

    #[test]
    fn test_basic_latch_sequence() {
        let mut engine = engine();
        let first = engine.process(&transfer("A", dec!(12), 0)).unwrap();
        assert_eq!(thresholds_of(&first), vec![ThresholdKind::Single]);

        let second = engine.process(&transfer("A", dec!(8), 10)).unwrap();
        assert!(thresholds_of(&second).is_empty());

        let third = engine.process(&transfer("A", dec!(10), 20)).unwrap();
        assert_eq!(thresholds_of(&third), vec![ThresholdKind::Cum5m]);
    }

    #[test]
    fn test_first_threshold_ignites() {
        let mut engine = engine();
        let events = engine.process(&transfer("A", dec!(12), 100)).unwrap();

        assert_eq!(engine.state().episode_id(), 1);
        assert_eq!(engine.state().state(), LifecycleState::Ignition);
        assert!(engine.state().early_wallets().contains("A"));

        let kinds: Vec<_> = events
            .iter()
            .map(|e| match e {
                IntelligenceEvent::Threshold(_) => "threshold",
                IntelligenceEvent::Signal(s) if s.kind() == SignalKind::Timing => "timing",
                IntelligenceEvent::Signal(_) => "signal",
                IntelligenceEvent::Transition(_) => "transition",
            })
            .collect();
        assert_eq!(kinds, vec!["threshold", "timing", "transition"]);
    }

    #[test]
    fn test_sub_threshold_transfer_stays_quiet() {
        let mut engine = engine();
        let events = engine.process(&transfer("A", dec!(3), 0)).unwrap();
        assert!(events.is_empty());
        assert_eq!(engine.state().state(), LifecycleState::Quiet);
        assert_eq!(engine.state().episode_id(), 0);
    }

    #[test]
    fn test_invalid_transfer_leaves_state_untouched() {
        let mut engine = engine();
        engine.process(&transfer("A", dec!(12), 0)).unwrap();

        let err = engine.process(&transfer("B", dec!(-5), 10)).unwrap_err();
        assert!(err.is_input_error());
        assert!(engine.state().ledger().get("B").is_none());
        assert_eq!(engine.state().now(), Some(0));
        assert_eq!(engine.state().flow().transfers_in, 1);
    }

    #[test]
    fn test_advance_closes_episode() {
        let mut engine = engine();
        engine.process(&transfer("A", dec!(12), 1_000)).unwrap();

        // the lone early wallet has gone quiet, but the episode is still open
        let idle = engine.advance(1_500);
        assert!(idle.iter().all(|e| matches!(e, IntelligenceEvent::Signal(_))));
        assert!(engine.state().is_episode_open());
        let events = engine.advance(1_600);
        assert_eq!(events.len(), 1);
        match &events[0] {
            IntelligenceEvent::Transition(t) => {
                assert_eq!(t.to, LifecycleState::Quiet);
                assert_eq!(t.trigger, Trigger::EpisodeEnd { silence_secs: 600 });
                assert_eq!(t.severity, None);
                assert_eq!(t.episode_id, 1);
            }
            other => panic!("unexpected {:?}", other),
        }
        assert!(engine.state().early_wallets().is_empty());
        assert!(engine.state().ledger().is_empty());
    }

    #[test]
    fn test_flow_totals() {
        let mut engine = engine();
        engine.process(&transfer("A", dec!(6), 0)).unwrap();
        engine
            .process(&TransferEvent::new("B", Direction::Out, dec!(2), 5, "b-5"))
            .unwrap();
        let flow = engine.state().flow();
        assert_eq!(flow.net_flow(), dec!(4));
        assert_eq!(flow.outflow_ratio(), Some(dec!(0.25)));
    }

    #[test]
    fn test_events_serialize_tagged() {
        let mut engine = engine();
        let events = engine.process(&transfer("A", dec!(12), 0)).unwrap();
        let json = serde_json::to_value(&events[0]).unwrap();
        assert_eq!(json["event"], "threshold");
        assert_eq!(json["kind"], "SINGLE");
        assert_eq!(json["asset"], "unknown");
    }
}
