//! Nine-state lifecycle machine
//!
//! Evaluated once per processing pass against the current state. A pass may
//! cascade through several forward edges when their conditions already hold.
//! The two reverse edges only leave a state that was occupied before the
//! pass began, so one pass can never loop.

use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use super::severity::Severity;
use super::state::LifecycleState;
use crate::config::LifecycleConfig;
use crate::detect::signals::ExhaustionReading;

/// What caused a transition, with the counts that justified it
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Trigger {
    /// First threshold event of a new episode
    FirstThreshold,
    /// Threshold activity resumed during dissipation
    Reactivation,
    Coordination { wallet_count: usize },
    /// Time spent in the coordination spike
    Sustained { secs: i64 },
    Persistence { wallets: usize },
    /// A wallet outside the early cohort crossed a threshold
    NewParticipant { wallet: String, non_early_wallets: usize },
    DensityPeak { density: usize },
    Exhaustion { silent: usize, early: usize, fraction: f64 },
    ActivityCollapsed { recent_wallets: usize },
    /// Fresh threshold burst while exhausted
    BurstReversal { wallets: usize },
    EpisodeEnd { silence_secs: i64 },
}

impl Trigger {
    /// The state this trigger leads to
    pub fn target(&self) -> LifecycleState {
        match self {
            Trigger::FirstThreshold | Trigger::Reactivation => LifecycleState::Ignition,
            Trigger::Coordination { .. } => LifecycleState::CoordinationSpike,
            Trigger::Sustained { .. } => LifecycleState::EarlyPhase,
            Trigger::Persistence { .. } => LifecycleState::PersistenceConfirmed,
            Trigger::NewParticipant { .. } | Trigger::BurstReversal { .. } => LifecycleState::ParticipationExpansion,
            Trigger::DensityPeak { .. } => LifecycleState::PressurePeaking,
            Trigger::Exhaustion { .. } => LifecycleState::ExhaustionDetected,
            Trigger::ActivityCollapsed { .. } => LifecycleState::Dissipation,
            Trigger::EpisodeEnd { .. } => LifecycleState::Quiet,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Trigger::FirstThreshold => "first_threshold",
            Trigger::Reactivation => "reactivation",
            Trigger::Coordination { .. } => "coordination",
            Trigger::Sustained { .. } => "sustained",
            Trigger::Persistence { .. } => "persistence",
            Trigger::NewParticipant { .. } => "new_participant",
            Trigger::DensityPeak { .. } => "density_peak",
            Trigger::Exhaustion { .. } => "exhaustion",
            Trigger::ActivityCollapsed { .. } => "activity_collapsed",
            Trigger::BurstReversal { .. } => "burst_reversal",
            Trigger::EpisodeEnd { .. } => "episode_end",
        }
    }
}

/// A state change, before asset and severity context is attached
#[derive(Debug, Clone, PartialEq)]
pub struct Transition {
    pub from: LifecycleState,
    pub to: LifecycleState,
    pub trigger: Trigger,
    pub timestamp: i64,
}

/// Output record for a state change
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TransitionEvent {
    pub asset: String,
    pub episode_id: u64,
    pub timestamp: i64,
    pub from: LifecycleState,
    pub to: LifecycleState,
    pub trigger: Trigger,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub severity: Option<Severity>,
}

impl TransitionEvent {
    pub fn new(asset: &str, episode_id: u64, transition: Transition, severity: Option<Severity>) -> Self {
        Self {
            asset: asset.to_string(),
            episode_id,
            timestamp: transition.timestamp,
            from: transition.from,
            to: transition.to,
            trigger: transition.trigger,
            severity,
        }
    }
}

/// The wallet whose threshold batch drove this pass
#[derive(Debug, Clone)]
pub struct BatchSummary {
    pub wallet: String,
    pub is_early: bool,
}

/// Everything the machine reads during one pass
#[derive(Debug, Clone, Default)]
pub struct Conditions {
    pub now: i64,
    /// `None` for passes without a threshold batch (sub-threshold transfers, idle ticks)
    pub batch: Option<BatchSummary>,
    /// Wallet count of a COORDINATION signal raised this pass
    pub coordination: Option<usize>,
    pub persistent_wallets: usize,
    /// Wallets that crossed a threshold this episode without being early
    pub non_early_wallets: usize,
    pub density: usize,
    /// Density set a new episode maximum this pass
    pub peak_raised: bool,
    /// Distinct threshold wallets in the dissipation lookback
    pub recent_wallets: usize,
    /// Distinct threshold wallets in the reversal lookback
    pub burst_wallets: usize,
    /// The episode's EXHAUSTION signal, until the machine has acted on it
    pub exhaustion: Option<ExhaustionReading>,
}

/// Lifecycle state plus the time it was entered
#[derive(Debug, Clone)]
pub struct StateMachine {
    config: LifecycleConfig,
    state: LifecycleState,
    entered_at: Option<i64>,
}

impl StateMachine {
    pub fn new(config: LifecycleConfig) -> Self {
        Self {
            config,
            state: LifecycleState::Quiet,
            entered_at: None,
        }
    }

    pub fn state(&self) -> LifecycleState {
        self.state
    }

    pub fn entered_at(&self) -> Option<i64> {
        self.entered_at
    }

    /// Seconds spent in the current state
    pub fn time_in_state(&self, now: i64) -> i64 {
        self.entered_at.map_or(0, |at| (now - at).max(0))
    }

    fn apply(&mut self, trigger: Trigger, now: i64) -> Transition {
        let from = self.state;
        let to = trigger.target();
        self.state = to;
        self.entered_at = Some(now);
        info!(from = %from, to = %to, trigger = trigger.name(), "State transition");
        Transition {
            from,
            to,
            trigger,
            timestamp: now,
        }
    }

    /// Close the episode: any state except Quiet returns to Quiet
    pub fn end_episode(&mut self, now: i64, silence_secs: i64) -> Option<Transition> {
        if self.state == LifecycleState::Quiet {
            return None;
        }
        Some(self.apply(Trigger::EpisodeEnd { silence_secs }, now))
    }

    /// Run one evaluation pass, cascading while edges keep firing.
    ///
    /// PressurePeaking is left for ExhaustionDetected only on a later pass
    /// than the one that entered it, and only behind an EXHAUSTION signal.
    pub fn evaluate(&mut self, cond: &Conditions) -> Vec<Transition> {
        let settled = self.state;
        let mut transitions = Vec::new();

        for _ in 0..LifecycleState::COUNT {
            let trigger = match self.next_trigger(cond, settled) {
                Some(trigger) => trigger,
                None => break,
            };
            transitions.push(self.apply(trigger, cond.now));
        }

        if transitions.len() > 1 {
            debug!(count = transitions.len(), state = %self.state, "Cascaded transitions");
        }
        transitions
    }

    fn next_trigger(&self, cond: &Conditions, settled: LifecycleState) -> Option<Trigger> {
        let cfg = &self.config;
        // exhaustion and the reverse edges need a state held since before this pass
        let held = self.state == settled;

        match self.state {
            LifecycleState::Quiet => cond.batch.as_ref().map(|_| Trigger::FirstThreshold),
            LifecycleState::Ignition => cond
                .coordination
                .filter(|count| *count >= cfg.spike_min_wallets)
                .map(|wallet_count| Trigger::Coordination { wallet_count }),
            LifecycleState::CoordinationSpike => {
                let secs = self.time_in_state(cond.now);
                (secs >= cfg.spike_sustain_secs).then_some(Trigger::Sustained { secs })
            }
            LifecycleState::EarlyPhase => (cond.persistent_wallets >= cfg.persistence_min_wallets).then_some(
                Trigger::Persistence {
                    wallets: cond.persistent_wallets,
                },
            ),
            LifecycleState::PersistenceConfirmed => cond
                .batch
                .as_ref()
                .filter(|batch| !batch.is_early)
                .map(|batch| Trigger::NewParticipant {
                    wallet: batch.wallet.clone(),
                    non_early_wallets: cond.non_early_wallets,
                }),
            LifecycleState::ParticipationExpansion => (cond.peak_raised && cond.density >= cfg.peak_min_density)
                .then_some(Trigger::DensityPeak { density: cond.density }),
            LifecycleState::PressurePeaking => cond.exhaustion.filter(|_| held).map(|reading| Trigger::Exhaustion {
                silent: reading.silent,
                early: reading.early,
                fraction: reading.fraction,
            }),
            LifecycleState::ExhaustionDetected => {
                if cond.recent_wallets < cfg.dissipation_min_wallets {
                    Some(Trigger::ActivityCollapsed {
                        recent_wallets: cond.recent_wallets,
                    })
                } else if held && cond.batch.is_some() && cond.burst_wallets >= cfg.reversal_min_wallets {
                    Some(Trigger::BurstReversal {
                        wallets: cond.burst_wallets,
                    })
                } else {
                    None
                }
            }
            LifecycleState::Dissipation => (held && cond.batch.is_some()).then_some(Trigger::Reactivation),
        }
    }
}
