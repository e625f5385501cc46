//! Asset lifecycle states

use serde::{Deserialize, Serialize};
use std::fmt;

/// Nine-state model of attention on the asset, in forward order
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum LifecycleState {
    Quiet,
    Ignition,
    CoordinationSpike,
    EarlyPhase,
    PersistenceConfirmed,
    ParticipationExpansion,
    PressurePeaking,
    ExhaustionDetected,
    Dissipation,
}

impl LifecycleState {
    pub const COUNT: usize = 9;

    /// Position in the forward sequence
    pub fn ordinal(self) -> u8 {
        match self {
            LifecycleState::Quiet => 0,
            LifecycleState::Ignition => 1,
            LifecycleState::CoordinationSpike => 2,
            LifecycleState::EarlyPhase => 3,
            LifecycleState::PersistenceConfirmed => 4,
            LifecycleState::ParticipationExpansion => 5,
            LifecycleState::PressurePeaking => 6,
            LifecycleState::ExhaustionDetected => 7,
            LifecycleState::Dissipation => 8,
        }
    }

    /// Strictly earlier in the forward sequence
    pub fn is_before(self, other: LifecycleState) -> bool {
        self.ordinal() < other.ordinal()
    }

    /// At or beyond the density peak
    pub fn is_peak_or_later(self) -> bool {
        self.ordinal() >= LifecycleState::PressurePeaking.ordinal()
    }

    pub fn as_str(self) -> &'static str {
        match self {
            LifecycleState::Quiet => "QUIET",
            LifecycleState::Ignition => "IGNITION",
            LifecycleState::CoordinationSpike => "COORDINATION_SPIKE",
            LifecycleState::EarlyPhase => "EARLY_PHASE",
            LifecycleState::PersistenceConfirmed => "PERSISTENCE_CONFIRMED",
            LifecycleState::ParticipationExpansion => "PARTICIPATION_EXPANSION",
            LifecycleState::PressurePeaking => "PRESSURE_PEAKING",
            LifecycleState::ExhaustionDetected => "EXHAUSTION_DETECTED",
            LifecycleState::Dissipation => "DISSIPATION",
        }
    }
}

impl Default for LifecycleState {
    fn default() -> Self {
        LifecycleState::Quiet
    }
}

impl fmt::Display for LifecycleState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
