//! Ordinal severity for state transitions
//!
//! Severity is computed once, when a transition is emitted, from the
//! trigger's own counts plus a few episode-scoped figures. Nothing here is
//! stored between transitions.

use serde::{Deserialize, Serialize};
use std::fmt;

use super::machine::Trigger;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum Severity {
    S1,
    S2,
    S3,
    S4,
    S5,
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Severity::S1 => "S1",
            Severity::S2 => "S2",
            Severity::S3 => "S3",
            Severity::S4 => "S4",
            Severity::S5 => "S5",
        };
        f.write_str(label)
    }
}

/// Episode figures a trigger does not carry itself
#[derive(Debug, Clone, Copy, Default)]
pub struct SeverityContext {
    pub early_wallets: usize,
    pub episode_max_density: usize,
}

/// `(minimum, severity)` rungs, strongest first
type Ladder = &'static [(usize, Severity)];

const COORDINATION_LADDER: Ladder = &[(6, Severity::S5), (5, Severity::S4), (4, Severity::S3), (3, Severity::S2)];
const PERSISTENCE_LADDER: Ladder = &[(4, Severity::S5), (3, Severity::S4)];
const EXPANSION_LADDER: Ladder = &[(3, Severity::S4), (2, Severity::S3)];
const REVERSAL_LADDER: Ladder = &[(3, Severity::S4)];
const PEAK_LADDER: Ladder = &[(10, Severity::S5), (7, Severity::S4)];
const EXHAUSTION_LADDER: &[(f64, Severity)] = &[(0.80, Severity::S5), (0.70, Severity::S4)];

/// Sustained time in CoordinationSpike and early cohort size for an S3 early phase
const EARLY_PHASE_STRONG_SECS: i64 = 180;
const EARLY_PHASE_STRONG_WALLETS: usize = 3;
/// Peak density after which dissipation reads as a strong decay
const DISSIPATION_STRONG_DENSITY: usize = 7;

fn climb(value: usize, ladder: Ladder, floor: Severity) -> Severity {
    ladder
        .iter()
        .find(|(minimum, _)| value >= *minimum)
        .map_or(floor, |(_, severity)| *severity)
}

/// Severity of a transition caused by `trigger`; `None` for the quiet state
pub fn annotate(trigger: &Trigger, ctx: &SeverityContext) -> Option<Severity> {
    let severity = match trigger {
        Trigger::EpisodeEnd { .. } => return None,
        Trigger::FirstThreshold | Trigger::Reactivation => {
            if ctx.early_wallets >= 2 {
                Severity::S2
            } else {
                Severity::S1
            }
        }
        Trigger::Coordination { wallet_count } => climb(*wallet_count, COORDINATION_LADDER, Severity::S1),
        Trigger::Sustained { secs } => {
            if *secs >= EARLY_PHASE_STRONG_SECS && ctx.early_wallets >= EARLY_PHASE_STRONG_WALLETS {
                Severity::S3
            } else {
                Severity::S2
            }
        }
        Trigger::Persistence { wallets } => climb(*wallets, PERSISTENCE_LADDER, Severity::S3),
        Trigger::NewParticipant { non_early_wallets, .. } => {
            climb(*non_early_wallets, EXPANSION_LADDER, Severity::S2)
        }
        Trigger::BurstReversal { wallets } => climb(*wallets, REVERSAL_LADDER, Severity::S3),
        Trigger::DensityPeak { density } => climb(*density, PEAK_LADDER, Severity::S3),
        Trigger::Exhaustion { fraction, .. } => EXHAUSTION_LADDER
            .iter()
            .find(|(minimum, _)| *fraction >= *minimum)
            .map_or(Severity::S3, |(_, severity)| *severity),
        Trigger::ActivityCollapsed { .. } => {
            if ctx.episode_max_density >= DISSIPATION_STRONG_DENSITY {
                Severity::S4
            } else {
                Severity::S2
            }
        }
    };
    Some(severity)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ctx(early_wallets: usize, episode_max_density: usize) -> SeverityContext {
        SeverityContext {
            early_wallets,
            episode_max_density,
        }
    }

    #[test]
    fn test_coordination_ladder() {
        let c = ctx(0, 0);
        let at = |n| annotate(&Trigger::Coordination { wallet_count: n }, &c);
        assert_eq!(at(3), Some(Severity::S2));
        assert_eq!(at(4), Some(Severity::S3));
        assert_eq!(at(5), Some(Severity::S4));
        assert_eq!(at(6), Some(Severity::S5));
        assert_eq!(at(40), Some(Severity::S5));
    }

    #[test]
    fn test_quiet_has_no_severity() {
        assert_eq!(annotate(&Trigger::EpisodeEnd { silence_secs: 600 }, &ctx(5, 9)), None);
    }

    #[test]
    fn test_ignition_scales_with_early_cohort() {
        assert_eq!(annotate(&Trigger::FirstThreshold, &ctx(1, 0)), Some(Severity::S1));
        assert_eq!(annotate(&Trigger::Reactivation, &ctx(4, 0)), Some(Severity::S2));
    }

    #[test]
    fn test_floors_hold() {
        let c = ctx(0, 0);
        assert_eq!(annotate(&Trigger::Persistence { wallets: 2 }, &c), Some(Severity::S3));
        assert_eq!(annotate(&Trigger::DensityPeak { density: 5 }, &c), Some(Severity::S3));
        assert_eq!(annotate(&Trigger::BurstReversal { wallets: 2 }, &c), Some(Severity::S3));
        assert_eq!(
            annotate(
                &Trigger::Exhaustion {
                    silent: 6,
                    early: 10,
                    fraction: 0.6
                },
                &c
            ),
            Some(Severity::S3)
        );
    }

    #[test]
    fn test_exhaustion_ladder() {
        let at = |fraction| {
            annotate(
                &Trigger::Exhaustion {
                    silent: 0,
                    early: 10,
                    fraction,
                },
                &ctx(10, 0),
            )
        };
        assert_eq!(at(0.70), Some(Severity::S4));
        assert_eq!(at(0.85), Some(Severity::S5));
    }

    #[test]
    fn test_dissipation_follows_peak_strength() {
        let trigger = Trigger::ActivityCollapsed { recent_wallets: 0 };
        assert_eq!(annotate(&trigger, &ctx(3, 4)), Some(Severity::S2));
        assert_eq!(annotate(&trigger, &ctx(3, 8)), Some(Severity::S4));
    }

    #[test]
    fn test_early_phase_needs_duration_and_cohort() {
        assert_eq!(annotate(&Trigger::Sustained { secs: 200 }, &ctx(2, 0)), Some(Severity::S2));
        assert_eq!(annotate(&Trigger::Sustained { secs: 120 }, &ctx(5, 0)), Some(Severity::S2));
        assert_eq!(annotate(&Trigger::Sustained { secs: 200 }, &ctx(3, 0)), Some(Severity::S3));
    }

    #[test]
    fn test_ordering() {
        assert!(Severity::S1 < Severity::S5);
        assert_eq!(Severity::S4.to_string(), "S4");
    }
}
