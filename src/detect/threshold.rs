//! Threshold detector with latched emission
//!
//! Three independent thresholds per wallet: one transfer, 5-minute sum and
//! 15-minute sum. Each kind fires at most once per wallet per episode; the
//! latch is only cleared when the episode ends. Downstream signal detection
//! relies on this exactly-once contract.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;
use tracing::debug;

use crate::config::{LiquidityThresholdConfig, ThresholdConfig, ThresholdMode};
use crate::stream::transfer::Direction;
use crate::wallet::window::WindowSums;

/// Which value crossed its threshold
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum ThresholdKind {
    #[serde(rename = "SINGLE")]
    Single,
    #[serde(rename = "CUM_5M")]
    Cum5m,
    #[serde(rename = "CUM_15M")]
    Cum15m,
}

impl ThresholdKind {
    pub const ALL: [ThresholdKind; 3] = [ThresholdKind::Single, ThresholdKind::Cum5m, ThresholdKind::Cum15m];

    fn bit(self) -> u8 {
        match self {
            ThresholdKind::Single => 0b001,
            ThresholdKind::Cum5m => 0b010,
            ThresholdKind::Cum15m => 0b100,
        }
    }

    /// The value of `sums` this kind compares
    pub fn select(self, sums: &WindowSums) -> Decimal {
        match self {
            ThresholdKind::Single => sums.single,
            ThresholdKind::Cum5m => sums.sum_short,
            ThresholdKind::Cum15m => sums.sum_long,
        }
    }
}

impl fmt::Display for ThresholdKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ThresholdKind::Single => write!(f, "SINGLE"),
            ThresholdKind::Cum5m => write!(f, "CUM_5M"),
            ThresholdKind::Cum15m => write!(f, "CUM_15M"),
        }
    }
}

/// Threshold kinds already fired for one wallet
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LatchSet(u8);

impl LatchSet {
    pub fn contains(&self, kind: ThresholdKind) -> bool {
        self.0 & kind.bit() != 0
    }

    /// Latch `kind`; returns false if it was already latched
    pub fn insert(&mut self, kind: ThresholdKind) -> bool {
        let fresh = !self.contains(kind);
        self.0 |= kind.bit();
        fresh
    }

    pub fn is_empty(&self) -> bool {
        self.0 == 0
    }

    pub fn len(&self) -> usize {
        self.0.count_ones() as usize
    }

    pub fn clear(&mut self) {
        self.0 = 0;
    }
}

/// Resolved threshold values
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Thresholds {
    pub single: Decimal,
    pub cum_5m: Decimal,
    pub cum_15m: Decimal,
    /// Liquidity figure the values were derived from, if any
    pub liquidity: Option<Decimal>,
}

impl Thresholds {
    pub fn new(single: Decimal, cum_5m: Decimal, cum_15m: Decimal) -> Self {
        Self {
            single,
            cum_5m,
            cum_15m,
            liquidity: None,
        }
    }

    /// Derive thresholds as fractions of pool liquidity, clamped per kind.
    ///
    /// A missing or non-positive liquidity falls back to the configured default.
    pub fn from_liquidity(liquidity: Option<Decimal>, config: &LiquidityThresholdConfig) -> Self {
        let liquidity = liquidity
            .filter(|l| *l > Decimal::ZERO)
            .unwrap_or(config.default_liquidity);

        let clamp = |pct: Decimal, floor: Decimal, ceiling: Decimal| (liquidity * pct).max(floor).min(ceiling);

        Self {
            single: clamp(config.single_pct, config.single_floor, config.single_ceiling),
            cum_5m: clamp(config.cum_5m_pct, config.cum_5m_floor, config.cum_5m_ceiling),
            cum_15m: clamp(config.cum_15m_pct, config.cum_15m_floor, config.cum_15m_ceiling),
            liquidity: Some(liquidity),
        }
    }

    /// Resolve once at startup from configuration
    pub fn resolve(config: &ThresholdConfig, liquidity_estimate: Option<Decimal>) -> Self {
        match config.mode {
            ThresholdMode::Static => Self::new(config.single, config.cum_5m, config.cum_15m),
            ThresholdMode::Liquidity => Self::from_liquidity(liquidity_estimate, &config.liquidity),
        }
    }

    pub fn value(&self, kind: ThresholdKind) -> Decimal {
        match kind {
            ThresholdKind::Single => self.single,
            ThresholdKind::Cum5m => self.cum_5m,
            ThresholdKind::Cum15m => self.cum_15m,
        }
    }
}

impl fmt::Display for Thresholds {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let Some(liquidity) = self.liquidity {
            write!(f, "liquidity={}, ", liquidity)?;
        }
        write!(
            f,
            "single={}, cum_5m={}, cum_15m={}",
            self.single, self.cum_5m, self.cum_15m
        )
    }
}

/// A newly latched crossing, before episode context is attached
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ThresholdCrossing {
    pub kind: ThresholdKind,
    pub value: Decimal,
    pub threshold: Decimal,
}

/// Output record: a wallet crossed a threshold for the first time this episode
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ThresholdEvent {
    pub asset: String,
    pub episode_id: u64,
    pub timestamp: i64,
    pub wallet: String,
    pub kind: ThresholdKind,
    pub direction: Direction,
    /// The compared value (amount or windowed sum)
    pub value: Decimal,
    pub threshold: Decimal,
    pub reference: String,
}

/// Value-agnostic latched comparator
#[derive(Debug, Clone)]
pub struct ThresholdDetector {
    thresholds: Thresholds,
}

impl ThresholdDetector {
    pub fn new(thresholds: Thresholds) -> Self {
        Self { thresholds }
    }

    pub fn thresholds(&self) -> &Thresholds {
        &self.thresholds
    }

    /// Compare `sums` against each unlatched kind, latching what fires.
    ///
    /// Returns zero to three crossings, in [`ThresholdKind::ALL`] order.
    pub fn check(&self, sums: &WindowSums, latches: &mut LatchSet) -> Vec<ThresholdCrossing> {
        let mut crossings = Vec::new();
        for kind in ThresholdKind::ALL {
            if latches.contains(kind) {
                continue;
            }
            let value = kind.select(sums);
            let threshold = self.thresholds.value(kind);
            if value >= threshold {
                latches.insert(kind);
                debug!(%kind, %value, %threshold, "Threshold crossed");
                crossings.push(ThresholdCrossing {
                    kind,
                    value,
                    threshold,
                });
            }
        }
        crossings
    }
}
