//! Rolling window tracker
//!
//! Per-wallet, per-direction cumulative sums over a short (5 min) and a long
//! (15 min) trailing horizon. Eviction is by time, never by count, and is
//! done lazily on each update.

use rust_decimal::Decimal;
use std::collections::VecDeque;

use crate::config::WindowConfig;
use crate::stream::transfer::{Direction, TransferEvent};

/// Time-bounded running sum of amounts
#[derive(Debug, Clone)]
pub struct RollingSum {
    horizon_secs: i64,
    /// Sorted by timestamp
    entries: VecDeque<(i64, Decimal)>,
    sum: Decimal,
    /// Newest timestamp this window has seen
    high_water: Option<i64>,
}

impl RollingSum {
    pub fn new(horizon_secs: i64) -> Self {
        Self {
            horizon_secs,
            entries: VecDeque::new(),
            sum: Decimal::ZERO,
            high_water: None,
        }
    }

    /// Add an amount and return the updated sum.
    ///
    /// Late arrivals are slotted in timestamp order. An entry already older
    /// than the horizon relative to the newest timestamp is not retained.
    pub fn add(&mut self, timestamp: i64, amount: Decimal) -> Decimal {
        let reference = self.high_water.map_or(timestamp, |hw| hw.max(timestamp));
        self.high_water = Some(reference);

        if timestamp >= reference - self.horizon_secs {
            let idx = self.entries.partition_point(|(ts, _)| *ts <= timestamp);
            self.entries.insert(idx, (timestamp, amount));
            self.sum += amount;
        }

        self.trim(reference);
        self.sum
    }

    /// Drop entries older than the horizon relative to `now`
    pub fn trim(&mut self, now: i64) {
        let cutoff = now - self.horizon_secs;
        while let Some((ts, amount)) = self.entries.front() {
            if *ts < cutoff {
                self.sum -= *amount;
                self.entries.pop_front();
            } else {
                break;
            }
        }
    }

    pub fn sum(&self) -> Decimal {
        self.sum
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Short and long horizon for one direction
#[derive(Debug, Clone)]
pub struct DirectionalWindows {
    pub short: RollingSum,
    pub long: RollingSum,
}

impl DirectionalWindows {
    pub fn new(config: &WindowConfig) -> Self {
        Self {
            short: RollingSum::new(config.short_secs),
            long: RollingSum::new(config.long_secs),
        }
    }
}

/// All window buffers held for one wallet
#[derive(Debug, Clone)]
pub struct WalletWindows {
    inflow: DirectionalWindows,
    outflow: DirectionalWindows,
}

impl WalletWindows {
    pub fn new(config: &WindowConfig) -> Self {
        Self {
            inflow: DirectionalWindows::new(config),
            outflow: DirectionalWindows::new(config),
        }
    }

    pub fn direction(&self, direction: Direction) -> &DirectionalWindows {
        match direction {
            Direction::In => &self.inflow,
            Direction::Out => &self.outflow,
        }
    }

    fn direction_mut(&mut self, direction: Direction) -> &mut DirectionalWindows {
        match direction {
            Direction::In => &mut self.inflow,
            Direction::Out => &mut self.outflow,
        }
    }

    /// Record a transfer and return the values the threshold detector compares
    pub fn record(&mut self, transfer: &TransferEvent) -> WindowSums {
        let windows = self.direction_mut(transfer.direction);
        let sum_short = windows.short.add(transfer.timestamp, transfer.amount);
        let sum_long = windows.long.add(transfer.timestamp, transfer.amount);
        WindowSums {
            single: transfer.amount,
            sum_short,
            sum_long,
        }
    }
}

/// Single-event amount plus both windowed sums for the transfer's direction
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WindowSums {
    pub single: Decimal,
    pub sum_short: Decimal,
    pub sum_long: Decimal,
}
