//! Episode and density tracking
//!
//! An episode is a maximal run of threshold activity; a silence of at least
//! the boundary between two threshold events separates episodes. Density is
//! the number of distinct wallets that crossed a threshold inside a short
//! sliding window, and the episode keeps its running maximum.

use std::collections::{BTreeSet, VecDeque};
use tracing::info;

use crate::stream::transfer::Direction;

#[derive(Debug, Clone)]
struct TapeEntry {
    timestamp: i64,
    wallet: String,
    direction: Direction,
}

/// Recent threshold activity across all wallets.
///
/// One tape serves every trailing window (coordination, density,
/// dissipation, reversal); each reader picks its own cutoff.
#[derive(Debug, Clone)]
pub struct ActivityTape {
    retention_secs: i64,
    /// Sorted by timestamp
    entries: VecDeque<TapeEntry>,
    high_water: Option<i64>,
}

impl ActivityTape {
    pub fn new(retention_secs: i64) -> Self {
        Self {
            retention_secs,
            entries: VecDeque::new(),
            high_water: None,
        }
    }

    /// Record one threshold event
    pub fn push(&mut self, timestamp: i64, wallet: &str, direction: Direction) {
        let idx = self.entries.partition_point(|e| e.timestamp <= timestamp);
        self.entries.insert(
            idx,
            TapeEntry {
                timestamp,
                wallet: wallet.to_string(),
                direction,
            },
        );
        let reference = self.high_water.map_or(timestamp, |hw| hw.max(timestamp));
        self.high_water = Some(reference);
        self.trim(reference);
    }

    fn trim(&mut self, now: i64) {
        let cutoff = now - self.retention_secs;
        while self.entries.front().map_or(false, |e| e.timestamp < cutoff) {
            self.entries.pop_front();
        }
    }

    fn window(&self, now: i64, window_secs: i64) -> impl Iterator<Item = &TapeEntry> {
        let cutoff = now - window_secs;
        self.entries
            .iter()
            .filter(move |e| e.timestamp >= cutoff && e.timestamp <= now)
    }

    /// Distinct wallets with threshold activity in `[now - window_secs, now]`
    pub fn distinct_wallets(&self, now: i64, window_secs: i64) -> BTreeSet<&str> {
        self.window(now, window_secs).map(|e| e.wallet.as_str()).collect()
    }

    pub fn distinct_count(&self, now: i64, window_secs: i64) -> usize {
        self.distinct_wallets(now, window_secs).len()
    }

    /// Which directions appear in the window
    pub fn flow_mix(&self, now: i64, window_secs: i64) -> FlowMix {
        let (mut inflow, mut outflow) = (false, false);
        for entry in self.window(now, window_secs) {
            match entry.direction {
                Direction::In => inflow = true,
                Direction::Out => outflow = true,
            }
        }
        match (inflow, outflow) {
            (true, false) => FlowMix::Inflow,
            (false, true) => FlowMix::Outflow,
            _ => FlowMix::Mixed,
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn clear(&mut self) {
        self.entries.clear();
        self.high_water = None;
    }
}

/// Dominant direction of windowed threshold activity
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FlowMix {
    Inflow,
    Outflow,
    Mixed,
}

/// Distinct-wallet density and its per-episode maximum
#[derive(Debug, Clone)]
pub struct DensityTracker {
    window_secs: i64,
    episode_max: usize,
}

impl DensityTracker {
    pub fn new(window_secs: i64) -> Self {
        Self {
            window_secs,
            episode_max: 0,
        }
    }

    /// Current density at `now`
    pub fn measure(&self, tape: &ActivityTape, now: i64) -> usize {
        tape.distinct_count(now, self.window_secs)
    }

    /// Fold a density reading in; true when it sets a new episode maximum
    pub fn observe(&mut self, density: usize) -> bool {
        if density > self.episode_max {
            self.episode_max = density;
            true
        } else {
            false
        }
    }

    pub fn episode_max(&self) -> usize {
        self.episode_max
    }

    pub fn reset(&mut self) {
        self.episode_max = 0;
    }
}

/// Episode identity and boundary detection
#[derive(Debug, Clone)]
pub struct EpisodeTracker {
    boundary_secs: i64,
    episode_id: u64,
    open: bool,
    started_at: Option<i64>,
    last_threshold_at: Option<i64>,
}

impl EpisodeTracker {
    pub fn new(boundary_secs: i64) -> Self {
        Self {
            boundary_secs,
            episode_id: 0,
            open: false,
            started_at: None,
            last_threshold_at: None,
        }
    }

    /// Silence length if the open episode has gone quiet past the boundary
    pub fn expired_silence(&self, now: i64) -> Option<i64> {
        if !self.open {
            return None;
        }
        let last = self.last_threshold_at?;
        let silence = now - last;
        (silence >= self.boundary_secs).then_some(silence)
    }

    /// Open a new episode at `timestamp`
    pub fn open(&mut self, timestamp: i64) -> u64 {
        self.episode_id += 1;
        self.open = true;
        self.started_at = Some(timestamp);
        info!(episode_id = self.episode_id, timestamp, "Episode opened");
        self.episode_id
    }

    /// Close the current episode; the id is kept until the next one opens
    pub fn close(&mut self) {
        if self.open {
            info!(episode_id = self.episode_id, "Episode closed");
        }
        self.open = false;
    }

    pub fn record_threshold(&mut self, timestamp: i64) {
        self.last_threshold_at = Some(self.last_threshold_at.map_or(timestamp, |t| t.max(timestamp)));
    }

    pub fn is_open(&self) -> bool {
        self.open
    }

    pub fn id(&self) -> u64 {
        self.episode_id
    }

    pub fn started_at(&self) -> Option<i64> {
        self.started_at
    }

    pub fn last_threshold_at(&self) -> Option<i64> {
        self.last_threshold_at
    }

    pub fn boundary_secs(&self) -> i64 {
        self.boundary_secs
    }
}
