//! Chain-aligned time
//!
//! All timing math in the core happens in chain time. When the stream goes
//! quiet the runner still needs a "now" in that domain to drive time-based
//! transitions; this clock maps wallclock onto chain time.

use chrono::Utc;

/// Maps wallclock time into chain time
#[derive(Debug, Clone, Default)]
pub struct ChainClock {
    replay: bool,
    last_chain_ts: Option<i64>,
    /// wallclock - chain, captured on first observation
    offset: Option<i64>,
}

impl ChainClock {
    /// Live clock: wallclock advances chain time between events
    pub fn live() -> Self {
        Self::default()
    }

    /// Replay clock: only event timestamps move time forward
    pub fn replay() -> Self {
        Self {
            replay: true,
            ..Self::default()
        }
    }

    pub fn is_replay(&self) -> bool {
        self.replay
    }

    /// Record an observed chain timestamp
    pub fn observe(&mut self, chain_ts: i64) {
        self.observe_at(chain_ts, Utc::now().timestamp());
    }

    fn observe_at(&mut self, chain_ts: i64, wall_ts: i64) {
        if self.last_chain_ts.map_or(true, |last| chain_ts > last) {
            self.last_chain_ts = Some(chain_ts);
        }
        if self.offset.is_none() {
            self.offset = Some(wall_ts - chain_ts);
        }
    }

    /// Chain-aligned current time, `None` before the first observation
    pub fn now(&self) -> Option<i64> {
        self.now_at(Utc::now().timestamp())
    }

    fn now_at(&self, wall_ts: i64) -> Option<i64> {
        let last = self.last_chain_ts?;
        if self.replay {
            return Some(last);
        }
        let mapped = wall_ts - self.offset.unwrap_or(0);
        // Never run behind the newest observed chain timestamp
        Some(mapped.max(last))
    }

    /// Newest chain timestamp observed so far
    pub fn last_chain_ts(&self) -> Option<i64> {
        self.last_chain_ts
    }
}
