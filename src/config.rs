//! Configuration loading and validation

use anyhow::{Context, Result};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::Deserialize;
use std::path::Path;

/// Main configuration structure
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub asset: AssetConfig,
    #[serde(default)]
    pub thresholds: ThresholdConfig,
    #[serde(default)]
    pub windows: WindowConfig,
    #[serde(default)]
    pub signals: SignalConfig,
    #[serde(default)]
    pub episode: EpisodeConfig,
    #[serde(default)]
    pub lifecycle: LifecycleConfig,
    #[serde(default)]
    pub capacity: CapacityConfig,
    #[serde(default)]
    pub backpressure: BackpressureConfig,
    #[serde(default)]
    pub runtime: RuntimeConfig,
}

/// The monitored asset
#[derive(Debug, Clone, Deserialize)]
pub struct AssetConfig {
    /// Asset identifier stamped on every emitted event (mint address or similar)
    #[serde(default = "default_asset_id")]
    pub id: String,
    /// Estimated pool liquidity, used when thresholds are liquidity-derived
    #[serde(default)]
    pub liquidity_estimate: Option<Decimal>,
}

impl Default for AssetConfig {
    fn default() -> Self {
        Self {
            id: default_asset_id(),
            liquidity_estimate: None,
        }
    }
}

/// How the three threshold values are obtained
#[derive(Debug, Clone, Copy, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ThresholdMode {
    /// Use `single`, `cum_5m`, `cum_15m` as written
    Static,
    /// Derive once at startup from the asset's liquidity estimate
    Liquidity,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ThresholdConfig {
    #[serde(default = "default_threshold_mode")]
    pub mode: ThresholdMode,
    /// Single-transfer threshold (asset-native units)
    #[serde(default = "default_single")]
    pub single: Decimal,
    /// 5-minute cumulative threshold
    #[serde(default = "default_cum_5m")]
    pub cum_5m: Decimal,
    /// 15-minute cumulative threshold
    #[serde(default = "default_cum_15m")]
    pub cum_15m: Decimal,
    #[serde(default)]
    pub liquidity: LiquidityThresholdConfig,
}

impl Default for ThresholdConfig {
    fn default() -> Self {
        Self {
            mode: default_threshold_mode(),
            single: default_single(),
            cum_5m: default_cum_5m(),
            cum_15m: default_cum_15m(),
            liquidity: LiquidityThresholdConfig::default(),
        }
    }
}

/// Thresholds as fractions of pool liquidity, clamped per kind
#[derive(Debug, Clone, Deserialize)]
pub struct LiquidityThresholdConfig {
    /// Liquidity assumed when no usable estimate exists
    #[serde(default = "default_liquidity")]
    pub default_liquidity: Decimal,
    #[serde(default = "default_single_pct")]
    pub single_pct: Decimal,
    #[serde(default = "default_cum_5m_pct")]
    pub cum_5m_pct: Decimal,
    #[serde(default = "default_cum_15m_pct")]
    pub cum_15m_pct: Decimal,
    #[serde(default = "default_single_floor")]
    pub single_floor: Decimal,
    #[serde(default = "default_single_ceiling")]
    pub single_ceiling: Decimal,
    #[serde(default = "default_cum_5m_floor")]
    pub cum_5m_floor: Decimal,
    #[serde(default = "default_cum_5m_ceiling")]
    pub cum_5m_ceiling: Decimal,
    #[serde(default = "default_cum_15m_floor")]
    pub cum_15m_floor: Decimal,
    #[serde(default = "default_cum_15m_ceiling")]
    pub cum_15m_ceiling: Decimal,
}

impl Default for LiquidityThresholdConfig {
    fn default() -> Self {
        Self {
            default_liquidity: default_liquidity(),
            single_pct: default_single_pct(),
            cum_5m_pct: default_cum_5m_pct(),
            cum_15m_pct: default_cum_15m_pct(),
            single_floor: default_single_floor(),
            single_ceiling: default_single_ceiling(),
            cum_5m_floor: default_cum_5m_floor(),
            cum_5m_ceiling: default_cum_5m_ceiling(),
            cum_15m_floor: default_cum_15m_floor(),
            cum_15m_ceiling: default_cum_15m_ceiling(),
        }
    }
}

/// Rolling window horizons (seconds)
#[derive(Debug, Clone, Deserialize)]
pub struct WindowConfig {
    #[serde(default = "default_short_window")]
    pub short_secs: i64,
    #[serde(default = "default_long_window")]
    pub long_secs: i64,
}

impl Default for WindowConfig {
    fn default() -> Self {
        Self {
            short_secs: default_short_window(),
            long_secs: default_long_window(),
        }
    }
}

/// Behavioural signal tuning
#[derive(Debug, Clone, Deserialize)]
pub struct SignalConfig {
    /// A wallet first seen within this many seconds of episode start is early
    #[serde(default = "default_early_window")]
    pub early_window_secs: i64,
    /// Trailing window for coordination
    #[serde(default = "default_coordination_window")]
    pub coordination_window_secs: i64,
    /// Distinct wallets needed in the coordination window
    #[serde(default = "default_coordination_min_wallets")]
    pub coordination_min_wallets: usize,
    /// Other wallets named in a coordination payload
    #[serde(default = "default_coordination_sample")]
    pub coordination_sample_size: usize,
    /// Distinct minute buckets needed for persistence
    #[serde(default = "default_persistence_min_buckets")]
    pub persistence_min_buckets: usize,
    /// Largest allowed gap between consecutive buckets (seconds)
    #[serde(default = "default_persistence_max_gap")]
    pub persistence_max_gap_secs: i64,
    /// Fraction of early wallets that must be silent
    #[serde(default = "default_exhaustion_fraction")]
    pub exhaustion_fraction: f64,
    /// Inactivity after which a wallet is silent regardless of phase
    #[serde(default = "default_silence_fallback")]
    pub silence_fallback_secs: i64,
    /// A wallet active this recently is never silent
    #[serde(default = "default_silence_grace")]
    pub silence_grace_secs: i64,
}

impl Default for SignalConfig {
    fn default() -> Self {
        Self {
            early_window_secs: default_early_window(),
            coordination_window_secs: default_coordination_window(),
            coordination_min_wallets: default_coordination_min_wallets(),
            coordination_sample_size: default_coordination_sample(),
            persistence_min_buckets: default_persistence_min_buckets(),
            persistence_max_gap_secs: default_persistence_max_gap(),
            exhaustion_fraction: default_exhaustion_fraction(),
            silence_fallback_secs: default_silence_fallback(),
            silence_grace_secs: default_silence_grace(),
        }
    }
}

/// Episode boundary and density window
#[derive(Debug, Clone, Deserialize)]
pub struct EpisodeConfig {
    /// Threshold silence that separates two episodes
    #[serde(default = "default_boundary")]
    pub boundary_secs: i64,
    /// Sliding window for distinct-wallet density
    #[serde(default = "default_density_window")]
    pub density_window_secs: i64,
}

impl Default for EpisodeConfig {
    fn default() -> Self {
        Self {
            boundary_secs: default_boundary(),
            density_window_secs: default_density_window(),
        }
    }
}

/// Lifecycle transition triggers
#[derive(Debug, Clone, Deserialize)]
pub struct LifecycleConfig {
    /// Coordinated wallets needed for Ignition -> CoordinationSpike
    #[serde(default = "default_spike_min_wallets")]
    pub spike_min_wallets: usize,
    /// Time in CoordinationSpike before EarlyPhase
    #[serde(default = "default_spike_sustain")]
    pub spike_sustain_secs: i64,
    /// Persistent wallets needed for EarlyPhase -> PersistenceConfirmed
    #[serde(default = "default_persistence_min_wallets")]
    pub persistence_min_wallets: usize,
    /// Minimum density for ParticipationExpansion -> PressurePeaking
    #[serde(default = "default_peak_min_density")]
    pub peak_min_density: usize,
    /// Lookback for the activity-collapse check
    #[serde(default = "default_dissipation_window")]
    pub dissipation_window_secs: i64,
    /// Dissipation when fewer distinct wallets than this crossed a threshold in the lookback
    #[serde(default = "default_dissipation_min_wallets")]
    pub dissipation_min_wallets: usize,
    /// Lookback for the exhaustion reversal burst
    #[serde(default = "default_reversal_window")]
    pub reversal_window_secs: i64,
    /// Distinct wallets forming a reversal burst
    #[serde(default = "default_reversal_min_wallets")]
    pub reversal_min_wallets: usize,
}

impl Default for LifecycleConfig {
    fn default() -> Self {
        Self {
            spike_min_wallets: default_spike_min_wallets(),
            spike_sustain_secs: default_spike_sustain(),
            persistence_min_wallets: default_persistence_min_wallets(),
            peak_min_density: default_peak_min_density(),
            dissipation_window_secs: default_dissipation_window(),
            dissipation_min_wallets: default_dissipation_min_wallets(),
            reversal_window_secs: default_reversal_window(),
            reversal_min_wallets: default_reversal_min_wallets(),
        }
    }
}

/// Memory bounds
#[derive(Debug, Clone, Deserialize)]
pub struct CapacityConfig {
    /// Cap on wallets holding rolling-window buffers (0 = bounded only by episode)
    #[serde(default)]
    pub max_windowed_wallets: usize,
    /// Recent correlation references remembered for duplicate suppression
    #[serde(default = "default_dedup_references")]
    pub dedup_references: usize,
}

impl Default for CapacityConfig {
    fn default() -> Self {
        Self {
            max_windowed_wallets: 0,
            dedup_references: default_dedup_references(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct BackpressureConfig {
    #[serde(default = "default_channel_capacity")]
    pub channel_capacity: usize,
    #[serde(default = "default_drop_policy")]
    pub drop_policy: DropPolicy,
}

impl Default for BackpressureConfig {
    fn default() -> Self {
        Self {
            channel_capacity: default_channel_capacity(),
            drop_policy: default_drop_policy(),
        }
    }
}

#[derive(Debug, Clone, Copy, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum DropPolicy {
    /// Stall the producer until the consumer frees a slot
    Block,
    /// Discard the oldest queued transfer
    DropOldest,
    /// Discard the incoming transfer
    DropNewest,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RuntimeConfig {
    /// Idle tick driving time-based transitions (milliseconds)
    #[serde(default = "default_tick_interval_ms")]
    pub tick_interval_ms: u64,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            tick_interval_ms: default_tick_interval_ms(),
        }
    }
}

fn default_asset_id() -> String {
    "unknown".to_string()
}

fn default_threshold_mode() -> ThresholdMode {
    ThresholdMode::Static
}

fn default_single() -> Decimal { dec!(10) }
fn default_cum_5m() -> Decimal { dec!(25) }
fn default_cum_15m() -> Decimal { dec!(50) }

fn default_liquidity() -> Decimal { dec!(50) }
fn default_single_pct() -> Decimal { dec!(0.005) }
fn default_cum_5m_pct() -> Decimal { dec!(0.01) }
fn default_cum_15m_pct() -> Decimal { dec!(0.02) }
fn default_single_floor() -> Decimal { dec!(0.1) }
fn default_single_ceiling() -> Decimal { dec!(100) }
fn default_cum_5m_floor() -> Decimal { dec!(0.5) }
fn default_cum_5m_ceiling() -> Decimal { dec!(250) }
fn default_cum_15m_floor() -> Decimal { dec!(1.0) }
fn default_cum_15m_ceiling() -> Decimal { dec!(500) }

fn default_short_window() -> i64 { 300 }
fn default_long_window() -> i64 { 900 }

fn default_early_window() -> i64 { 300 }
fn default_coordination_window() -> i64 { 60 }
fn default_coordination_min_wallets() -> usize { 3 }
fn default_coordination_sample() -> usize { 5 }
fn default_persistence_min_buckets() -> usize { 2 }
fn default_persistence_max_gap() -> i64 { 300 }
fn default_exhaustion_fraction() -> f64 { 0.60 }
fn default_silence_fallback() -> i64 { 60 }
fn default_silence_grace() -> i64 { 45 }

fn default_boundary() -> i64 { 600 }
fn default_density_window() -> i64 { 120 }

fn default_spike_min_wallets() -> usize { 3 }
fn default_spike_sustain() -> i64 { 120 }
fn default_persistence_min_wallets() -> usize { 2 }
fn default_peak_min_density() -> usize { 5 }
fn default_dissipation_window() -> i64 { 300 }
fn default_dissipation_min_wallets() -> usize { 1 }
fn default_reversal_window() -> i64 { 60 }
fn default_reversal_min_wallets() -> usize { 2 }

fn default_dedup_references() -> usize { 10_000 }

fn default_channel_capacity() -> usize {
    4096
}

fn default_drop_policy() -> DropPolicy {
    DropPolicy::Block
}

fn default_tick_interval_ms() -> u64 {
    1000
}

impl Config {
    /// Load configuration from file and environment variables
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();

        let settings = config::Config::builder()
            // Load from file if exists
            .add_source(config::File::from(path).required(false))
            // Override with environment variables (prefix PANDA_)
            .add_source(
                config::Environment::with_prefix("PANDA")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()
            .context("Failed to build configuration")?;

        let config: Config = settings
            .try_deserialize()
            .context("Failed to deserialize configuration")?;

        config.validate()?;

        Ok(config)
    }

    /// Validate configuration values
    pub fn validate(&self) -> Result<()> {
        if self.asset.id.trim().is_empty() {
            anyhow::bail!("asset.id cannot be empty");
        }

        let t = &self.thresholds;
        if t.mode == ThresholdMode::Static {
            for (name, value) in [("single", t.single), ("cum_5m", t.cum_5m), ("cum_15m", t.cum_15m)] {
                if value <= Decimal::ZERO {
                    anyhow::bail!("thresholds.{} must be positive", name);
                }
            }
        }

        let l = &t.liquidity;
        for (name, floor, ceiling) in [
            ("single", l.single_floor, l.single_ceiling),
            ("cum_5m", l.cum_5m_floor, l.cum_5m_ceiling),
            ("cum_15m", l.cum_15m_floor, l.cum_15m_ceiling),
        ] {
            if floor <= Decimal::ZERO || floor > ceiling {
                anyhow::bail!(
                    "thresholds.liquidity.{} floor {} must be positive and not above ceiling {}",
                    name,
                    floor,
                    ceiling
                );
            }
        }

        if self.windows.short_secs <= 0 || self.windows.long_secs < self.windows.short_secs {
            anyhow::bail!("windows must satisfy 0 < short_secs <= long_secs");
        }

        let s = &self.signals;
        if s.early_window_secs < 0 || s.coordination_window_secs <= 0 || s.persistence_max_gap_secs < 0 {
            anyhow::bail!("signal windows must be non-negative (coordination window positive)");
        }
        if s.coordination_min_wallets < 2 {
            anyhow::bail!("coordination_min_wallets must be at least 2");
        }
        if s.persistence_min_buckets < 2 {
            anyhow::bail!("persistence_min_buckets must be at least 2");
        }
        if !(s.exhaustion_fraction > 0.0 && s.exhaustion_fraction <= 1.0) {
            anyhow::bail!("exhaustion_fraction must be in (0, 1]");
        }
        if s.silence_fallback_secs <= 0 {
            anyhow::bail!("silence_fallback_secs must be positive");
        }
        if s.silence_grace_secs < 0 || s.silence_grace_secs > s.silence_fallback_secs {
            anyhow::bail!("silence_grace_secs must be within 0..=silence_fallback_secs");
        }

        if self.episode.boundary_secs <= 0 || self.episode.density_window_secs <= 0 {
            anyhow::bail!("episode boundary and density window must be positive");
        }

        let lc = &self.lifecycle;
        if lc.peak_min_density == 0 || lc.spike_min_wallets == 0 || lc.reversal_min_wallets == 0 {
            anyhow::bail!("lifecycle wallet minimums must be positive");
        }
        if lc.dissipation_window_secs <= 0 || lc.reversal_window_secs <= 0 {
            anyhow::bail!("lifecycle lookback windows must be positive");
        }

        if self.backpressure.channel_capacity == 0 {
            anyhow::bail!("backpressure.channel_capacity must be positive");
        }

        if self.backpressure.drop_policy != DropPolicy::Block {
            tracing::warn!(
                "Backpressure drop_policy is {:?} - transfers will be discarded under load",
                self.backpressure.drop_policy
            );
        }

        Ok(())
    }

    /// Human-readable summary of the resolved configuration
    pub fn display_summary(&self) -> String {
        format!(
            r#"Configuration:
  Asset:
    id: {}
    liquidity_estimate: {}
  Thresholds:
    mode: {:?}
    single / cum_5m / cum_15m: {} / {} / {}
  Windows:
    short: {}s  long: {}s
  Signals:
    early_window: {}s
    coordination: {} wallets in {}s
    persistence: {} buckets, max gap {}s
    exhaustion: {:.0}% silent, fallback {}s, grace {}s
  Episode:
    boundary: {}s  density_window: {}s
  Capacity:
    max_windowed_wallets: {}
  Backpressure:
    capacity: {}  policy: {:?}
"#,
            self.asset.id,
            self.asset
                .liquidity_estimate
                .map(|l| l.to_string())
                .unwrap_or_else(|| "(not set)".to_string()),
            self.thresholds.mode,
            self.thresholds.single,
            self.thresholds.cum_5m,
            self.thresholds.cum_15m,
            self.windows.short_secs,
            self.windows.long_secs,
            self.signals.early_window_secs,
            self.signals.coordination_min_wallets,
            self.signals.coordination_window_secs,
            self.signals.persistence_min_buckets,
            self.signals.persistence_max_gap_secs,
            self.signals.exhaustion_fraction * 100.0,
            self.signals.silence_fallback_secs,
            self.signals.silence_grace_secs,
            self.episode.boundary_secs,
            self.episode.density_window_secs,
            if self.capacity.max_windowed_wallets == 0 {
                "unbounded".to_string()
            } else {
                self.capacity.max_windowed_wallets.to_string()
            },
            self.backpressure.channel_capacity,
            self.backpressure.drop_policy,
        )
    }
}
