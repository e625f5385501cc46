//! Threshold, signal and episode detection

pub mod episode;
pub mod signals;
pub mod threshold;

pub use episode::{ActivityTape, DensityTracker, EpisodeTracker, FlowMix};
pub use signals::{SignalDetail, SignalDetector, SignalEvent, SignalKind};
pub use threshold::{ThresholdDetector, ThresholdEvent, ThresholdKind, Thresholds};
