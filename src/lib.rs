//! PANDA live intelligence library
//!
//! Compresses a stream of transfers for one asset into latched threshold
//! events, wallet behaviour signals and a reversible lifecycle state.

pub mod cli;
pub mod config;
pub mod detect;
pub mod engine;
pub mod error;
pub mod lifecycle;
pub mod stream;
pub mod wallet;

// Re-export commonly used types
pub use config::Config;
pub use engine::{AssetState, IntelligenceEngine, IntelligenceEvent};
pub use error::{Error, Result};
