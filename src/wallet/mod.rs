//! Wallet state module
//!
//! Two stores with separate lifecycles:
//!
//! ```text
//! WindowBook   (capacity-bounded)  rolling sums only, may evict any wallet
//! WalletLedger (episode-scoped)    classification, cleared only at episode end
//! ```
//!
//! Eviction from the book never touches the ledger.

pub mod book;
pub mod types;
pub mod window;

pub use book::WindowBook;
pub use types::{WalletLedger, WalletRecord};
pub use window::{RollingSum, WalletWindows, WindowSums};
