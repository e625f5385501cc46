//! Capacity-bounded store of rolling-window buffers
//!
//! This map exists only to bound the cost of windowed-sum computation.
//! Evicting a wallet here forgets its buffered amounts and nothing else:
//! classification state (early flag, latches, phase of last activity) lives
//! in the [`WalletLedger`](super::types::WalletLedger), which has its own
//! episode-scoped lifecycle.

use std::collections::HashMap;
use tracing::debug;

use super::window::{WalletWindows, WindowSums};
use crate::config::WindowConfig;
use crate::stream::transfer::TransferEvent;

struct BookEntry {
    windows: WalletWindows,
    /// Monotonic touch counter for least-recently-used eviction
    touched: u64,
}

/// Wallet address -> rolling window buffers
pub struct WindowBook {
    config: WindowConfig,
    /// 0 = bounded only by episode resets
    max_wallets: usize,
    entries: HashMap<String, BookEntry>,
    clock: u64,
    evicted: u64,
}

impl WindowBook {
    pub fn new(config: WindowConfig, max_wallets: usize) -> Self {
        Self {
            config,
            max_wallets,
            entries: HashMap::new(),
            clock: 0,
            evicted: 0,
        }
    }

    /// Update the wallet's buffers with a transfer and return its sums
    pub fn record(&mut self, transfer: &TransferEvent) -> WindowSums {
        self.clock += 1;
        let clock = self.clock;

        if !self.entries.contains_key(&transfer.wallet) {
            self.make_room();
        }

        let config = &self.config;
        let entry = self
            .entries
            .entry(transfer.wallet.clone())
            .or_insert_with(|| BookEntry {
                windows: WalletWindows::new(config),
                touched: clock,
            });
        entry.touched = clock;
        entry.windows.record(transfer)
    }

    fn make_room(&mut self) {
        if self.max_wallets == 0 {
            return;
        }
        while self.entries.len() >= self.max_wallets {
            let oldest = self
                .entries
                .iter()
                .min_by_key(|(_, entry)| entry.touched)
                .map(|(wallet, _)| wallet.clone());
            match oldest {
                Some(wallet) => {
                    self.entries.remove(&wallet);
                    self.evicted += 1;
                    debug!(wallet = %wallet, "Evicted window buffers (capacity)");
                }
                None => break,
            }
        }
    }

    pub fn contains(&self, wallet: &str) -> bool {
        self.entries.contains_key(wallet)
    }

    /// Drop every buffer (episode boundary)
    pub fn clear(&mut self) {
        self.entries.clear();
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Wallets evicted for capacity since creation
    pub fn evicted(&self) -> u64 {
        self.evicted
    }
}
