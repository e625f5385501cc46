//! Normalized transfer records
//!
//! The ingestion side hands the core raw JSON records. They are validated
//! here once, so everything downstream can rely on the input contract.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::error::{Error, Result};

/// Flow direction relative to the monitored asset's holders
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Direction {
    /// Wallet acquires the asset
    #[serde(alias = "buy")]
    In,
    /// Wallet disposes of the asset
    #[serde(alias = "sell")]
    Out,
}

impl Direction {
    /// Parse the direction strings ingestion clients emit
    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "in" | "buy" => Some(Direction::In),
            "out" | "sell" => Some(Direction::Out),
            _ => None,
        }
    }
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Direction::In => write!(f, "in"),
            Direction::Out => write!(f, "out"),
        }
    }
}

/// A single normalized transfer. Immutable once produced.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TransferEvent {
    /// Opaque wallet identifier
    pub wallet: String,
    pub direction: Direction,
    /// Asset-native amount, exact
    pub amount: Decimal,
    /// Chain time in seconds; authoritative even when arrival is out of order
    pub timestamp: i64,
    /// Opaque correlation reference (transaction signature)
    pub reference: String,
}

impl TransferEvent {
    pub fn new(
        wallet: impl Into<String>,
        direction: Direction,
        amount: Decimal,
        timestamp: i64,
        reference: impl Into<String>,
    ) -> Self {
        Self {
            wallet: wallet.into(),
            direction,
            amount,
            timestamp,
            reference: reference.into(),
        }
    }

    /// Check the input contract.
    ///
    /// A failure rejects only this transfer; callers log and skip it.
    pub fn validate(&self) -> Result<()> {
        if self.wallet.trim().is_empty() {
            return Err(Error::invalid_transfer(&self.reference, "empty wallet address"));
        }
        if self.amount.is_sign_negative() && !self.amount.is_zero() {
            return Err(Error::invalid_transfer(
                &self.reference,
                format!("negative amount {}", self.amount),
            ));
        }
        if self.timestamp < 0 {
            return Err(Error::invalid_transfer(
                &self.reference,
                format!("negative timestamp {}", self.timestamp),
            ));
        }
        Ok(())
    }

    /// One-minute bucket this transfer falls into
    pub fn minute_bucket(&self) -> i64 {
        self.timestamp.div_euclid(60)
    }
}

/// Raw record as produced by an ingestion client (one JSON object per line)
#[derive(Debug, Clone, Deserialize)]
pub struct RawTransfer {
    pub wallet: String,
    pub direction: String,
    pub amount: Decimal,
    pub timestamp: i64,
    #[serde(default, alias = "signature")]
    pub reference: String,
}

impl RawTransfer {
    /// Parse a single JSONL line
    pub fn from_json_line(line: &str) -> Result<Self> {
        serde_json::from_str(line).map_err(|e| Error::MalformedRecord(e.to_string()))
    }

    /// Validate and normalize into a [`TransferEvent`]
    pub fn normalize(self) -> Result<TransferEvent> {
        if self.reference.trim().is_empty() {
            return Err(Error::invalid_transfer("<none>", "empty correlation reference"));
        }

        let direction = Direction::parse(&self.direction).ok_or_else(|| {
            Error::invalid_transfer(
                &self.reference,
                format!("invalid direction {:?} (expected in/out)", self.direction),
            )
        })?;

        let event = TransferEvent {
            wallet: self.wallet.trim().to_string(),
            direction,
            amount: self.amount,
            timestamp: self.timestamp,
            reference: self.reference,
        };
        event.validate()?;
        Ok(event)
    }
}
