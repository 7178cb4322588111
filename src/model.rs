use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::EngineError;

/// Chains the engine understands. Serialized lowercase to match the
/// transaction feed and the config file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Blockchain {
    Ethereum,
    Bitcoin,
}

impl Blockchain {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Ethereum => "ethereum",
            Self::Bitcoin => "bitcoin",
        }
    }

    /// Ticker used in alert titles and descriptions.
    pub fn ticker(&self) -> &'static str {
        match self {
            Self::Ethereum => "ETH",
            Self::Bitcoin => "BTC",
        }
    }
}

impl fmt::Display for Blockchain {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TxStatus {
    Pending,
    Success,
    Failed,
}

impl TxStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Success => "success",
            Self::Failed => "failed",
        }
    }

    /// A transaction observed with a terminal status is immutable; a pending
    /// one may be finalized exactly once.
    pub fn is_terminal(&self) -> bool {
        !matches!(self, Self::Pending)
    }
}

/// One observed on-chain transaction, values in native currency units.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Transaction {
    pub id: String,
    pub blockchain: Blockchain,
    pub tx_hash: String,
    pub from_address: String,
    pub to_address: String,
    pub value: f64,
    pub fee: f64,
    pub status: TxStatus,
    pub block_timestamp: DateTime<Utc>,
    pub block_number: u64,
}

impl Transaction {
    /// Reject transactions with missing or invalid required fields before
    /// they reach any detector state.
    pub fn validate(&self) -> Result<(), EngineError> {
        if self.id.trim().is_empty() {
            return Err(EngineError::MalformedTransaction("empty id".into()));
        }
        if self.tx_hash.trim().is_empty() {
            return Err(EngineError::MalformedTransaction("empty tx_hash".into()));
        }
        if self.from_address.trim().is_empty() {
            return Err(EngineError::MalformedTransaction(
                "empty from_address".into(),
            ));
        }
        if self.to_address.trim().is_empty() {
            return Err(EngineError::MalformedTransaction("empty to_address".into()));
        }
        if !self.value.is_finite() || self.value < 0.0 {
            return Err(EngineError::MalformedTransaction(format!(
                "invalid value {}",
                self.value
            )));
        }
        if !self.fee.is_finite() || self.fee < 0.0 {
            return Err(EngineError::MalformedTransaction(format!(
                "invalid fee {}",
                self.fee
            )));
        }
        Ok(())
    }

    pub fn is_self_transfer(&self) -> bool {
        self.from_address == self.to_address
    }
}

/// A monitored address with its alert configuration. The (address,
/// blockchain) pair is immutable once registered; threshold and
/// alert_enabled are the only mutable detector inputs.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Wallet {
    pub id: Uuid,
    pub address: String,
    pub blockchain: Blockchain,
    pub label: Option<String>,
    pub threshold: f64,
    pub alert_enabled: bool,
}

impl Wallet {
    pub fn new(
        address: impl Into<String>,
        blockchain: Blockchain,
        label: Option<String>,
        threshold: f64,
        alert_enabled: bool,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            address: address.into(),
            blockchain,
            label,
            threshold,
            alert_enabled,
        }
    }
}
