use dashmap::DashMap;
use uuid::Uuid;

use crate::error::{EngineError, Result};
use crate::model::{Blockchain, Transaction, Wallet};

/// Read-mostly store of monitored wallets, keyed by (address, blockchain).
///
/// Threshold and alert_enabled lookups happen on every ingested transaction
/// and never block each other; operator edits lock only the touched shard.
/// The (address, blockchain) pair is immutable: upserting an existing key
/// replaces the mutable fields but keeps the original wallet id.
pub struct WalletRegistry {
    by_key: DashMap<(String, Blockchain), Wallet>,
    by_id: DashMap<Uuid, (String, Blockchain)>,
}

impl WalletRegistry {
    pub fn new() -> Self {
        Self {
            by_key: DashMap::new(),
            by_id: DashMap::new(),
        }
    }

    pub fn get(&self, address: &str, blockchain: Blockchain) -> Option<Wallet> {
        self.by_key
            .get(&(address.to_string(), blockchain))
            .map(|w| w.clone())
    }

    /// Register a wallet or update the mutable fields of an existing one.
    /// Returns the id under which the wallet is stored.
    pub fn upsert(&self, wallet: Wallet) -> Result<Uuid> {
        if wallet.address.trim().is_empty() {
            return Err(EngineError::InvalidConfig("empty wallet address".into()));
        }
        if wallet.threshold < 0.0 || !wallet.threshold.is_finite() {
            return Err(EngineError::InvalidConfig(format!(
                "wallet '{}' has invalid threshold {}",
                wallet.address, wallet.threshold
            )));
        }

        let key = (wallet.address.clone(), wallet.blockchain);
        let mut stored_id = wallet.id;
        self.by_key
            .entry(key.clone())
            .and_modify(|existing| {
                existing.label = wallet.label.clone();
                existing.threshold = wallet.threshold;
                existing.alert_enabled = wallet.alert_enabled;
                stored_id = existing.id;
            })
            .or_insert_with(|| {
                self.by_id.insert(wallet.id, key);
                wallet
            });
        Ok(stored_id)
    }

    pub fn delete(&self, id: Uuid) -> Result<Wallet> {
        let (_, key) = self
            .by_id
            .remove(&id)
            .ok_or_else(|| EngineError::not_found("wallet", id.to_string()))?;
        let (_, wallet) = self
            .by_key
            .remove(&key)
            .ok_or_else(|| EngineError::not_found("wallet", id.to_string()))?;
        Ok(wallet)
    }

    /// The monitored wallets a transaction touches: (sender, receiver).
    pub fn match_for(&self, tx: &Transaction) -> (Option<Wallet>, Option<Wallet>) {
        (
            self.get(&tx.from_address, tx.blockchain),
            self.get(&tx.to_address, tx.blockchain),
        )
    }

    pub fn wallets(&self) -> Vec<Wallet> {
        self.by_key.iter().map(|w| w.clone()).collect()
    }

    pub fn len(&self) -> usize {
        self.by_key.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_key.is_empty()
    }
}

impl Default for WalletRegistry {
    fn default() -> Self {
        Self::new()
    }
}
