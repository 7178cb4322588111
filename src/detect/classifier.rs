use serde_json::json;

use crate::alert::types::AlertType;
use crate::config::DispersionConfig;
use crate::history::IngestContext;
use crate::model::{Transaction, Wallet};

use super::types::Detection;

/// Structural classification of one transaction against the wallet
/// registry snapshot. Produces tags only; alerts are the store's job.
pub struct Classifier {
    config: DispersionConfig,
}

impl Classifier {
    pub fn new(config: DispersionConfig) -> Self {
        Self { config }
    }

    pub fn classify(
        &self,
        tx: &Transaction,
        sender: Option<&Wallet>,
        receiver: Option<&Wallet>,
        ctx: &IngestContext,
    ) -> Vec<Detection> {
        let mut detections = Vec::new();

        if let Some(detection) = self.check_large(tx, sender, receiver) {
            detections.push(detection);
        }
        if let Some(detection) = self.check_dispersion(tx, sender, ctx) {
            detections.push(detection);
        }

        detections
    }

    /// value >= threshold on an alert-enabled wallet on either side.
    /// When both sides are monitored the lower threshold wins.
    fn check_large(
        &self,
        tx: &Transaction,
        sender: Option<&Wallet>,
        receiver: Option<&Wallet>,
    ) -> Option<Detection> {
        let outgoing = sender.filter(|w| w.alert_enabled).map(|w| (w, "outgoing"));
        let incoming = receiver.filter(|w| w.alert_enabled).map(|w| (w, "incoming"));

        let (wallet, direction) = match (outgoing, incoming) {
            (Some(o), Some(i)) => {
                if i.0.threshold < o.0.threshold {
                    i
                } else {
                    o
                }
            }
            (Some(o), None) => o,
            (None, Some(i)) => i,
            (None, None) => return None,
        };

        if tx.value < wallet.threshold {
            return None;
        }

        let ticker = tx.blockchain.ticker();
        let description = if direction == "outgoing" {
            format!(
                "Monitored wallet {} sent {} {} to {}",
                wallet.address, tx.value, ticker, tx.to_address
            )
        } else {
            format!(
                "Monitored wallet {} received {} {} from {}",
                wallet.address, tx.value, ticker, tx.from_address
            )
        };

        Some(Detection {
            kind: AlertType::LargeTransaction,
            address: wallet.address.clone(),
            blockchain: tx.blockchain,
            score: None,
            title: format!("Large {} transaction: {} {}", direction, tx.value, ticker),
            description,
            details: json!({
                "transaction": {
                    "blockchain": tx.blockchain.as_str(),
                    "tx_hash": tx.tx_hash,
                    "from_address": tx.from_address,
                    "to_address": tx.to_address,
                    "value": tx.value,
                },
                "direction": direction,
                "wallet_address": wallet.address,
                "threshold": wallet.threshold,
            }),
        })
    }

    /// N or more outgoing transfers inside the sliding window, each below
    /// the sender's large threshold, collectively reaching the configured
    /// fraction of the trailing-24h outflow. Re-evaluated on every outgoing
    /// transaction of a monitored sender.
    fn check_dispersion(
        &self,
        tx: &Transaction,
        sender: Option<&Wallet>,
        ctx: &IngestContext,
    ) -> Option<Detection> {
        let wallet = sender.filter(|w| w.alert_enabled)?;

        let recent = &ctx.recent_outgoing;
        if recent.len() < self.config.min_transactions {
            return None;
        }
        if recent.iter().any(|(_, value)| *value >= wallet.threshold) {
            return None;
        }

        let window_sum: f64 = recent.iter().map(|(_, value)| value).sum();
        if ctx.trailing_outflow <= 0.0
            || window_sum < self.config.outflow_fraction * ctx.trailing_outflow
        {
            return None;
        }

        let fraction = window_sum / ctx.trailing_outflow;
        Some(Detection {
            kind: AlertType::FundDispersion,
            address: wallet.address.clone(),
            blockchain: tx.blockchain,
            score: None,
            title: "Fund dispersion pattern detected".to_string(),
            description: format!(
                "Address {} sent {} transactions totalling {:.4} {} within {} minutes ({:.0}% of trailing 24h outflow)",
                wallet.address,
                recent.len(),
                window_sum,
                tx.blockchain.ticker(),
                self.config.window_secs / 60,
                fraction * 100.0,
            ),
            details: json!({
                "transaction_count": recent.len(),
                "window_secs": self.config.window_secs,
                "window_sum": window_sum,
                "outflow_24h": ctx.trailing_outflow,
                "outflow_fraction": fraction,
                "trigger_tx_hash": tx.tx_hash,
            }),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::history::{HistoryStore, Observation};
    use crate::model::{Blockchain, TxStatus, Wallet};
    use chrono::{DateTime, Duration, Utc};

    fn tx(id: &str, from: &str, to: &str, value: f64, minutes: i64) -> Transaction {
        Transaction {
            id: id.into(),
            blockchain: Blockchain::Ethereum,
            tx_hash: format!("0x{id}"),
            from_address: from.into(),
            to_address: to.into(),
            value,
            fee: 0.001,
            status: TxStatus::Success,
            block_timestamp: DateTime::parse_from_rfc3339("2025-03-01T12:00:00Z")
                .unwrap()
                .with_timezone(&Utc)
                + Duration::minutes(minutes),
            block_number: 1000u64.saturating_add_signed(minutes),
        }
    }

    fn wallet(address: &str, threshold: f64, enabled: bool) -> Wallet {
        Wallet::new(address, Blockchain::Ethereum, None, threshold, enabled)
    }

    fn context_for(store: &HistoryStore, transaction: &Transaction) -> crate::history::IngestContext {
        match store.observe(transaction).unwrap() {
            Observation::New(ctx) => ctx,
            other => panic!("expected new observation, got {other:?}"),
        }
    }

    #[test]
    fn large_outgoing_tagged() {
        let classifier = Classifier::new(DispersionConfig::default());
        let store = HistoryStore::new(3600);
        let transaction = tx("t0", "a", "b", 2.5, 0);
        let ctx = context_for(&store, &transaction);
        let sender = wallet("a", 1.0, true);

        let detections = classifier.classify(&transaction, Some(&sender), None, &ctx);
        assert_eq!(detections.len(), 1);
        assert_eq!(detections[0].kind, AlertType::LargeTransaction);
        assert_eq!(detections[0].address, "a");
        assert_eq!(detections[0].details["direction"], "outgoing");
    }

    #[test]
    fn below_threshold_not_tagged() {
        let classifier = Classifier::new(DispersionConfig::default());
        let store = HistoryStore::new(3600);
        let transaction = tx("t0", "a", "b", 0.5, 0);
        let ctx = context_for(&store, &transaction);
        let sender = wallet("a", 1.0, true);

        assert!(classifier
            .classify(&transaction, Some(&sender), None, &ctx)
            .is_empty());
    }

    #[test]
    fn disabled_wallet_not_tagged() {
        let classifier = Classifier::new(DispersionConfig::default());
        let store = HistoryStore::new(3600);
        let transaction = tx("t0", "a", "b", 2.5, 0);
        let ctx = context_for(&store, &transaction);
        let sender = wallet("a", 1.0, false);

        assert!(classifier
            .classify(&transaction, Some(&sender), None, &ctx)
            .is_empty());
    }

    #[test]
    fn tie_break_uses_lower_threshold() {
        let classifier = Classifier::new(DispersionConfig::default());
        let store = HistoryStore::new(3600);
        let transaction = tx("t0", "a", "b", 1.0, 0);
        let ctx = context_for(&store, &transaction);
        let sender = wallet("a", 2.0, true);
        let receiver = wallet("b", 0.5, true);

        let detections =
            classifier.classify(&transaction, Some(&sender), Some(&receiver), &ctx);
        assert_eq!(detections.len(), 1);
        assert_eq!(detections[0].address, "b");
        assert_eq!(detections[0].details["direction"], "incoming");
        assert_eq!(detections[0].details["threshold"], 0.5);
    }

    #[test]
    fn dispersion_fires_after_min_transactions() {
        let classifier = Classifier::new(DispersionConfig::default());
        let store = HistoryStore::new(3600);
        let sender = wallet("a", 1.0, true);

        // three small outgoing transfers inside 10 minutes, only outflow
        for (i, minutes) in [0i64, 4, 8].iter().enumerate() {
            let transaction = tx(&format!("t{i}"), "a", &format!("out{i}"), 0.2, *minutes);
            let ctx = context_for(&store, &transaction);
            let detections = classifier.classify(&transaction, Some(&sender), None, &ctx);
            if i < 2 {
                assert!(detections.is_empty(), "fired too early at tx {i}");
            } else {
                assert_eq!(detections.len(), 1);
                assert_eq!(detections[0].kind, AlertType::FundDispersion);
                assert_eq!(detections[0].details["transaction_count"], 3);
            }
        }
    }

    #[test]
    fn dispersion_needs_outflow_share() {
        let classifier = Classifier::new(DispersionConfig::default());
        let store = HistoryStore::new(3600);
        let sender = wallet("a", 1.0, true);

        // a big (but sub-threshold) outgoing transfer 2h ago dominates the
        // 24h outflow, so three small recent ones stay below 50%
        let old = tx("old", "a", "sink", 0.9, -120);
        context_for(&store, &old);

        let mut last = Vec::new();
        for (i, minutes) in [0i64, 4, 8].iter().enumerate() {
            let transaction = tx(&format!("t{i}"), "a", &format!("out{i}"), 0.1, *minutes);
            let ctx = context_for(&store, &transaction);
            last = classifier.classify(&transaction, Some(&sender), None, &ctx);
        }
        assert!(last.is_empty());
    }

    #[test]
    fn dispersion_blocked_by_large_member() {
        let classifier = Classifier::new(DispersionConfig::default());
        let store = HistoryStore::new(3600);
        let sender = wallet("a", 0.15, true);

        let mut last = Vec::new();
        for (i, minutes) in [0i64, 4, 8].iter().enumerate() {
            let transaction = tx(&format!("t{i}"), "a", &format!("out{i}"), 0.2, *minutes);
            let ctx = context_for(&store, &transaction);
            last = classifier.classify(&transaction, Some(&sender), None, &ctx);
        }
        // every member is >= the 0.15 threshold, so each is tagged large
        // instead of contributing to dispersion
        assert_eq!(last.len(), 1);
        assert_eq!(last[0].kind, AlertType::LargeTransaction);
    }
}
