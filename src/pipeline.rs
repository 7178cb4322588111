use std::sync::Arc;

use chrono::{Duration, Utc};
use dashmap::DashMap;
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::alert::{Alert, AlertFilter, AlertOutcome, AlertStore};
use crate::analytics::{AddressAnalytics, Aggregator, RiskInputs};
use crate::config::Config;
use crate::detect::{Classifier, Predictor, Scorer};
use crate::error::{EngineError, Result};
use crate::history::{HistoryStore, Observation};
use crate::model::{Blockchain, Transaction, Wallet};
use crate::registry::WalletRegistry;

/// What one ingested transaction produced.
#[derive(Debug, Default, Clone, Copy)]
pub struct IngestReport {
    pub alerts_created: usize,
    pub alerts_merged: usize,
}

/// The engine facade: owns the wallet registry, per-address detector
/// state, and the alert store, and drives the classifier -> scorer ->
/// alert generation path for every ingested transaction.
///
/// Transactions for different addresses are processed fully in parallel;
/// processing for the same sending address is serialized through a
/// per-address lock slot so the dispersion window and trailing statistics
/// stay consistent.
pub struct TransactionPipeline {
    config: Config,
    registry: Arc<WalletRegistry>,
    history: Arc<HistoryStore>,
    alerts: Arc<AlertStore>,
    classifier: Classifier,
    scorer: Scorer,
    aggregator: Aggregator,
    address_locks: DashMap<(String, Blockchain), Arc<Mutex<()>>>,
}

impl TransactionPipeline {
    /// Build the engine, seeding the wallet registry from config.
    pub fn new(config: Config, predictor: Option<Arc<dyn Predictor>>) -> Result<Self> {
        let registry = Arc::new(WalletRegistry::new());
        for wallet in &config.wallets {
            registry.upsert(Wallet::new(
                wallet.address.clone(),
                wallet.blockchain,
                wallet.label.clone(),
                wallet.threshold,
                wallet.alert_enabled,
            ))?;
        }

        let history = Arc::new(HistoryStore::new(config.dispersion.window_secs));
        let alerts = Arc::new(AlertStore::new(config.engine.dedup_window_secs));
        let classifier = Classifier::new(config.dispersion.clone());
        let scorer = Scorer::new(config.scoring.clone(), predictor);
        let aggregator = Aggregator::new(config.analytics.clone());

        Ok(Self {
            config,
            registry,
            history,
            alerts,
            classifier,
            scorer,
            aggregator,
            address_locks: DashMap::new(),
        })
    }

    /// Feed one transaction through classification, scoring, and alert
    /// generation.
    pub async fn ingest(&self, tx: Transaction) -> Result<IngestReport> {
        tx.validate()?;

        let lock = {
            let slot = self
                .address_locks
                .entry((tx.from_address.clone(), tx.blockchain))
                .or_insert_with(|| Arc::new(Mutex::new(())));
            slot.value().clone()
        };
        let _guard = lock.lock().await;

        let ctx = match self.history.observe(&tx)? {
            Observation::New(ctx) => ctx,
            Observation::Finalized => {
                tracing::debug!(tx_hash = %tx.tx_hash, "pending transaction finalized");
                return Ok(IngestReport::default());
            }
            Observation::Duplicate => {
                tracing::debug!(tx_hash = %tx.tx_hash, "duplicate transaction absorbed");
                return Ok(IngestReport::default());
            }
        };

        let (sender, receiver) = self.registry.match_for(&tx);
        let mut detections =
            self.classifier
                .classify(&tx, sender.as_ref(), receiver.as_ref(), &ctx);
        if let Some(detection) = self.scorer.statistical(&tx, &ctx) {
            detections.push(detection);
        }
        if let Some(detection) = self.scorer.model_based(&tx, &ctx).await {
            detections.push(detection);
        }

        let now = Utc::now();
        let mut report = IngestReport::default();
        for detection in detections {
            self.history
                .note_detection(&detection.address, detection.blockchain, detection.score);
            match self.alerts.record(detection, now).await {
                AlertOutcome::Created(_) => report.alerts_created += 1,
                AlertOutcome::Merged(_) => report.alerts_merged += 1,
            }
        }

        tracing::debug!(
            tx_hash = %tx.tx_hash,
            from = %tx.from_address,
            alerts_created = report.alerts_created,
            alerts_merged = report.alerts_merged,
            "transaction processed"
        );
        Ok(report)
    }

    pub async fn list_alerts(&self, filter: &AlertFilter) -> Vec<Alert> {
        self.alerts.list(filter).await
    }

    pub async fn mark_read(&self, alert_id: Uuid) -> Result<Alert> {
        self.alerts.mark_read(alert_id).await
    }

    pub async fn mark_resolved(&self, alert_id: Uuid) -> Result<Alert> {
        self.alerts.mark_resolved(alert_id).await
    }

    pub async fn delete_alert(&self, alert_id: Uuid) -> Result<Alert> {
        self.alerts.delete(alert_id).await
    }

    /// Rebuild the investigation view for an address from its full
    /// observed history.
    pub async fn analytics(
        &self,
        address: &str,
        blockchain: Blockchain,
        window: Option<Duration>,
        cancel: &CancellationToken,
    ) -> Result<AddressAnalytics> {
        let history = self.history.snapshot(address, blockchain).ok_or_else(|| {
            EngineError::UnknownAddress {
                address: address.to_string(),
                blockchain: blockchain.to_string(),
            }
        })?;

        let risk = RiskInputs {
            flagged: history.flagged,
            max_anomaly_score: history.max_anomaly_score,
            high_risk_addresses: self.alerts.high_risk_addresses().await,
            alert_types: self.alerts.types_for(address, blockchain).await,
        };

        self.aggregator
            .aggregate(address, blockchain, &history, &risk, window, cancel)
    }

    pub fn registry(&self) -> &WalletRegistry {
        &self.registry
    }

    /// Drop per-address detector state idle beyond the retention window,
    /// along with the lock slots nobody holds anymore.
    pub fn evict_idle(&self) -> usize {
        let retention = Duration::seconds(self.config.engine.retention_secs as i64);
        let evicted = self.history.evict_idle(Utc::now(), retention);
        self.address_locks
            .retain(|_, lock| Arc::strong_count(lock) > 1);
        if evicted > 0 {
            tracing::debug!(evicted, "evicted idle address state");
        }
        evicted
    }

    pub fn tracked_addresses(&self) -> usize {
        self.history.tracked_addresses()
    }
}
