pub mod graph;

use std::collections::HashSet;

use chrono::{DateTime, Duration, Timelike, Utc};
use serde::Serialize;
use tokio_util::sync::CancellationToken;

use crate::config::AnalyticsConfig;
use crate::error::{EngineError, Result};
use crate::history::AddressHistory;
use crate::model::{Blockchain, Transaction};

pub use graph::{FlowEdge, FlowGraph, FlowNode, RelatedAddress, Relationship};

/// Risk score above which an address is reported as high risk.
pub const HIGH_RISK_SCORE: f64 = 0.7;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct HourBucket {
    pub hour: u32,
    pub count: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ValueRangeCount {
    pub range: String,
    pub count: u64,
}

/// Derived, non-persistent investigation view of one address. Always
/// rebuilt from the transaction history, never mutated in place.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AddressAnalytics {
    pub address: String,
    pub blockchain: Blockchain,
    pub balance: f64,
    pub total_received: f64,
    pub total_sent: f64,
    pub transaction_count: u64,
    pub first_seen: Option<DateTime<Utc>>,
    pub last_seen: Option<DateTime<Utc>>,
    pub risk_score: f64,
    /// True when risk_score exceeds [`HIGH_RISK_SCORE`].
    pub high_risk: bool,
    pub risk_factors: Vec<String>,
    pub tags: Vec<String>,
    pub related_addresses: Vec<RelatedAddress>,
    pub time_distribution: Vec<HourBucket>,
    pub value_distribution: Vec<ValueRangeCount>,
    pub flow_graph: FlowGraph,
}

/// Risk context the aggregator consumes but does not own: detector output
/// recorded against the address and the set of addresses currently
/// carrying unresolved high-severity alerts.
#[derive(Debug, Clone, Default)]
pub struct RiskInputs {
    pub flagged: u64,
    pub max_anomaly_score: f64,
    pub high_risk_addresses: HashSet<(String, Blockchain)>,
    pub alert_types: Vec<String>,
}

/// Builds AddressAnalytics from a history snapshot. Pure and idempotent:
/// the same snapshot and risk inputs always produce identical output, and
/// nothing is written anywhere. Long aggregations check the cancellation
/// token between phases.
pub struct Aggregator {
    config: AnalyticsConfig,
}

impl Aggregator {
    pub fn new(config: AnalyticsConfig) -> Self {
        Self { config }
    }

    pub fn aggregate(
        &self,
        address: &str,
        blockchain: Blockchain,
        history: &AddressHistory,
        risk: &RiskInputs,
        window: Option<Duration>,
        cancel: &CancellationToken,
    ) -> Result<AddressAnalytics> {
        // The window is anchored at the newest observed transaction so
        // repeated aggregation over an unchanged history is idempotent.
        let transactions: Vec<&Transaction> = match window {
            Some(window) => {
                let latest = history
                    .transactions()
                    .iter()
                    .map(|tx| tx.block_timestamp)
                    .max();
                match latest {
                    Some(latest) => {
                        let cutoff = latest - window;
                        history
                            .transactions()
                            .iter()
                            .filter(|tx| tx.block_timestamp >= cutoff)
                            .collect()
                    }
                    None => Vec::new(),
                }
            }
            None => history.transactions().iter().collect(),
        };

        if cancel.is_cancelled() {
            return Err(EngineError::Cancelled);
        }

        let mut total_received = 0.0;
        let mut total_sent = 0.0;
        let mut first_seen: Option<DateTime<Utc>> = None;
        let mut last_seen: Option<DateTime<Utc>> = None;
        for tx in &transactions {
            if tx.from_address == address {
                total_sent += tx.value;
            }
            if tx.to_address == address {
                total_received += tx.value;
            }
            first_seen = Some(first_seen.map_or(tx.block_timestamp, |f| f.min(tx.block_timestamp)));
            last_seen = Some(last_seen.map_or(tx.block_timestamp, |l| l.max(tx.block_timestamp)));
        }

        if cancel.is_cancelled() {
            return Err(EngineError::Cancelled);
        }

        let time_distribution = self.time_distribution(&transactions);
        let value_distribution = self.value_distribution(&transactions);

        if cancel.is_cancelled() {
            return Err(EngineError::Cancelled);
        }

        let flows = graph::aggregate_counterparties(address, transactions.iter().copied());
        let flow_graph = graph::build_flow_graph(address, &flows);
        let related_addresses = graph::classify_relationships(
            &flows,
            self.config.frequent_counterparty_min,
            self.config.owner_tolerance,
        );

        if cancel.is_cancelled() {
            return Err(EngineError::Cancelled);
        }

        let (risk_score, risk_factors) = self.risk_score(
            blockchain,
            transactions.len() as u64,
            &transactions,
            &flows,
            risk,
        );

        let mut tags = risk.alert_types.clone();
        tags.sort();
        tags.dedup();

        Ok(AddressAnalytics {
            address: address.to_string(),
            blockchain,
            balance: total_received - total_sent,
            total_received,
            total_sent,
            transaction_count: transactions.len() as u64,
            first_seen,
            last_seen,
            risk_score,
            high_risk: risk_score > HIGH_RISK_SCORE,
            risk_factors,
            tags,
            related_addresses,
            time_distribution,
            value_distribution,
            flow_graph,
        })
    }

    /// 24 buckets keyed by UTC hour.
    fn time_distribution(&self, transactions: &[&Transaction]) -> Vec<HourBucket> {
        let mut counts = [0u64; 24];
        for tx in transactions {
            counts[tx.block_timestamp.hour() as usize] += 1;
        }
        counts
            .iter()
            .enumerate()
            .map(|(hour, count)| HourBucket {
                hour: hour as u32,
                count: *count,
            })
            .collect()
    }

    /// Fixed non-overlapping ranges from config; together they partition
    /// every transaction exactly once.
    fn value_distribution(&self, transactions: &[&Transaction]) -> Vec<ValueRangeCount> {
        let mut buckets: Vec<ValueRangeCount> = self
            .config
            .value_buckets
            .iter()
            .map(|bucket| ValueRangeCount {
                range: bucket.label.clone(),
                count: 0,
            })
            .collect();

        for tx in transactions {
            for (i, bucket) in self.config.value_buckets.iter().enumerate() {
                let in_range =
                    tx.value >= bucket.min && bucket.max.map_or(true, |max| tx.value < max);
                if in_range {
                    buckets[i].count += 1;
                    break;
                }
            }
        }
        buckets
    }

    /// Weighted combination of flagged fraction, high-risk counterparty
    /// exposure, and the maximum observed anomaly score; weights come from
    /// config so the mix can be tuned without redeploying detectors.
    fn risk_score(
        &self,
        blockchain: Blockchain,
        count: u64,
        transactions: &[&Transaction],
        flows: &std::collections::HashMap<String, graph::CounterpartyFlow>,
        risk: &RiskInputs,
    ) -> (f64, Vec<String>) {
        let mut factors = Vec::new();
        if count == 0 {
            return (0.0, factors);
        }
        let weights = &self.config.risk_weights;

        let flagged_fraction = (risk.flagged as f64 / count as f64).min(1.0);
        let mut score = weights.flagged_fraction * flagged_fraction;
        if risk.flagged > 0 {
            factors.push(format!("{} flagged transactions", risk.flagged));
        }

        let risky_counterparty = flows.keys().any(|counterparty| {
            risk.high_risk_addresses
                .contains(&(counterparty.clone(), blockchain))
        });
        if risky_counterparty {
            score += weights.risky_counterparty;
            factors.push("interacts with high-risk addresses".to_string());
        }

        score += weights.max_anomaly * risk.max_anomaly_score.clamp(0.0, 1.0);
        if risk.max_anomaly_score > 0.6 {
            factors.push("anomalous transaction pattern".to_string());
        }

        // Informational factors; they do not move the weighted score.
        if let (Some(first), Some(last)) = (
            transactions.iter().map(|tx| tx.block_timestamp).min(),
            transactions.iter().map(|tx| tx.block_timestamp).max(),
        ) {
            let span_secs = (last - first).num_seconds();
            if span_secs > 0 {
                let per_day = count as f64 / (span_secs as f64 / 86_400.0);
                if per_day > 10.0 {
                    factors.push(format!("high transaction frequency ({per_day:.1}/day)"));
                }
            }
        }
        let night = transactions
            .iter()
            .filter(|tx| tx.block_timestamp.hour() < 5)
            .count();
        if count > 0 && night as f64 / count as f64 > 0.3 {
            factors.push("frequent night-time activity".to_string());
        }

        (score.clamp(0.0, 1.0), factors)
    }
}
