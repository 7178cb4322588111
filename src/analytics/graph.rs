use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::model::Transaction;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FlowNode {
    pub id: String,
    pub label: String,
    /// Aggregate value exchanged with the queried address (total activity
    /// for the center node itself).
    pub value: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FlowEdge {
    pub source: String,
    pub target: String,
    pub value: f64,
    pub transaction_count: u64,
}

/// Weighted directed graph of value transferred between an address and its
/// counterparties. Self-loops are excluded.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct FlowGraph {
    pub nodes: Vec<FlowNode>,
    pub edges: Vec<FlowEdge>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Relationship {
    FrequentCounterparty,
    PossibleOwner,
}

impl Relationship {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::FrequentCounterparty => "frequent_counterparty",
            Self::PossibleOwner => "possible_owner",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RelatedAddress {
    pub address: String,
    pub relationship: Relationship,
    pub transaction_count: u64,
    pub last_transaction: DateTime<Utc>,
}

/// Aggregated bidirectional flow between the queried address and one
/// counterparty.
#[derive(Debug, Clone)]
pub struct CounterpartyFlow {
    pub sent: f64,
    pub sent_count: u64,
    pub received: f64,
    pub received_count: u64,
    pub last_transaction: DateTime<Utc>,
}

impl Default for CounterpartyFlow {
    fn default() -> Self {
        Self {
            sent: 0.0,
            sent_count: 0,
            received: 0.0,
            received_count: 0,
            last_transaction: DateTime::<Utc>::UNIX_EPOCH,
        }
    }
}

/// Group an address's transactions by counterparty, excluding self
/// transfers.
pub fn aggregate_counterparties<'a, I>(
    address: &str,
    transactions: I,
) -> HashMap<String, CounterpartyFlow>
where
    I: IntoIterator<Item = &'a Transaction>,
{
    let mut flows: HashMap<String, CounterpartyFlow> = HashMap::new();
    for tx in transactions {
        if tx.is_self_transfer() {
            continue;
        }
        let (counterparty, outgoing) = if tx.from_address == address {
            (tx.to_address.clone(), true)
        } else if tx.to_address == address {
            (tx.from_address.clone(), false)
        } else {
            continue;
        };

        let flow = flows.entry(counterparty).or_default();
        if outgoing {
            flow.sent += tx.value;
            flow.sent_count += 1;
        } else {
            flow.received += tx.value;
            flow.received_count += 1;
        }
        if tx.block_timestamp > flow.last_transaction {
            flow.last_transaction = tx.block_timestamp;
        }
    }
    flows
}

/// One node for the queried address plus one per counterparty; edge weight
/// is the aggregated value transferred in that direction. Deterministic
/// ordering so repeated aggregation yields identical output.
pub fn build_flow_graph(address: &str, flows: &HashMap<String, CounterpartyFlow>) -> FlowGraph {
    let mut counterparties: Vec<(&String, &CounterpartyFlow)> = flows.iter().collect();
    counterparties.sort_by(|a, b| {
        let va = a.1.sent + a.1.received;
        let vb = b.1.sent + b.1.received;
        vb.partial_cmp(&va)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then_with(|| a.0.cmp(b.0))
    });

    let total: f64 = counterparties
        .iter()
        .map(|(_, f)| f.sent + f.received)
        .sum();

    let mut nodes = vec![FlowNode {
        id: address.to_string(),
        label: short_label(address),
        value: total,
    }];
    let mut edges = Vec::new();

    for (counterparty, flow) in counterparties {
        nodes.push(FlowNode {
            id: counterparty.clone(),
            label: short_label(counterparty),
            value: flow.sent + flow.received,
        });
        if flow.received_count > 0 {
            edges.push(FlowEdge {
                source: counterparty.clone(),
                target: address.to_string(),
                value: flow.received,
                transaction_count: flow.received_count,
            });
        }
        if flow.sent_count > 0 {
            edges.push(FlowEdge {
                source: address.to_string(),
                target: counterparty.clone(),
                value: flow.sent,
                transaction_count: flow.sent_count,
            });
        }
    }

    FlowGraph { nodes, edges }
}

/// Label counterparties: bidirectional transfers with near-equal aggregate
/// value suggest common control (possible_owner, a heuristic not a proof);
/// otherwise a high transaction count makes a frequent_counterparty.
/// Ordered by transaction count descending.
pub fn classify_relationships(
    flows: &HashMap<String, CounterpartyFlow>,
    frequent_min: u64,
    owner_tolerance: f64,
) -> Vec<RelatedAddress> {
    let mut related: Vec<RelatedAddress> = flows
        .iter()
        .filter_map(|(counterparty, flow)| {
            let count = flow.sent_count + flow.received_count;
            let bidirectional = flow.sent > 0.0 && flow.received > 0.0;
            let near_equal = bidirectional
                && (flow.sent - flow.received).abs()
                    <= owner_tolerance * flow.sent.max(flow.received);

            let relationship = if near_equal {
                Relationship::PossibleOwner
            } else if count >= frequent_min {
                Relationship::FrequentCounterparty
            } else {
                return None;
            };

            Some(RelatedAddress {
                address: counterparty.clone(),
                relationship,
                transaction_count: count,
                last_transaction: flow.last_transaction,
            })
        })
        .collect();

    related.sort_by(|a, b| {
        b.transaction_count
            .cmp(&a.transaction_count)
            .then_with(|| a.address.cmp(&b.address))
    });
    related
}

fn short_label(address: &str) -> String {
    match address.get(..8) {
        Some(prefix) if address.len() > 8 => format!("{prefix}..."),
        _ => address.to_string(),
    }
}
