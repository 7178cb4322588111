use std::collections::{HashMap, HashSet};

use chrono::{DateTime, Duration, Utc};
use serde_json::{json, Value as JsonValue};
use tokio::sync::RwLock;
use uuid::Uuid;

use crate::detect::Detection;
use crate::error::{EngineError, Result};
use crate::model::Blockchain;

use super::generator::build_alert;
use super::types::{Alert, AlertFilter, AlertOutcome, AlertStatus, Severity};

struct Inner {
    alerts: HashMap<Uuid, Alert>,
    // insertion order; created_at is stamped at insert so this is also
    // chronological order
    order: Vec<Uuid>,
}

/// Owned store of all alerts with the lifecycle state machine and the
/// per-(type, address) deduplication window. All check-then-insert paths
/// run under one write lock, so concurrent bursts cannot race a duplicate
/// past the dedup check.
pub struct AlertStore {
    inner: RwLock<Inner>,
    dedup_window: Duration,
}

impl AlertStore {
    pub fn new(dedup_window_secs: u64) -> Self {
        Self {
            inner: RwLock::new(Inner {
                alerts: HashMap::new(),
                order: Vec::new(),
            }),
            dedup_window: Duration::seconds(dedup_window_secs as i64),
        }
    }

    /// Turn a detection into a new alert, or merge it into an existing
    /// unresolved alert of the same (type, address) created within the
    /// dedup window.
    pub async fn record(&self, detection: Detection, now: DateTime<Utc>) -> AlertOutcome {
        let mut inner = self.inner.write().await;

        let existing = inner.order.iter().rev().find_map(|id| {
            let alert = inner.alerts.get(id)?;
            (alert.alert_type == detection.kind
                && alert.related_address == detection.address
                && alert.blockchain == detection.blockchain
                && alert.status != AlertStatus::Resolved
                && now - alert.created_at <= self.dedup_window)
                .then_some(*id)
        });

        if let Some(alert) = existing.and_then(|id| inner.alerts.get_mut(&id)) {
            merge_event(&mut alert.related_data, detection.details);
            let id = alert.id;
            tracing::debug!(
                alert_id = %id,
                alert_type = detection.kind.as_str(),
                address = %detection.address,
                "detection merged into existing alert"
            );
            return AlertOutcome::Merged(id);
        }

        let alert = build_alert(detection, now);
        let id = alert.id;
        tracing::warn!(
            alert_id = %id,
            alert_type = alert.alert_type.as_str(),
            severity = alert.severity.as_str(),
            address = %alert.related_address,
            "ALERT CREATED"
        );
        inner.order.push(id);
        inner.alerts.insert(id, alert);
        AlertOutcome::Created(id)
    }

    pub async fn get(&self, id: Uuid) -> Option<Alert> {
        self.inner.read().await.alerts.get(&id).cloned()
    }

    /// Alerts matching the filter, newest first.
    pub async fn list(&self, filter: &AlertFilter) -> Vec<Alert> {
        let inner = self.inner.read().await;
        inner
            .order
            .iter()
            .rev()
            .filter_map(|id| inner.alerts.get(id))
            .filter(|alert| filter.matches(alert))
            .cloned()
            .collect()
    }

    /// new -> read. Any other source state is a lifecycle violation.
    pub async fn mark_read(&self, id: Uuid) -> Result<Alert> {
        let mut inner = self.inner.write().await;
        let alert = inner
            .alerts
            .get_mut(&id)
            .ok_or_else(|| EngineError::not_found("alert", id.to_string()))?;
        if alert.status != AlertStatus::New {
            return Err(EngineError::bad_transition(alert.status.as_str(), "read"));
        }
        alert.status = AlertStatus::Read;
        Ok(alert.clone())
    }

    /// new|read -> resolved; stamps resolved_at. Resolved is terminal.
    pub async fn mark_resolved(&self, id: Uuid) -> Result<Alert> {
        let mut inner = self.inner.write().await;
        let alert = inner
            .alerts
            .get_mut(&id)
            .ok_or_else(|| EngineError::not_found("alert", id.to_string()))?;
        if alert.status == AlertStatus::Resolved {
            return Err(EngineError::bad_transition("resolved", "resolved"));
        }
        alert.status = AlertStatus::Resolved;
        alert.resolved_at = Some(Utc::now());
        Ok(alert.clone())
    }

    /// Operator deletion, valid from any state.
    pub async fn delete(&self, id: Uuid) -> Result<Alert> {
        let mut inner = self.inner.write().await;
        let alert = inner
            .alerts
            .remove(&id)
            .ok_or_else(|| EngineError::not_found("alert", id.to_string()))?;
        inner.order.retain(|existing| *existing != id);
        Ok(alert)
    }

    /// Addresses carrying an unresolved high-severity alert; feeds the
    /// analytics risk score.
    pub async fn high_risk_addresses(&self) -> HashSet<(String, Blockchain)> {
        self.inner
            .read()
            .await
            .alerts
            .values()
            .filter(|alert| {
                alert.severity == Severity::High && alert.status != AlertStatus::Resolved
            })
            .map(|alert| (alert.related_address.clone(), alert.blockchain))
            .collect()
    }

    /// Distinct alert types ever raised for an address, in type order.
    pub async fn types_for(&self, address: &str, blockchain: Blockchain) -> Vec<String> {
        let inner = self.inner.read().await;
        let mut types: Vec<String> = inner
            .alerts
            .values()
            .filter(|alert| alert.related_address == address && alert.blockchain == blockchain)
            .map(|alert| alert.alert_type.as_str().to_string())
            .collect();
        types.sort();
        types.dedup();
        types
    }

    pub async fn len(&self) -> usize {
        self.inner.read().await.alerts.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.inner.read().await.alerts.is_empty()
    }
}

/// Append a suppressed event's payload to the alert's related_data.
fn merge_event(related_data: &mut JsonValue, details: JsonValue) {
    if !related_data.is_object() {
        *related_data = json!({ "original": related_data.take() });
    }
    let Some(object) = related_data.as_object_mut() else {
        return;
    };
    let events = object
        .entry("merged_events".to_string())
        .or_insert_with(|| JsonValue::Array(Vec::new()));
    if let Some(array) = events.as_array_mut() {
        array.push(details);
        let count = array.len();
        object.insert("merge_count".to_string(), json!(count));
    }
}
