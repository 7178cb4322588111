use serde_json::Value as JsonValue;

use crate::alert::types::AlertType;
use crate::model::Blockchain;

/// A raw detector hit, before deduplication and alert construction.
/// Title and description are built at the rule site, where the context to
/// word them lives; `details` carries the type-specific payload.
#[derive(Debug, Clone)]
pub struct Detection {
    pub kind: AlertType,
    pub address: String,
    pub blockchain: Blockchain,
    /// Anomaly score in [0, 1]; None for structural tags.
    pub score: Option<f64>,
    pub title: String,
    pub description: String,
    pub details: JsonValue,
}
