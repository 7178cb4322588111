use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::detect::Detection;

use super::types::{Alert, AlertStatus, AlertType, Severity};

/// Severity is a deterministic function of alert type and score, never set
/// arbitrarily: structural tags are always high, scored anomalies map by
/// score band.
pub fn severity_for(kind: AlertType, score: Option<f64>) -> Severity {
    match kind {
        AlertType::LargeTransaction | AlertType::FundDispersion => Severity::High,
        AlertType::AiAnomaly | AlertType::StatisticalAnomaly => match score {
            Some(score) if score > 0.8 => Severity::High,
            Some(score) if score > 0.5 => Severity::Medium,
            _ => Severity::Low,
        },
    }
}

pub fn build_alert(detection: Detection, now: DateTime<Utc>) -> Alert {
    Alert {
        id: Uuid::new_v4(),
        severity: severity_for(detection.kind, detection.score),
        alert_type: detection.kind,
        title: detection.title,
        description: detection.description,
        related_address: detection.address,
        blockchain: detection.blockchain,
        related_data: detection.details,
        status: AlertStatus::New,
        created_at: now,
        resolved_at: None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn structural_types_are_high() {
        assert_eq!(
            severity_for(AlertType::LargeTransaction, None),
            Severity::High
        );
        assert_eq!(severity_for(AlertType::FundDispersion, None), Severity::High);
    }

    #[test]
    fn scored_types_map_by_band() {
        assert_eq!(
            severity_for(AlertType::StatisticalAnomaly, Some(0.9)),
            Severity::High
        );
        assert_eq!(
            severity_for(AlertType::AiAnomaly, Some(0.8)),
            Severity::Medium
        );
        assert_eq!(
            severity_for(AlertType::AiAnomaly, Some(0.65)),
            Severity::Medium
        );
        assert_eq!(
            severity_for(AlertType::StatisticalAnomaly, Some(0.5)),
            Severity::Low
        );
        assert_eq!(severity_for(AlertType::StatisticalAnomaly, None), Severity::Low);
    }
}
