use std::sync::Arc;
use std::time::Duration;

use serde_json::json;
use tokio::time::timeout;

use crate::alert::types::AlertType;
use crate::config::ScoringConfig;
use crate::error::EngineError;
use crate::history::IngestContext;
use crate::model::Transaction;

use super::predictor::Predictor;
use super::types::Detection;

/// Monotone squash of a non-negative deviation into [0, 1).
pub fn squash(z: f64) -> f64 {
    if z <= 0.0 {
        0.0
    } else {
        z / (z + 1.0)
    }
}

/// Computes the statistical and model-based anomaly scores for a
/// transaction. The two paths are independent; predictor failures degrade
/// to statistical-only scoring and never surface to the caller.
pub struct Scorer {
    config: ScoringConfig,
    predictor: Option<Arc<dyn Predictor>>,
}

impl Scorer {
    pub fn new(config: ScoringConfig, predictor: Option<Arc<dyn Predictor>>) -> Self {
        Self { config, predictor }
    }

    /// Z-score deviation of the value from the sender's trailing mean,
    /// squashed to [0, 1]. Skipped until enough history accumulates or
    /// while the trailing variance is zero.
    pub fn statistical(&self, tx: &Transaction, ctx: &IngestContext) -> Option<Detection> {
        if ctx.prior_count < self.config.min_history as u64 || ctx.prior_stddev <= 0.0 {
            return None;
        }

        let z = (tx.value - ctx.prior_mean).abs() / ctx.prior_stddev;
        let score = squash(z);
        if score <= self.config.statistical_threshold {
            return None;
        }

        Some(Detection {
            kind: AlertType::StatisticalAnomaly,
            address: tx.from_address.clone(),
            blockchain: tx.blockchain,
            score: Some(score),
            title: "Statistical anomaly detected".to_string(),
            description: format!(
                "Transaction value {} {} deviates from the trailing mean {:.4} of address {} (score {:.2})",
                tx.value,
                tx.blockchain.ticker(),
                ctx.prior_mean,
                tx.from_address,
                score,
            ),
            details: json!({
                "tx_hash": tx.tx_hash,
                "value": tx.value,
                "trailing_mean": ctx.prior_mean,
                "trailing_stddev": ctx.prior_stddev,
                "z_score": z,
                "score": score,
            }),
        })
    }

    /// Model-based scoring through the injected predictor, bounded by the
    /// configured timeout. Fail-open: timeouts and predictor errors are
    /// logged and skipped.
    pub async fn model_based(&self, tx: &Transaction, ctx: &IngestContext) -> Option<Detection> {
        let predictor = self.predictor.as_ref()?;
        let budget = Duration::from_millis(self.config.predictor_timeout_ms);

        let prediction = match timeout(
            budget,
            predictor.score(&tx.from_address, &ctx.recent_transactions),
        )
        .await
        {
            Ok(Ok(prediction)) => prediction,
            Ok(Err(EngineError::PredictorUnavailable(reason))) => {
                tracing::debug!(
                    address = %tx.from_address,
                    %reason,
                    "predictor unavailable, skipping ai scoring"
                );
                return None;
            }
            Ok(Err(error)) => {
                tracing::warn!(
                    address = %tx.from_address,
                    %error,
                    "predictor failed, skipping ai scoring"
                );
                return None;
            }
            Err(_) => {
                tracing::warn!(
                    address = %tx.from_address,
                    timeout_ms = self.config.predictor_timeout_ms,
                    "predictor timed out, skipping ai scoring"
                );
                return None;
            }
        };

        let score = prediction.anomaly_score.clamp(0.0, 1.0);
        if score <= self.config.ai_threshold {
            return None;
        }

        Some(Detection {
            kind: AlertType::AiAnomaly,
            address: tx.from_address.clone(),
            blockchain: tx.blockchain,
            score: Some(score),
            title: "AI anomaly detected".to_string(),
            description: format!(
                "Model predicted {:.4} {} for address {}, observed {:.4} (score {:.2})",
                prediction.predicted_value,
                tx.blockchain.ticker(),
                tx.from_address,
                prediction.actual_value,
                score,
            ),
            details: json!({
                "tx_hash": tx.tx_hash,
                "predicted_value": prediction.predicted_value,
                "actual_value": prediction.actual_value,
                "anomaly_score": score,
            }),
        })
    }
}
