use async_trait::async_trait;

use crate::error::EngineError;
use crate::model::Transaction;

/// Outcome of a model prediction over a recent transaction sequence.
#[derive(Debug, Clone, Copy)]
pub struct Prediction {
    pub predicted_value: f64,
    pub actual_value: f64,
    /// Normalized anomaly score in [0, 1].
    pub anomaly_score: f64,
}

/// The model-based predictor boundary. Implemented externally and injected
/// into the scorer; the engine only consumes this contract and never
/// assumes a concrete model.
#[async_trait]
pub trait Predictor: Send + Sync {
    /// Score the newest transaction in `recent` (ordered oldest to newest)
    /// against the sequence preceding it.
    async fn score(
        &self,
        address: &str,
        recent: &[Transaction],
    ) -> Result<Prediction, EngineError>;
}

/// Baseline predictor: predicts the mean of the trailing window and scores
/// the relative deviation of the newest value. Ships in-crate so the
/// engine runs standalone; real deployments inject their own model.
pub struct MovingAveragePredictor {
    pub sequence_length: usize,
}

impl Default for MovingAveragePredictor {
    fn default() -> Self {
        Self {
            sequence_length: 10,
        }
    }
}

#[async_trait]
impl Predictor for MovingAveragePredictor {
    async fn score(
        &self,
        _address: &str,
        recent: &[Transaction],
    ) -> Result<Prediction, EngineError> {
        if recent.len() < self.sequence_length + 1 {
            return Err(EngineError::PredictorUnavailable(format!(
                "need {} transactions, have {}",
                self.sequence_length + 1,
                recent.len()
            )));
        }

        let (window, newest) = recent.split_at(recent.len() - 1);
        let window = &window[window.len() - self.sequence_length..];
        let predicted_value =
            window.iter().map(|tx| tx.value).sum::<f64>() / window.len() as f64;
        let actual_value = newest[0].value;

        let deviation = if predicted_value > 0.0 {
            (actual_value - predicted_value).abs() / predicted_value
        } else {
            actual_value.abs()
        };

        Ok(Prediction {
            predicted_value,
            actual_value,
            anomaly_score: deviation / (deviation + 1.0),
        })
    }
}
