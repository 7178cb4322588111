pub mod classifier;
pub mod predictor;
pub mod scorer;
pub mod types;

pub use classifier::Classifier;
pub use predictor::{MovingAveragePredictor, Prediction, Predictor};
pub use scorer::Scorer;
pub use types::Detection;
