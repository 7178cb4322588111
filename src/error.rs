use thiserror::Error;

/// Errors surfaced by the engine to its caller.
///
/// Predictor failures are absorbed inside the scorer (fail-open) and only
/// appear here when a predictor implementation returns them directly.
#[derive(Debug, Error)]
pub enum EngineError {
    #[error("malformed transaction: {0}")]
    MalformedTransaction(String),

    #[error("invalid state transition from '{from}' to '{to}'")]
    InvalidStateTransition { from: String, to: String },

    #[error("{entity} not found: {id}")]
    NotFound { entity: &'static str, id: String },

    #[error("predictor unavailable: {0}")]
    PredictorUnavailable(String),

    #[error("no transactions observed for address {address} on {blockchain}")]
    UnknownAddress { address: String, blockchain: String },

    #[error("aggregation cancelled")]
    Cancelled,

    #[error("invalid configuration: {0}")]
    InvalidConfig(String),
}

impl EngineError {
    pub fn not_found(entity: &'static str, id: impl Into<String>) -> Self {
        Self::NotFound {
            entity,
            id: id.into(),
        }
    }

    pub fn bad_transition(from: impl Into<String>, to: impl Into<String>) -> Self {
        Self::InvalidStateTransition {
            from: from.into(),
            to: to.into(),
        }
    }
}

pub type Result<T> = std::result::Result<T, EngineError>;
