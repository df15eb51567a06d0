//! Error taxonomy for the estimator pipeline

use thiserror::Error;

/// Why an estimate could not be produced.
///
/// Kinds are kept apart for logging; callers of `estimate` only ever see a
/// failed `PredictionResult` carrying the message.
#[derive(Debug, Error)]
pub enum EstimateError {
    #[error("No price data available")]
    DataUnavailable,

    #[error("Insufficient history: need at least {required} complete days, got {actual}")]
    InsufficientHistory { required: usize, actual: usize },

    #[error("Invalid parameters: {0}")]
    InvalidParams(String),

    #[error("Computation error: {0}")]
    Computation(String),
}

pub type EstimateResult<T> = Result<T, EstimateError>;

impl EstimateError {
    /// Short machine-readable kind, used as a log field
    pub fn kind(&self) -> &'static str {
        match self {
            EstimateError::DataUnavailable => "data_unavailable",
            EstimateError::InsufficientHistory { .. } => "insufficient_history",
            EstimateError::InvalidParams(_) => "invalid_params",
            EstimateError::Computation(_) => "computation_fault",
        }
    }
}
