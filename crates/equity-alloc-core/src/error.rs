use rust_decimal::Decimal;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum AllocationError {
    #[error("Invalid input: {field} — {reason}")]
    InvalidInput { field: String, reason: String },

    #[error("Numerical degeneracy in {model}: {reason}")]
    NumericalDegeneracy { model: String, reason: String },

    #[error("Inconsistent allocation: {0}")]
    Inconsistency(String),

    #[error("Convergence failure: {function} did not converge after {iterations} iterations (delta: {last_delta})")]
    ConvergenceFailure {
        function: String,
        iterations: u32,
        last_delta: Decimal,
    },

    #[error("Serialization error: {0}")]
    SerializationError(String),
}

impl AllocationError {
    pub(crate) fn invalid(field: impl Into<String>, reason: impl Into<String>) -> Self {
        AllocationError::InvalidInput {
            field: field.into(),
            reason: reason.into(),
        }
    }

    pub(crate) fn degenerate(model: impl Into<String>, reason: impl Into<String>) -> Self {
        AllocationError::NumericalDegeneracy {
            model: model.into(),
            reason: reason.into(),
        }
    }
}

impl From<serde_json::Error> for AllocationError {
    fn from(e: serde_json::Error) -> Self {
        AllocationError::SerializationError(e.to_string())
    }
}
