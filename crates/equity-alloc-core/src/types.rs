use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// Dollar amounts: preferences, exit values, allocated values, prices.
pub type Money = Decimal;

/// Decimal fractions (0.45 = 45% volatility).
pub type Rate = Decimal;

/// Horizons in years.
pub type Years = Decimal;

/// Envelope returned by every public allocation operation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ComputationOutput<T: Serialize> {
    pub result: T,
    pub methodology: String,
    /// Inputs that shaped the result, echoed for the audit trail.
    pub assumptions: serde_json::Value,
    pub warnings: Vec<String>,
    pub metadata: ComputationMetadata,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ComputationMetadata {
    pub version: String,
    pub computation_time_us: u64,
    pub precision: String,
}

pub fn with_metadata<T: Serialize>(
    methodology: &str,
    assumptions: &impl Serialize,
    warnings: Vec<String>,
    elapsed_us: u64,
    result: T,
) -> ComputationOutput<T> {
    ComputationOutput {
        result,
        methodology: methodology.to_string(),
        assumptions: serde_json::to_value(assumptions).unwrap_or_default(),
        warnings,
        metadata: ComputationMetadata {
            version: env!("CARGO_PKG_VERSION").to_string(),
            computation_time_us: elapsed_us,
            precision: "rust_decimal_128bit".to_string(),
        },
    }
}

pub(crate) fn abs_diff(a: Decimal, b: Decimal) -> Decimal {
    (a - b).abs()
}
