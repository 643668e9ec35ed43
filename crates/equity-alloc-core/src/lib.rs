pub mod allocation;
pub mod breakpoints;
pub mod cap_table;
pub mod config;
pub mod engine;
pub mod error;
pub mod pricing;
pub mod types;

#[cfg(feature = "opm")]
pub mod opm;

pub use engine::ValuationEngine;
pub use error::AllocationError;
pub use types::*;

/// Standard result type for all allocation operations
pub type AllocationResult<T> = Result<T, AllocationError>;
