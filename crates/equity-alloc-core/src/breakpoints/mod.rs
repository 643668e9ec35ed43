pub mod cache;
pub mod solver;
pub mod validation;

pub use cache::BreakpointCache;
pub use solver::*;
pub use validation::ValidationCheck;
