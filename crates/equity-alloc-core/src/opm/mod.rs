pub mod allocation;
pub mod backsolve;

pub use allocation::*;
pub use backsolve::*;
