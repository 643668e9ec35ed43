pub mod black_scholes;
pub mod math;

#[cfg(feature = "dlom")]
pub mod dlom;
