pub mod allocation;
pub mod breakpoints;
pub mod dlom;
pub mod opm;
