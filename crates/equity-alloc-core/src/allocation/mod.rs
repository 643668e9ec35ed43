pub mod rvps;

pub use rvps::*;
