//! Correlation factors.

mod jastrow;

pub use jastrow::PairJastrow;
