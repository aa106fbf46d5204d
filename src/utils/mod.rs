//! Numeric helpers

pub mod math;
