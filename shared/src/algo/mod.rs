//! Numerical helpers shared by the image processing code.

pub mod stats;

pub use stats::{median, robust_sigma};
