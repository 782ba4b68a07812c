//! Noise handling for footprint replacement
//!
//! - **generate**: noise generators that overwrite footprint pixels
//! - **quantify**: background level and noise estimation from an exposure

pub mod generate;
pub mod quantify;

pub use generate::{normal_field, NoiseError, NoiseGenerator};
pub use quantify::{measure_background, BackgroundStats};
