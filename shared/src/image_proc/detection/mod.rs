//! Source detection producing footprints for measurement.
//!
//! - **thresholding**: binary thresholding and connected component labeling
//! - [`detect_footprints`]: labels above-threshold regions and turns each
//!   into a [`Footprint`] carrying its brightest pixel as a peak

pub mod thresholding;

pub use thresholding::{apply_threshold, connected_components, detect_footprints};
