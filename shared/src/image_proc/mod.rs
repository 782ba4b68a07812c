//! Image processing primitives for astronomical source measurement.
//!
//! # Module Organization
//!
//! ## Pixel containers
//! - **exposure**: image, variance and mask planes plus an optional WCS
//! - **footprint**: span-based pixel sets with peaks, and heavy footprints
//!   that carry pixel values
//! - **aabb**: inclusive bounding boxes
//!
//! ## Algorithms
//! - **centroid**: footprint moments and the naive 3×3 centroid
//! - **aperture_photometry**: circular aperture sums with variance propagation
//! - **noise**: noise generators and background statistics
//! - **detection**: threshold segmentation into footprints
//! - **test_patterns**: synthetic star fields

pub mod aabb;
pub mod aperture_photometry;
pub mod centroid;
pub mod detection;
pub mod exposure;
pub mod footprint;
pub mod noise;
pub mod test_patterns;

pub use aabb::AABB;
pub use aperture_photometry::{aperture_flux, ApertureError, ApertureFlux};
pub use centroid::{
    footprint_centroid, footprint_moments_about, naive_centroid, CentroidError, FootprintMoments,
};
pub use detection::detect_footprints;
pub use exposure::{mask_bits, Exposure, ExposureError};
pub use footprint::{Footprint, FootprintError, HeavyFootprint, Peak, Span};
pub use noise::{measure_background, BackgroundStats, NoiseError, NoiseGenerator};
