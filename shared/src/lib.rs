//! Shared image primitives for source measurement.
//!
//! Exposures, footprints, coordinate transforms and the low-level pixel
//! algorithms (centroids, moments, aperture sums, noise, detection) that the
//! measurement task builds on.

pub mod algo;
pub mod defects;
pub mod image_proc;
pub mod wcs;
