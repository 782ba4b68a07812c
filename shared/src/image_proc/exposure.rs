//! Exposures: an image with matching variance and mask planes.
//!
//! All three planes are `ndarray` arrays indexed `[row, col]` = `[y, x]`.
//! Measurement code treats the exposure as the single shared mutable buffer
//! of a run; noise replacement writes the image plane in place.

use ndarray::Array2;
use thiserror::Error;

use crate::wcs::Wcs;

/// Mask-plane bit assignments.
pub mod mask_bits {
    /// Known bad pixel (sensor defect).
    pub const BAD: u16 = 1 << 0;
    /// Saturated pixel.
    pub const SAT: u16 = 1 << 1;
    /// Pixel value was interpolated.
    pub const INTRP: u16 = 1 << 2;
    /// Cosmic ray hit.
    pub const CR: u16 = 1 << 3;
    /// Pixel lies too close to the image edge.
    pub const EDGE: u16 = 1 << 4;
    /// Pixel belongs to a detection footprint.
    pub const DETECTED: u16 = 1 << 5;
}

/// Errors from exposure construction.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ExposureError {
    /// Planes passed to an exposure disagree on shape.
    #[error("{plane} plane has shape {actual:?}, image has shape {expected:?}")]
    PlaneShapeMismatch {
        /// Name of the offending plane.
        plane: &'static str,
        /// Image plane shape (rows, cols).
        expected: (usize, usize),
        /// Offending plane shape (rows, cols).
        actual: (usize, usize),
    },
}

/// Image, variance and mask planes plus an optional WCS.
#[derive(Debug, Clone, PartialEq)]
pub struct Exposure {
    pub image: Array2<f64>,
    pub variance: Array2<f64>,
    pub mask: Array2<u16>,
    wcs: Option<Wcs>,
}

impl Exposure {
    /// Zero-filled exposure of `width` × `height` pixels.
    pub fn new(width: usize, height: usize) -> Self {
        Self {
            image: Array2::zeros((height, width)),
            variance: Array2::zeros((height, width)),
            mask: Array2::zeros((height, width)),
            wcs: None,
        }
    }

    /// Wrap an image with a constant variance plane and an empty mask.
    pub fn from_image(image: Array2<f64>, variance: f64) -> Self {
        let dim = image.dim();
        Self {
            image,
            variance: Array2::from_elem(dim, variance),
            mask: Array2::zeros(dim),
            wcs: None,
        }
    }

    /// Assemble an exposure from explicit planes.
    pub fn from_planes(
        image: Array2<f64>,
        variance: Array2<f64>,
        mask: Array2<u16>,
    ) -> Result<Self, ExposureError> {
        let expected = image.dim();
        if variance.dim() != expected {
            return Err(ExposureError::PlaneShapeMismatch {
                plane: "variance",
                expected,
                actual: variance.dim(),
            });
        }
        if mask.dim() != expected {
            return Err(ExposureError::PlaneShapeMismatch {
                plane: "mask",
                expected,
                actual: mask.dim(),
            });
        }
        Ok(Self {
            image,
            variance,
            mask,
            wcs: None,
        })
    }

    pub fn with_wcs(mut self, wcs: Wcs) -> Self {
        self.wcs = Some(wcs);
        self
    }

    pub fn set_wcs(&mut self, wcs: Option<Wcs>) {
        self.wcs = wcs;
    }

    pub fn wcs(&self) -> Option<&Wcs> {
        self.wcs.as_ref()
    }

    pub fn width(&self) -> usize {
        self.image.ncols()
    }

    pub fn height(&self) -> usize {
        self.image.nrows()
    }

    /// (rows, cols) of every plane.
    pub fn dim(&self) -> (usize, usize) {
        self.image.dim()
    }

    pub fn contains(&self, x: usize, y: usize) -> bool {
        x < self.width() && y < self.height()
    }

    /// True when any of `bits` is set at `(x, y)`; out-of-bounds is false.
    pub fn mask_has(&self, x: usize, y: usize, bits: u16) -> bool {
        self.contains(x, y) && self.mask[[y, x]] & bits != 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_has_matching_planes() {
        let exposure = Exposure::new(7, 3);
        assert_eq!(exposure.dim(), (3, 7));
        assert_eq!(exposure.variance.dim(), (3, 7));
        assert_eq!(exposure.mask.dim(), (3, 7));
        assert_eq!(exposure.width(), 7);
        assert_eq!(exposure.height(), 3);
        assert!(exposure.wcs().is_none());
    }

    #[test]
    fn test_from_planes_rejects_mismatched_variance() {
        let result = Exposure::from_planes(
            Array2::zeros((4, 4)),
            Array2::zeros((4, 5)),
            Array2::zeros((4, 4)),
        );
        assert_eq!(
            result.unwrap_err(),
            ExposureError::PlaneShapeMismatch {
                plane: "variance",
                expected: (4, 4),
                actual: (4, 5),
            }
        );
    }

    #[test]
    fn test_mask_has() {
        let mut exposure = Exposure::from_image(Array2::zeros((5, 5)), 1.0);
        exposure.mask[[2, 3]] = mask_bits::BAD | mask_bits::SAT;
        assert!(exposure.mask_has(3, 2, mask_bits::SAT));
        assert!(!exposure.mask_has(2, 3, mask_bits::SAT));
        assert!(!exposure.mask_has(30, 2, mask_bits::BAD));
        assert_eq!(exposure.variance[[4, 4]], 1.0);
    }
}
