//! Affine world-coordinate transforms.
//!
//! Maps pixel (x, y) to a local sky frame through a reference pixel, a
//! reference sky coordinate and a 2×2 CD matrix. Good enough for forced
//! measurement between exposures that overlap on a small patch of sky.

use nalgebra::{Matrix2, Vector2};
use thiserror::Error;

/// Errors from WCS construction.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum WcsError {
    /// The CD matrix cannot be inverted.
    #[error("CD matrix is singular (determinant {determinant:e})")]
    SingularMatrix {
        /// Determinant of the rejected matrix.
        determinant: f64,
    },
}

/// Linear pixel ↔ sky transform.
#[derive(Debug, Clone, PartialEq)]
pub struct Wcs {
    crpix: Vector2<f64>,
    crval: Vector2<f64>,
    cd: Matrix2<f64>,
    cd_inverse: Matrix2<f64>,
}

impl Wcs {
    /// Build a transform, rejecting singular CD matrices.
    pub fn new(crpix: (f64, f64), crval: (f64, f64), cd: [[f64; 2]; 2]) -> Result<Self, WcsError> {
        let cd = Matrix2::new(cd[0][0], cd[0][1], cd[1][0], cd[1][1]);
        let determinant = cd.determinant();
        let cd_inverse = cd
            .try_inverse()
            .filter(|_| determinant.abs() > f64::EPSILON)
            .ok_or(WcsError::SingularMatrix { determinant })?;
        Ok(Self {
            crpix: Vector2::new(crpix.0, crpix.1),
            crval: Vector2::new(crval.0, crval.1),
            cd,
            cd_inverse,
        })
    }

    /// Square pixels of `scale` sky units, no rotation.
    pub fn with_pixel_scale(
        crpix: (f64, f64),
        crval: (f64, f64),
        scale: f64,
    ) -> Result<Self, WcsError> {
        Self::new(crpix, crval, [[scale, 0.0], [0.0, scale]])
    }

    pub fn pixel_to_sky(&self, x: f64, y: f64) -> (f64, f64) {
        let sky = self.crval + self.cd * (Vector2::new(x, y) - self.crpix);
        (sky.x, sky.y)
    }

    pub fn sky_to_pixel(&self, ra: f64, dec: f64) -> (f64, f64) {
        let pix = self.crpix + self.cd_inverse * (Vector2::new(ra, dec) - self.crval);
        (pix.x, pix.y)
    }

    pub fn cd_matrix(&self) -> &Matrix2<f64> {
        &self.cd
    }
}
