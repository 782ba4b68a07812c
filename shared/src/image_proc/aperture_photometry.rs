//! Circular-aperture photometry.
//!
//! Pixels are included when their center falls within the aperture radius.
//! Flux uncertainty is propagated from the variance plane.

use ndarray::ArrayView2;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Errors from aperture sums.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ApertureError {
    #[error("aperture radius must be positive and finite, got {radius}")]
    InvalidRadius { radius: f64 },

    #[error("aperture at ({x:.1}, {y:.1}) radius {radius} contains no image pixels")]
    NoPixels { x: f64, y: f64, radius: f64 },

    #[error("image shape {image:?} does not match variance shape {variance:?}")]
    ShapeMismatch {
        image: (usize, usize),
        variance: (usize, usize),
    },
}

/// Result of a single aperture sum.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ApertureFlux {
    /// Background-subtracted sum of pixel values
    pub flux: f64,
    /// 1σ uncertainty from the variance plane
    pub flux_err: f64,
    /// Number of pixels summed
    pub npix: usize,
    /// True when part of the aperture fell outside the image
    pub truncated: bool,
}

/// Sum pixels within `radius` of `(x_center, y_center)`.
pub fn aperture_flux(
    image: &ArrayView2<f64>,
    variance: &ArrayView2<f64>,
    x_center: f64,
    y_center: f64,
    radius: f64,
    background: f64,
) -> Result<ApertureFlux, ApertureError> {
    if !(radius.is_finite() && radius > 0.0) {
        return Err(ApertureError::InvalidRadius { radius });
    }
    if image.dim() != variance.dim() {
        return Err(ApertureError::ShapeMismatch {
            image: image.dim(),
            variance: variance.dim(),
        });
    }

    let (height, width) = image.dim();
    let reach = radius.ceil() as isize + 1;
    let x_int = x_center.round() as isize;
    let y_int = y_center.round() as isize;

    let x_lo = x_int - reach;
    let x_hi = x_int + reach;
    let y_lo = y_int - reach;
    let y_hi = y_int + reach;

    let mut flux = 0.0;
    let mut var_sum = 0.0;
    let mut npix = 0;
    let mut truncated = false;

    for y in y_lo..=y_hi {
        for x in x_lo..=x_hi {
            let dx = x as f64 - x_center;
            let dy = y as f64 - y_center;
            if dx * dx + dy * dy > radius * radius {
                continue;
            }
            if x < 0 || y < 0 || x as usize >= width || y as usize >= height {
                truncated = true;
                continue;
            }
            let (ux, uy) = (x as usize, y as usize);
            flux += image[[uy, ux]] - background;
            var_sum += variance[[uy, ux]].max(0.0);
            npix += 1;
        }
    }

    if npix == 0 {
        return Err(ApertureError::NoPixels {
            x: x_center,
            y: y_center,
            radius,
        });
    }

    Ok(ApertureFlux {
        flux,
        flux_err: var_sum.sqrt(),
        npix,
        truncated,
    })
}
