//! Centroid and moment estimators for measurement algorithms
//!
//! Two families live here:
//! - intensity-weighted moments over a footprint's pixels
//! - the naive 3×3 first moment around an integer pixel

use ndarray::ArrayView2;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use super::footprint::Footprint;

/// Errors from centroid and moment estimation.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum CentroidError {
    /// The footprint has no pixels inside the image.
    #[error("footprint has no pixels inside the image")]
    EmptyFootprint,

    /// Background-subtracted flux is zero or negative.
    #[error("object at ({x:.1}, {y:.1}) has no counts")]
    NoCounts {
        /// Seed column.
        x: f64,
        /// Seed row.
        y: f64,
    },

    /// The 3×3 box around the seed falls off the image.
    #[error("object at ({x}, {y}) is too close to the image edge")]
    EdgeOfImage {
        /// Seed column.
        x: usize,
        /// Seed row.
        y: usize,
    },
}

/// Flux, centroid and second central moments of a footprint.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct FootprintMoments {
    /// Centroid (or fixed center) x-coordinate
    pub x: f64,
    /// Centroid (or fixed center) y-coordinate
    pub y: f64,
    /// Background-subtracted flux
    pub flux: f64,
    /// Second central moment μ₂₀
    pub m_xx: f64,
    /// Second central moment μ₀₂
    pub m_yy: f64,
    /// Second central moment μ₁₁
    pub m_xy: f64,
}

impl FootprintMoments {
    /// Eigenvalues (λ₁ ≥ λ₂) of the moment matrix.
    pub fn eigenvalues(&self) -> (f64, f64) {
        let sum = self.m_xx + self.m_yy;
        let diff = self.m_xx - self.m_yy;
        let discriminant = (4.0 * self.m_xy * self.m_xy + diff * diff).sqrt();
        ((sum + discriminant) / 2.0, (sum - discriminant) / 2.0)
    }

    /// λ₁/λ₂, infinite for degenerate moments.
    pub fn aspect_ratio(&self) -> f64 {
        let (l1, l2) = self.eigenvalues();
        if l2 > f64::EPSILON {
            (l1 / l2).abs()
        } else {
            f64::INFINITY
        }
    }
}

struct RawMoments {
    m00: f64,
    m10: f64,
    m01: f64,
}

fn first_moments(
    image: &ArrayView2<f64>,
    footprint: &Footprint,
    background: f64,
) -> Result<RawMoments, CentroidError> {
    let (height, width) = image.dim();
    let clipped = footprint.clipped_to(width, height);
    if clipped.is_empty() {
        return Err(CentroidError::EmptyFootprint);
    }

    let mut raw = RawMoments {
        m00: 0.0,
        m10: 0.0,
        m01: 0.0,
    };
    for (x, y) in clipped.pixels() {
        let weight = image[[y, x]] - background;
        raw.m00 += weight;
        raw.m10 += x as f64 * weight;
        raw.m01 += y as f64 * weight;
    }
    Ok(raw)
}

/// Second central moments of the footprint about a fixed center.
pub fn footprint_moments_about(
    image: &ArrayView2<f64>,
    footprint: &Footprint,
    center: (f64, f64),
    background: f64,
) -> Result<FootprintMoments, CentroidError> {
    let (height, width) = image.dim();
    let clipped = footprint.clipped_to(width, height);
    if clipped.is_empty() {
        return Err(CentroidError::EmptyFootprint);
    }

    let (cx, cy) = center;
    let (mut flux, mut sxx, mut syy, mut sxy) = (0.0, 0.0, 0.0, 0.0);
    for (x, y) in clipped.pixels() {
        let weight = image[[y, x]] - background;
        let dx = x as f64 - cx;
        let dy = y as f64 - cy;
        flux += weight;
        sxx += dx * dx * weight;
        syy += dy * dy * weight;
        sxy += dx * dy * weight;
    }

    if flux <= f64::EPSILON {
        return Err(CentroidError::NoCounts { x: cx, y: cy });
    }

    Ok(FootprintMoments {
        x: cx,
        y: cy,
        flux,
        m_xx: sxx / flux,
        m_yy: syy / flux,
        m_xy: sxy / flux,
    })
}

/// Intensity-weighted centroid and moments over a footprint.
pub fn footprint_centroid(
    image: &ArrayView2<f64>,
    footprint: &Footprint,
    background: f64,
) -> Result<FootprintMoments, CentroidError> {
    let raw = first_moments(image, footprint, background)?;
    if raw.m00 <= f64::EPSILON {
        let (x, y) = footprint
            .bbox()
            .map(|b| b.center())
            .unwrap_or((f64::NAN, f64::NAN));
        return Err(CentroidError::NoCounts { x, y });
    }
    let center = (raw.m10 / raw.m00, raw.m01 / raw.m00);
    footprint_moments_about(image, footprint, center, background)
}

/// Unweighted first moment of the 3×3 box centered on pixel `(x, y)`.
///
/// Returns the refined `(x, y)` position.
pub fn naive_centroid(
    image: &ArrayView2<f64>,
    x: usize,
    y: usize,
    background: f64,
) -> Result<(f64, f64), CentroidError> {
    let (height, width) = image.dim();
    if x == 0 || y == 0 || x + 1 >= width || y + 1 >= height {
        return Err(CentroidError::EdgeOfImage { x, y });
    }

    let im = |dx: isize, dy: isize| -> f64 {
        image[[(y as isize + dy) as usize, (x as isize + dx) as usize]]
    };

    let sum = (im(-1, 1) + im(0, 1) + im(1, 1))
        + (im(-1, 0) + im(0, 0) + im(1, 0))
        + (im(-1, -1) + im(0, -1) + im(1, -1))
        - 9.0 * background;

    if sum == 0.0 {
        return Err(CentroidError::NoCounts {
            x: x as f64,
            y: y as f64,
        });
    }

    let sum_x = -im(-1, 1) + im(1, 1) - im(-1, 0) + im(1, 0) - im(-1, -1) + im(1, -1);
    let sum_y = (im(-1, 1) + im(0, 1) + im(1, 1)) - (im(-1, -1) + im(0, -1) + im(1, -1));

    Ok((x as f64 + sum_x / sum, y as f64 + sum_y / sum))
}
