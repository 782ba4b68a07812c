//! Synthetic scenes for exercising measurement code
//!
//! Builds star-field images with known source positions and fluxes so that
//! centroid, shape and photometry results can be checked against truth.

use ndarray::Array2;
use rand::Rng;
use serde::{Deserialize, Serialize};

use super::footprint::{Footprint, Peak};
use super::noise::generate::normal_field;
use super::noise::NoiseError;

/// Truth record for one injected source.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct InjectedSource {
    pub x: f64,
    pub y: f64,
    pub flux: f64,
    pub sigma: f64,
}

/// Add a circular Gaussian of total `flux` centered at `(x, y)`.
///
/// The profile is evaluated out to 5σ; pixels outside the image are skipped.
pub fn add_gaussian_source(image: &mut Array2<f64>, x: f64, y: f64, flux: f64, sigma: f64) {
    if sigma <= 0.0 {
        return;
    }
    let (height, width) = image.dim();
    let reach = (5.0 * sigma).ceil();
    let norm = flux / (2.0 * std::f64::consts::PI * sigma * sigma);

    let x_lo = (x - reach).floor().max(0.0) as usize;
    let y_lo = (y - reach).floor().max(0.0) as usize;
    let x_hi = ((x + reach).ceil().max(0.0) as usize).min(width.saturating_sub(1));
    let y_hi = ((y + reach).ceil().max(0.0) as usize).min(height.saturating_sub(1));
    if width == 0 || height == 0 || x_lo > x_hi || y_lo > y_hi {
        return;
    }

    for row in y_lo..=y_hi {
        for col in x_lo..=x_hi {
            let dx = col as f64 - x;
            let dy = row as f64 - y;
            image[[row, col]] += norm * (-(dx * dx + dy * dy) / (2.0 * sigma * sigma)).exp();
        }
    }
}

/// Gaussian star field on a flat sky with per-pixel Gaussian noise.
///
/// Returns the image, and one square footprint of half-width `3σ` per source
/// with a peak at the rounded source position.
pub fn star_field<R: Rng + ?Sized>(
    width: usize,
    height: usize,
    sky: f64,
    noise_sigma: f64,
    sources: &[InjectedSource],
    rng: &mut R,
) -> Result<(Array2<f64>, Vec<Footprint>), NoiseError> {
    let mut image = normal_field((height, width), sky, noise_sigma, rng)?;
    let mut footprints = Vec::with_capacity(sources.len());

    for source in sources {
        add_gaussian_source(&mut image, source.x, source.y, source.flux, source.sigma);

        let half = (3.0 * source.sigma).ceil().max(1.0);
        let x0 = (source.x - half).round().max(0.0) as usize;
        let y0 = (source.y - half).round().max(0.0) as usize;
        let size = (2.0 * half) as usize + 1;
        let footprint = Footprint::from_rect(x0, y0, size, size)
            .clipped_to(width, height)
            .with_peak(Peak::new(source.x.round(), source.y.round(), source.flux));
        footprints.push(footprint);
    }

    Ok((image, footprints))
}
