//! Background level and noise estimation.
//!
//! Estimates the sky level and noise of an exposure from the pixels that
//! are not claimed by any detection footprint and not flagged in the mask
//! plane. Median and MAD keep faint undetected sources and cosmic rays from
//! biasing the result.

use ndarray::Array2;

use super::generate::NoiseError;
use crate::algo::stats::robust_sigma;
use crate::image_proc::exposure::Exposure;
use crate::image_proc::footprint::Footprint;

/// Minimum number of background pixels for a usable estimate.
pub const MIN_BACKGROUND_PIXELS: usize = 10;

/// Sky level and noise measured from background pixels.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BackgroundStats {
    /// Median background level
    pub mean: f64,
    /// Gaussian-equivalent variance from the MAD
    pub variance: f64,
    /// Number of pixels used
    pub npix: usize,
}

/// Measure background statistics outside `footprints`.
///
/// Pixels with any of `bad_bits` set in the mask plane are skipped.
pub fn measure_background<'a, I>(
    exposure: &Exposure,
    footprints: I,
    bad_bits: u16,
) -> Result<BackgroundStats, NoiseError>
where
    I: IntoIterator<Item = &'a Footprint>,
{
    let (width, height) = (exposure.width(), exposure.height());
    let mut claimed = Array2::from_elem((height, width), false);
    for footprint in footprints {
        for (x, y) in footprint.clipped_to(width, height).pixels() {
            claimed[[y, x]] = true;
        }
    }

    let samples: Vec<f64> = exposure
        .image
        .indexed_iter()
        .filter(|&((y, x), value)| {
            !claimed[[y, x]] && exposure.mask[[y, x]] & bad_bits == 0 && value.is_finite()
        })
        .map(|(_, &value)| value)
        .collect();

    if samples.len() < MIN_BACKGROUND_PIXELS {
        return Err(NoiseError::InsufficientBackground {
            count: samples.len(),
            required: MIN_BACKGROUND_PIXELS,
        });
    }

    let (mean, sigma) = robust_sigma(&samples).ok_or(NoiseError::InsufficientBackground {
        count: 0,
        required: MIN_BACKGROUND_PIXELS,
    })?;

    Ok(BackgroundStats {
        mean,
        variance: sigma * sigma,
        npix: samples.len(),
    })
}
