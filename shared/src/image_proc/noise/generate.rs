//! Noise generators for replacing source pixels.
//!
//! Three flavours are supported:
//! - an explicit noise image, copied pixel-for-pixel
//! - Gaussian noise with a fixed mean and variance
//! - Gaussian noise drawn per pixel from the exposure's own variance plane
//!
//! Generators are validated against the exposure and the footprints they
//! will fill before any pixel is written, so a bad noise configuration
//! never leaves a half-replaced image behind.

use ndarray::Array2;
use rand::Rng;
use rand_distr::{Distribution, Normal, StandardNormal};
use thiserror::Error;

use crate::image_proc::exposure::Exposure;
use crate::image_proc::footprint::Footprint;

/// Errors from noise generator construction and validation.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum NoiseError {
    /// Requested noise variance is negative or not finite.
    #[error("noise variance {variance} is not a finite non-negative number")]
    InvalidVariance {
        /// Rejected variance.
        variance: f64,
    },

    /// Requested noise mean is not finite.
    #[error("noise mean {mean} is not finite")]
    InvalidMean {
        /// Rejected mean.
        mean: f64,
    },

    /// The exposure variance plane cannot seed noise at a footprint pixel.
    #[error("variance plane holds {value} at ({x}, {y}) inside a footprint")]
    InvalidVariancePixel {
        /// Pixel column.
        x: usize,
        /// Pixel row.
        y: usize,
        /// Offending variance value.
        value: f64,
    },

    /// Explicit noise image does not match the exposure.
    #[error("noise image has shape {actual:?}, exposure has shape {expected:?}")]
    ShapeMismatch {
        /// Exposure shape (rows, cols).
        expected: (usize, usize),
        /// Noise image shape (rows, cols).
        actual: (usize, usize),
    },

    /// Explicit noise image holds a NaN or infinity under a footprint.
    #[error("noise image value at ({x}, {y}) is not finite")]
    NonFiniteNoisePixel {
        /// Pixel column.
        x: usize,
        /// Pixel row.
        y: usize,
    },

    /// Too few unmasked background pixels to estimate the noise.
    #[error("only {count} background pixels available to measure noise, need {required}")]
    InsufficientBackground {
        /// Usable pixel count.
        count: usize,
        /// Minimum required.
        required: usize,
    },
}

/// Array of independent Gaussian samples.
pub fn normal_field<R: Rng + ?Sized>(
    size: (usize, usize),
    mean: f64,
    std_dev: f64,
    rng: &mut R,
) -> Result<Array2<f64>, NoiseError> {
    if !mean.is_finite() {
        return Err(NoiseError::InvalidMean { mean });
    }
    let normal = Normal::new(mean, std_dev).map_err(|_| NoiseError::InvalidVariance {
        variance: std_dev * std_dev,
    })?;
    Ok(Array2::from_shape_fn(size, |_| normal.sample(rng)))
}

fn check_variance(variance: f64) -> Result<f64, NoiseError> {
    if variance.is_finite() && variance >= 0.0 {
        Ok(variance)
    } else {
        Err(NoiseError::InvalidVariance { variance })
    }
}

/// Where replacement noise comes from.
#[derive(Debug, Clone, PartialEq)]
pub enum NoiseGenerator {
    /// Copy values from a noise image of the exposure's shape.
    Image(Array2<f64>),
    /// Draw from N(mean, sigma²).
    Gaussian { mean: f64, sigma: f64 },
    /// Draw each pixel from N(mean, variance[y, x]).
    VariancePlane { mean: f64 },
}

impl NoiseGenerator {
    pub fn image(noise: Array2<f64>) -> Self {
        NoiseGenerator::Image(noise)
    }

    pub fn gaussian(mean: f64, variance: f64) -> Result<Self, NoiseError> {
        if !mean.is_finite() {
            return Err(NoiseError::InvalidMean { mean });
        }
        let variance = check_variance(variance)?;
        Ok(NoiseGenerator::Gaussian {
            mean,
            sigma: variance.sqrt(),
        })
    }

    pub fn variance_plane(mean: f64) -> Result<Self, NoiseError> {
        if !mean.is_finite() {
            return Err(NoiseError::InvalidMean { mean });
        }
        Ok(NoiseGenerator::VariancePlane { mean })
    }

    /// Shift every generated value by `offset`.
    pub fn with_offset(self, offset: f64) -> Result<Self, NoiseError> {
        if !offset.is_finite() {
            return Err(NoiseError::InvalidMean { mean: offset });
        }
        if offset == 0.0 {
            return Ok(self);
        }
        Ok(match self {
            NoiseGenerator::Image(noise) => NoiseGenerator::Image(noise.mapv(|v| v + offset)),
            NoiseGenerator::Gaussian { mean, sigma } => NoiseGenerator::Gaussian {
                mean: mean + offset,
                sigma,
            },
            NoiseGenerator::VariancePlane { mean } => NoiseGenerator::VariancePlane {
                mean: mean + offset,
            },
        })
    }

    /// Check that every pixel of every footprint can be filled.
    pub fn validate<'a, I>(&self, exposure: &Exposure, footprints: I) -> Result<(), NoiseError>
    where
        I: IntoIterator<Item = &'a Footprint>,
    {
        let (width, height) = (exposure.width(), exposure.height());
        match self {
            NoiseGenerator::Image(noise) => {
                if noise.dim() != exposure.dim() {
                    return Err(NoiseError::ShapeMismatch {
                        expected: exposure.dim(),
                        actual: noise.dim(),
                    });
                }
                for footprint in footprints {
                    for (x, y) in footprint.clipped_to(width, height).pixels() {
                        if !noise[[y, x]].is_finite() {
                            return Err(NoiseError::NonFiniteNoisePixel { x, y });
                        }
                    }
                }
            }
            NoiseGenerator::Gaussian { .. } => {}
            NoiseGenerator::VariancePlane { .. } => {
                for footprint in footprints {
                    for (x, y) in footprint.clipped_to(width, height).pixels() {
                        let value = exposure.variance[[y, x]];
                        if !(value.is_finite() && value >= 0.0) {
                            return Err(NoiseError::InvalidVariancePixel { x, y, value });
                        }
                    }
                }
            }
        }
        Ok(())
    }

    /// Overwrite the footprint's image pixels with noise.
    ///
    /// Assumes [`NoiseGenerator::validate`] passed for this footprint.
    pub fn fill<R: Rng + ?Sized>(&self, exposure: &mut Exposure, footprint: &Footprint, rng: &mut R) {
        let footprint = footprint.clipped_to(exposure.width(), exposure.height());
        match self {
            NoiseGenerator::Image(noise) => {
                for (x, y) in footprint.pixels() {
                    exposure.image[[y, x]] = noise[[y, x]];
                }
            }
            NoiseGenerator::Gaussian { mean, sigma } => {
                for (x, y) in footprint.pixels() {
                    let z: f64 = rng.sample(StandardNormal);
                    exposure.image[[y, x]] = mean + sigma * z;
                }
            }
            NoiseGenerator::VariancePlane { mean } => {
                for (x, y) in footprint.pixels() {
                    let z: f64 = rng.sample(StandardNormal);
                    let sigma = exposure.variance[[y, x]].sqrt();
                    exposure.image[[y, x]] = mean + sigma * z;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    #[test]
    fn test_normal_field_statistics() {
        let mut rng = StdRng::seed_from_u64(123);
        let field = normal_field((100, 100), 50.0, 5.0, &mut rng).unwrap();
        assert_relative_eq!(field.mean().unwrap(), 50.0, epsilon = 0.5);
        assert_relative_eq!(field.std(0.0), 5.0, epsilon = 0.5);
    }

    #[test]
    fn test_normal_field_is_deterministic_per_seed() {
        let a = normal_field((5, 5), 0.0, 1.0, &mut StdRng::seed_from_u64(42)).unwrap();
        let b = normal_field((5, 5), 0.0, 1.0, &mut StdRng::seed_from_u64(42)).unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn test_gaussian_rejects_bad_parameters() {
        assert_eq!(
            NoiseGenerator::gaussian(0.0, -1.0),
            Err(NoiseError::InvalidVariance { variance: -1.0 })
        );
        assert!(matches!(
            NoiseGenerator::gaussian(f64::NAN, 1.0),
            Err(NoiseError::InvalidMean { .. })
        ));
        assert!(NoiseGenerator::gaussian(0.0, f64::INFINITY).is_err());
    }

    #[test]
    fn test_fill_only_touches_footprint() {
        let mut exposure = Exposure::from_image(Array2::from_elem((10, 10), 1000.0), 4.0);
        let footprint = Footprint::from_rect(2, 2, 3, 3);
        let generator = NoiseGenerator::gaussian(0.0, 1.0).unwrap();
        let mut rng = StdRng::seed_from_u64(1);

        generator.validate(&exposure, [&footprint]).unwrap();
        generator.fill(&mut exposure, &footprint, &mut rng);

        for ((y, x), &value) in exposure.image.indexed_iter() {
            if footprint.contains(x, y) {
                assert!(value.abs() < 10.0, "pixel ({x}, {y}) = {value}");
            } else {
                assert_eq!(value, 1000.0);
            }
        }
    }

    #[test]
    fn test_variance_plane_validation() {
        let mut exposure = Exposure::from_image(Array2::zeros((6, 6)), 1.0);
        exposure.variance[[3, 3]] = -2.0;
        let generator = NoiseGenerator::variance_plane(0.0).unwrap();

        let outside = Footprint::from_rect(0, 0, 2, 2);
        assert!(generator.validate(&exposure, [&outside]).is_ok());

        let inside = Footprint::from_rect(2, 2, 3, 3);
        assert_eq!(
            generator.validate(&exposure, [&outside, &inside]),
            Err(NoiseError::InvalidVariancePixel {
                x: 3,
                y: 3,
                value: -2.0
            })
        );
    }

    #[test]
    fn test_image_generator_copies_values_and_checks_shape() {
        let mut exposure = Exposure::from_image(Array2::zeros((4, 4)), 1.0);
        let noise = Array2::from_shape_fn((4, 4), |(y, x)| (y * 4 + x) as f64);
        let generator = NoiseGenerator::image(noise).with_offset(0.5).unwrap();
        let footprint = Footprint::from_rect(1, 1, 2, 1);

        generator.validate(&exposure, [&footprint]).unwrap();
        generator.fill(&mut exposure, &footprint, &mut StdRng::seed_from_u64(0));
        assert_eq!(exposure.image[[1, 1]], 5.5);
        assert_eq!(exposure.image[[1, 2]], 6.5);
        assert_eq!(exposure.image[[0, 0]], 0.0);

        let wrong = NoiseGenerator::image(Array2::zeros((3, 4)));
        assert_eq!(
            wrong.validate(&exposure, [&footprint]),
            Err(NoiseError::ShapeMismatch {
                expected: (4, 4),
                actual: (3, 4)
            })
        );
    }
}
