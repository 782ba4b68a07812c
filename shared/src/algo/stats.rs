//! Robust statistics for background and noise estimation.

/// Scale factor converting a median absolute deviation to a Gaussian sigma.
pub const MAD_TO_SIGMA: f64 = 1.482_602_218_505_602;

/// Median of the finite values in `values`.
///
/// NaN and infinite values are ignored. For even-length data the mean of the
/// two middle values is returned. `None` when no finite values remain.
pub fn median(values: &[f64]) -> Option<f64> {
    let mut finite: Vec<f64> = values.iter().copied().filter(|v| v.is_finite()).collect();
    if finite.is_empty() {
        return None;
    }
    finite.sort_by(f64::total_cmp);

    let mid = finite.len() / 2;
    if finite.len() % 2 == 0 {
        Some((finite[mid - 1] + finite[mid]) / 2.0)
    } else {
        Some(finite[mid])
    }
}

/// Gaussian-equivalent sigma from the median absolute deviation.
///
/// Returns `(median, sigma)`, or `None` when `values` has no finite entries.
pub fn robust_sigma(values: &[f64]) -> Option<(f64, f64)> {
    let center = median(values)?;
    let deviations: Vec<f64> = values
        .iter()
        .filter(|v| v.is_finite())
        .map(|v| (v - center).abs())
        .collect();
    let mad = median(&deviations)?;
    Some((center, mad * MAD_TO_SIGMA))
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use rand::rngs::StdRng;
    use rand::SeedableRng;
    use rand_distr::{Distribution, Normal};

    #[test]
    fn test_median_odd_and_even() {
        assert_eq!(median(&[3.0, 1.0, 2.0]), Some(2.0));
        assert_eq!(median(&[4.0, 1.0, 2.0, 3.0]), Some(2.5));
    }

    #[test]
    fn test_median_skips_non_finite() {
        assert_eq!(median(&[f64::NAN, 5.0, f64::INFINITY, 1.0]), Some(3.0));
        assert_eq!(median(&[f64::NAN]), None);
        assert_eq!(median(&[]), None);
    }

    #[test]
    fn test_robust_sigma_matches_gaussian() {
        let mut rng = StdRng::seed_from_u64(7);
        let normal = Normal::new(100.0, 4.0).unwrap();
        let mut samples: Vec<f64> = (0..20_000).map(|_| normal.sample(&mut rng)).collect();
        // A handful of bright outliers must not move the estimate
        samples.extend(std::iter::repeat(1.0e6).take(50));

        let (center, sigma) = robust_sigma(&samples).unwrap();
        assert_relative_eq!(center, 100.0, epsilon = 0.2);
        assert_relative_eq!(sigma, 4.0, epsilon = 0.2);
    }
}
