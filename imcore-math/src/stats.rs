//! Robust statistics for sky estimation
//!
//! Median, median absolute deviation and iterative kappa-sigma clipping.
//! The clipped estimators use the MAD scaled to a Gaussian sigma, so a
//! handful of bright stars in a background cell cannot drag the estimate.

use thiserror::Error;

/// Scale factor turning a median absolute deviation into a Gaussian sigma
pub const MAD_TO_SIGMA: f64 = 1.482_602_218_505_602;

/// Errors from statistical reductions
#[derive(Error, Debug, Clone, PartialEq)]
pub enum StatsError {
    /// No finite values were supplied
    #[error("insufficient data: {total} values, none finite")]
    NoFiniteValues {
        /// Number of values passed in
        total: usize,
    },
}

/// Calculate median of a slice of f64 values
///
/// NaN values are ignored. Even-length inputs return the mean of the two
/// central values.
///
/// # Arguments
/// * `values` - Sample values
///
/// # Returns
/// * `Ok(f64)` - The median of the finite values
/// * `Err(StatsError)` - If no finite value is present
pub fn median(values: &[f64]) -> Result<f64, StatsError> {
    let mut valid: Vec<f64> = values.iter().copied().filter(|v| !v.is_nan()).collect();
    if valid.is_empty() {
        return Err(StatsError::NoFiniteValues {
            total: values.len(),
        });
    }
    Ok(median_in_place(&mut valid))
}

/// Median of a non-empty, NaN-free buffer; reorders the buffer.
pub(crate) fn median_in_place(values: &mut [f64]) -> f64 {
    values.sort_by(f64::total_cmp);
    let n = values.len();
    if n % 2 == 0 {
        0.5 * (values[n / 2 - 1] + values[n / 2])
    } else {
        values[n / 2]
    }
}

/// Median and median absolute deviation of the finite values
///
/// # Returns
/// `(median, mad)` where `mad` is unscaled (multiply by [`MAD_TO_SIGMA`]
/// for a Gaussian-equivalent sigma)
pub fn median_abs_deviation(values: &[f64]) -> Result<(f64, f64), StatsError> {
    let med = median(values)?;
    let deviations: Vec<f64> = values
        .iter()
        .filter(|v| !v.is_nan())
        .map(|v| (v - med).abs())
        .collect();
    let mad = median(&deviations)?;
    Ok((med, mad))
}

/// Mean and population standard deviation
///
/// Returns `None` for an empty slice.
pub fn mean_stdev(values: &[f64]) -> Option<(f64, f64)> {
    if values.is_empty() {
        return None;
    }
    let n = values.len() as f64;
    let mean = values.iter().sum::<f64>() / n;
    let var = values.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / n;
    Some((mean, var.sqrt()))
}

/// Result of an iterative clip
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ClipSummary {
    /// Mean of surviving samples
    pub mean: f64,
    /// Standard deviation of surviving samples
    pub stdev: f64,
    /// Number of surviving samples
    pub kept: usize,
}

/// Kappa-sigma clipped mean around the median.
///
/// Each iteration computes the median and MAD-derived sigma of the current
/// sample and rejects values outside `median ± kappa·sigma`. Stops early once
/// an iteration rejects nothing or sigma collapses to zero. The returned mean
/// and standard deviation are the plain moments of the survivors.
///
/// # Arguments
/// * `values` - Samples; NaN values are dropped up front
/// * `kappa` - Clip half-width in sigma
/// * `max_iterations` - Upper bound on clipping passes
///
/// # Returns
/// `None` when no finite samples survive
pub fn sigma_clip(values: &[f64], kappa: f64, max_iterations: usize) -> Option<ClipSummary> {
    let mut kept: Vec<f64> = values.iter().copied().filter(|v| v.is_finite()).collect();
    let mut scratch = Vec::with_capacity(kept.len());

    for _ in 0..max_iterations {
        if kept.is_empty() {
            return None;
        }
        scratch.clear();
        scratch.extend_from_slice(&kept);
        let med = median_in_place(&mut scratch);
        scratch.iter_mut().for_each(|v| *v = (*v - med).abs());
        let sigma = MAD_TO_SIGMA * median_in_place(&mut scratch);
        if sigma <= 0.0 {
            break;
        }

        let lo = med - kappa * sigma;
        let hi = med + kappa * sigma;
        let before = kept.len();
        kept.retain(|&v| v >= lo && v <= hi);
        if kept.len() == before {
            break;
        }
    }

    let (mean, stdev) = mean_stdev(&kept)?;
    Some(ClipSummary {
        mean,
        stdev,
        kept: kept.len(),
    })
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
        assert_eq!(median(&[3.0, 1.0, 2.0]).unwrap(), 2.0);
        assert_eq!(median(&[4.0, 1.0, 3.0, 2.0]).unwrap(), 2.5);
    }

    #[test]
    fn test_median_ignores_nan() {
        assert_eq!(median(&[f64::NAN, 5.0, 1.0, 3.0]).unwrap(), 3.0);
    }

    #[test]
    fn test_median_empty_is_error() {
        assert!(matches!(
            median(&[f64::NAN]),
            Err(StatsError::NoFiniteValues { total: 1 })
        ));
    }

    #[test]
    fn test_mad_of_symmetric_sample() {
        let (med, mad) = median_abs_deviation(&[1.0, 2.0, 3.0, 4.0, 5.0]).unwrap();
        assert_eq!(med, 3.0);
        assert_eq!(mad, 1.0);
    }

    #[test]
    fn test_sigma_clip_rejects_outliers() {
        let mut rng = StdRng::seed_from_u64(7);
        let normal = Normal::new(1000.0, 10.0).unwrap();
        let mut samples: Vec<f64> = (0..5000).map(|_| normal.sample(&mut rng)).collect();
        // 5% contamination far above the sky
        samples.extend(std::iter::repeat(5000.0).take(250));

        let clip = sigma_clip(&samples, 2.5, 30).unwrap();
        assert_relative_eq!(clip.mean, 1000.0, epsilon = 1.0);
        assert!(clip.stdev > 7.0 && clip.stdev < 11.0, "stdev {}", clip.stdev);
        assert!(clip.kept < 5000);
    }

    #[test]
    fn test_sigma_clip_constant_input() {
        let clip = sigma_clip(&[4.0; 10], 2.5, 3).unwrap();
        assert_eq!(clip.mean, 4.0);
        assert_eq!(clip.stdev, 0.0);
        assert_eq!(clip.kept, 10);
    }

    #[test]
    fn test_sigma_clip_empty() {
        assert!(sigma_clip(&[], 2.5, 3).is_none());
    }
}
