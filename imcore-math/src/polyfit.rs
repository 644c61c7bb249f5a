//! Least-squares polynomial fitting

use nalgebra::{DMatrix, DVector};
use thiserror::Error;

/// Errors from polynomial fitting
#[derive(Error, Debug, Clone, PartialEq)]
pub enum PolyFitError {
    /// Fewer samples than coefficients
    #[error("too few points for fit: {points} points, {coefficients} coefficients")]
    TooFewPoints {
        /// Samples supplied
        points: usize,
        /// Coefficients requested
        coefficients: usize,
    },

    /// Sample arrays differ in length
    #[error("length mismatch: {x_len} abscissae vs {y_len} ordinates")]
    LengthMismatch {
        /// Number of abscissae
        x_len: usize,
        /// Number of ordinates
        y_len: usize,
    },

    /// Normal equations could not be solved
    #[error("singular normal equations for order {coefficients} fit")]
    Singular {
        /// Coefficients requested
        coefficients: usize,
    },
}

/// Fit `y = Σ c[k] · x^(k + lowest_power)` for `k` in `0..ncoef`.
///
/// # Arguments
/// * `x` - Abscissae
/// * `y` - Ordinates
/// * `ncoef` - Number of coefficients
/// * `lowest_power` - Power of `x` attached to `c[0]`
///
/// # Returns
/// * `Ok(Vec<f64>)` - Coefficients, lowest power first
/// * `Err(PolyFitError)` - On bad input or singular normal equations
pub fn polyfit(
    x: &[f64],
    y: &[f64],
    ncoef: usize,
    lowest_power: i32,
) -> Result<Vec<f64>, PolyFitError> {
    if x.len() != y.len() {
        return Err(PolyFitError::LengthMismatch {
            x_len: x.len(),
            y_len: y.len(),
        });
    }
    if x.len() < ncoef {
        return Err(PolyFitError::TooFewPoints {
            points: x.len(),
            coefficients: ncoef,
        });
    }

    let mut normal = DMatrix::<f64>::zeros(ncoef, ncoef);
    let mut rhs = DVector::<f64>::zeros(ncoef);
    for (&xi, &yi) in x.iter().zip(y.iter()) {
        for k in 0..ncoef {
            let pk = power(xi, k as i32 + lowest_power);
            rhs[k] += yi * pk;
            for j in 0..=k {
                normal[(j, k)] += power(xi, (k + j) as i32 + 2 * lowest_power);
            }
        }
    }
    for k in 1..ncoef {
        for j in 0..k {
            normal[(k, j)] = normal[(j, k)];
        }
    }

    normal
        .lu()
        .solve(&rhs)
        .filter(|c| c.iter().all(|v| v.is_finite()))
        .map(|c| c.iter().copied().collect())
        .ok_or(PolyFitError::Singular {
            coefficients: ncoef,
        })
}

fn power(x: f64, p: i32) -> f64 {
    if p == 0 {
        1.0
    } else {
        x.powi(p)
    }
}

/// Evaluate a polynomial with coefficients lowest power first
pub fn polyval(coef: &[f64], x: f64) -> f64 {
    coef.iter().rev().fold(0.0, |acc, &c| acc * x + c)
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_recovers_exact_quadratic() {
        let x: Vec<f64> = (0..8).map(|i| i as f64 * 0.5).collect();
        let y: Vec<f64> = x.iter().map(|&v| 1.0 - 2.0 * v + 0.25 * v * v).collect();
        let c = polyfit(&x, &y, 3, 0).unwrap();
        assert_relative_eq!(c[0], 1.0, epsilon = 1e-9);
        assert_relative_eq!(c[1], -2.0, epsilon = 1e-9);
        assert_relative_eq!(c[2], 0.25, epsilon = 1e-9);
    }

    #[test]
    fn test_lowest_power_offset() {
        // y = 3x + x^2, fitted without a constant term
        let x = [1.0, 2.0, 3.0, 4.0];
        let y: Vec<f64> = x.iter().map(|&v| 3.0 * v + v * v).collect();
        let c = polyfit(&x, &y, 2, 1).unwrap();
        assert_relative_eq!(c[0], 3.0, epsilon = 1e-9);
        assert_relative_eq!(c[1], 1.0, epsilon = 1e-9);
    }

    #[test]
    fn test_too_few_points() {
        let err = polyfit(&[1.0, 2.0], &[1.0, 2.0], 3, 0).unwrap_err();
        assert_eq!(
            err,
            PolyFitError::TooFewPoints {
                points: 2,
                coefficients: 3
            }
        );
    }

    #[test]
    fn test_degenerate_abscissae_are_singular() {
        let err = polyfit(&[2.0, 2.0, 2.0], &[1.0, 2.0, 3.0], 2, 0).unwrap_err();
        assert!(matches!(err, PolyFitError::Singular { .. }));
    }

    #[test]
    fn test_polyval_matches_horner() {
        assert_relative_eq!(polyval(&[1.0, -2.0, 0.25], 2.0), 1.0 - 4.0 + 1.0);
    }
}
