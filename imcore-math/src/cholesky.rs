//! Symmetric positive-definite solves using nalgebra
//!
//! Simultaneous aperture photometry produces small dense overlap matrices
//! that are positive definite in exact arithmetic but can lose definiteness
//! once bad-pixel corrections are subtracted from them. The solver adds a
//! ridge of one tenth of the mean diagonal and tries once more before giving
//! up.

use nalgebra::{DMatrix, DVector};
use thiserror::Error;

/// Fraction of the mean diagonal added as a ridge on the retry
pub const DIAGONAL_LOADING: f64 = 0.1;

/// Error when a matrix is not positive definite even after diagonal loading
#[derive(Error, Debug, Clone, PartialEq)]
#[error("matrix of order {order} is not positive definite (trace={trace:.6e}, loading={loading:.6e})")]
pub struct NotPositiveDefiniteError {
    /// Matrix order
    pub order: usize,
    /// Trace of the matrix before loading
    pub trace: f64,
    /// Ridge added to the diagonal on the retry
    pub loading: f64,
}

/// Outcome of a loaded Cholesky solve
#[derive(Debug, Clone, PartialEq)]
pub struct CholeskySolution {
    /// Solution vector `x` of `A x = b`
    pub x: DVector<f64>,
    /// Ridge added to the diagonal, zero if the first attempt succeeded
    pub loading: f64,
}

/// Solve `A x = b` for symmetric positive-definite `A`.
///
/// If the factorisation fails, `0.1 · trace(A) / n` is added to every
/// diagonal element and the factorisation is attempted exactly once more.
///
/// # Arguments
/// * `a` - Symmetric matrix; only consumed, never aliased
/// * `b` - Right-hand side
///
/// # Returns
/// * `Ok(CholeskySolution)` - Solution and the loading that was applied
/// * `Err(NotPositiveDefiniteError)` - If the loaded matrix still fails
pub fn solve_loaded(
    a: DMatrix<f64>,
    b: &DVector<f64>,
) -> Result<CholeskySolution, NotPositiveDefiniteError> {
    let order = a.nrows();
    let trace = a.trace();

    if let Some(chol) = a.clone().cholesky() {
        return Ok(CholeskySolution {
            x: chol.solve(b),
            loading: 0.0,
        });
    }

    let loading = if order == 0 {
        0.0
    } else {
        DIAGONAL_LOADING * trace / order as f64
    };
    let mut loaded = a;
    for i in 0..order {
        loaded[(i, i)] += loading;
    }

    loaded
        .cholesky()
        .map(|chol| CholeskySolution {
            x: chol.solve(b),
            loading,
        })
        .ok_or(NotPositiveDefiniteError {
            order,
            trace,
            loading,
        })
}
