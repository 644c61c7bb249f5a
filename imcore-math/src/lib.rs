//! imcore-math - Numeric building blocks for astronomical source extraction
//!
//! This crate holds the image-agnostic numerics used by the `imcore`
//! detector engine:
//!
//! - **Statistics** - median, MAD and kappa-sigma clipped moments
//! - **Filters** - running median, 1-2-1 Hanning and gap padding for
//!   coarse background grids
//! - **Polynomial fits** - least-squares fits with an optional power offset
//! - **Cholesky** - SPD solves with a single diagonal-loading retry
//!
//! # Example
//!
//! ```text
//! use imcore_math::{sigma_clip, solve_loaded};
//! use nalgebra::{DMatrix, DVector};
//!
//! let sky = sigma_clip(&pixels, 2.5, 3).map(|c| c.mean);
//!
//! let a = DMatrix::from_row_slice(2, 2, &[4.0, 1.0, 1.0, 3.0]);
//! let fluxes = solve_loaded(a, &DVector::from_vec(vec![1.0, 2.0]))?.x;
//! ```

pub mod cholesky;
pub mod filter;
pub mod polyfit;
pub mod stats;

pub use cholesky::{solve_loaded, CholeskySolution, NotPositiveDefiniteError};
pub use filter::{hanning, median_filter_with_gaps, pad_missing, running_median};
pub use polyfit::{polyfit, polyval, PolyFitError};
pub use stats::{median, median_abs_deviation, sigma_clip, ClipSummary, StatsError, MAD_TO_SIGMA};
