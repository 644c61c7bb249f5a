//! Simultaneous circular-aperture photometry.
//!
//! Each object of a group is modelled as a uniform disk of the aperture
//! radius. For a single object the flux is the coverage-weighted pixel sum.
//! For a blend the disks' mutual overlaps form a small symmetric system
//! that is solved for all fluxes at once, with missing pixels removed from
//! the overlap matrix instead of being interpolated.

use std::f64::consts::{FRAC_1_SQRT_2, PI, SQRT_2};

use imcore_math::{solve_loaded, NotPositiveDefiniteError};
use nalgebra::{DMatrix, DVector};
use ndarray::ArrayView2;

use crate::measure::ObjectParams;
use crate::pixel_flags::PixelFlag;

/// Number of standard apertures
pub const NAPERTURES: usize = 13;

/// Standard aperture radii in units of the core radius
pub const APERTURE_MULTIPLIERS: [f64; NAPERTURES] = [
    0.5,
    FRAC_1_SQRT_2,
    1.0,
    SQRT_2,
    2.0,
    2.0 * SQRT_2,
    4.0,
    5.0,
    6.0,
    7.0,
    8.0,
    10.0,
    12.0,
];

/// Index of the aperture equal to the core radius
pub const CORE_INDEX: usize = 2;

/// Index of the aperture at twice the core radius
pub const DOUBLE_CORE_INDEX: usize = 4;

/// Standard aperture radii for a core radius.
pub fn aperture_radii(core_radius: f64) -> [f64; NAPERTURES] {
    APERTURE_MULTIPLIERS.map(|m| m * core_radius)
}

/// Fraction of a unit pixel inside a circle of radius `r_out`.
///
/// `(x, y)` is the pixel centre relative to the circle centre. The circle
/// edge is approximated by its tangent across the pixel.
pub fn pixel_fraction(x: f64, y: f64, r_out: f64) -> f64 {
    let r2 = x * x + y * y;
    let half_diag = FRAC_1_SQRT_2;
    if r2 > (r_out + half_diag).powi(2) {
        return 0.0;
    }
    if r_out >= half_diag && r2 < (r_out - half_diag).powi(2) {
        return 1.0;
    }

    // Fold into the 0-45 degree octant
    let (mut x, mut y) = (x.abs(), y.abs());
    if y > x {
        std::mem::swap(&mut x, &mut y);
    }
    let r = r2.sqrt();
    let (tan_half, tan_comp, cos_a) = if x > 0.0 && y > 0.0 {
        (0.5 * y / x, x / y, x / r)
    } else {
        (0.00005, 10000.0, 1.0)
    };

    let x_a = x - tan_half + (r_out - r) / cos_a;
    if x_a >= x + 0.5 {
        return 1.0;
    }
    let x_b = x + tan_half + (r_out - r) / cos_a;
    if x_a < x - 0.5 {
        let over = (x_b - (x - 0.5)).max(0.0);
        0.5 * over * over * tan_comp
    } else if x_b > x + 0.5 {
        1.0 - 0.5 * (x + 0.5 - x_a).powi(2) * tan_comp
    } else {
        0.5 - (x - x_a) + 0.5 * (x_b - x_a)
    }
}

/// Inclusive pixel window around a set of centres, padded by `pad`.
pub(crate) fn pixel_window(
    centres: impl IntoIterator<Item = (f64, f64)>,
    pad: f64,
    width: usize,
    height: usize,
) -> Option<(usize, usize, usize, usize)> {
    let (mut x_lo, mut x_hi, mut y_lo, mut y_hi) = (f64::MAX, f64::MIN, f64::MAX, f64::MIN);
    for (x, y) in centres {
        x_lo = x_lo.min(x);
        x_hi = x_hi.max(x);
        y_lo = y_lo.min(y);
        y_hi = y_hi.max(y);
    }
    if width == 0 || height == 0 || x_lo > x_hi {
        return None;
    }
    let lo = |v: f64| (v - pad).floor().max(0.0) as usize;
    let hi = |v: f64, n: usize| ((v + pad).ceil().max(0.0) as usize).min(n - 1);
    let window = (lo(x_lo), hi(x_hi, width), lo(y_lo), hi(y_hi, height));
    (window.0 <= window.1 && window.2 <= window.3).then_some(window)
}

/// Per-object results of [`fit_apertures`].
#[derive(Debug, Clone, PartialEq)]
pub struct ApertureFit {
    /// Curve of growth per object, one flux per aperture
    pub fluxes: Vec<Vec<f64>>,
    /// Summed coverage of missing pixels in the core aperture
    pub bad_pixels: Vec<f64>,
    /// Coverage-weighted mean confidence in the core aperture
    pub mean_confidence: Vec<f64>,
}

/// Fit every aperture for a group of objects.
///
/// # Arguments
/// * `image` - Background-subtracted image
/// * `confidence` - Confidence map
/// * `flags` - Pixel status map
/// * `objects` - The group; one entry for an isolated object
/// * `radii` - Aperture radii, increasing
/// * `core_index` - Index into `radii` of the core aperture
///
/// # Returns
/// * `Ok(ApertureFit)` - Fluxes and core-aperture statistics
/// * `Err(NotPositiveDefiniteError)` - A blended system stayed singular
pub fn fit_apertures(
    image: &ArrayView2<f64>,
    confidence: &ArrayView2<f64>,
    flags: &ArrayView2<PixelFlag>,
    objects: &[ObjectParams],
    radii: &[f64],
    core_index: usize,
) -> Result<ApertureFit, NotPositiveDefiniteError> {
    let n = objects.len();
    let (height, width) = image.dim();
    let mut fit = ApertureFit {
        fluxes: vec![vec![0.0; radii.len()]; n],
        bad_pixels: vec![0.0; n],
        mean_confidence: vec![0.0; n],
    };
    if n == 0 {
        return Ok(fit);
    }

    for (iaper, &radius) in radii.iter().enumerate() {
        let cn = 1.0 / (PI * radius * radius);
        let cnsq = cn * cn;
        let mut overlap = overlap_matrix(objects, radius);
        let mut observed = DVector::<f64>::zeros(n);
        let is_core = iaper == core_index;

        let window = pixel_window(objects.iter().map(|o| (o.x, o.y)), radius + 1.5, width, height);
        if let Some((x_lo, x_hi, y_lo, y_hi)) = window {
            let mut coverage = vec![0.0; n];
            for row in y_lo..=y_hi {
                for column in x_lo..=x_hi {
                    let flag = flags[[row, column]];
                    if !flag.is_bad() && !flag.is_usable() {
                        continue;
                    }
                    for (c, o) in coverage.iter_mut().zip(objects) {
                        *c = pixel_fraction(column as f64 - o.x, row as f64 - o.y, radius);
                    }
                    if flag.is_bad() {
                        for j in 0..n {
                            for k in 0..n {
                                overlap[(j, k)] -= coverage[j] * coverage[k] * cnsq;
                            }
                            if is_core {
                                fit.bad_pixels[j] += coverage[j];
                            }
                        }
                    } else {
                        let value = image[[row, column]];
                        for j in 0..n {
                            observed[j] += coverage[j] * value;
                            if is_core {
                                fit.mean_confidence[j] += coverage[j] * confidence[[row, column]];
                            }
                        }
                    }
                }
            }
        }

        if n == 1 {
            fit.fluxes[0][iaper] = observed[0];
        } else {
            for i in 0..n {
                overlap[(i, i)] = overlap[(i, i)].max(cnsq);
            }
            let solution = solve_loaded(overlap, &observed)?;
            for (j, curve) in fit.fluxes.iter_mut().enumerate() {
                curve[iaper] = cn * solution.x[j];
            }
        }
    }

    if let Some(&core) = radii.get(core_index) {
        let area = PI * core * core;
        fit.mean_confidence.iter_mut().for_each(|c| *c /= area);
    }
    Ok(fit)
}

/// Normalised overlap areas of equal disks centred on each object.
fn overlap_matrix(objects: &[ObjectParams], radius: f64) -> DMatrix<f64> {
    let n = objects.len();
    let cn = 1.0 / (PI * radius * radius);
    let mut a = DMatrix::<f64>::zeros(n, n);
    for i in 0..n {
        a[(i, i)] = cn;
        for j in (i + 1)..n {
            let d = (objects[i].x - objects[j].x).hypot(objects[i].y - objects[j].y);
            let value = if d >= 2.0 * radius {
                0.0
            } else {
                let arg = d / (2.0 * radius);
                cn * cn * 2.0 * radius * radius * (arg.acos() - arg * (1.0 - arg * arg).sqrt())
            };
            a[(i, j)] = value;
            a[(j, i)] = value;
        }
    }
    a
}
