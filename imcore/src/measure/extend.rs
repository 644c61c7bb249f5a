//! Total flux from an elliptical curve of growth.
//!
//! Intensities inside a family of concentric ellipses scaled to the
//! isophotal shape are accumulated, lightly median filtered and fitted with
//! a cubic. The accumulated flux at the inflection of that cubic is taken as
//! the total flux; without a usable inflection the largest accumulation is
//! used instead.

use std::f64::consts::{FRAC_PI_2, PI};

use imcore_math::{polyfit, running_median};
use ndarray::ArrayView2;

use crate::measure::Moments;
use crate::pixel_flags::PixelFlag;

/// Number of elliptical accumulators
pub const NACC: usize = 10;
const NCOEF: usize = 4;
const MAX_ECCENTRICITY: f64 = 0.9;

/// Inputs for [`total_flux`] that come from the run rather than the object.
#[derive(Debug, Clone, Copy)]
pub struct SkyContext {
    /// Sky noise in ADU
    pub sky_sigma: f64,
    /// Isophotal threshold in ADU
    pub threshold: f64,
}

/// Estimate the total flux of an isolated object.
///
/// # Arguments
/// * `image` - Background-subtracted image
/// * `flags` - Pixel status map; only usable pixels are accumulated
/// * `moments` - Isophotal moments of the object
/// * `isophotal_area` - Pixel count above threshold
/// * `sky` - Run-level noise and threshold
pub fn total_flux(
    image: &ArrayView2<f64>,
    flags: &ArrayView2<PixelFlag>,
    moments: &Moments,
    isophotal_area: f64,
    sky: SkyContext,
) -> f64 {
    let (ny, nx) = image.dim();
    let xniso = moments.flux;
    let (sxx, sxy, syy) = (moments.sxx, moments.sxy, moments.syy);
    let xbar = moments.x + 1.0;
    let ybar = moments.y + 1.0;

    let srr = (sxx + syy).max(0.5);
    let ecc = (((syy - sxx).powi(2) + 4.0 * sxy * sxy).sqrt() / srr).min(MAX_ECCENTRICITY);
    let xx = 0.5 * (1.0 + ecc) * srr - sxx;
    let theta = if sxy == 0.0 {
        0.0
    } else if xx == 0.0 {
        FRAC_PI_2
    } else {
        (sxy / xx).atan()
    };
    let (stheta, ctheta) = theta.sin_cos();

    // Noise inflates the measured eccentricity of faint objects
    let noisy = (syy - sxx).powi(2) - 16.0 * PI * sky.sky_sigma * srr.powi(3) / (xniso * xniso)
        + 4.0 * sxy * sxy;
    let ecc = (noisy.max(0.0).sqrt() / srr).min(MAX_ECCENTRICITY);

    let mut a = (srr * (1.0 + ecc)).sqrt();
    let mut b = (srr * (1.0 - ecc)).sqrt();
    let stretch = (isophotal_area / (PI * a * b)).sqrt();
    let rad = ((moments.peak - sky.sky_sigma) / sky.threshold).max(1.1);
    let sfac = (3.0 / rad.ln().sqrt()).clamp(2.0, 5.0);
    a *= sfac * stretch;
    b *= sfac * stretch;

    let mut accum = [0.0; NACC];
    let climsq = ((a * ctheta).powi(2) + (b * stheta).powi(2)).max(1.0);
    let clim = climsq.sqrt();
    let pt1 = (2.0 * theta).sin() * (b * b - a * a);
    let pt2 = (b * ctheta).powi(2) + (a * stheta).powi(2);
    let pt3 = (a * b).powi(2);

    let jmin = ((ybar - clim) as i64).max(1);
    let jmax = ((ybar + clim + 1.0) as i64).min(ny as i64);
    for jj in jmin..=jmax {
        let row = (jj - 1) as usize;
        let c = jj as f64 - ybar;
        let pb = pt1 * c;
        let pc = pt2 * c * c - pt3;
        let disc = (pb * pb - 4.0 * climsq * pc).max(0.0).sqrt();
        let xliml = (-pb - disc) / (2.0 * climsq);
        let xlimu = (-pb + disc) / (2.0 * climsq);
        let imin = ((xbar + xliml) as i64).max(1);
        let imax = ((xbar + xlimu + 1.0) as i64).min(nx as i64);
        for ii in imin..=imax {
            let col = (ii - 1) as usize;
            if !flags[[row, col]].is_usable() {
                continue;
            }
            let t = image[[row, col]];
            let x = ii as f64 - xbar;
            let xnew = x * ctheta - c * stheta;
            let ynew = x * stheta + c * ctheta;
            let ellrad = 2.0 * ((ynew / a).powi(2) + (xnew / b).powi(2)).sqrt();
            let iupd = (((2.0 - ellrad) * NACC as f64) as i64 + 1).clamp(1, NACC as i64) as usize;
            for slot in accum[NACC - iupd..].iter_mut() {
                *slot += t;
            }
        }
    }

    let flip = xniso < 0.0;
    if flip {
        accum.iter_mut().for_each(|v| *v = -*v);
    }
    running_median(&mut accum, 3);
    let xmax = accum.iter().copied().fold(0.0, f64::max);
    let xcord: Vec<f64> = (1..=NACC).map(|i| i as f64).collect();

    let mut xlimit = -1.0_f64;
    if let Ok(coef) = polyfit(&xcord, &accum, NCOEF, 0) {
        let pa = coef[1];
        let pb = 2.0 * coef[2];
        let pc = 3.0 * coef[3];
        if pc != 0.0 {
            let disc = (pb * pb - 4.0 * pa * pc).max(0.0).sqrt();
            for root in [(-pb + disc) / (2.0 * pc), (-pb - disc) / (2.0 * pc)] {
                if root > 1.0 && root < NACC as f64 {
                    let ir = root as usize;
                    let frac = root - ir as f64;
                    xlimit = xlimit.max((1.0 - frac) * accum[ir - 1] + frac * accum[ir]);
                }
            }
        }
    }
    if xlimit < 0.0 {
        xlimit = xmax;
    }
    if flip {
        -xlimit
    } else {
        xlimit
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::detection::PixelSample;
    use crate::measure::{areal_profile, compute_moments};
    use ndarray::Array2;

    fn gaussian_star(size: usize, flux: f64, sigma: f64) -> Array2<f64> {
        let c = (size / 2) as f64;
        Array2::from_shape_fn((size, size), |(r, col)| {
            let d2 = (r as f64 - c).powi(2) + (col as f64 - c).powi(2);
            flux / (2.0 * PI * sigma * sigma) * (-d2 / (2.0 * sigma * sigma)).exp()
        })
    }

    #[test]
    fn test_total_flux_exceeds_isophotal() {
        let size = 61;
        let flux = 50_000.0;
        let image = gaussian_star(size, flux, 2.0);
        let flags = Array2::from_elem((size, size), PixelFlag::Clean);
        let threshold = 15.0;
        let pixels: Vec<PixelSample> = image
            .indexed_iter()
            .filter(|(_, &z)| z > threshold)
            .map(|((y, x), &z)| PixelSample { x, y, z, zsm: z })
            .collect();
        let moments = compute_moments(&pixels, 0.0, size, size).unwrap();
        let area = areal_profile(&pixels, threshold)[0] as f64;

        let total = total_flux(
            &image.view(),
            &flags.view(),
            &moments,
            area,
            SkyContext {
                sky_sigma: 10.0,
                threshold,
            },
        );
        assert!(total > moments.flux, "total {total} iso {}", moments.flux);
        assert!(total <= flux * 1.001, "total {total}");
        assert!(total > 0.9 * flux, "total {total}");
    }
}
