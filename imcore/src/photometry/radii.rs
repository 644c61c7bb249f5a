//! Characteristic radii from a curve of growth, and fluxes through them.
//!
//! All radii except the half-light radius are clamped between the radius of
//! the isophotal area, `r_t = sqrt(areal0 / π)`, and the smaller of `5·r_t`
//! and the largest tabulated aperture.

use std::f64::consts::{FRAC_1_PI, PI};

use ndarray::ArrayView2;

use super::aperture::{pixel_fraction, pixel_window};
use crate::measure::ObjectParams;
use crate::pixel_flags::PixelFlag;

/// Apertures used by the Kron first moment
const KRON_APERTURES: usize = 7;

/// Surface-brightness ratio that defines the Petrosian radius
const PETROSIAN_ETA: f64 = 0.2;

fn isophotal_radius(areal0: f64) -> f64 {
    (areal0 / PI).sqrt()
}

fn clamp_radius(rad: f64, r_t: f64, largest: f64) -> f64 {
    rad.min(largest).min(5.0 * r_t).max(r_t)
}

/// Radius enclosing `half_flux`, interpolated linearly on the curve of
/// growth.
///
/// Inside the first aperture the interpolation runs towards a single pixel
/// holding the peak.
///
/// # Arguments
/// * `radii` - Aperture radii
/// * `fluxes` - Flux through each aperture
/// * `half_flux` - Target flux, normally half the total
/// * `peak` - Peak height of the object
pub fn half_light_radius(radii: &[f64], fluxes: &[f64], half_flux: f64, peak: f64) -> f64 {
    let n = radii.len().min(fluxes.len());
    if n == 0 {
        return 0.0;
    }
    let i = fluxes[..n]
        .iter()
        .position(|&f| f > half_flux)
        .unwrap_or(n - 1);
    if i == 0 {
        let delr = (fluxes[0] - half_flux) / (fluxes[0] - peak).max(1.0);
        radii[0] * (1.0 - delr) + delr * FRAC_1_PI.sqrt()
    } else {
        let delr = (fluxes[i] - half_flux) / (fluxes[i] - fluxes[i - 1]).max(1.0);
        radii[i - 1] * delr + radii[i] * (1.0 - delr)
    }
}

/// Scale length of an exponential profile through the threshold and peak.
pub fn exponential_radius(threshold: f64, peak: f64, areal0: f64, radii: &[f64]) -> f64 {
    let Some(&largest) = radii.last() else {
        return 0.0;
    };
    let pk = peak.max(1.5 * threshold);
    let r_t = isophotal_radius(areal0);
    let rad = 5.0 * r_t / (pk / threshold).ln();
    clamp_radius(rad, r_t, largest)
}

/// Twice the flux-weighted mean radius over the inner apertures.
pub fn kron_radius(areal0: f64, radii: &[f64], fluxes: &[f64]) -> f64 {
    let n = radii.len().min(fluxes.len());
    if n == 0 {
        return 0.0;
    }
    let r_t = isophotal_radius(areal0);
    let mut rad = 0.5 * radii[0] * fluxes[0];
    let mut sum = fluxes[0];
    for i in 1..n.min(KRON_APERTURES) {
        let wt = (fluxes[i] - fluxes[i - 1]).max(0.0);
        rad += 0.5 * (radii[i] + radii[i - 1]) * wt;
        sum += wt;
    }
    clamp_radius(2.0 * rad / sum, r_t, radii[n - 1])
}

/// Twice the radius where the annular surface brightness falls to a fifth
/// of the mean surface brightness inside it.
pub fn petrosian_radius(areal0: f64, radii: &[f64], fluxes: &[f64]) -> f64 {
    let n = radii.len().min(fluxes.len());
    if n == 0 {
        return 0.0;
    }
    let r_t = isophotal_radius(areal0);
    let mut eta = 1.0;
    let mut eta_old = eta;
    let mut j = 1;
    while eta > PETROSIAN_ETA && j < n {
        eta_old = eta;
        let area_ratio = radii[j] * radii[j] / (radii[j - 1] * radii[j - 1]) - 1.0;
        let flux_ratio = fluxes[j] / fluxes[j - 1] - 1.0;
        eta = flux_ratio / area_ratio;
        j += 1;
    }

    let r_petr = if j == n {
        radii[n - 1]
    } else {
        let r1 = radii[j] * radii[j];
        let r2 = radii[j - 1] * radii[j - 1];
        let r3 = radii[j - 2] * radii[j - 2];
        let w_outer = (eta_old - PETROSIAN_ETA) / (eta_old - eta);
        let w_inner = (PETROSIAN_ETA - eta) / (eta_old - eta);
        w_outer * (0.5 * (r1 + r2)).sqrt() + w_inner * (0.5 * (r2 + r3)).sqrt()
    };
    clamp_radius(2.0 * r_petr, r_t, radii[n - 1])
}

/// Flux through a non-standard radius for every object of a group.
///
/// An isolated object is integrated directly from the image; a
/// non-positive result falls back to the isophotal flux. Blended objects
/// interpolate their fitted curves of growth, then share the summed result
/// in proportion to their isophotal fluxes.
///
/// # Arguments
/// * `image` - Background-subtracted image
/// * `flags` - Pixel status map
/// * `objects` - The group
/// * `targets` - Radius wanted for each object
/// * `radii` - Standard aperture radii
/// * `curves` - Fitted flux per object per standard aperture
pub fn flux_at_radii(
    image: &ArrayView2<f64>,
    flags: &ArrayView2<PixelFlag>,
    objects: &[ObjectParams],
    targets: &[f64],
    radii: &[f64],
    curves: &[Vec<f64>],
) -> Vec<f64> {
    match objects {
        [] => Vec::new(),
        [single] => {
            let radius = targets.first().copied().unwrap_or(0.0);
            let flux = integrate_disk(image, flags, single.x, single.y, radius);
            vec![if flux <= 0.0 { single.flux } else { flux }]
        }
        _ => {
            let nr = radii.len();
            let mut fluxes: Vec<f64> = objects
                .iter()
                .zip(targets)
                .zip(curves)
                .map(|((_, &target), curve)| {
                    if nr < 2 {
                        return curve.first().copied().unwrap_or(0.0);
                    }
                    let mut k = 1;
                    while radii[k] < target && k < nr - 1 {
                        k += 1;
                    }
                    let delr = (radii[k] - target) / (radii[k] - radii[k - 1]);
                    curve[k] * (1.0 - delr) + curve[k - 1] * delr
                })
                .collect();
            let sum_iso: f64 = objects.iter().map(|o| o.flux).sum();
            let sum_cf: f64 = fluxes.iter().sum();
            for (flux, obj) in fluxes.iter_mut().zip(objects) {
                *flux = sum_cf * obj.flux / sum_iso.max(1.0);
                if *flux < 0.0 {
                    *flux = obj.flux;
                }
            }
            fluxes
        }
    }
}

fn integrate_disk(image: &ArrayView2<f64>, flags: &ArrayView2<PixelFlag>, x: f64, y: f64, radius: f64) -> f64 {
    let (height, width) = image.dim();
    let Some((x_lo, x_hi, y_lo, y_hi)) = pixel_window([(x, y)], radius + 1.5, width, height) else {
        return 0.0;
    };
    let mut sum = 0.0;
    for row in y_lo..=y_hi {
        for column in x_lo..=x_hi {
            if flags[[row, column]].is_usable() {
                sum += pixel_fraction(column as f64 - x, row as f64 - y, radius) * image[[row, column]];
            }
        }
    }
    sum
}
