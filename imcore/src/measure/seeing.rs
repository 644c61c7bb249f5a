//! Image-quality estimate from the areal profiles of compact objects.

use std::f64::consts::{FRAC_2_SQRT_PI, LN_2, PI};

use super::areals::NAREAL;

/// What the seeing estimate needs from each catalogue entry.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SeeingSample {
    /// Ellipticity, `1 - b/a`
    pub ellipticity: f64,
    /// Peak height above sky
    pub peak: f64,
    /// Areal profile counts
    pub areal: [f64; NAREAL],
}

/// Estimate the FWHM in pixels.
///
/// Round, unsaturated, well-detected objects contribute the area at half
/// their peak, interpolated between areal levels. The value one third of
/// the way up the sorted list is used so that resolved galaxies do not bias
/// the result, then corrected for the finite pixel size.
///
/// # Returns
/// FWHM in pixels, or `0.0` with fewer than three candidates
pub fn estimate_seeing(samples: impl IntoIterator<Item = SeeingSample>, threshold: f64) -> f64 {
    let log_half_t = (0.5 / threshold).ln();
    let mut widths: Vec<f64> = samples
        .into_iter()
        .filter(|s| s.ellipticity < 0.2 && s.peak < 30_000.0 && s.peak > 10.0 * threshold)
        .filter_map(|s| {
            let aper = (log_half_t + s.peak.ln()) / LN_2 + 1.0;
            let iaper = aper as usize;
            let frac = aper - iaper as f64;
            if iaper == 0 || iaper >= NAREAL || s.areal[1] <= 0.0 {
                return None;
            }
            let area = (1.0 - frac) * s.areal[iaper - 1] + frac * s.areal[iaper];
            Some(FRAC_2_SQRT_PI * area.sqrt())
        })
        .collect();

    if widths.len() < 3 {
        return 0.0;
    }
    widths.sort_by(f64::total_cmp);
    let fwhm = widths[widths.len() / 3 - 1];
    let arg = 0.25 * PI * fwhm * fwhm - 1.0;
    2.0 * (arg.max(0.0) / PI).sqrt()
}
