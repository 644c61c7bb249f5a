//! Intensity-weighted moments of an extracted region.

use serde::{Deserialize, Serialize};

use crate::detection::PixelSample;

/// First and second moments of one object.
///
/// Positions are zero-based pixel-centre coordinates.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Moments {
    /// Centroid column, weighted by intensity times smoothed intensity
    pub x: f64,
    /// Centroid row
    pub y: f64,
    /// Summed intensity of non-negative pixels
    pub flux: f64,
    /// Second moment along x
    pub sxx: f64,
    /// Cross moment
    pub sxy: f64,
    /// Second moment along y
    pub syy: f64,
    /// Largest intensity
    pub peak: f64,
}

/// Compute moments for a pixel list.
///
/// Negative intensities are skipped. The second moments use plain intensity
/// weights while the centroid is sharpened by weighting with
/// `intensity * smoothed`. The centroid is clamped to the image.
///
/// # Arguments
/// * `pixels` - Region pixels
/// * `min_flux` - Minimum summed intensity for a usable object
/// * `width`, `height` - Image shape used for clamping
///
/// # Returns
/// `None` when the list is empty or the summed intensity is below `min_flux`
pub fn compute_moments(
    pixels: &[PixelSample],
    min_flux: f64,
    width: usize,
    height: usize,
) -> Option<Moments> {
    let first = pixels.first()?;
    let x_off = first.x as f64;
    let y_off = first.y as f64;

    let mut sum_x = 0.0;
    let mut sum_y = 0.0;
    let mut sum_xx = 0.0;
    let mut sum_yy = 0.0;
    let mut sum_xy = 0.0;
    let mut sum_t = 0.0;
    let mut sum_wx = 0.0;
    let mut sum_wy = 0.0;
    let mut sum_w = 0.0;
    let mut peak = first.z;

    for p in pixels {
        let t = p.z;
        if t < 0.0 {
            continue;
        }
        let x = p.x as f64 - x_off;
        let y = p.y as f64 - y_off;
        let wt = p.zsm * t;
        sum_x += t * x;
        sum_y += t * y;
        sum_t += t;
        sum_wx += wt * x;
        sum_wy += wt * y;
        sum_w += wt;
        sum_xx += x * x * t;
        sum_yy += y * y * t;
        sum_xy += x * y * t;
        peak = peak.max(t);
    }

    if !(sum_t >= min_flux) || sum_t <= 0.0 {
        return None;
    }

    let xbar = sum_x / sum_t;
    let ybar = sum_y / sum_t;
    let sxx = (sum_xx / sum_t - xbar * xbar).max(0.0);
    let syy = (sum_yy / sum_t - ybar * ybar).max(0.0);
    let sxy = sum_xy / sum_t - xbar * ybar;

    let (cx, cy) = if sum_w > 0.0 {
        (sum_wx / sum_w, sum_wy / sum_w)
    } else {
        (xbar, ybar)
    };
    let x = (cx + x_off).clamp(0.0, width.saturating_sub(1) as f64);
    let y = (cy + y_off).clamp(0.0, height.saturating_sub(1) as f64);

    Some(Moments {
        x,
        y,
        flux: sum_t,
        sxx,
        sxy,
        syy,
        peak,
    })
}
