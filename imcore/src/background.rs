//! Coarse background model and global sky statistics.
//!
//! The image is divided into roughly square cells. Each cell gets a clipped
//! mean over a window centred on it; cells with too many flagged pixels are
//! filled from their neighbours and the grid is smoothed with
//! [`smooth_grid`]. Pixel-level values come from bilinear interpolation
//! between cell centres.
//!
//! Interpolation uses one-based pixel positions, so the centre of the first
//! pixel is 1.0 and cell `k` (one-based) is centred on pixel `k·size`.

use imcore_math::filter::MISSING;
use imcore_math::{hanning, median_filter_with_gaps, sigma_clip};
use log::debug;
use ndarray::{Array2, ArrayView2, Axis};
use rayon::prelude::*;

use crate::error::ImcoreError;
use crate::pixel_flags::PixelFlag;

/// Clip half-width for cell statistics
const CELL_KAPPA: f64 = 2.5;

/// Clipping passes for cell statistics
const CELL_ITERATIONS: usize = 3;

/// Clip half-width for the global sky statistics
const SKY_KAPPA: f64 = 2.5;

/// Clipping passes for the global sky statistics
const SKY_ITERATIONS: usize = 30;

/// Width of the median filter applied to the cell grid
const GRID_MEDIAN_WINDOW: usize = 5;

/// Clipped level and spread of the sky.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SkyStats {
    /// Mean of the pixels surviving the clip
    pub level: f64,
    /// Standard deviation of the pixels surviving the clip
    pub noise: f64,
}

/// Smoothed background cell grid.
#[derive(Debug, Clone, PartialEq)]
pub struct BackgroundMap {
    /// Cell values indexed `[[row, column]]`
    cells: Array2<f64>,
    /// Cell size in pixels after adjustment to the image shape
    cell_size: usize,
    /// Median of the smoothed cells
    global_level: f64,
}

/// Effective cell size for an image.
///
/// The requested size is nudged so the cells tile the image nearly exactly,
/// but never by more than ten percent downwards.
pub fn effective_cell_size(width: usize, height: usize, requested: usize) -> usize {
    let nb = requested.min(width).min(height).max(1);
    let tiles_x = ((width as f64 / nb as f64) + 0.1) as usize;
    let tiles_y = ((height as f64 / nb as f64) + 0.1) as usize;
    let fit_x = width / tiles_x.max(1);
    let fit_y = height / tiles_y.max(1);
    let nb = ((0.9 * nb as f64).round() as usize).max(nb.min(fit_x.min(fit_y)));
    nb.min(width).min(height).max(1)
}

/// Bilinear interpolation indices along one axis.
///
/// # Returns
/// Zero-based lower and upper cell indices and the weight of the upper one
fn interpolation_index(position: f64, cells: usize, size: usize) -> (usize, usize, f64) {
    let half = (size / 2) as f64;
    let size_f = size as f64;
    let raw = ((position + half) / size_f).floor() as i64;
    let n = cells as i64;
    let lower = raw.clamp(1, n);
    let upper = (raw + 1).min(n).max(1);
    let weight = (position - size_f * lower as f64 + half) / size_f;
    ((lower - 1) as usize, (upper - 1) as usize, weight)
}

fn excluded(flag: PixelFlag, value: f64, null_value: Option<f64>) -> bool {
    flag.excluded_from_sky() || null_value == Some(value)
}

impl BackgroundMap {
    /// Build the background model for an image.
    ///
    /// # Arguments
    /// * `image` - Intensities
    /// * `flags` - Pixel status map; flagged pixels are ignored
    /// * `cell_size` - Requested cell size in pixels
    /// * `null_value` - Intensity that marks a missing pixel
    ///
    /// # Returns
    /// * `Err(ImcoreError::BackgroundFailed)` - If no cell has usable pixels
    pub fn model(
        image: &ArrayView2<f64>,
        flags: &ArrayView2<PixelFlag>,
        cell_size: usize,
        null_value: Option<f64>,
    ) -> Result<Self, ImcoreError> {
        let (height, width) = image.dim();
        if width == 0 || height == 0 {
            return Err(ImcoreError::EmptyImage {
                rows: height,
                cols: width,
            });
        }
        let size = effective_cell_size(width, height, cell_size);
        let nbx = width / size;
        let nby = height / size;
        let half = size / 2;
        let step_x = (width / nbx).max(1);
        let step_y = (height / nby).max(1);
        let reject_at = 0.25 * 2.0 * (half * half) as f64;

        let raw: Vec<Option<f64>> = (0..nbx * nby)
            .into_par_iter()
            .map(|cell| {
                let (cy, cx) = (cell / nbx, cell % nbx);
                // One-based window centre, converted to zero-based bounds
                let centre_x = step_x / 2 + cx * step_x;
                let centre_y = step_y / 2 + cy * step_y;
                let x_lo = centre_x.saturating_sub(half).max(1) - 1;
                let x_hi = (centre_x + half).min(width) - 1;
                let y_lo = centre_y.saturating_sub(half).max(1) - 1;
                let y_hi = (centre_y + half).min(height) - 1;

                let mut values = Vec::with_capacity((x_hi + 1 - x_lo) * (y_hi + 1 - y_lo));
                let mut rejected = 0usize;
                for row in y_lo..=y_hi {
                    for column in x_lo..=x_hi {
                        let value = image[[row, column]];
                        if excluded(flags[[row, column]], value, null_value) {
                            rejected += 1;
                        } else {
                            values.push(value);
                        }
                    }
                }
                if rejected as f64 >= reject_at {
                    return None;
                }
                sigma_clip(&values, CELL_KAPPA, CELL_ITERATIONS).map(|c| c.mean)
            })
            .collect();

        let mut cells = Array2::zeros((nby, nbx));
        let mut valid = Array2::from_elem((nby, nbx), false);
        for (cell, value) in raw.into_iter().enumerate() {
            if let Some(v) = value {
                cells[[cell / nbx, cell % nbx]] = v;
                valid[[cell / nbx, cell % nbx]] = true;
            }
        }
        let good = valid.iter().filter(|&&v| v).count();
        if good == 0 {
            return Err(ImcoreError::BackgroundFailed(format!(
                "all {} background cells rejected",
                nbx * nby
            )));
        }
        if good < nbx * nby {
            debug!(
                "filling {} of {} rejected background cells from neighbours",
                nbx * nby - good,
                nbx * nby
            );
        }
        fill_rejected(&mut cells, &mut valid);
        smooth_grid(&mut cells);

        let mut sorted: Vec<f64> = cells.iter().copied().collect();
        sorted.sort_by(f64::total_cmp);
        let global_level = sorted[sorted.len() / 2];

        Ok(Self {
            cells,
            cell_size: size,
            global_level,
        })
    }

    /// Cell size in pixels.
    pub fn cell_size(&self) -> usize {
        self.cell_size
    }

    /// Grid shape as `(rows, columns)`.
    pub fn grid_shape(&self) -> (usize, usize) {
        self.cells.dim()
    }

    /// Median of the smoothed cells.
    pub fn global_level(&self) -> f64 {
        self.global_level
    }

    /// Smoothed cell values.
    pub fn cells(&self) -> ArrayView2<'_, f64> {
        self.cells.view()
    }

    /// Interpolated background at a one-based pixel position, plus the
    /// four cells used.
    fn interpolate(&self, x: f64, y: f64) -> (f64, [f64; 4]) {
        let (nby, nbx) = self.cells.dim();
        let (iy, iyp1, dely) = interpolation_index(y, nby, self.cell_size);
        let (ix, ixp1, delx) = interpolation_index(x, nbx, self.cell_size);
        let corners = [
            self.cells[[iy, ix]],
            self.cells[[iyp1, ix]],
            self.cells[[iy, ixp1]],
            self.cells[[iyp1, ixp1]],
        ];
        let t1 = (1.0 - dely) * corners[0] + dely * corners[1];
        let t2 = (1.0 - dely) * corners[2] + dely * corners[3];
        ((1.0 - delx) * t1 + delx * t2, corners)
    }

    /// Additive correction that flattens pixel `(column, row)` to the
    /// global level.
    pub fn correction_at(&self, column: usize, row: usize) -> f64 {
        let (local, _) = self.interpolate(column as f64 + 1.0, row as f64 + 1.0);
        self.global_level - local
    }

    /// Flatten an image in place. Null pixels are left untouched.
    pub fn apply_correction(&self, image: &mut Array2<f64>, null_value: Option<f64>) {
        for ((row, column), value) in image.indexed_iter_mut() {
            if null_value != Some(*value) {
                *value += self.correction_at(column, row);
            }
        }
    }

    /// Full-resolution background image; null pixels of `image` are zero.
    pub fn background_image(&self, image: &ArrayView2<f64>, null_value: Option<f64>) -> Array2<f64> {
        let mut out = Array2::zeros(image.dim());
        for ((row, column), value) in out.indexed_iter_mut() {
            if null_value != Some(image[[row, column]]) {
                *value = self.global_level - self.correction_at(column, row);
            }
        }
        out
    }

    /// Local sky level and noise at a zero-based position.
    ///
    /// The position is rounded to the nearest pixel. The noise is the mean
    /// absolute deviation of the four surrounding cells from the
    /// interpolated level.
    pub fn estimate(&self, x: f64, y: f64) -> SkyStats {
        let (level, corners) = self.interpolate((x + 1.0).round(), (y + 1.0).round());
        let noise = 0.25 * corners.iter().map(|c| (c - level).abs()).sum::<f64>();
        SkyStats { level, noise }
    }
}

/// Replace rejected cells with the mean of their valid neighbours,
/// working outward until every cell is filled.
fn fill_rejected(cells: &mut Array2<f64>, valid: &mut Array2<bool>) {
    let (ny, nx) = cells.dim();
    loop {
        let mut updates = Vec::new();
        for ((row, column), &ok) in valid.indexed_iter() {
            if ok {
                continue;
            }
            let (mut sum, mut count) = (0.0, 0usize);
            for r in row.saturating_sub(1)..=(row + 1).min(ny - 1) {
                for c in column.saturating_sub(1)..=(column + 1).min(nx - 1) {
                    if valid[[r, c]] {
                        sum += cells[[r, c]];
                        count += 1;
                    }
                }
            }
            if count > 0 {
                updates.push((row, column, sum / count as f64));
            }
        }
        if updates.is_empty() {
            return;
        }
        for (row, column, value) in updates {
            cells[[row, column]] = value;
            valid[[row, column]] = true;
        }
    }
}

/// Median filter the grid across then down, never raising a cell above
/// its unfiltered value, then apply a 1-2-1 filter across and down.
pub fn smooth_grid(cells: &mut Array2<f64>) {
    let original = cells.clone();
    for mut row in cells.axis_iter_mut(Axis(0)) {
        let mut buf = row.to_vec();
        median_filter_with_gaps(&mut buf, GRID_MEDIAN_WINDOW);
        row.iter_mut().zip(buf).for_each(|(c, v)| *c = v);
    }
    for (k, mut column) in cells.axis_iter_mut(Axis(1)).enumerate() {
        let mut buf = column.to_vec();
        median_filter_with_gaps(&mut buf, GRID_MEDIAN_WINDOW);
        for (j, (c, v)) in column.iter_mut().zip(buf).enumerate() {
            let before = original[[j, k]];
            if before > MISSING {
                *c = before.min(v);
            }
        }
    }
    for axis in [Axis(0), Axis(1)] {
        for mut lane in cells.axis_iter_mut(axis) {
            let mut buf = lane.to_vec();
            hanning(&mut buf);
            lane.iter_mut().zip(buf).for_each(|(c, v)| *c = v);
        }
    }
}

/// Clipped mean and standard deviation of the whole image.
///
/// Flagged and null pixels are excluded before clipping at
/// `median ± 2.5·σ_MAD` until a pass rejects nothing.
///
/// # Returns
/// * `Err(ImcoreError::BackgroundFailed)` - If every pixel is excluded
pub fn background_stats(
    image: &ArrayView2<f64>,
    flags: &ArrayView2<PixelFlag>,
    null_value: Option<f64>,
) -> Result<SkyStats, ImcoreError> {
    let values: Vec<f64> = image
        .iter()
        .zip(flags.iter())
        .filter(|(&v, &f)| !excluded(f, v, null_value))
        .map(|(&v, _)| v)
        .collect();
    let clip = sigma_clip(&values, SKY_KAPPA, SKY_ITERATIONS).ok_or_else(|| {
        ImcoreError::BackgroundFailed("every pixel rejected from sky statistics".to_string())
    })?;
    debug!(
        "background: clipped mean {:.4}, clipped stdev {:.4} from {} pixels",
        clip.mean, clip.stdev, clip.kept
    );
    Ok(SkyStats {
        level: clip.mean,
        noise: clip.stdev,
    })
}
