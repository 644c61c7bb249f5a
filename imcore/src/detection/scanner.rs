//! Connected-region growth, one pixel row at a time.
//!
//! Both scanners feed qualifying pixels through the same placement rule:
//! a pixel joins the region on its left or the region above it, merging the
//! two when they differ, and starts a new region when neither exists.

use ndarray::ArrayView1;

use super::state::{DetectorState, EdgeTouch, PixelSample, RegionId};
use crate::pixel_flags::PixelFlag;

impl DetectorState {
    /// Grow regions with one image row.
    ///
    /// A pixel qualifies when its confidence-weighted smoothed value exceeds
    /// `threshold` and its confidence is non-zero.
    ///
    /// # Arguments
    /// * `row` - Row index in the image
    /// * `data` - Background-subtracted intensities for the row
    /// * `confidence` - Confidence values for the row
    /// * `smoothed` - Smoothed intensities
    /// * `smoothed_conf` - Smoothed confidence-weighted intensities
    /// * `threshold` - Detection threshold in ADU
    /// * `saturation` - Saturation level after sky removal
    #[allow(clippy::too_many_arguments)]
    pub fn scan_row(
        &mut self,
        row: usize,
        data: ArrayView1<f64>,
        confidence: ArrayView1<f64>,
        smoothed: &[f64],
        smoothed_conf: &[f64],
        threshold: f64,
        saturation: f64,
    ) {
        for column in 0..self.width {
            if smoothed_conf[column] > threshold && confidence[column] != 0.0 {
                let flag = self.flag_at(column, row);
                let zsm = if flag == Some(PixelFlag::Saturated) {
                    saturation
                } else {
                    saturation.min(smoothed[column])
                };
                let pixel = PixelSample {
                    x: column,
                    y: row,
                    z: data[column],
                    zsm,
                };
                let bad = flag.is_some_and(PixelFlag::is_bad);
                self.place_pixel(pixel, bad, false);
                self.set_flag(column, row, PixelFlag::PossibleObject);
            } else {
                self.tracking[column + 1] = None;
            }
        }
        self.mark_side_edges();
    }

    /// Grow regions from a pixel list instead of an image.
    ///
    /// The pixels are rasterised over their bounding box and scanned row by
    /// row with `zsm > threshold` as the qualification test. Region-slot
    /// pressure is relieved before each new region is opened.
    pub fn scan_cluster(&mut self, pixels: &[PixelSample], threshold: f64) {
        let Some((x_lo, x_hi, y_lo, y_hi)) = bounding_box(pixels) else {
            return;
        };
        let nx = x_hi - x_lo + 1;
        let ny = y_hi - y_lo + 1;
        let mut raster: Vec<Option<usize>> = vec![None; nx * ny];
        for (k, p) in pixels.iter().enumerate() {
            raster[(p.y - y_lo) * nx + p.x - x_lo] = Some(k);
        }

        for row in y_lo..=y_hi {
            for column in x_lo..=x_hi {
                match raster[(row - y_lo) * nx + column - x_lo] {
                    Some(k) if pixels[k].zsm > threshold => {
                        let mut pixel = pixels[k];
                        pixel.x = column;
                        pixel.y = row;
                        self.place_pixel(pixel, false, true);
                    }
                    _ => self.tracking[column + 1] = None,
                }
            }
            self.mark_side_edges();
        }
    }

    fn place_pixel(&mut self, pixel: PixelSample, bad: bool, relieve_on_open: bool) -> bool {
        let left = self.tracking[pixel.x];
        let above = self.tracking[pixel.x + 1];
        let target: Option<RegionId> = match (left, above) {
            (None, None) => None,
            (Some(l), None) => Some(l),
            (None, Some(a)) => Some(a),
            (Some(l), Some(a)) => self.merge(l, a),
        };
        if target.is_none() && relieve_on_open {
            self.relieve_region_pressure();
        }

        let placed = self.attach(target, pixel, bad).or_else(|| {
            self.evict_largest();
            let still_live = target.filter(|id| self.region(*id).is_some());
            self.attach(still_live, pixel, bad)
        });
        self.tracking[pixel.x + 1] = placed;
        placed.is_some()
    }

    fn attach(&mut self, target: Option<RegionId>, pixel: PixelSample, bad: bool) -> Option<RegionId> {
        match target {
            Some(id) => self.append_pixel(id, pixel, bad).then_some(id),
            None => self.open_region(pixel, bad),
        }
    }

    fn mark_side_edges(&mut self) {
        let width = self.width;
        for (index, edge) in [(1, EdgeTouch::LEFT), (width, EdgeTouch::RIGHT)] {
            if let Some(id) = self.tracking[index] {
                if let Some(region) = self.regions[id.index()].as_mut() {
                    region.touch.insert(edge);
                }
            }
        }
    }
}

/// Inclusive `(x_lo, x_hi, y_lo, y_hi)` of a pixel list.
pub fn bounding_box(pixels: &[PixelSample]) -> Option<(usize, usize, usize, usize)> {
    let first = pixels.first()?;
    Some(pixels.iter().fold(
        (first.x, first.x, first.y, first.y),
        |(x0, x1, y0, y1), p| (x0.min(p.x), x1.max(p.x), y0.min(p.y), y1.max(p.y)),
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::{Array1, Array2};

    /// Scan a binary mask where 1 marks a qualifying pixel
    fn scan_mask(mask: &[&str]) -> (DetectorState, Vec<Vec<RegionId>>) {
        let height = mask.len();
        let width = mask[0].len();
        let flags = Array2::from_elem((height, width), PixelFlag::Clean);
        let mut state = DetectorState::new(width, height, 4 * width * height, Some(flags));
        let conf = Array1::from_elem(width, 100.0);
        let mut terminated = Vec::new();
        for (row, line) in mask.iter().enumerate() {
            let values: Vec<f64> = line
                .chars()
                .map(|c| if c == '1' { 10.0 } else { 0.0 })
                .collect();
            let data = Array1::from_vec(values.clone());
            state.scan_row(row, data.view(), conf.view(), &values, &values, 5.0, 100.0);
            terminated.push(state.advance_lifecycles());
        }
        (state, terminated)
    }

    #[test]
    fn test_separate_blobs_stay_separate() {
        let (state, _) = scan_mask(&["0000000", "0110110", "0110110", "0000000"]);
        assert_eq!(state.live_count(), 2);
    }

    #[test]
    fn test_u_shape_merges_into_one_region() {
        let (state, terminated) =
            scan_mask(&["0000000", "0100010", "0100010", "0111110", "0000000", "0000000"]);
        assert_eq!(state.live_count(), 1);
        let id = state.live_ids()[0];
        let region = state.region(id).unwrap();
        assert_eq!(region.count(), 2 + 2 + 5);
        // Terminates on the first row that adds nothing
        assert!(terminated[3].is_empty());
        assert_eq!(terminated[4], vec![id]);
    }

    #[test]
    fn test_pixels_marked_possible_object() {
        let (state, _) = scan_mask(&["00000", "01100", "00000"]);
        let flags = state.flags().unwrap();
        assert_eq!(flags[[1, 1]], PixelFlag::PossibleObject);
        assert_eq!(flags[[1, 3]], PixelFlag::Clean);
    }

    #[test]
    fn test_side_edges_are_flagged() {
        let (state, _) = scan_mask(&["00000", "10001", "00000"]);
        let touches: Vec<EdgeTouch> = state
            .live_ids()
            .into_iter()
            .map(|id| state.region(id).unwrap().touch())
            .collect();
        assert!(touches.iter().any(|t| t.contains(EdgeTouch::LEFT)));
        assert!(touches.iter().any(|t| t.contains(EdgeTouch::RIGHT)));
    }

    #[test]
    fn test_cluster_scan_splits_on_threshold() {
        let mut pixels = Vec::new();
        for x in 2..9 {
            let zsm = if x == 5 { 1.0 } else { 10.0 };
            pixels.push(PixelSample {
                x,
                y: 3,
                z: zsm,
                zsm,
            });
        }
        let mut state = DetectorState::new(12, 8, 64, None);
        state.scan_cluster(&pixels, 5.0);
        assert_eq!(state.live_count(), 2);

        state.reinit();
        state.scan_cluster(&pixels, 0.5);
        assert_eq!(state.live_count(), 1);
        assert_eq!(state.region(state.live_ids()[0]).unwrap().count(), 7);
    }

    #[test]
    fn test_bounding_box() {
        let pixels = [
            PixelSample {
                x: 4,
                y: 2,
                ..Default::default()
            },
            PixelSample {
                x: 1,
                y: 7,
                ..Default::default()
            },
        ];
        assert_eq!(bounding_box(&pixels), Some((1, 4, 2, 7)));
        assert_eq!(bounding_box(&[]), None);
    }
}
