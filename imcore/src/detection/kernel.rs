//! 5x5 Gaussian smoothing applied one row at a time ahead of the scanner.

use ndarray::ArrayView2;

/// Kernel side length
pub const KERNEL_SIZE: usize = 5;

/// Normalised Gaussian smoothing kernel.
#[derive(Debug, Clone, PartialEq)]
pub struct SmoothingKernel {
    weights: [[f64; KERNEL_SIZE]; KERNEL_SIZE],
}

impl SmoothingKernel {
    /// Build a kernel for the given FWHM in pixels.
    ///
    /// FWHM values below one pixel are treated as one pixel.
    pub fn gaussian(fwhm: f64) -> Self {
        let sigma = fwhm.max(1.0) / 2.35;
        let g = 1.0 / (2.0 * sigma * sigma);
        let half = Self::half_width() as f64;
        let mut weights = [[0.0; KERNEL_SIZE]; KERNEL_SIZE];
        for (i, row) in weights.iter_mut().enumerate() {
            let di = i as f64 - half;
            for (j, w) in row.iter_mut().enumerate() {
                let dj = j as f64 - half;
                *w = (-(di * di + dj * dj) * g).exp();
            }
        }
        let total: f64 = weights.iter().flatten().sum();
        weights
            .iter_mut()
            .flatten()
            .for_each(|w| *w /= total);
        Self { weights }
    }

    /// Distance from the kernel centre to its edge
    pub const fn half_width() -> usize {
        KERNEL_SIZE / 2
    }

    /// Kernel weights, row-major
    pub fn weights(&self) -> &[[f64; KERNEL_SIZE]; KERNEL_SIZE] {
        &self.weights
    }

    /// Smooth one image row.
    ///
    /// Columns within [`SmoothingKernel::half_width`] of either edge are set
    /// to zero. `row` must be at least that far from the top and bottom.
    ///
    /// # Arguments
    /// * `data` - Image being scanned
    /// * `conf_weight` - `sqrt(0.01 * confidence)` per pixel
    /// * `row` - Row to smooth
    /// * `smoothed` - Output: kernel-weighted intensity
    /// * `smoothed_conf` - Output: kernel-weighted intensity times confidence weight
    pub fn smooth_row(
        &self,
        data: &ArrayView2<f64>,
        conf_weight: &ArrayView2<f64>,
        row: usize,
        smoothed: &mut [f64],
        smoothed_conf: &mut [f64],
    ) {
        let half = Self::half_width();
        let width = data.ncols();
        smoothed.iter_mut().for_each(|v| *v = 0.0);
        smoothed_conf.iter_mut().for_each(|v| *v = 0.0);
        if width < KERNEL_SIZE || row < half || row + half >= data.nrows() {
            return;
        }

        for column in half..width - half {
            let mut sum = 0.0;
            let mut sum_conf = 0.0;
            for (ky, weights) in self.weights.iter().enumerate() {
                let y = row + ky - half;
                for (kx, &w) in weights.iter().enumerate() {
                    let x = column + kx - half;
                    let v = w * data[[y, x]];
                    sum += v;
                    sum_conf += v * conf_weight[[y, x]];
                }
            }
            smoothed[column] = sum;
            smoothed_conf[column] = sum_conf;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use ndarray::Array2;

    #[test]
    fn test_kernel_normalised_and_symmetric() {
        let k = SmoothingKernel::gaussian(2.0);
        let w = k.weights();
        let total: f64 = w.iter().flatten().sum();
        assert_relative_eq!(total, 1.0, epsilon = 1e-12);
        assert_relative_eq!(w[0][1], w[1][0], epsilon = 1e-15);
        assert_relative_eq!(w[4][3], w[1][0], epsilon = 1e-15);
        assert!(w[2][2] > w[2][1]);
    }

    #[test]
    fn test_narrow_fwhm_clamped() {
        assert_eq!(SmoothingKernel::gaussian(0.2), SmoothingKernel::gaussian(1.0));
    }

    #[test]
    fn test_flat_image_smooths_to_itself() {
        let data = Array2::from_elem((9, 12), 7.0);
        let conf = Array2::from_elem((9, 12), 1.0);
        let k = SmoothingKernel::gaussian(3.0);
        let mut s = vec![0.0; 12];
        let mut sc = vec![0.0; 12];
        k.smooth_row(&data.view(), &conf.view(), 4, &mut s, &mut sc);
        assert_eq!(s[0], 0.0);
        assert_eq!(s[11], 0.0);
        for c in 2..10 {
            assert_relative_eq!(s[c], 7.0, epsilon = 1e-12);
            assert_relative_eq!(sc[c], 7.0, epsilon = 1e-12);
        }
    }

    #[test]
    fn test_confidence_weight_scales_output() {
        let data = Array2::from_elem((5, 5), 4.0);
        let conf = Array2::from_elem((5, 5), 0.5);
        let k = SmoothingKernel::gaussian(2.0);
        let mut s = vec![0.0; 5];
        let mut sc = vec![0.0; 5];
        k.smooth_row(&data.view(), &conf.view(), 2, &mut s, &mut sc);
        assert_relative_eq!(s[2], 4.0, epsilon = 1e-12);
        assert_relative_eq!(sc[2], 2.0, epsilon = 1e-12);
    }
}
