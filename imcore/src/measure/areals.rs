//! Areal profiles: pixel counts above logarithmically spaced levels.

use std::f64::consts::LOG2_E;

use crate::detection::PixelSample;

/// Number of areal levels
pub const NAREAL: usize = 8;

/// Levels sit at `T, 2T, 4T, ...` for threshold `T`, expressed as powers of
/// two relative to `T`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ArealScale {
    offset: f64,
}

impl ArealScale {
    /// Scale anchored at the detection threshold
    pub fn new(threshold: f64) -> Self {
        Self {
            offset: threshold.ln() * LOG2_E,
        }
    }

    /// `log2` of the threshold
    pub fn offset(&self) -> f64 {
        self.offset
    }

    /// Number of levels an intensity reaches, in `1..=NAREAL`.
    pub fn levels_reached(&self, t: f64) -> usize {
        let raw = (t.ln() * LOG2_E - self.offset) as i64 + 1;
        raw.clamp(1, NAREAL as i64) as usize
    }
}

/// Count pixels above each areal level.
///
/// Only pixels strictly above `threshold` contribute.
pub fn areal_profile(pixels: &[PixelSample], threshold: f64) -> [usize; NAREAL] {
    let scale = ArealScale::new(threshold);
    let mut profile = [0; NAREAL];
    for p in pixels.iter().filter(|p| p.z > threshold) {
        let nup = scale.levels_reached(p.z);
        profile[..nup].iter_mut().for_each(|a| *a += 1);
    }
    profile
}

#[cfg(test)]
mod tests {
    use super::*;

    fn px(z: f64) -> PixelSample {
        PixelSample {
            z,
            zsm: z,
            ..Default::default()
        }
    }

    #[test]
    fn test_levels_double() {
        let scale = ArealScale::new(10.0);
        assert_eq!(scale.levels_reached(15.0), 1);
        assert_eq!(scale.levels_reached(25.0), 2);
        assert_eq!(scale.levels_reached(45.0), 3);
        assert_eq!(scale.levels_reached(1.0e9), NAREAL);
    }

    #[test]
    fn test_profile_is_monotone() {
        let pixels: Vec<PixelSample> = [5.0, 12.0, 25.0, 41.0, 90.0, 170.0]
            .iter()
            .map(|&z| px(z))
            .collect();
        let profile = areal_profile(&pixels, 10.0);
        assert_eq!(profile, [5, 4, 3, 2, 1, 0, 0, 0]);
        assert!(profile.windows(2).all(|w| w[0] >= w[1]));
    }
}
