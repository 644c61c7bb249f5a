//! Per-pixel status map shared by the scanner, photometry and background code.
//!
//! Every pixel carries one [`PixelFlag`]. The map is built once from the raw
//! intensity and confidence values and an optional caller mask; afterwards
//! the detector moves pixels between [`PixelFlag::PossibleObject`] and
//! [`PixelFlag::ObjectPixel`] as regions are grown, extracted and recycled.
//! Bad pixels keep their flag through all of that.

use ndarray::{Array2, ArrayView2, Zip};
use serde::{Deserialize, Serialize};

/// Intensities at or below this level are treated as out of range.
pub const OUT_OF_RANGE_LEVEL: f64 = -1000.0;

/// Status of a single pixel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum PixelFlag {
    /// Ordinary sky or source pixel
    #[default]
    Clean,
    /// Belongs to the region currently being measured
    ObjectPixel,
    /// Above the saturation level
    Saturated,
    /// Confidence map is zero here
    ZeroConfidence,
    /// Marked bad by the caller's mask
    Masked,
    /// Intensity is below the valid range
    OutOfRange,
    /// Scanned as part of some region but not the one being measured
    PossibleObject,
}

impl PixelFlag {
    /// Pixels that contribute flux to apertures and curves of growth.
    pub fn is_usable(self) -> bool {
        matches!(
            self,
            PixelFlag::Clean | PixelFlag::ObjectPixel | PixelFlag::Saturated
        )
    }

    /// Pixels whose flux is missing and must be compensated for.
    pub fn is_bad(self) -> bool {
        matches!(
            self,
            PixelFlag::ZeroConfidence | PixelFlag::Masked | PixelFlag::OutOfRange
        )
    }

    /// Pixels excluded from sky statistics.
    pub fn excluded_from_sky(self) -> bool {
        self.is_bad() || self == PixelFlag::Saturated
    }
}

/// Build the initial flag map.
///
/// Zero confidence takes precedence over the mask, then out-of-range, then
/// saturation.
///
/// # Arguments
/// * `image` - Raw intensities
/// * `confidence` - Confidence map of the same shape
/// * `mask` - Optional bad-pixel mask of the same shape; `true` is bad
/// * `saturation` - Saturation level in ADU
pub fn build_flag_map(
    image: &ArrayView2<f64>,
    confidence: &ArrayView2<f64>,
    mask: Option<&ArrayView2<bool>>,
    saturation: f64,
) -> Array2<PixelFlag> {
    let mut flags = Array2::from_elem(image.dim(), PixelFlag::Clean);
    Zip::from(&mut flags)
        .and(image)
        .and(confidence)
        .for_each(|flag, &value, &conf| {
            *flag = if conf == 0.0 {
                PixelFlag::ZeroConfidence
            } else if value < OUT_OF_RANGE_LEVEL {
                PixelFlag::OutOfRange
            } else if value > saturation {
                PixelFlag::Saturated
            } else {
                PixelFlag::Clean
            };
        });
    if let Some(mask) = mask {
        Zip::from(&mut flags).and(mask).for_each(|flag, &bad| {
            if bad && *flag != PixelFlag::ZeroConfidence {
                *flag = PixelFlag::Masked;
            }
        });
    }
    flags
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;

    #[test]
    fn test_flag_precedence() {
        let image = array![[10.0, -2000.0, 70000.0], [-2000.0, 70000.0, 5.0]];
        let conf = array![[100.0, 100.0, 100.0], [0.0, 0.0, 100.0]];
        let flags = build_flag_map(&image.view(), &conf.view(), None, 65535.0);
        assert_eq!(flags[[0, 0]], PixelFlag::Clean);
        assert_eq!(flags[[0, 1]], PixelFlag::OutOfRange);
        assert_eq!(flags[[0, 2]], PixelFlag::Saturated);
        assert_eq!(flags[[1, 0]], PixelFlag::ZeroConfidence);
        assert_eq!(flags[[1, 1]], PixelFlag::ZeroConfidence);
        assert_eq!(flags[[1, 2]], PixelFlag::Clean);
    }

    #[test]
    fn test_mask_marks_bad_pixels() {
        let image = array![[10.0, 70000.0, -2000.0], [10.0, 10.0, 10.0]];
        let conf = array![[100.0, 100.0, 100.0], [0.0, 100.0, 100.0]];
        let mask = array![[true, true, true], [true, false, false]];
        let flags = build_flag_map(&image.view(), &conf.view(), Some(&mask.view()), 65535.0);
        assert_eq!(flags[[0, 0]], PixelFlag::Masked);
        assert_eq!(flags[[0, 1]], PixelFlag::Masked);
        assert_eq!(flags[[0, 2]], PixelFlag::Masked);
        assert_eq!(flags[[1, 0]], PixelFlag::ZeroConfidence);
        assert_eq!(flags[[1, 1]], PixelFlag::Clean);
        assert_eq!(flags.iter().filter(|f| f.is_bad()).count(), 4);
    }

    #[test]
    fn test_flag_classes() {
        assert!(PixelFlag::Saturated.is_usable());
        assert!(!PixelFlag::PossibleObject.is_usable());
        assert!(!PixelFlag::PossibleObject.is_bad());
        assert!(PixelFlag::OutOfRange.is_bad());
        assert!(PixelFlag::Masked.is_bad());
        assert!(PixelFlag::Masked.excluded_from_sky());
        assert!(PixelFlag::Saturated.excluded_from_sky());
        assert!(!PixelFlag::ObjectPixel.excluded_from_sky());
    }
}
