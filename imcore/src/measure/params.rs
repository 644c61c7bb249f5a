use serde::{Deserialize, Serialize};

use super::areals::NAREAL;
use super::moments::Moments;

/// Parameter set carried from detection into photometry.
///
/// Isolated objects fill it straight from their moments. Deblended children
/// carry the sub-threshold they were measured at and, after continuum
/// extrapolation, an extrapolated flux, peak and isophotal area; their higher
/// areal levels are then unknown and set to `-1`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ObjectParams {
    /// Isophotal flux above `threshold`
    pub flux: f64,
    /// Centroid column, zero-based
    pub x: f64,
    /// Centroid row, zero-based
    pub y: f64,
    /// Threshold the object was measured at
    pub threshold: f64,
    /// Second moment along x
    pub sxx: f64,
    /// Cross moment
    pub sxy: f64,
    /// Second moment along y
    pub syy: f64,
    /// Peak height above `threshold` (above sky for isolated objects)
    pub peak: f64,
    /// Areal profile counts
    pub areal: [f64; NAREAL],
}

impl ObjectParams {
    /// Parameters of an isolated object.
    pub fn from_moments(moments: &Moments, threshold: f64, areal: &[usize; NAREAL]) -> Self {
        Self {
            flux: moments.flux,
            x: moments.x,
            y: moments.y,
            threshold,
            sxx: moments.sxx,
            sxy: moments.sxy,
            syy: moments.syy,
            peak: moments.peak,
            areal: areal.map(|a| a as f64),
        }
    }
}
