use serde::{Deserialize, Serialize};

use crate::error::ImcoreError;

/// Default pixel-block pool capacity for the main detector.
pub const DEFAULT_BLOCK_CAPACITY: usize = 250_000;

/// Parameters for a detection run.
///
/// Field names follow what they control; the classic short names are noted
/// where they differ.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ImcoreConfig {
    /// Minimum object size in pixels (ipix)
    pub min_pixels: usize,
    /// Detection threshold in units of sky sigma
    pub threshold: f64,
    /// Attempt to deblend crowded regions (icrowd)
    pub deblend: bool,
    /// Aperture core radius in pixels (rcore)
    pub core_radius: f64,
    /// Remove the modelled background variation before detection
    pub background_subtract: bool,
    /// Background cell size in pixels (nbsize)
    pub background_cell_size: usize,
    /// FWHM of the Gaussian smoothing kernel in pixels
    pub filter_fwhm: f64,
    /// Detector gain in e-/ADU, used for error propagation
    pub gain: f64,
    /// Saturation level in ADU
    pub saturation: f64,
    /// Pixel value treated as missing by the background estimator
    pub null_value: Option<f64>,
    /// Produce a per-pixel object label image
    pub write_label_image: bool,
    /// Produce a per-pixel background image
    pub write_background_image: bool,
    /// Capacity of the pixel-block pool
    pub block_capacity: usize,
}

impl Default for ImcoreConfig {
    fn default() -> Self {
        Self {
            min_pixels: 5,
            threshold: 1.5,
            deblend: true,
            core_radius: 3.0,
            background_subtract: true,
            background_cell_size: 64,
            filter_fwhm: 2.0,
            gain: 1.0,
            saturation: 65535.0,
            null_value: None,
            write_label_image: false,
            write_background_image: false,
            block_capacity: DEFAULT_BLOCK_CAPACITY,
        }
    }
}

impl ImcoreConfig {
    /// Check the configuration against an image width.
    ///
    /// The block pool must hold at least four full rows, otherwise the
    /// per-row backpressure check could never be satisfied.
    pub fn validate(&self, width: usize) -> Result<(), ImcoreError> {
        if self.min_pixels == 0 {
            return Err(ImcoreError::InvalidConfig(
                "min_pixels must be at least 1".to_string(),
            ));
        }
        if !(self.threshold > 0.0) {
            return Err(ImcoreError::InvalidConfig(format!(
                "threshold must be positive, got {}",
                self.threshold
            )));
        }
        if !(self.core_radius > 0.0) {
            return Err(ImcoreError::InvalidConfig(format!(
                "core_radius must be positive, got {}",
                self.core_radius
            )));
        }
        if !(self.gain > 0.0) {
            return Err(ImcoreError::InvalidConfig(format!(
                "gain must be positive, got {}",
                self.gain
            )));
        }
        if self.background_cell_size == 0 {
            return Err(ImcoreError::InvalidConfig(
                "background_cell_size must be at least 1".to_string(),
            ));
        }
        if self.block_capacity < 4 * width {
            return Err(ImcoreError::InvalidConfig(format!(
                "block_capacity {} is smaller than four rows of width {}",
                self.block_capacity, width
            )));
        }
        Ok(())
    }

    /// Parse a configuration from JSON, filling omitted fields with defaults.
    pub fn from_json(text: &str) -> Result<Self, ImcoreError> {
        serde_json::from_str(text).map_err(|e| ImcoreError::InvalidConfig(e.to_string()))
    }

    /// Serialize to pretty-printed JSON.
    pub fn to_json(&self) -> Result<String, ImcoreError> {
        serde_json::to_string_pretty(self).map_err(|e| ImcoreError::InvalidConfig(e.to_string()))
    }
}
