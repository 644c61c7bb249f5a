use thiserror::Error;

/// Errors that abort a detection run.
///
/// Per-object measurement failures are not represented here; they skip the
/// object and the run carries on.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ImcoreError {
    /// Image has a zero dimension.
    #[error("image is empty: {rows}x{cols}")]
    EmptyImage {
        /// Number of rows
        rows: usize,
        /// Number of columns
        cols: usize,
    },

    /// A per-pixel input map differs in shape from the image.
    #[error(
        "image and {map} dimensions differ: image {image_rows}x{image_cols}, {map} {map_rows}x{map_cols}"
    )]
    DimensionMismatch {
        /// Which input map, `"confidence"` or `"mask"`
        map: &'static str,
        /// Image rows
        image_rows: usize,
        /// Image columns
        image_cols: usize,
        /// Map rows
        map_rows: usize,
        /// Map columns
        map_cols: usize,
    },

    /// Configuration validation failure.
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    /// Background modelling could not find any usable pixels.
    #[error("background estimation failed: {0}")]
    BackgroundFailed(String),

    /// Sky noise is zero so no detection threshold can be formed.
    #[error("sky noise is zero (sky level {sky_level:.3}); cannot set a detection threshold")]
    ZeroSkyNoise {
        /// Clipped sky level
        sky_level: f64,
    },

    /// Background subtraction disabled but the threshold sits below the sky.
    #[error(
        "threshold {threshold:.3} is below the sky level {sky_level:.3} with background subtraction disabled"
    )]
    ThresholdBelowSky {
        /// Isophotal threshold in ADU
        threshold: f64,
        /// Clipped sky level in ADU
        sky_level: f64,
    },
}
