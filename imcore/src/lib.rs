//! imcore - Single-pass source extraction for astronomical images
//!
//! Objects are found by scanning the image one row at a time and growing
//! connected regions of pixels above an isophotal threshold. Each region is
//! measured as soon as it stops growing:
//!
//! - **Detection** - smoothed row scan, region pool with eviction under
//!   pressure, termination bookkeeping
//! - **Measurement** - moments, areal profiles, curve-of-growth total flux
//! - **Deblending** - re-detection of crowded regions at rising thresholds
//! - **Photometry** - simultaneous aperture fits, Kron/Petrosian/half-light
//!   radii
//! - **Background** - coarse cell model, global clipped sky statistics
//!
//! # Example
//!
//! ```text
//! use imcore::{extract_catalogue, ImcoreConfig};
//!
//! let run = extract_catalogue(image.view(), Some(confidence.view()), &ImcoreConfig::default())?;
//! for record in &run.records {
//!     println!("{:.2} {:.2} {:.1}", record.x, record.y, record.aperture_flux[2]);
//! }
//! ```

pub mod background;
pub mod catalogue;
pub mod config;
pub mod deblend;
pub mod detection;
pub mod error;
pub mod measure;
pub mod photometry;
pub mod pipeline;
pub mod pixel_flags;

pub use background::{background_stats, BackgroundMap, SkyStats};
pub use catalogue::{ObjectRecord, COLUMN_NAMES};
pub use config::ImcoreConfig;
pub use error::ImcoreError;
pub use pipeline::{extract_catalogue, extract_catalogue_with_mask, DetectionRun};
pub use pixel_flags::PixelFlag;
