//! Single-pass connected-region detection.
//!
//! [`DetectorState`] holds every region that is still growing. The driver
//! feeds it one smoothed row at a time through [`DetectorState::scan_row`],
//! relieves pool pressure, then asks which regions stopped growing. The
//! deblender reuses the same machinery on pixel lists through
//! [`DetectorState::scan_cluster`].

pub mod kernel;
mod recycler;
pub mod scanner;
pub mod state;

pub use kernel::{SmoothingKernel, KERNEL_SIZE};
pub use scanner::bounding_box;
pub use state::{DetectorState, EdgeTouch, Lifecycle, PixelSample, Region, RegionId};
