//! Per-object measurements on extracted pixel lists.

pub mod areals;
pub mod extend;
pub mod moments;
mod params;
pub mod seeing;

pub use areals::{areal_profile, ArealScale, NAREAL};
pub use extend::{total_flux, SkyContext, NACC};
pub use moments::{compute_moments, Moments};
pub use params::ObjectParams;
pub use seeing::{estimate_seeing, SeeingSample};
