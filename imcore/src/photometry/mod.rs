//! Aperture photometry and curve-of-growth radii.

pub mod aperture;
pub mod radii;

pub use aperture::{
    aperture_radii, fit_apertures, pixel_fraction, ApertureFit, APERTURE_MULTIPLIERS, CORE_INDEX,
    DOUBLE_CORE_INDEX, NAPERTURES,
};
pub use radii::{
    exponential_radius, flux_at_radii, half_light_radius, kron_radius, petrosian_radius,
};
