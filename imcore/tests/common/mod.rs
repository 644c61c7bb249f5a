//! Common utilities for imcore integration tests

#![allow(dead_code)]

use ndarray::Array2;
use rand::rngs::StdRng;
use rand::SeedableRng;
use rand_distr::{Distribution, Normal};

/// A Gaussian star to render into a synthetic frame
#[derive(Debug, Clone, Copy)]
pub struct StarParams {
    /// Column of the centre, zero-based
    pub x: f64,
    /// Row of the centre, zero-based
    pub y: f64,
    /// Integrated flux in ADU
    pub flux: f64,
    /// Full width at half maximum in pixels
    pub fwhm: f64,
}

impl StarParams {
    pub fn new(x: f64, y: f64, flux: f64) -> Self {
        Self {
            x,
            y,
            flux,
            fwhm: 4.71,
        }
    }

    pub fn with_fwhm(x: f64, y: f64, flux: f64, fwhm: f64) -> Self {
        Self { x, y, flux, fwhm }
    }

    /// Catalogue position of this star (one-based)
    pub fn catalogue_position(&self) -> (f64, f64) {
        (self.x + 1.0, self.y + 1.0)
    }
}

/// Frame geometry and noise for a synthetic image
#[derive(Debug, Clone)]
pub struct SyntheticImageConfig {
    pub width: usize,
    pub height: usize,
    pub sky_level: f64,
    pub sky_noise: f64,
    pub seed: u64,
}

impl Default for SyntheticImageConfig {
    fn default() -> Self {
        Self {
            width: 128,
            height: 128,
            sky_level: 100.0,
            sky_noise: 5.0,
            seed: 42,
        }
    }
}

/// Render stars on a flat sky with Gaussian noise.
///
/// Stars are evaluated out to six sigma, which keeps well over 99.99% of
/// the flux on the frame for anything away from the edges.
pub fn create_star_image(config: &SyntheticImageConfig, stars: &[StarParams]) -> Array2<f64> {
    let mut image = Array2::<f64>::from_elem((config.height, config.width), config.sky_level);
    for star in stars {
        add_gaussian(&mut image, star);
    }

    if config.sky_noise > 0.0 {
        let mut rng = StdRng::seed_from_u64(config.seed);
        let noise = Normal::new(0.0, config.sky_noise).unwrap();
        for pixel in image.iter_mut() {
            *pixel += noise.sample(&mut rng);
        }
    }
    image
}

/// Add a normalised Gaussian profile to an image.
pub fn add_gaussian(image: &mut Array2<f64>, star: &StarParams) {
    // FWHM = 2.355 * sigma
    let sigma = star.fwhm / 2.355;
    let sigma2 = sigma * sigma;
    let norm = star.flux / (2.0 * std::f64::consts::PI * sigma2);
    let radius = (6.0 * sigma).ceil() as i64;
    let (height, width) = image.dim();

    let y_min = (star.y as i64 - radius).max(0) as usize;
    let y_max = (star.y as i64 + radius + 1).min(height as i64) as usize;
    let x_min = (star.x as i64 - radius).max(0) as usize;
    let x_max = (star.x as i64 + radius + 1).min(width as i64) as usize;
    for y in y_min..y_max {
        for x in x_min..x_max {
            let dx = x as f64 - star.x;
            let dy = y as f64 - star.y;
            image[[y, x]] += norm * (-(dx * dx + dy * dy) / (2.0 * sigma2)).exp();
        }
    }
}

/// Index of the catalogue record nearest a star and its distance.
pub fn nearest_record(records: &[imcore::ObjectRecord], star: &StarParams) -> Option<(usize, f64)> {
    let (sx, sy) = star.catalogue_position();
    records
        .iter()
        .enumerate()
        .map(|(i, r)| (i, ((r.x - sx).powi(2) + (r.y - sy).powi(2)).sqrt()))
        .min_by(|a, b| a.1.total_cmp(&b.1))
}
