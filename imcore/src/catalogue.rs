//! Catalogue records and their fixed column layout.

use std::f64::consts::PI;

use serde::{Deserialize, Serialize};

use crate::background::SkyStats;
use crate::measure::{ObjectParams, SeeingSample, NAREAL};
use crate::photometry::NAPERTURES;

/// Column names in output order. `Total_flux` follows the fixed block.
pub const COLUMN_NAMES: [&str; 64] = [
    "Sequence_number",
    "Isophotal_flux",
    "X_coordinate",
    "X_coordinate_err",
    "Y_coordinate",
    "Y_coordinate_err",
    "Gaussian_sigma",
    "Ellipticity",
    "Position_angle",
    "Areal_1_profile",
    "Areal_2_profile",
    "Areal_3_profile",
    "Areal_4_profile",
    "Areal_5_profile",
    "Areal_6_profile",
    "Areal_7_profile",
    "Areal_8_profile",
    "Peak_height",
    "Peak_height_err",
    "Aper_flux_1",
    "Aper_flux_1_err",
    "Aper_flux_2",
    "Aper_flux_2_err",
    "Aper_flux_3",
    "Aper_flux_3_err",
    "Aper_flux_4",
    "Aper_flux_4_err",
    "Aper_flux_5",
    "Aper_flux_5_err",
    "Aper_flux_6",
    "Aper_flux_6_err",
    "Aper_flux_7",
    "Aper_flux_7_err",
    "Aper_flux_8",
    "Aper_flux_8_err",
    "Aper_flux_9",
    "Aper_flux_9_err",
    "Aper_flux_10",
    "Aper_flux_10_err",
    "Aper_flux_11",
    "Aper_flux_11_err",
    "Aper_flux_12",
    "Aper_flux_12_err",
    "Aper_flux_13",
    "Aper_flux_13_err",
    "Petr_radius",
    "Kron_radius",
    "Half_radius",
    "Petr_flux",
    "Petr_flux_err",
    "Kron_flux",
    "Kron_flux_err",
    "Half_flux",
    "Half_flux_err",
    "Error_bit_flag",
    "Sky_level",
    "Sky_rms",
    "Av_conf",
    "RA",
    "DEC",
    "Classification",
    "Statistic",
    "FWHM",
    "Total_flux",
];

/// Conversion from the moment-based sigma to FWHM
const FWHM_PER_SIGMA: f64 = 2.354_820_045;

/// Radius and flux of one characteristic aperture.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct RadiusFlux {
    /// Radius in pixels
    pub radius: f64,
    /// Flux inside the radius
    pub flux: f64,
}

/// Photometry of one object, gathered by the driver.
#[derive(Debug, Clone, PartialEq)]
pub struct ObjectPhotometry {
    /// Standard aperture radii
    pub aperture_radii: [f64; NAPERTURES],
    /// Flux through each standard aperture
    pub aperture_fluxes: [f64; NAPERTURES],
    /// Petrosian radius (unhalved) and flux
    pub petrosian: RadiusFlux,
    /// Kron radius (unhalved) and flux
    pub kron: RadiusFlux,
    /// Half-light radius and the half flux
    pub half_light: RadiusFlux,
    /// Coverage of missing pixels in the core aperture
    pub bad_pixels: f64,
    /// Mean confidence in the core aperture
    pub mean_confidence: f64,
    /// Local sky from the background model
    pub local_sky: SkyStats,
    /// Curve-of-growth total flux
    pub total_flux: f64,
}

/// Run-level values that enter every record.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RecordContext {
    /// Global sky noise in ADU
    pub sky_noise: f64,
    /// Detector gain in e-/ADU
    pub gain: f64,
}

/// One catalogue row. Positions are one-based.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ObjectRecord {
    /// Catalogue number, starting at 1
    pub sequence: usize,
    /// Flux above the isophote in counts
    pub isophotal_flux: f64,
    /// Intensity-weighted column in pixels
    pub x: f64,
    /// Column error in pixels
    pub x_err: f64,
    /// Intensity-weighted row in pixels
    pub y: f64,
    /// Row error in pixels
    pub y_err: f64,
    /// Moment-based Gaussian sigma in pixels
    pub gaussian_sigma: f64,
    /// 1 - b/a
    pub ellipticity: f64,
    /// Major-axis angle in degrees
    pub position_angle: f64,
    /// Pixel counts above threshold·2^k
    pub areal: [f64; NAREAL],
    /// Peak above sky in counts
    pub peak_height: f64,
    /// Error on `peak_height` in counts
    pub peak_height_err: f64,
    /// Flux through each standard aperture in counts
    pub aperture_flux: [f64; NAPERTURES],
    /// Error on each aperture flux in counts
    pub aperture_flux_err: [f64; NAPERTURES],
    /// Half the Petrosian radius, in pixels
    pub petrosian_radius: f64,
    /// Half the Kron radius, in pixels
    pub kron_radius: f64,
    /// Radius enclosing half the light, in pixels
    pub half_light_radius: f64,
    /// Counts inside twice `petrosian_radius`
    pub petrosian_flux: f64,
    /// Error on `petrosian_flux` in counts
    pub petrosian_flux_err: f64,
    /// Counts inside twice `kron_radius`
    pub kron_flux: f64,
    /// Error on `kron_flux` in counts
    pub kron_flux_err: f64,
    /// Half the object's light in counts
    pub half_light_flux: f64,
    /// Error on `half_light_flux` in counts
    pub half_light_flux_err: f64,
    /// Missing-pixel coverage in the core aperture, in pixels
    pub error_bit_flag: f64,
    /// Local sky from the background model in counts
    pub sky_level: f64,
    /// Local sky noise in counts
    pub sky_rms: f64,
    /// Mean confidence in the core aperture, percent
    pub average_confidence: f64,
    /// Right ascension, left at zero; no astrometry is done here
    pub ra: f64,
    /// Declination, left at zero
    pub dec: f64,
    /// Placeholder class code
    pub classification: f64,
    /// Placeholder classification statistic
    pub statistic: f64,
    /// Image FWHM from the second moments, in pixels
    pub fwhm: f64,
    /// Curve-of-growth total flux in counts
    pub total_flux: f64,
}

/// Shape quantities derived from second moments.
#[derive(Debug, Clone, Copy, PartialEq)]
struct Shape {
    ecc: f64,
    srr: f64,
    ellipticity: f64,
    position_angle: f64,
}

fn shape(sxx: f64, sxy: f64, syy: f64) -> Shape {
    let limit = (sxx * syy).sqrt();
    let sxy = if sxy > 0.0 {
        sxy.min(limit).max(1.0e-4)
    } else {
        sxy.max(-limit).min(-1.0e-4)
    };
    let srr = (sxx + syy).max(0.5);
    let ecc = ((syy - sxx).powi(2) + 4.0 * sxy * sxy).sqrt() / srr;
    let ellipticity = (1.0 - ((1.0 - ecc) / (1.0 + ecc)).max(0.0).sqrt()).clamp(0.0, 0.99);
    let xx = 0.5 * (1.0 + ecc) * srr - sxx;
    let position_angle = if xx == 0.0 {
        0.0
    } else {
        90.0 - (sxy / xx).atan().to_degrees()
    };
    Shape {
        ecc,
        srr,
        ellipticity,
        position_angle,
    }
}

fn flux_error(flux: f64, radius: f64, variance: f64, gain: f64) -> f64 {
    ((flux / gain).max(0.0) + PI * radius * radius * variance).sqrt()
}

impl ObjectRecord {
    /// Assemble a record.
    ///
    /// # Arguments
    /// * `sequence` - One-based catalogue number
    /// * `params` - Object parameters with zero-based position
    /// * `photometry` - Apertures, radii and local sky
    /// * `context` - Global noise and gain
    /// * `blank_last_areal` - Report the top areal level as zero, as done
    ///   for the first child of a deblended group
    pub fn new(
        sequence: usize,
        params: &ObjectParams,
        photometry: &ObjectPhotometry,
        context: RecordContext,
        blank_last_areal: bool,
    ) -> Self {
        let Shape {
            ecc,
            srr,
            ellipticity,
            position_angle,
        } = shape(params.sxx, params.sxy, params.syy);
        let theta = position_angle.to_radians();
        let (sin2, cos2) = (theta.sin().powi(2), theta.cos().powi(2));
        let cc = (1.0 + ecc) * cos2 + (1.0 - ecc) * sin2;
        let dd = (1.0 + ecc) * sin2 + (1.0 - ecc) * cos2;

        let gain = context.gain;
        let sigsq = context.sky_noise * context.sky_noise;
        let peak = params.peak;
        let position_err = |c: f64| {
            (2.0 * sigsq / (PI * peak * peak) + c / (2.0 * PI * gain * peak) + 1.0e-4).sqrt()
        };

        let sigma = srr.sqrt();
        let fwhm_raw = (sigma * sigma / 2.0).sqrt() * FWHM_PER_SIGMA;
        let fwhm = fwhm_raw - 1.0 / (4.0 * fwhm_raw);

        let sky_rms = photometry.local_sky.noise;
        let variance = sigsq + sky_rms * sky_rms;
        let mut areal = params.areal;
        if blank_last_areal {
            areal[NAREAL - 1] = 0.0;
        }
        let aperture_flux_err = std::array::from_fn(|i| {
            flux_error(
                photometry.aperture_fluxes[i],
                photometry.aperture_radii[i],
                variance,
                gain,
            )
        });
        let radius_err = |rf: RadiusFlux| flux_error(rf.flux, rf.radius, variance, gain);

        Self {
            sequence,
            isophotal_flux: params.flux,
            x: params.x + 1.0,
            x_err: position_err(cc),
            y: params.y + 1.0,
            y_err: position_err(dd),
            gaussian_sigma: sigma,
            ellipticity,
            position_angle,
            areal,
            peak_height: peak,
            peak_height_err: (peak / gain + variance).sqrt(),
            aperture_flux: photometry.aperture_fluxes,
            aperture_flux_err,
            petrosian_radius: 0.5 * photometry.petrosian.radius,
            kron_radius: 0.5 * photometry.kron.radius,
            half_light_radius: photometry.half_light.radius,
            petrosian_flux: photometry.petrosian.flux,
            petrosian_flux_err: radius_err(photometry.petrosian),
            kron_flux: photometry.kron.flux,
            kron_flux_err: radius_err(photometry.kron),
            half_light_flux: photometry.half_light.flux,
            half_light_flux_err: radius_err(photometry.half_light),
            error_bit_flag: photometry.bad_pixels,
            sky_level: photometry.local_sky.level,
            sky_rms,
            average_confidence: photometry.mean_confidence,
            ra: 0.0,
            dec: 0.0,
            classification: 100.0,
            statistic: 0.0,
            fwhm,
            total_flux: photometry.total_flux,
        }
    }

    /// Values in [`COLUMN_NAMES`] order.
    pub fn to_columns(&self) -> Vec<(&'static str, f64)> {
        let mut values = vec![
            self.sequence as f64,
            self.isophotal_flux,
            self.x,
            self.x_err,
            self.y,
            self.y_err,
            self.gaussian_sigma,
            self.ellipticity,
            self.position_angle,
        ];
        values.extend_from_slice(&self.areal);
        values.extend([self.peak_height, self.peak_height_err]);
        for (flux, err) in self.aperture_flux.iter().zip(&self.aperture_flux_err) {
            values.extend([*flux, *err]);
        }
        values.extend([
            self.petrosian_radius,
            self.kron_radius,
            self.half_light_radius,
            self.petrosian_flux,
            self.petrosian_flux_err,
            self.kron_flux,
            self.kron_flux_err,
            self.half_light_flux,
            self.half_light_flux_err,
            self.error_bit_flag,
            self.sky_level,
            self.sky_rms,
            self.average_confidence,
            self.ra,
            self.dec,
            self.classification,
            self.statistic,
            self.fwhm,
            self.total_flux,
        ]);
        COLUMN_NAMES.iter().copied().zip(values).collect()
    }

    /// Inputs for the seeing estimate.
    pub fn seeing_sample(&self) -> SeeingSample {
        SeeingSample {
            ellipticity: self.ellipticity,
            peak: self.peak_height,
            areal: self.areal,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn params(sxx: f64, sxy: f64, syy: f64) -> ObjectParams {
        ObjectParams {
            flux: 5000.0,
            x: 9.0,
            y: 19.0,
            threshold: 15.0,
            sxx,
            sxy,
            syy,
            peak: 400.0,
            areal: [50.0, 40.0, 30.0, 20.0, 10.0, 5.0, 2.0, 1.0],
        }
    }

    fn photometry() -> ObjectPhotometry {
        ObjectPhotometry {
            aperture_radii: crate::photometry::aperture_radii(3.0),
            aperture_fluxes: [1000.0; NAPERTURES],
            petrosian: RadiusFlux {
                radius: 10.0,
                flux: 4800.0,
            },
            kron: RadiusFlux {
                radius: 8.0,
                flux: 4700.0,
            },
            half_light: RadiusFlux {
                radius: 2.0,
                flux: 2500.0,
            },
            bad_pixels: 0.0,
            mean_confidence: 100.0,
            local_sky: SkyStats {
                level: 200.0,
                noise: 1.0,
            },
            total_flux: 5100.0,
        }
    }

    const CONTEXT: RecordContext = RecordContext {
        sky_noise: 10.0,
        gain: 2.0,
    };

    #[test]
    fn test_round_object_shape() {
        let rec = ObjectRecord::new(1, &params(2.0, 0.0, 2.0), &photometry(), CONTEXT, false);
        assert_relative_eq!(rec.x, 10.0);
        assert_relative_eq!(rec.y, 20.0);
        assert!(rec.ellipticity < 0.01);
        assert_relative_eq!(rec.gaussian_sigma, 2.0);
        let raw = 2.0f64.sqrt() * FWHM_PER_SIGMA;
        assert_relative_eq!(rec.fwhm, raw - 1.0 / (4.0 * raw));
        assert_relative_eq!(rec.kron_radius, 4.0);
        assert_relative_eq!(rec.petrosian_radius, 5.0);
    }

    #[test]
    fn test_elongated_object_angle() {
        // Elongated along y
        let rec = ObjectRecord::new(1, &params(1.0, 0.0, 4.0), &photometry(), CONTEXT, false);
        assert_relative_eq!(rec.ellipticity, 0.5, epsilon = 1e-3);
        assert_relative_eq!(rec.position_angle, 90.0, epsilon = 0.1);
        // Along x
        let rec = ObjectRecord::new(1, &params(4.0, 0.0, 1.0), &photometry(), CONTEXT, false);
        assert_relative_eq!(rec.ellipticity, 0.5, epsilon = 1e-3);
        let pa = rec.position_angle;
        assert!(pa.abs() < 0.1 || (pa - 180.0).abs() < 0.1, "{pa}");
    }

    #[test]
    fn test_errors() {
        let rec = ObjectRecord::new(3, &params(2.0, 0.0, 2.0), &photometry(), CONTEXT, false);
        let variance: f64 = 100.0 + 1.0;
        assert_relative_eq!(rec.peak_height_err, (400.0 / 2.0 + variance).sqrt());
        let r = rec.aperture_flux_err[2];
        assert_relative_eq!(r, (500.0 + PI * 9.0 * variance).sqrt());
        assert!(rec.x_err > 0.0 && rec.y_err > 0.0);
    }

    #[test]
    fn test_columns_layout() {
        let rec = ObjectRecord::new(7, &params(2.0, 0.0, 2.0), &photometry(), CONTEXT, true);
        let cols = rec.to_columns();
        assert_eq!(cols.len(), 64);
        assert_eq!(cols[0], ("Sequence_number", 7.0));
        assert_eq!(cols[16], ("Areal_8_profile", 0.0));
        assert_eq!(cols[19].0, "Aper_flux_1");
        assert_eq!(cols[62].0, "FWHM");
        assert_eq!(cols[63], ("Total_flux", 5100.0));
        let class = cols.iter().find(|(n, _)| *n == "Classification").unwrap();
        assert_eq!(class.1, 100.0);
    }

    #[test]
    fn test_record_serialises() {
        let rec = ObjectRecord::new(1, &params(2.0, 0.5, 2.0), &photometry(), CONTEXT, false);
        let text = serde_json::to_string(&rec).unwrap();
        let back: ObjectRecord = serde_json::from_str(&text).unwrap();
        assert_eq!(back, rec);
    }
}
