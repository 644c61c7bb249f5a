//! The detection run: flags, background, row scan, measurement, catalogue.

use log::{debug, info};
use ndarray::{Array2, ArrayView2};

use crate::background::{background_stats, BackgroundMap};
use crate::catalogue::{ObjectPhotometry, ObjectRecord, RadiusFlux, RecordContext};
use crate::config::ImcoreConfig;
use crate::deblend::{deblend, DeblendOutcome, DeblendSettings};
use crate::detection::{DetectorState, PixelSample, RegionId, SmoothingKernel, KERNEL_SIZE};
use crate::error::ImcoreError;
use crate::measure::{
    areal_profile, compute_moments, estimate_seeing, total_flux, ObjectParams, SkyContext,
};
use crate::photometry::{
    aperture_radii, fit_apertures, flux_at_radii, half_light_radius, kron_radius,
    petrosian_radius, CORE_INDEX, DOUBLE_CORE_INDEX, NAPERTURES,
};
use crate::pixel_flags::{build_flag_map, PixelFlag};

/// Confidence assumed everywhere when no map is supplied
pub const DEFAULT_CONFIDENCE: f64 = 100.0;

/// Everything a detection run produces.
#[derive(Debug, Clone)]
pub struct DetectionRun {
    /// Catalogue in detection order
    pub records: Vec<ObjectRecord>,
    /// Clipped sky level before removal
    pub sky_level: f64,
    /// Clipped sky noise
    pub sky_noise: f64,
    /// Isophotal threshold in ADU
    pub threshold: f64,
    /// Saturation level the scan used
    pub saturation: f64,
    /// Seeing FWHM in pixels, zero if it could not be estimated
    pub seeing: f64,
    /// Regions dropped to relieve pool pressure
    pub evictions: usize,
    /// Pixel to catalogue sequence number, zero for sky
    pub label: Option<Array2<i32>>,
    /// Modelled background
    pub background: Option<Array2<f64>>,
}

/// Values fixed for the duration of one run.
struct RunContext<'a> {
    image: ArrayView2<'a, f64>,
    confidence: ArrayView2<'a, f64>,
    background: &'a BackgroundMap,
    threshold: f64,
    min_flux: f64,
    min_pixels: usize,
    deblend_min_pixels: usize,
    deblend: bool,
    core_radius: f64,
    sky_noise: f64,
    gain: f64,
}

impl RunContext<'_> {
    fn width(&self) -> usize {
        self.image.ncols()
    }

    fn height(&self) -> usize {
        self.image.nrows()
    }
}

/// Detect, deblend and measure every object in an image.
///
/// Same as [`extract_catalogue_with_mask`] without a bad-pixel mask.
///
/// # Arguments
/// * `image` - Intensities, indexed `[[row, column]]`
/// * `confidence` - Optional confidence map in percent; zero marks unusable
///   pixels
/// * `config` - Run parameters
///
/// # Returns
/// * `Ok(DetectionRun)` - Catalogue and run statistics
/// * `Err(ImcoreError)` - Inputs or sky statistics made the run impossible
pub fn extract_catalogue(
    image: ArrayView2<f64>,
    confidence: Option<ArrayView2<f64>>,
    config: &ImcoreConfig,
) -> Result<DetectionRun, ImcoreError> {
    extract_catalogue_with_mask(image, confidence, None, config)
}

/// Detect, deblend and measure every object, honouring a bad-pixel mask.
///
/// Masked pixels still qualify for detection but count as bad pixels of
/// their region, so a mostly masked region is not measured. Apertures treat
/// them as missing and report their coverage in `error_bit_flag`. They are
/// also left out of the sky statistics.
///
/// # Arguments
/// * `image` - Intensities, indexed `[[row, column]]`
/// * `confidence` - Optional confidence map in percent
/// * `mask` - Optional bad-pixel mask; `true` marks a bad pixel
/// * `config` - Run parameters
///
/// # Returns
/// * `Ok(DetectionRun)` - Catalogue and run statistics
/// * `Err(ImcoreError)` - Inputs or sky statistics made the run impossible
pub fn extract_catalogue_with_mask(
    image: ArrayView2<f64>,
    confidence: Option<ArrayView2<f64>>,
    mask: Option<ArrayView2<bool>>,
    config: &ImcoreConfig,
) -> Result<DetectionRun, ImcoreError> {
    let (height, width) = image.dim();
    if width == 0 || height == 0 {
        return Err(ImcoreError::EmptyImage {
            rows: height,
            cols: width,
        });
    }
    let mismatch = |map: &'static str, dim: (usize, usize)| ImcoreError::DimensionMismatch {
        map,
        image_rows: height,
        image_cols: width,
        map_rows: dim.0,
        map_cols: dim.1,
    };
    if let Some(conf) = &confidence {
        if conf.dim() != image.dim() {
            return Err(mismatch("confidence", conf.dim()));
        }
    }
    if let Some(mask) = &mask {
        if mask.dim() != image.dim() {
            return Err(mismatch("mask", mask.dim()));
        }
    }
    config.validate(width)?;

    let conf = confidence
        .map(|c| c.to_owned())
        .unwrap_or_else(|| Array2::from_elem(image.dim(), DEFAULT_CONFIDENCE));
    let flags = build_flag_map(&image, &conf.view(), mask.as_ref(), config.saturation);
    let mut data = image.to_owned();

    let background = BackgroundMap::model(
        &data.view(),
        &flags.view(),
        config.background_cell_size,
        config.null_value,
    )?;
    if config.background_subtract {
        background.apply_correction(&mut data, config.null_value);
    }
    let background_image = config
        .write_background_image
        .then(|| background.background_image(&image, config.null_value));

    let sky = background_stats(&data.view(), &flags.view(), config.null_value)?;
    if sky.noise <= 0.0 {
        return Err(ImcoreError::ZeroSkyNoise {
            sky_level: sky.level,
        });
    }
    let threshold = config.threshold * sky.noise;
    if !config.background_subtract && threshold < sky.level {
        return Err(ImcoreError::ThresholdBelowSky {
            threshold,
            sky_level: sky.level,
        });
    }
    let saturation = if config.background_subtract {
        data.mapv_inplace(|v| v - sky.level);
        config.saturation - sky.level
    } else {
        config.saturation
    };

    let ctx = RunContext {
        image: data.view(),
        confidence: conf.view(),
        background: &background,
        threshold,
        min_flux: 1.5 * threshold * config.min_pixels as f64,
        min_pixels: config.min_pixels,
        deblend_min_pixels: (2 * config.min_pixels).max(8),
        deblend: config.deblend,
        core_radius: config.core_radius,
        sky_noise: sky.noise,
        gain: config.gain,
    };
    debug!(
        "run setup: sky {:.3}, noise {:.3}, threshold {:.3}, saturation {:.1}",
        sky.level, sky.noise, threshold, saturation
    );

    let conf_weight = conf.mapv(|c| (0.01 * c).max(0.0).sqrt());
    let kernel = SmoothingKernel::gaussian(config.filter_fwhm);
    let half = SmoothingKernel::half_width();
    let mut smoothed = vec![0.0; width];
    let mut smoothed_conf = vec![0.0; width];
    let mut state = DetectorState::new(width, height, config.block_capacity, Some(flags));
    let mut label = config
        .write_label_image
        .then(|| Array2::<i32>::zeros((height, width)));
    let mut records = Vec::new();
    let mut buffer = Vec::new();

    let scanned = if height >= KERNEL_SIZE { half..height - half } else { 0..0 };
    let last_row = scanned.end.checked_sub(1);
    for row in scanned {
        kernel.smooth_row(&ctx.image, &conf_weight.view(), row, &mut smoothed, &mut smoothed_conf);
        state.scan_row(
            row,
            ctx.image.row(row),
            ctx.confidence.row(row),
            &smoothed,
            &smoothed_conf,
            threshold,
            saturation,
        );
        state.relieve_pressure();
        let done = state.advance_lifecycles();
        process_terminated(&ctx, &mut state, &done, &mut buffer, &mut records, label.as_mut());
    }
    if let Some(last_row) = last_row {
        let done = state.finish_image(last_row);
        process_terminated(&ctx, &mut state, &done, &mut buffer, &mut records, label.as_mut());
    }

    let seeing = estimate_seeing(records.iter().map(ObjectRecord::seeing_sample), threshold);
    let evictions = state.eviction_count();
    info!(
        "extracted {} objects: sky {:.3}, noise {:.3}, threshold {:.3}, seeing {:.2} px, {} evictions",
        records.len(),
        sky.level,
        sky.noise,
        threshold,
        seeing,
        evictions
    );

    Ok(DetectionRun {
        records,
        sky_level: sky.level,
        sky_noise: sky.noise,
        threshold,
        saturation,
        seeing,
        evictions,
        label,
        background: background_image,
    })
}

fn process_terminated(
    ctx: &RunContext,
    state: &mut DetectorState,
    done: &[RegionId],
    buffer: &mut Vec<PixelSample>,
    records: &mut Vec<ObjectRecord>,
    mut label: Option<&mut Array2<i32>>,
) {
    for &id in done {
        if state.is_measurable(id, ctx.min_pixels) {
            state.extract_into(id, buffer);
            if let Some(flags) = state.flags() {
                let produced = measure_region(ctx, &flags.view(), buffer, records.len() + 1);
                if !produced.is_empty() {
                    records.extend(produced);
                    if let Some(label) = label.as_deref_mut() {
                        let sequence = records.len() as i32;
                        for p in buffer.iter() {
                            label[[p.y, p.x]] = sequence;
                        }
                    }
                }
            }
        }
        state.restack(id);
    }
}

/// Turn one extracted region into catalogue records.
fn measure_region(
    ctx: &RunContext,
    flags: &ArrayView2<PixelFlag>,
    pixels: &mut [PixelSample],
    first_sequence: usize,
) -> Vec<ObjectRecord> {
    let (width, height) = (ctx.width(), ctx.height());
    let Some(moments) = compute_moments(pixels, ctx.min_flux, width, height) else {
        debug!("region of {} pixels below the flux floor", pixels.len());
        return Vec::new();
    };
    let areal = areal_profile(pixels, ctx.threshold);
    if areal[0] < ctx.min_pixels {
        return Vec::new();
    }
    let isolated_total = total_flux(
        &ctx.image,
        flags,
        &moments,
        areal[0] as f64,
        SkyContext {
            sky_sigma: ctx.sky_noise,
            threshold: ctx.threshold,
        },
    );

    let isolated = ObjectParams::from_moments(&moments, ctx.threshold, &areal);
    let (group, split) = if ctx.deblend && areal[0] >= ctx.deblend_min_pixels {
        let settings = DeblendSettings {
            threshold: ctx.threshold,
            min_pixels: ctx.min_pixels,
            width,
            height,
        };
        match deblend(pixels, &moments, &settings) {
            DeblendOutcome::Single => (vec![isolated], false),
            DeblendOutcome::Split(children) => {
                let inside: Vec<ObjectParams> = children
                    .into_iter()
                    .filter(|c| c.x > 0.0 && c.x + 1.0 < width as f64 && c.y > 0.0 && c.y + 1.0 < height as f64)
                    .collect();
                (inside, true)
            }
        }
    } else {
        (vec![isolated], false)
    };
    if group.is_empty() {
        return Vec::new();
    }

    let radii = aperture_radii(ctx.core_radius);
    let fit = match fit_apertures(&ctx.image, &ctx.confidence, flags, &group, &radii, CORE_INDEX) {
        Ok(fit) => fit,
        Err(e) => {
            debug!(
                "skipping group of {} near ({:.1}, {:.1}): {e}",
                group.len(),
                moments.x + 1.0,
                moments.y + 1.0
            );
            return Vec::new();
        }
    };

    let half_light: Vec<RadiusFlux> = group
        .iter()
        .zip(&fit.fluxes)
        .map(|(obj, curve)| {
            let flux = 0.5 * obj.flux.max(curve[DOUBLE_CORE_INDEX]);
            RadiusFlux {
                radius: half_light_radius(&radii, curve, flux, obj.peak),
                flux,
            }
        })
        .collect();
    let kron = radius_fluxes(ctx, flags, &group, &radii, &fit.fluxes, kron_radius);
    let petrosian = radius_fluxes(ctx, flags, &group, &radii, &fit.fluxes, petrosian_radius);

    let context = RecordContext {
        sky_noise: ctx.sky_noise,
        gain: ctx.gain,
    };
    group
        .iter()
        .enumerate()
        .map(|(k, obj)| {
            let photometry = ObjectPhotometry {
                aperture_radii: radii,
                aperture_fluxes: std::array::from_fn::<f64, NAPERTURES, _>(|i| fit.fluxes[k][i]),
                petrosian: petrosian[k],
                kron: kron[k],
                half_light: half_light[k],
                bad_pixels: fit.bad_pixels[k],
                mean_confidence: fit.mean_confidence[k],
                local_sky: ctx.background.estimate(obj.x, obj.y),
                total_flux: if split { obj.flux } else { isolated_total },
            };
            ObjectRecord::new(first_sequence + k, obj, &photometry, context, split && k == 0 && group.len() > 1)
        })
        .collect()
}

/// Radius from each curve of growth, and the flux through it.
fn radius_fluxes(
    ctx: &RunContext,
    flags: &ArrayView2<PixelFlag>,
    group: &[ObjectParams],
    radii: &[f64],
    curves: &[Vec<f64>],
    radius_of: fn(f64, &[f64], &[f64]) -> f64,
) -> Vec<RadiusFlux> {
    let targets: Vec<f64> = group
        .iter()
        .zip(curves)
        .map(|(obj, curve)| radius_of(obj.areal[0], radii, curve))
        .collect();
    let fluxes = flux_at_radii(&ctx.image, flags, group, &targets, radii, curves);
    targets
        .into_iter()
        .zip(fluxes)
        .map(|(radius, flux)| RadiusFlux { radius, flux })
        .collect()
}
