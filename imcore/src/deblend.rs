//! Splitting blended regions into their components.
//!
//! A region that is large enough to hide several objects is re-scanned at a
//! ladder of rising thresholds. Fragments that appear as the threshold climbs
//! are tracked across levels; once the ladder tops out each fragment's areal
//! profile is extrapolated back down to the detection threshold, allowing for
//! the light its neighbours contribute, and the extrapolated fluxes are scaled
//! so they add up to the parent's isophotal flux.

use std::f64::consts::PI;

use imcore_math::polyfit;
use log::debug;

use crate::detection::{DetectorState, PixelSample};
use crate::measure::{ArealScale, Moments, ObjectParams, NAREAL};

/// Most children a single parent can be split into
pub const MAX_SUBOBJECTS: usize = 200;

/// Pixels above the starting sub-threshold are capped at this many
const WORKING_SET_LIMIT: usize = 10_000;

/// Ratio between successive thresholds, a quarter magnitude
const CONTOUR_STEP: f64 = 1.258_967_8;

/// First sub-threshold in units of the detection threshold
const START_FACTOR: f64 = 2.5;

/// Passes of the local continuum iteration
const CONTINUUM_PASSES: usize = 6;

/// Run-level inputs for the deblender.
#[derive(Debug, Clone, Copy)]
pub struct DeblendSettings {
    /// Detection threshold in ADU
    pub threshold: f64,
    /// Minimum object size in pixels
    pub min_pixels: usize,
    /// Image columns
    pub width: usize,
    /// Image rows
    pub height: usize,
}

/// Result of a deblending attempt.
#[derive(Debug, Clone, PartialEq)]
pub enum DeblendOutcome {
    /// Keep the parent as a single object
    Single,
    /// Children with fluxes rescaled to the parent's isophotal flux
    Split(Vec<ObjectParams>),
}

#[derive(Debug, Clone, Copy)]
struct Fragment {
    params: ObjectParams,
    peak_pixel: (usize, usize),
}

/// Attempt to deblend one parent region.
///
/// # Arguments
/// * `pixels` - Parent pixels; reordered brightest-first by smoothed value
/// * `parent` - Moments of the parent at the detection threshold
/// * `settings` - Threshold, minimum size and image shape
pub fn deblend(
    pixels: &mut [PixelSample],
    parent: &Moments,
    settings: &DeblendSettings,
) -> DeblendOutcome {
    let oldthr = settings.threshold;
    let scale = ArealScale::new(oldthr);
    let sub_min_pixels = ((settings.min_pixels + 1) / 2).max(2);
    let min_fragment_flux = oldthr * sub_min_pixels as f64;
    let top_threshold = 0.9 * parent.peak;

    pixels.sort_by(|a, b| b.zsm.total_cmp(&a.zsm));

    let mut curthr = START_FACTOR * oldthr;
    let mut working = count_above(pixels, curthr);
    while working > WORKING_SET_LIMIT {
        curthr += oldthr;
        working = count_above(pixels, curthr);
    }
    if working < settings.min_pixels {
        return DeblendOutcome::Single;
    }

    let mut sub = DetectorState::new(settings.width, settings.height, working + 1, None);
    let mut buffer = Vec::with_capacity(working);
    let mut tracked: Vec<Fragment> = Vec::new();
    let mut pending: Vec<Option<ObjectParams>> = Vec::new();
    let mut previous = 0;

    loop {
        let nexthr = (curthr + oldthr).max(curthr * CONTOUR_STEP);
        sub.scan_cluster(&pixels[..working], curthr);
        let (fragments, mut too_many) = collect_fragments(
            &mut sub,
            &mut buffer,
            sub_min_pixels,
            FragmentContext {
                curthr,
                oldthr,
                scale,
                x_off: parent.x,
                y_off: parent.y,
                width: settings.width,
                height: settings.height,
            },
        );
        sub.reinit();
        if fragments.is_empty() {
            break;
        }

        for frag in &fragments {
            let sxx = frag.params.sxx.max(1.0);
            let syy = frag.params.syy.max(1.0);
            let matched = tracked[..previous].iter().position(|known| {
                let dx = frag.params.x - known.params.x;
                let dy = frag.params.y - known.params.y;
                known.peak_pixel == frag.peak_pixel || dx * dx / sxx + dy * dy / syy < 1.0
            });
            match matched {
                Some(k) => pending[k] = Some(frag.params),
                None if frag.params.flux > min_fragment_flux => {
                    if tracked.len() >= MAX_SUBOBJECTS {
                        too_many = true;
                        break;
                    }
                    tracked.push(*frag);
                    pending.push(None);
                }
                None => {}
            }
        }

        if !too_many {
            // A split moves the centroid of the fragment it came from; that
            // fragment alone takes its latest measurement.
            if tracked.len() > previous && previous > 0 {
                let mut moved = 0;
                let mut max_shift = 0.0;
                for (i, update) in pending[..previous].iter().enumerate() {
                    if let Some(p) = update.filter(|p| p.flux > 0.0) {
                        let dx = p.x - tracked[i].params.x;
                        let dy = p.y - tracked[i].params.y;
                        let shift = dx * dx + dy * dy;
                        if shift > max_shift {
                            moved = i;
                            max_shift = shift;
                        }
                    }
                }
                if let Some(p) = pending[moved].filter(|p| p.flux > 0.0) {
                    tracked[moved].params = p;
                }
            }
            pending.iter_mut().for_each(|p| *p = None);
            previous = tracked.len();
        }

        working = count_above(&pixels[..working], nexthr);
        if working == 0 || too_many || nexthr >= top_threshold {
            if too_many {
                debug!(
                    "deblend of object at ({:.1}, {:.1}) hit the {} fragment limit",
                    parent.x, parent.y, MAX_SUBOBJECTS
                );
            }
            break;
        }
        curthr = nexthr;
    }

    if tracked.len() == 1 {
        return DeblendOutcome::Single;
    }
    let mut children: Vec<ObjectParams> = tracked
        .into_iter()
        .map(|f| f.params)
        .filter(|p| p.flux > min_fragment_flux)
        .collect();

    let radmax = (pixels.len() as f64 / PI).sqrt();
    let sumint = extrapolate_continuum(&mut children, oldthr, scale.offset(), radmax, min_fragment_flux);
    if sumint == 0.0 || children.len() < 2 {
        return DeblendOutcome::Single;
    }
    let ratio = parent.flux / sumint;
    children.iter_mut().for_each(|c| c.flux *= ratio);
    DeblendOutcome::Split(children)
}

fn count_above(sorted: &[PixelSample], level: f64) -> usize {
    sorted.partition_point(|p| p.zsm > level)
}

#[derive(Debug, Clone, Copy)]
struct FragmentContext {
    curthr: f64,
    oldthr: f64,
    scale: ArealScale,
    x_off: f64,
    y_off: f64,
    width: usize,
    height: usize,
}

/// Measure every region of a cluster scan that is big enough and clear of
/// the image edges.
///
/// # Returns
/// The fragments with positive flux, and whether the fragment limit was hit
fn collect_fragments(
    sub: &mut DetectorState,
    buffer: &mut Vec<PixelSample>,
    min_pixels: usize,
    ctx: FragmentContext,
) -> (Vec<Fragment>, bool) {
    let mut found = Vec::new();
    for id in sub.live_ids() {
        let qualifies = sub
            .region(id)
            .is_some_and(|r| r.count() >= min_pixels && r.touch().is_clear());
        if !qualifies {
            continue;
        }
        sub.extract_into(id, buffer);
        if let Some(frag) = threshold_moments(buffer, &ctx) {
            if found.len() == MAX_SUBOBJECTS - 1 {
                return (found, true);
            }
            found.push(frag);
        }
    }
    (found, false)
}

/// Moments of a fragment relative to the current sub-threshold.
fn threshold_moments(pixels: &[PixelSample], ctx: &FragmentContext) -> Option<Fragment> {
    let first = pixels.first()?;
    let mut peak = first.z - ctx.curthr;
    let mut peak_pixel = (first.x, first.y);
    let mut areal = [0.0; NAREAL];

    let (mut sx, mut sy, mut st) = (0.0, 0.0, 0.0);
    let (mut sxx, mut syy, mut sxy) = (0.0, 0.0, 0.0);
    let (mut swx, mut swy, mut sw) = (0.0, 0.0, 0.0);
    for p in pixels {
        let x = p.x as f64 - ctx.x_off;
        let y = p.y as f64 - ctx.y_off;
        let t = p.z - ctx.curthr;
        let w = p.zsm - ctx.curthr;
        sx += t * x;
        sy += t * y;
        st += t;
        swx += w * t * x;
        swy += w * t * y;
        sw += w * t;
        sxx += x * x * t;
        syy += y * y * t;
        sxy += x * y * t;
        if t > 0.0 {
            let nup = ctx.scale.levels_reached(t + ctx.oldthr);
            areal[..nup].iter_mut().for_each(|a| *a += 1.0);
        }
        if t > peak {
            peak = t;
            peak_pixel = (p.x, p.y);
        }
    }
    if st <= 0.0 {
        return None;
    }

    let xbar = sx / st;
    let ybar = sy / st;
    let sw = sw.max(1.0);
    let params = ObjectParams {
        flux: st,
        x: (swx / sw + ctx.x_off).clamp(0.0, ctx.width.saturating_sub(1) as f64),
        y: (swy / sw + ctx.y_off).clamp(0.0, ctx.height.saturating_sub(1) as f64),
        threshold: ctx.curthr,
        sxx: (sxx / st - xbar * xbar).max(0.0),
        sxy: sxy / st - xbar * ybar,
        syy: (syy / st - ybar * ybar).max(0.0),
        peak,
        areal,
    };
    Some(Fragment { params, peak_pixel })
}

/// Log-intensity versus radius profile of one child.
struct LevelProfile {
    levels: Vec<f64>,
    radii: Vec<f64>,
    slope: f64,
    level: f64,
    radius: f64,
}

fn level_profile(p: &ObjectParams, continuum: f64, oldthr: f64, offset: f64) -> LevelProfile {
    let mut previous_level = (p.peak + p.threshold - continuum).ln();
    let mut level = previous_level;
    let mut previous_radius = 0.0;
    let mut radius = 0.0;
    let mut slope = 1.0;
    let mut levels = Vec::with_capacity(NAREAL);
    let mut radii = Vec::with_capacity(NAREAL);

    for ii in (0..NAREAL).rev() {
        if p.areal[ii] <= 0.5 {
            continue;
        }
        level = if ii == 0 {
            (p.threshold - continuum + 0.5).ln()
        } else {
            (2f64.powf(ii as f64 + offset) - oldthr + p.threshold - continuum - 0.5).ln()
        };
        radius = (p.areal[ii] / PI).sqrt();
        levels.push(level);
        radii.push(radius);
        let step = radius - previous_radius;
        let dlbydr = (previous_level - level) / step.max(0.01);
        let wt = (step * 5.0).clamp(0.1, 1.0);
        slope = (1.0 - 0.5 * wt) * slope + 0.5 * wt * dlbydr.min(5.0);
        previous_radius = radius;
        previous_level = level;
    }
    LevelProfile {
        levels,
        radii,
        slope,
        level,
        radius,
    }
}

/// Iterate local continuum estimates, then extrapolate each child down to the
/// detection threshold.
///
/// # Returns
/// Sum of the extrapolated fluxes that exceed `min_flux`
fn extrapolate_continuum(
    children: &mut [ObjectParams],
    oldthr: f64,
    offset: f64,
    radmax: f64,
    min_flux: f64,
) -> f64 {
    let n = children.len();
    let mut incoming = vec![0.0; n];
    let mut continuum = vec![0.0; n];
    let mut sumint = 0.0;
    let mut last_pass = false;
    let log_threshold = oldthr.ln();

    for pass in 1..=CONTINUUM_PASSES {
        for k in 0..n {
            if children[k].flux < 0.0 {
                continue;
            }
            let profile = level_profile(&children[k], continuum[k], oldthr, offset);
            if !last_pass {
                for i in (0..n).filter(|&i| i != k && children[i].flux >= 0.0) {
                    let dx = children[k].x - children[i].x;
                    let dy = children[k].y - children[i].y;
                    let dist = (dx * dx + dy * dy).sqrt();
                    let xeff = profile.level - (profile.slope * (dist - profile.radius)).clamp(0.0, 50.0);
                    incoming[i] += xeff.exp();
                }
            } else {
                let child = &mut children[k];
                extrapolate_child(child, &profile, continuum[k], oldthr, log_threshold, radmax);
                if child.flux > min_flux {
                    sumint += child.flux;
                }
            }
        }

        if last_pass {
            break;
        }
        let mut converged = true;
        for i in (0..n).filter(|&i| children[i].flux >= 0.0) {
            if (incoming[i] - continuum[i]).abs() > 3.0 {
                converged = false;
            }
            continuum[i] = incoming[i].min((children[i].threshold - oldthr).round());
            incoming[i] = 0.0;
        }
        last_pass = converged || pass == CONTINUUM_PASSES - 1;
    }
    sumint
}

fn extrapolate_child(
    child: &mut ObjectParams,
    profile: &LevelProfile,
    continuum: f64,
    oldthr: f64,
    log_threshold: f64,
    radmax: f64,
) {
    let gradient = if profile.levels.len() > 2 {
        match polyfit(&profile.radii, &profile.levels, 3, 0) {
            Ok(c) => c[1] + 2.0 * c[2] * profile.radius,
            Err(e) => {
                debug!("deblend level fit failed: {e}");
                0.0
            }
        }
    } else {
        0.0
    };
    let mut slope = profile.slope.max(-gradient).max(0.1);
    let mut radthr = profile.radius + (profile.level - log_threshold) / slope;
    if radthr > radmax {
        slope = 1.0;
        radthr = radmax;
    }

    let lift = child.threshold - continuum;
    let delb = child.areal[0] * lift;
    child.areal[0] = PI * radthr * radthr;
    child.peak += lift;
    let deli = 2.0 * PI
        * (lift * (1.0 + slope * profile.radius) - oldthr * (1.0 + slope * radthr))
        / (slope * slope);
    child.flux += delb + deli.max(0.0);
    child.areal[1..].iter_mut().for_each(|a| *a = -1.0);
}
