//! One-dimensional smoothing filters used on coarse background grids
//!
//! Both filters reflect the series about a robust end level before
//! filtering so that a gradient running off the edge of the grid is
//! continued rather than pulled back toward zero.

/// Values at or below this level mark a missing sample
pub const MISSING: f64 = -1000.0;

/// Number of samples averaged to estimate each end level
const END_SAMPLES: usize = 3;

fn is_missing(v: f64) -> bool {
    v <= MISSING
}

/// Build `xbuf` padded by `half` reflected samples at each end.
///
/// The reflection is about `level_lo` / `level_hi`, so a linear trend is
/// preserved across the boundary.
fn reflect(xbuf: &[f64], half: usize, level_lo: f64, level_hi: f64) -> Vec<f64> {
    let n = xbuf.len();
    let mut padded = vec![0.0; n + 2 * half];
    for i in 0..half {
        padded[i] = 2.0 * level_lo - xbuf[half + END_SAMPLES - 1 - i];
        padded[n + half + i] = 2.0 * level_hi - xbuf[n - i - END_SAMPLES - 1];
    }
    padded[half..half + n].copy_from_slice(xbuf);
    padded
}

fn median_of(window: &mut [f64]) -> f64 {
    window.sort_by(f64::total_cmp);
    window[window.len() / 2]
}

/// Sliding median filter with reflected edges.
///
/// Even window sizes are bumped to the next odd size. Series no longer than
/// the window are left untouched.
///
/// # Arguments
/// * `xbuf` - Series filtered in place
/// * `window` - Filter width in samples
pub fn running_median(xbuf: &mut [f64], window: usize) {
    let window = if window % 2 == 0 { window + 1 } else { window };
    let n = xbuf.len();
    if n <= window || n <= END_SAMPLES {
        return;
    }
    let half = window / 2;

    let mut head = [0.0; END_SAMPLES];
    head.copy_from_slice(&xbuf[..END_SAMPLES]);
    let lo = median_of(&mut head);
    let mut tail = [0.0; END_SAMPLES];
    for (i, t) in tail.iter_mut().enumerate() {
        *t = xbuf[n - 1 - i];
    }
    let hi = median_of(&mut tail);

    let padded = reflect(xbuf, half, lo, hi);
    let mut scratch = vec![0.0; window];
    for (i, out) in xbuf.iter_mut().enumerate() {
        scratch.copy_from_slice(&padded[i..i + window]);
        *out = median_of(&mut scratch);
    }
}

/// 1-2-1 Hanning filter with reflected edges.
///
/// Series of three or fewer samples are left untouched.
pub fn hanning(xbuf: &mut [f64]) {
    let n = xbuf.len();
    if n <= END_SAMPLES {
        return;
    }
    let lo = xbuf[..END_SAMPLES].iter().sum::<f64>() / END_SAMPLES as f64;
    let hi = xbuf[n - END_SAMPLES..].iter().sum::<f64>() / END_SAMPLES as f64;

    let padded = reflect(xbuf, 1, lo, hi);
    for (i, out) in xbuf.iter_mut().enumerate() {
        *out = 0.25 * (padded[i] + 2.0 * padded[i + 1] + padded[i + 2]);
    }
}

/// Fill missing samples by linear interpolation between their present
/// neighbours and linearly extrapolate missing runs at either end.
///
/// A series with no present sample is left as is.
pub fn pad_missing(x: &mut [f64]) {
    let n = x.len();
    let Some(first) = x.iter().position(|&v| !is_missing(v)) else {
        return;
    };
    let mut last = first;

    let mut i = first + 1;
    while i < n {
        if is_missing(x[i]) {
            let gap_end = (i..n).find(|&k| !is_missing(x[k]));
            match gap_end {
                Some(end) => {
                    let gap = end - i;
                    let lo = x[i - 1];
                    let hi = x[end];
                    for j in 0..gap {
                        let t = (j + 1) as f64 / (gap + 1) as f64;
                        x[i + j] = (1.0 - t) * lo + t * hi;
                    }
                    last = end;
                    i = end + 1;
                }
                None => break,
            }
        } else {
            last = i;
            i += 1;
        }
    }

    if first > 0 {
        let slope = if first + 1 < n && !is_missing(x[first + 1]) {
            x[first + 1] - x[first]
        } else {
            0.0
        };
        for k in 0..first {
            x[k] = x[first] - slope * (first - k) as f64;
        }
    }
    if last + 1 < n {
        let slope = if last > 0 { x[last] - x[last - 1] } else { 0.0 };
        for k in last + 1..n {
            x[k] = x[last] + slope * (k - last) as f64;
        }
    }
}

/// Median filter that skips missing samples, then repairs the gaps.
///
/// Present samples are compacted, median filtered, scattered back to their
/// original slots, and the missing slots are filled with [`pad_missing`].
pub fn median_filter_with_gaps(ybuf: &mut [f64], window: usize) {
    let mut present: Vec<f64> = ybuf.iter().copied().filter(|&v| !is_missing(v)).collect();
    if present.is_empty() {
        return;
    }
    running_median(&mut present, window);
    let mut it = present.into_iter();
    for v in ybuf.iter_mut().filter(|v| !is_missing(**v)) {
        if let Some(f) = it.next() {
            *v = f;
        }
    }
    pad_missing(ybuf);
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_running_median_removes_spike() {
        let mut x = vec![1.0, 1.0, 1.0, 50.0, 1.0, 1.0, 1.0, 1.0, 1.0];
        running_median(&mut x, 5);
        assert!(x.iter().all(|&v| v == 1.0), "{x:?}");
    }

    #[test]
    fn test_running_median_keeps_linear_ramp() {
        let mut x: Vec<f64> = (0..12).map(|i| 2.0 * i as f64).collect();
        let expect = x.clone();
        running_median(&mut x, 5);
        for (a, b) in x.iter().zip(expect.iter()) {
            assert_relative_eq!(*a, *b, epsilon = 1e-12);
        }
    }

    #[test]
    fn test_running_median_short_series_untouched() {
        let mut x = vec![3.0, 100.0, 3.0];
        running_median(&mut x, 5);
        assert_eq!(x, vec![3.0, 100.0, 3.0]);
    }

    #[test]
    fn test_hanning_keeps_linear_ramp() {
        let mut x: Vec<f64> = (0..10).map(|i| 5.0 + 0.5 * i as f64).collect();
        let expect = x.clone();
        hanning(&mut x);
        for (a, b) in x.iter().zip(expect.iter()) {
            assert_relative_eq!(*a, *b, epsilon = 1e-12);
        }
    }

    #[test]
    fn test_hanning_smooths_step() {
        let mut x = vec![0.0, 0.0, 0.0, 0.0, 4.0, 0.0, 0.0, 0.0, 0.0];
        hanning(&mut x);
        assert_relative_eq!(x[3], 1.0);
        assert_relative_eq!(x[4], 2.0);
        assert_relative_eq!(x[5], 1.0);
    }

    #[test]
    fn test_pad_missing_interior_and_ends() {
        let mut x = vec![MISSING, 2.0, MISSING, MISSING, 8.0, MISSING];
        pad_missing(&mut x);
        assert_relative_eq!(x[2], 4.0);
        assert_relative_eq!(x[3], 6.0);
        // Leading gap extrapolated along the first present slope
        assert_relative_eq!(x[0], 0.0);
        // Trailing gap extrapolated along the last slope
        assert_relative_eq!(x[5], 10.0);
    }

    #[test]
    fn test_pad_missing_all_missing_untouched() {
        let mut x = vec![MISSING; 4];
        pad_missing(&mut x);
        assert!(x.iter().all(|&v| v == MISSING));
    }

    #[test]
    fn test_median_filter_with_gaps_fills_holes() {
        let mut x = vec![5.0, 5.0, MISSING, 5.0, 5.0, 5.0, 5.0, MISSING, 5.0];
        median_filter_with_gaps(&mut x, 5);
        assert!(x.iter().all(|&v| (v - 5.0).abs() < 1e-12), "{x:?}");
    }
}
