//! Coverage peak detection.
//!
//! The histogram is smoothed with a Weierstrass transform and scanned for
//! sign changes of its discrete first difference; each extremum is refined by
//! Lagrange interpolation on a fine grid. The smoothing width and window
//! sizes below are fixed: small changes move which peak is detected.

use std::f64::consts::PI;
use std::io::Write;

use super::Histogram;
use crate::Result;

/// Weierstrass transform time parameter
const SMOOTHING: f64 = 0.5;
/// Kernel spans `-KERNEL_WIDTH..=KERNEL_WIDTH` samples
const KERNEL_WIDTH: i64 = 9;
/// Histogram values considered
const TABLE_LEN: usize = 1024;
/// Extrema are searched for in `3..SCAN_END`
const SCAN_END: i64 = 100;
/// Grid spacing of the sub-sample search
const STEP: f64 = 0.025;
/// Number of peak slots; slot 0 is the noise trough
pub const NUM_PEAKS: usize = 9;

/// The noise trough and coverage peaks of a histogram.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PloidyPeaks {
    /// Ploidy label of each slot (slot 0 is always 0)
    ploidy: [f64; NUM_PEAKS],
    /// Depth of each slot; 0 when no such extremum was found
    depth: [f64; NUM_PEAKS],
}
impl PloidyPeaks {
    /// Depth separating sequencing noise from genomic k-mers
    #[must_use]
    pub fn noise_trough(&self) -> f64 {
        self.depth[0]
    }

    /// `(ploidy, depth)` of peak `idx` (1..=8)
    #[must_use]
    pub fn peak(&self, idx: usize) -> (f64, f64) {
        (self.ploidy[idx], self.depth[idx])
    }

    pub(super) fn compute(histogram: &Histogram) -> Self {
        let h = dense_table(histogram);
        let s = smooth(&h);

        let mut ploidy = [0.0; NUM_PEAKS];
        let mut depth = [0.0; NUM_PEAKS];

        // the trough comes from the raw data; smoothing drags it right
        depth[0] = find_extrema(&h, 0, 3);
        for ii in 1..NUM_PEAKS {
            ploidy[ii] = ii as f64;
            depth[ii] = find_extrema(&s, 2 * ii as u32 - 1, 4);
        }

        // a dominant peak past slot 1 means slot 1 was really a half-coverage peak
        let height = |x: f64| interpolate(&h, x.round() as i64, 3, 3, x);
        let mut max_peak = 1;
        let mut max_height = height(depth[1]);
        for (ii, &x) in depth.iter().enumerate().skip(1) {
            let y = height(x);
            if max_height < y {
                max_peak = ii;
                max_height = y;
            }
        }
        log::debug!(
            "tallest coverage peak is #{max_peak} at depth {:.3}",
            depth[max_peak]
        );

        for _ in 1..max_peak {
            for p in &mut ploidy {
                *p /= 2.0;
            }
        }

        Self { ploidy, depth }
    }

    /// Writes the noise trough and the ploidy 1 to 4 peaks.
    pub fn report<W: Write>(&self, writer: &mut W) -> Result<()> {
        writeln!(writer, "noise\t{:.3}", self.noise_trough())?;
        for idx in 1..=4 {
            let (ploidy, depth) = self.peak(idx);
            writeln!(writer, "{ploidy}x\t{depth:.3}")?;
        }
        Ok(())
    }
}

/// Histogram occurrences indexed by value, for values below [`TABLE_LEN`].
fn dense_table(histogram: &Histogram) -> Vec<f64> {
    let mut h = vec![0.0; TABLE_LEN];
    for (value, occurrences) in histogram.iter() {
        if value as usize >= TABLE_LEN {
            break;
        }
        h[value as usize] = occurrences as f64;
    }
    h
}

/// Convolves with a Gaussian kernel; value 0 never contributes.
fn smooth(h: &[f64]) -> Vec<f64> {
    let scale = 1.0 / (4.0 * PI * SMOOTHING).sqrt();
    let denom = -4.0 * SMOOTHING;
    let kernel: Vec<f64> = (-KERNEL_WIDTH..=KERNEL_WIDTH)
        .map(|i| scale * ((i * i) as f64 / denom).exp())
        .collect();

    let n = h.len() as i64;
    (0..n)
        .map(|hi| {
            (-KERNEL_WIDTH..=KERNEL_WIDTH)
                .map(|wi| {
                    let whi = hi + wi;
                    if whi < 1 || whi >= n {
                        0.0
                    } else {
                        h[whi as usize] * kernel[(wi + KERNEL_WIDTH) as usize]
                    }
                })
                .sum()
        })
        .collect()
}

/// Reads `h[idx]`, treating anything outside the table as zero.
#[inline]
fn at(h: &[f64], idx: i64) -> f64 {
    usize::try_from(idx)
        .ok()
        .and_then(|i| h.get(i))
        .copied()
        .unwrap_or(0.0)
}

/// Lagrange interpolation through `h[pp-bo..=pp+eo]`, evaluated at `x`.
fn interpolate(h: &[f64], pp: i64, bo: i64, eo: i64, x: f64) -> f64 {
    let mut y = 0.0;
    for ii in (pp - bo)..=(pp + eo) {
        let mut t = at(h, ii);
        for jj in (pp - bo)..=(pp + eo) {
            if ii != jj {
                t *= (x - jj as f64) / (ii - jj) as f64;
            }
        }
        y += t;
    }
    y
}

/// Finds the min or max of the interpolant within 1.5 of `pp`.
///
/// The interpolant is built from `range + 1` points either side of `pp`.
fn find_interpolated_min_max(h: &[f64], pp: i64, range: f64, step: f64, want_min: bool) -> f64 {
    let center = pp as f64;
    let mut pmin = center + range;
    let mut imin = f64::MAX;
    let mut pmax = center - range;
    let mut imax = f64::MIN_POSITIVE;

    let width = range as i64 + 1;
    let end = center + 1.5 + step * 1.1;
    let mut x = center - 1.5;
    while x < end {
        let i = interpolate(h, pp, width, width, x);
        if i < imin {
            pmin = x;
            imin = i;
        }
        if imax < i {
            pmax = x;
            imax = i;
        }
        x += step;
    }

    if want_min {
        pmin
    } else {
        pmax
    }
}

/// Location of the `idx`-th extremum (0 = first minimum, 1 = first maximum
/// after it, ...), or 0 if there are not that many below [`SCAN_END`].
fn find_extrema(h: &[f64], mut idx: u32, range: u32) -> f64 {
    for ii in 3..SCAN_END {
        let d0 = at(h, ii + 1) - at(h, ii);
        let d1 = at(h, ii) - at(h, ii - 1);
        let falling_after = d0 < 0.0;
        let falling_before = d1 < 0.0;

        let want_min = match (falling_before, falling_after) {
            (true, false) => true,
            (false, true) => false,
            _ => continue,
        };
        if idx == 0 {
            return find_interpolated_min_max(h, ii, f64::from(range), STEP, want_min);
        }
        idx -= 1;
    }
    0.0
}
