//! Statistical moments of a chromatographic peak, treating its baseline
//! adjusted intensities as a distribution over scan numbers.
use log::trace;

use crate::arrayops::trapz;
use crate::peak::{SICPeak, StatisticalMoments};
use crate::peak_statistics::baseline_adjust;

/// Points below this fraction of the peak maximum end the moment window
const MOMENT_WINDOW_FRACTION: f64 = 0.1;
/// Points on either side of the apex used when the moment window is too small
const FALLBACK_HALF_WIDTH: usize = 2;
const MINIMUM_MOMENT_POINTS: usize = 3;
const SKEW_EPSILON: f64 = 1e-4;

fn normal_cdf(x: f64, mean: f64, std_dev: f64) -> f64 {
    0.5 * (1.0 + libm::erf((x - mean) / (std_dev * std::f64::consts::SQRT_2)))
}

/// The Kolmogorov-Smirnov statistic comparing the distribution described by
/// `ys` over `xs` with a Gaussian of the given `mean` and `std_dev`.
///
/// The empirical CDF is the normalized running trapezoidal integral, and the
/// statistic is scaled by the square root of the number of points.
pub fn ks_statistic(xs: &[f64], ys: &[f64], mean: f64, std_dev: f64) -> f64 {
    let n = xs.len().min(ys.len());
    if n < 2 || !(std_dev > 0.0) {
        return 0.0;
    }
    let total = trapz(&xs[..n], &ys[..n]);
    if !(total > 0.0) {
        return 0.0;
    }

    let mut cumulative = 0.0;
    let mut max_difference = normal_cdf(xs[0], mean, std_dev).abs();
    for i in 1..n {
        cumulative += (xs[i] - xs[i - 1]) * 0.5 * (ys[i] + ys[i - 1]);
        let difference = (cumulative / total - normal_cdf(xs[i], mean, std_dev)).abs();
        max_difference = max_difference.max(difference);
    }
    (n as f64).sqrt() * max_difference
}

/// Replace interior zeros by linear interpolation between their non-zero
/// neighbors, and fill runs of missing scans at the smallest scan step.
fn interpolate_gaps(xs: &[f64], ys: &[f64]) -> (Vec<f64>, Vec<f64>) {
    let n = xs.len();
    let mut ys = ys.to_vec();

    let mut last_nonzero: Option<usize> = None;
    for i in 0..n {
        if ys[i] > 0.0 {
            if let Some(j) = last_nonzero {
                if i > j + 1 {
                    for k in (j + 1)..i {
                        let fraction = (xs[k] - xs[j]) / (xs[i] - xs[j]);
                        ys[k] = ys[j] + fraction * (ys[i] - ys[j]);
                    }
                }
            }
            last_nonzero = Some(i);
        }
    }

    let step = xs
        .windows(2)
        .map(|w| w[1] - w[0])
        .filter(|d| *d > 0.0)
        .fold(f64::INFINITY, f64::min);
    if !step.is_finite() {
        return (xs.to_vec(), ys);
    }

    let mut filled_x = Vec::with_capacity(n);
    let mut filled_y = Vec::with_capacity(n);
    for i in 0..n {
        if i > 0 {
            let (x0, y0) = (xs[i - 1], ys[i - 1]);
            let gap = xs[i] - x0;
            if gap > 1.5 * step {
                let missing = (gap / step).round() as usize;
                for k in 1..missing {
                    let x = x0 + k as f64 * step;
                    if x >= xs[i] {
                        break;
                    }
                    filled_x.push(x);
                    filled_y.push(y0 + (x - x0) / gap * (ys[i] - y0));
                }
            }
        }
        filled_x.push(xs[i]);
        filled_y.push(ys[i]);
    }
    (filled_x, filled_y)
}

/// The index range of baseline adjusted intensities around `apex` that stay at
/// or above `threshold`, skipping over zeros.
fn moment_window(adjusted: &[f64], left: usize, apex: usize, right: usize, threshold: f64) -> (usize, usize) {
    let mut start = apex;
    for i in (left..apex).rev() {
        let value = adjusted[i - left];
        if value <= 0.0 {
            continue;
        }
        if value < threshold {
            break;
        }
        start = i;
    }
    let mut end = apex;
    for i in (apex + 1)..=right {
        let value = adjusted[i - left];
        if value <= 0.0 {
            continue;
        }
        if value < threshold {
            break;
        }
        end = i;
    }
    (start, end)
}

/// Compute the statistical moments of `peak` over its baseline adjusted intensities.
///
/// The moments are taken over the contiguous run of points around the apex
/// that are at least 10% of the peak maximum, with interior zeros and missing
/// scans filled by linear interpolation. If that leaves fewer than three
/// points, the raw intensities of up to five points centered on the apex are
/// used instead.
pub fn statistical_moments(
    scans: &[f64],
    intensities: &[f64],
    peak: &SICPeak,
    noise_level: f64,
) -> StatisticalMoments {
    let n = scans.len().min(intensities.len());
    if n == 0 {
        return StatisticalMoments::default();
    }
    let apex = peak.index_max.min(n - 1);
    let left = peak.index_base_left.min(apex);
    let right = peak.index_base_right.clamp(apex, n - 1);

    let adjusted: Vec<f64> = intensities[left..=right]
        .iter()
        .map(|v| baseline_adjust(*v, noise_level, false))
        .collect();
    let maximum = adjusted.iter().copied().fold(0.0, f64::max);
    let threshold = MOMENT_WINDOW_FRACTION * maximum;
    let (start, end) = moment_window(&adjusted, left, apex, right, threshold);

    let (xs, ys) = interpolate_gaps(&scans[start..=end], &adjusted[(start - left)..=(end - left)]);
    let (xs, ys) = if xs.len() < MINIMUM_MOMENT_POINTS {
        let start = apex.saturating_sub(FALLBACK_HALF_WIDTH);
        let end = (apex + FALLBACK_HALF_WIDTH).min(n - 1);
        trace!("Moment window too small, using raw points {start} to {end}");
        (scans[start..=end].to_vec(), intensities[start..=end].to_vec())
    } else {
        (xs, ys)
    };

    let mut moments = StatisticalMoments {
        data_count_used: xs.len(),
        center_of_mass_scan: scans[apex].round() as i32,
        ..Default::default()
    };

    let area = trapz(&xs, &ys);
    if !(area > 0.0) {
        return moments;
    }
    moments.area = area;

    let weighted = |power: i32, center: f64| -> f64 {
        let values: Vec<f64> = xs
            .iter()
            .zip(ys.iter())
            .map(|(x, y)| (x - center).powi(power) * y)
            .collect();
        trapz(&xs, &values) / area
    };

    let mean = weighted(1, 0.0);
    let variance = weighted(2, mean).max(0.0);
    let third = weighted(3, mean);
    let std_dev = variance.sqrt();

    moments.center_of_mass_scan = mean.round() as i32;
    moments.std_dev = std_dev;
    if std_dev > 0.0 {
        let skew = third / std_dev.powi(3);
        moments.skew = if skew.abs() < SKEW_EPSILON { 0.0 } else { skew };
    }
    moments.ks_statistic = ks_statistic(&xs, &ys, mean, std_dev);
    moments
}
