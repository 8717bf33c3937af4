//! Descriptors of a chromatographic peak: full width at half max, area and
//! signal-to-noise ratio.
//!
//! Widths are measured in scan numbers. Peaks are described by a [`SICPeak`]
//! whose indices refer to the `scans` and `intensities` arrays.
use num_traits::{Float, FromPrimitive};

use crate::arrayops::trapz;
use crate::peak::SICPeak;

pub fn _isclose<T>(x: T, y: T, rtol: T, atol: T) -> bool
where
    T: Float,
{
    (x - y).abs() <= (atol + rtol * y.abs())
}

pub fn isclose<T>(x: T, y: T) -> bool
where
    T: Float + FromPrimitive,
{
    _isclose(x, y, T::from_f64(1e-5).unwrap(), T::from_f64(1e-8).unwrap())
}

pub fn aboutzero<T>(x: T) -> bool
where
    T: Float + FromPrimitive,
{
    isclose(x, T::zero())
}

/// The ratio between the standard deviation of a Gaussian and its FWHM
pub const SIGMA_TO_FWHM: f64 = 2.35482;

/// Edge intensities above this fraction of the apex get an extrapolated tail point
const AREA_TAIL_FRACTION: f64 = 0.05;

/// Subtract the noise level from `value`, clamping at zero unless `allow_negative` is set
pub fn baseline_adjust(value: f64, noise_level: f64, allow_negative: bool) -> f64 {
    let adjusted = value - noise_level;
    if allow_negative {
        adjusted
    } else {
        adjusted.max(0.0)
    }
}

/// `signal / noise_level`, or 0 when there is no meaningful noise level
pub fn signal_to_noise(signal: f64, noise_level: f64) -> f64 {
    if noise_level > 0.0 {
        signal / noise_level
    } else {
        0.0
    }
}

/// The positions, in scan numbers, where a peak crosses half its maximum
#[derive(Default, Debug, Clone, Copy, PartialEq)]
pub struct WidthFit {
    pub left_position: f64,
    pub right_position: f64,
    pub full_width_at_half_max: f64,
}

/// The inclusive index range covered by `peak`, made consistent with its apex
/// and the array bounds
fn peak_bounds(peak: &SICPeak, n: usize) -> (usize, usize, usize) {
    let apex = peak.index_max.min(n - 1);
    let left = peak.index_base_left.min(apex);
    let right = peak.index_base_right.clamp(apex, n - 1);
    (left, apex, right)
}

/// Walk left from the apex to the first point below `half`
fn rising_side_half_max(scans: &[f64], values: &[f64], left: usize, apex: usize, half: f64) -> f64 {
    for index in (left..apex).rev() {
        let y1 = values[index];
        if y1 < half {
            let y2 = values[index + 1];
            let x1 = scans[index];
            let x2 = scans[index + 1];
            if aboutzero(y2 - y1) {
                return x1;
            }
            return x1 - (x1 - x2) * ((half - y1) / (y2 - y1));
        }
    }
    (scans[left] + scans[apex]) / 2.0
}

/// Walk right from the apex to the first point below `half`
fn falling_side_half_max(scans: &[f64], values: &[f64], apex: usize, right: usize, half: f64) -> f64 {
    for index in (apex + 1)..=right {
        let y1 = values[index];
        if y1 < half {
            let y2 = values[index - 1];
            let x1 = scans[index];
            let x2 = scans[index - 1];
            if aboutzero(y2 - y1) {
                return x1;
            }
            return x1 - (x1 - x2) * ((half - y1) / (y2 - y1));
        }
    }
    (scans[right] + scans[apex]) / 2.0
}

/// Locate the half maximum crossings on either side of the apex of `peak`.
///
/// When `subtract_baseline` is set the intensities have `noise_level`
/// subtracted first, unless that leaves nothing of the apex, in which case the
/// raw intensities are used. A side with no crossing between the apex and the
/// peak's edge uses the scan midway between them.
pub fn fit_width_at_half_max(
    scans: &[f64],
    intensities: &[f64],
    peak: &SICPeak,
    noise_level: f64,
    subtract_baseline: bool,
) -> WidthFit {
    let n = scans.len().min(intensities.len());
    if n == 0 {
        return WidthFit::default();
    }
    let (left, apex, right) = peak_bounds(peak, n);

    let mut values: Vec<f64> = if subtract_baseline {
        intensities[..n]
            .iter()
            .map(|v| baseline_adjust(*v, noise_level, false))
            .collect()
    } else {
        intensities[..n].to_vec()
    };
    let mut half = values[apex] / 2.0;
    if half <= 0.0 {
        values.copy_from_slice(&intensities[..n]);
        half = values[apex] / 2.0;
    }

    let left_position = rising_side_half_max(scans, &values, left, apex, half);
    let right_position = falling_side_half_max(scans, &values, apex, right, half);
    WidthFit {
        left_position,
        right_position,
        full_width_at_half_max: right_position - left_position,
    }
}

/// The full width at half max of `peak` in whole scans.
///
/// Returns 1 for a peak whose apex intensity is not positive.
pub fn full_width_at_half_max(
    scans: &[f64],
    intensities: &[f64],
    peak: &SICPeak,
    noise_level: f64,
    subtract_baseline: bool,
) -> i32 {
    let n = scans.len().min(intensities.len());
    if n == 0 || intensities[peak.index_max.min(n - 1)] <= 0.0 {
        return 1;
    }
    let fit = fit_width_at_half_max(scans, intensities, peak, noise_level, subtract_baseline);
    (fit.full_width_at_half_max.round() as i32).max(0)
}

/// The width of a peak at its base: the smaller of four standard deviations,
/// derived from the FWHM, and the observed base width.
pub fn width_at_base_using_fwhm(fwhm_scan_width: i32, base_width_scans: i32) -> i32 {
    let sigma = fwhm_scan_width as f64 / SIGMA_TO_FWHM;
    let width = (4.0 * sigma).round() as i32;
    if base_width_scans > 0 {
        width.min(base_width_scans)
    } else {
        width
    }
}

fn average_scan_interval(scans: &[f64], left: usize, right: usize) -> f64 {
    if right > left {
        let interval = (scans[right] - scans[left]) / (right - left) as f64;
        if interval > 0.0 {
            return interval;
        }
    }
    1.0
}

/// Convert a width in scans to a number of points using the average scan
/// interval between the edges of `peak`
pub fn scan_width_to_points(width_scans: i32, peak: &SICPeak, scans: &[f64]) -> usize {
    if scans.is_empty() || width_scans <= 0 {
        return 0;
    }
    let apex = peak.index_max.min(scans.len() - 1);
    let left = peak.index_base_left.min(apex);
    let right = peak.index_base_right.clamp(apex, scans.len() - 1);
    let interval = average_scan_interval(scans, left, right);
    (width_scans as f64 / interval).round() as usize
}

/// The width of `peak` between its edges, in scans
pub fn base_width_scans(peak: &SICPeak, scans: &[f64]) -> i32 {
    if scans.is_empty() {
        return 0;
    }
    let n = scans.len();
    let left = peak.index_base_left.min(n - 1);
    let right = peak.index_base_right.min(n - 1);
    (scans[right] - scans[left]).round() as i32
}

/// Integrate the raw intensities of `peak` between its edges.
///
/// An edge whose intensity is above 5% of the apex is extended by one
/// synthetic point at 5% of the apex, one average scan interval further out.
pub fn sic_peak_area(scans: &[f64], intensities: &[f64], peak: &SICPeak) -> f64 {
    let n = scans.len().min(intensities.len());
    if n == 0 {
        return 0.0;
    }
    let (left, apex, right) = peak_bounds(peak, n);
    let tail = AREA_TAIL_FRACTION * intensities[apex];
    let interval = average_scan_interval(scans, left, right);

    let mut xs = Vec::with_capacity(right - left + 3);
    let mut ys = Vec::with_capacity(right - left + 3);
    if intensities[left] > tail {
        xs.push(scans[left] - interval);
        ys.push(tail);
    }
    xs.extend_from_slice(&scans[left..=right]);
    ys.extend_from_slice(&intensities[left..=right]);
    if intensities[right] > tail {
        xs.push(scans[right] + interval);
        ys.push(tail);
    }
    trapz(&xs, &ys).max(0.0)
}

/// The area of `peak` above its baseline noise level.
///
/// Uses the peak's `area`, `fwhm_scan_width` and `baseline_noise`, so these
/// must be computed first.
pub fn baseline_adjusted_area(peak: &SICPeak, scans: &[f64]) -> f64 {
    let width = width_at_base_using_fwhm(peak.fwhm_scan_width, base_width_scans(peak, scans));
    (peak.area - peak.baseline_noise.noise_level * width as f64).max(0.0)
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::noise::NoiseStats;
    use crate::test_data::{assert_is_close, gaussian_series, scan_axis};

    fn peak_at(index_max: usize, left: usize, right: usize) -> SICPeak {
        SICPeak {
            index_max,
            index_observed: index_max,
            index_base_left: left,
            index_base_right: right,
            ..Default::default()
        }
    }

    #[test]
    fn test_baseline_adjust_round_trip() {
        for (value, noise) in [(25.0, 10.0), (10.0, 10.0), (1e6, 3.5), (0.1, 0.05)] {
            let adjusted = baseline_adjust(value, noise, false);
            assert_eq!(adjusted + noise, value);
        }
        assert_eq!(baseline_adjust(4.0, 10.0, false), 0.0);
        assert_eq!(baseline_adjust(4.0, 10.0, true), -6.0);
    }

    #[test]
    fn test_signal_to_noise() {
        assert_eq!(signal_to_noise(1000.0, 10.0), 100.0);
        assert_eq!(signal_to_noise(1000.0, 0.0), 0.0);
        assert_eq!(signal_to_noise(1000.0, -5.0), 0.0);
    }

    #[test]
    fn test_fwhm_gaussian() {
        let scans = scan_axis(1, 100);
        let intensities = gaussian_series(&scans, &[(50.0, 5.0, 1000.0)], 10.0);
        let peak = peak_at(49, 30, 70);
        let fit = fit_width_at_half_max(&scans, &intensities, &peak, 10.0, true);
        assert_is_close!(fit.full_width_at_half_max, 5.0 * SIGMA_TO_FWHM, 0.1, "fwhm");
        assert_is_close!((fit.left_position + fit.right_position) / 2.0, 50.0, 1e-6, "center");
        assert_eq!(full_width_at_half_max(&scans, &intensities, &peak, 10.0, true), 12);
    }

    #[test]
    fn test_fwhm_fallbacks() {
        let scans = scan_axis(1, 5);
        // Baseline subtraction removes everything, use the raw values
        let intensities = [2.0, 4.0, 8.0, 4.0, 2.0];
        let peak = peak_at(2, 0, 4);
        let fit = fit_width_at_half_max(&scans, &intensities, &peak, 100.0, true);
        assert_eq!(fit.left_position, 2.0);
        assert_eq!(fit.right_position, 4.0);

        // No crossing inside the edges, use the midpoint between edge and apex
        let intensities = [8.0, 9.0, 10.0, 9.0, 8.0];
        let fit = fit_width_at_half_max(&scans, &intensities, &peak, 0.0, false);
        assert_eq!(fit.left_position, 2.0);
        assert_eq!(fit.right_position, 4.0);

        let zeros = [0.0; 5];
        assert_eq!(full_width_at_half_max(&scans, &zeros, &peak, 0.0, false), 1);
        assert_eq!(full_width_at_half_max(&[], &[], &peak, 0.0, false), 1);
    }

    #[test]
    fn test_width_at_base() {
        // 4 sigma of a peak with FWHM 12 is ~20.4 scans
        assert_eq!(width_at_base_using_fwhm(12, 40), 20);
        assert_eq!(width_at_base_using_fwhm(12, 15), 15);
        assert_eq!(width_at_base_using_fwhm(12, 0), 20);
        let scans = [10.0, 12.0, 14.0, 16.0, 18.0];
        let peak = peak_at(2, 0, 4);
        assert_eq!(scan_width_to_points(6, &peak, &scans), 3);
        assert_eq!(base_width_scans(&peak, &scans), 8);
    }

    #[test]
    fn test_area_extends_tails() {
        let scans = scan_axis(1, 5);
        let intensities = [0.0, 50.0, 100.0, 50.0, 0.0];
        let closed = peak_at(2, 0, 4);
        assert_eq!(sic_peak_area(&scans, &intensities, &closed), 200.0);

        // Edges at 50% of the apex get a point at 5 one scan further out
        let open = peak_at(2, 1, 3);
        let expected = 150.0 + 2.0 * (0.5 * (50.0 + 5.0));
        assert_eq!(sic_peak_area(&scans, &intensities, &open), expected);
    }

    #[test]
    fn test_baseline_adjusted_area() {
        let scans = scan_axis(1, 100);
        let mut peak = peak_at(49, 20, 80);
        peak.area = 1000.0;
        peak.fwhm_scan_width = 12;
        peak.baseline_noise = NoiseStats {
            noise_level: 10.0,
            ..Default::default()
        };
        assert_eq!(baseline_adjusted_area(&peak, &scans), 800.0);
        peak.baseline_noise.noise_level = 100.0;
        assert_eq!(baseline_adjusted_area(&peak, &scans), 0.0);
    }
}
