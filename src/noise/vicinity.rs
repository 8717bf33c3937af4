use log::{debug, trace};

use crate::arrayops::{floor_non_positive, mean_and_std_dev};
use crate::peak::SICPeak;
use crate::peak_statistics::{
    base_width_scans, full_width_at_half_max, scan_width_to_points, width_at_base_using_fwhm,
};

use super::{trimmed, BaselineNoiseEstimator, NoiseMode, NoiseStats, FALLBACK_TRIM_FRACTION};

/// The fewest points a flanking window may hold before it is widened
const MINIMUM_VICINITY_POINTS: usize = 5;

/// Grow the window `[outer, inner]` until it holds `MINIMUM_VICINITY_POINTS`,
/// alternately moving `outer` away from the peak and `inner` towards the apex.
///
/// `outer_step` and `inner_step` return the next index in each direction, or
/// `None` when an index cannot move any further.
fn widen_window(
    mut outer: usize,
    mut inner: usize,
    outer_step: impl Fn(usize) -> Option<usize>,
    inner_step: impl Fn(usize) -> Option<usize>,
) -> (usize, usize) {
    let span = |a: usize, b: usize| a.abs_diff(b) + 1;
    let mut move_outer = true;
    while span(outer, inner) < MINIMUM_VICINITY_POINTS {
        let next_outer = outer_step(outer);
        let next_inner = inner_step(inner);
        match (move_outer, next_outer, next_inner) {
            (true, Some(o), _) => outer = o,
            (false, _, Some(i)) => inner = i,
            (true, None, Some(i)) => inner = i,
            (false, Some(o), None) => outer = o,
            (_, None, None) => break,
        }
        move_outer = !move_outer;
    }
    (outer, inner)
}

impl BaselineNoiseEstimator {
    /// Estimate the noise level from the data flanking `peak`.
    ///
    /// The flanking windows extend out from each edge of the peak by two
    /// thirds of the peak's width at base, but not into the half-maximum
    /// region of a neighboring peak. A window that is too narrow is widened
    /// alternately outwards and into the tail of the peak. A side with fewer
    /// than five points of room outside the peak is dropped when the other side
    /// has enough. When the windows still hold too few points a trimmed median
    /// of the whole series is used.
    pub fn estimate_in_peak_vicinity(
        &self,
        scans: &[f64],
        intensities: &[f64],
        peak: &SICPeak,
    ) -> NoiseStats {
        let n = scans.len().min(intensities.len());
        if n == 0 {
            return self.empty();
        }
        let values = floor_non_positive(&intensities[..n]);

        let apex = peak.index_max.min(n - 1);
        let base_left = peak.index_base_left.min(apex);
        let base_right = peak.index_base_right.clamp(apex, n - 1);

        let fwhm = full_width_at_half_max(scans, intensities, peak, 0.0, false);
        let width_at_base = width_at_base_using_fwhm(fwhm, base_width_scans(peak, scans));
        let width_points = scan_width_to_points(width_at_base, peak, scans);
        let half_window = ((width_points as f64 / 1.5).round() as usize).max(MINIMUM_VICINITY_POINTS);

        let left_limit = peak.previous_peak_fwhm_point_right.min(base_left);
        let right_limit = peak.next_peak_fwhm_point_left.clamp(base_right, n - 1);

        let index_start = base_left.saturating_sub(half_window).max(left_limit);
        let index_end = (base_right + half_window).min(right_limit);
        trace!(
            "Sampling noise around {peak} from [{index_start}, {base_left}] and [{base_right}, {index_end}]"
        );

        // Skip a side with too little room outside the peak if the other side has enough
        let left_room = base_left - left_limit + 1;
        let right_room = right_limit - base_right + 1;
        let use_left = left_room >= MINIMUM_VICINITY_POINTS || right_room < MINIMUM_VICINITY_POINTS;
        let use_right = right_room >= MINIMUM_VICINITY_POINTS || left_room < MINIMUM_VICINITY_POINTS;

        let mut sample: Vec<f64> = Vec::new();
        let mut inner_left = None;
        if use_left {
            let (index_start, inner) = widen_window(
                index_start,
                base_left,
                |i| i.checked_sub(1),
                |i| (i < apex).then_some(i + 1),
            );
            sample.extend_from_slice(&values[index_start..=inner]);
            inner_left = Some(inner);
        }
        if use_right {
            let (index_end, inner) = widen_window(
                index_end,
                base_right,
                |i| (i + 1 < n).then_some(i + 1),
                |i| (i > apex).then(|| i - 1),
            );
            let from = match inner_left {
                Some(left) if inner <= left => left + 1,
                _ => inner,
            };
            if from <= index_end {
                sample.extend_from_slice(&values[from..=index_end]);
            }
        }
        if !(use_left && use_right) {
            trace!("Sampled noise on one side of {peak} only, left={use_left}");
        }

        let stats = if sample.len() < MINIMUM_VICINITY_POINTS {
            debug!("Too little data flanking {peak}, using a trimmed median");
            trimmed::trimmed_by_abundance(&values, FALLBACK_TRIM_FRACTION, true)
        } else {
            let (mean, std_dev) = mean_and_std_dev(&sample);
            NoiseStats::new(mean, std_dev, sample.len(), NoiseMode::MeanOfDataInPeakVicinity)
        };
        self.finalize(stats)
    }
}
