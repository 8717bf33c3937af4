//! Find the peak in a selected ion chromatogram that belongs to an observed
//! precursor ion, and describe it.
//!
//! [`SICPeakFinder::find_sic_peak`] always produces a [`SICPeak`]. When no peak
//! can be found, it describes a single point peak at the observed index and the
//! search result carries a [`Diagnostic`] explaining why.
use std::fmt;

use cfg_if::cfg_if;
use log::{debug, trace, warn};
use mzpeaks::CoordinateLike;
use thiserror::Error;

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

use crate::arrayops::{argmax, clamp_non_finite};
use crate::moments::statistical_moments;
use crate::noise::{BaselineNoiseEstimator, NoiseEstimationConfig, NoiseMode, NoiseStats};
use crate::peak::{to_arrays, PeakCandidate, PotentialAreaStats, SICPeak, SamplePoint, SmoothedSubset};
use crate::peak_detector::{PeakDetector, MINIMUM_PEAK_WIDTH};
use crate::peak_statistics::{full_width_at_half_max, sic_peak_area, signal_to_noise};
use crate::smooth::{FilterBank, SmoothingError, SmoothingProvider};

/// Below this width smoothing is skipped unless forced
const MINIMUM_SMOOTHING_WIDTH: usize = 4;
/// Windows need this many points above the noise level to count towards the potential area
const MINIMUM_POTENTIAL_POINTS: usize = 3;
/// The largest rise above its valley a shoulder may need to have
const SHOULDER_SPIKE_FRACTION: f64 = 0.05;
/// Neighboring peaks must be at least this fraction of the chosen apex
const NEIGHBOR_INTENSITY_FRACTION: f64 = 1.0 / 3.0;

#[derive(Debug, Clone, PartialEq, Error)]
pub enum PeakFinderError {
    #[error("The chromatogram is empty")]
    EmptyChromatogram,
    #[error("The observed index {index} is outside a chromatogram of {length} points")]
    ObservedIndexOutOfBounds { index: usize, length: usize },
    #[error("No peak was found containing index {0}")]
    NoPeakFound(usize),
    #[error("Failed to smooth the chromatogram: {0}")]
    Smoothing(#[from] SmoothingError),
    #[error("{0} intensities were NaN or infinite")]
    NonFiniteIntensities(usize),
    #[error("Peak edge {edge} crossed the apex at {apex}")]
    EdgeCrossedApex { edge: usize, apex: usize },
}

/// A problem encountered while searching for a peak that did not stop the search
#[derive(Debug, Clone, PartialEq)]
pub struct Diagnostic {
    pub message: String,
    pub cause: Option<PeakFinderError>,
}

impl Diagnostic {
    pub fn new(message: String, cause: Option<PeakFinderError>) -> Self {
        Self { message, cause }
    }
}

impl fmt::Display for Diagnostic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.cause {
            Some(cause) => write!(f, "{}: {}", self.message, cause),
            None => write!(f, "{}", self.message),
        }
    }
}

fn push_diagnostic(diagnostics: &mut Vec<Diagnostic>, message: String, cause: Option<PeakFinderError>) {
    let diagnostic = Diagnostic::new(message, cause);
    warn!("{diagnostic}");
    diagnostics.push(diagnostic);
}

cfg_if! {
    if #[cfg(feature = "strict-invariants")] {
        fn report_invariant_violation(_diagnostics: &mut Vec<Diagnostic>, error: PeakFinderError) {
            panic!("{error}");
        }
    } else {
        fn report_invariant_violation(diagnostics: &mut Vec<Diagnostic>, error: PeakFinderError) {
            push_diagnostic(diagnostics, "Clamped an invalid peak".to_string(), Some(error));
        }
    }
}

/// Which smoothing filters to apply before detecting peaks
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct SmoothingConfig {
    /// Takes precedence over Savitzky-Golay when both are enabled
    pub use_butterworth: bool,
    /// The Butterworth cutoff as a fraction of the Nyquist frequency
    pub butterworth_sampling_frequency: f64,
    /// SIM chromatograms are sampled more sparsely, so raise the cutoff for them
    pub butterworth_double_frequency_for_sim: bool,
    pub use_savitzky_golay: bool,
    pub savitzky_golay_order: usize,
    /// Smooth even when the minimum peak width is too small to benefit
    pub smooth_regardless_of_minimum_width: bool,
    /// Detect peaks in the smoothed series rather than the raw one
    pub find_peaks_on_smoothed_data: bool,
}

impl Default for SmoothingConfig {
    fn default() -> Self {
        Self {
            use_butterworth: true,
            butterworth_sampling_frequency: 0.25,
            butterworth_double_frequency_for_sim: true,
            use_savitzky_golay: false,
            savitzky_golay_order: 0,
            smooth_regardless_of_minimum_width: true,
            find_peaks_on_smoothed_data: true,
        }
    }
}

impl SmoothingConfig {
    /// No smoothing at all
    pub fn disabled() -> Self {
        Self {
            use_butterworth: false,
            use_savitzky_golay: false,
            ..Default::default()
        }
    }

    pub fn butterworth_frequency(&self, sim_data_present: bool) -> f64 {
        if sim_data_present && self.butterworth_double_frequency_for_sim {
            self.butterworth_sampling_frequency * 2.0
        } else {
            self.butterworth_sampling_frequency
        }
    }
}

/// Parameters for [`SICPeakFinder`]
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct PeakFinderConfig {
    pub intensity_threshold_fraction_of_max: f64,
    pub intensity_threshold_absolute_minimum: f64,
    /// How many scans away from the observed scan a peak may end and still be chosen
    pub max_distance_no_overlap: i32,
    /// The largest upward spike, as a fraction of the apex, an edge may step over
    pub max_upward_spike_fraction: f64,
    pub initial_width_scaler: f64,
    /// The widest initial fitting window, also the potential area window
    pub initial_width_maximum: usize,
    pub peak_width_in_sigma: f64,
    pub use_valleys_for_peak_width: bool,
    pub move_peak_location_to_max_intensity: bool,
    /// Re-estimate the noise level from the data flanking the chosen peak
    pub reestimate_noise_in_peak_vicinity: bool,
    pub smoothing: SmoothingConfig,
    pub sic_noise: NoiseEstimationConfig,
    pub spectrum_noise: NoiseEstimationConfig,
}

impl Default for PeakFinderConfig {
    fn default() -> Self {
        Self {
            intensity_threshold_fraction_of_max: 0.01,
            intensity_threshold_absolute_minimum: 0.0,
            max_distance_no_overlap: 0,
            max_upward_spike_fraction: 0.2,
            initial_width_scaler: 1.0,
            initial_width_maximum: 30,
            peak_width_in_sigma: 4.0,
            use_valleys_for_peak_width: true,
            move_peak_location_to_max_intensity: true,
            reestimate_noise_in_peak_vicinity: true,
            smoothing: SmoothingConfig::default(),
            sic_noise: NoiseEstimationConfig::default(),
            spectrum_noise: NoiseEstimationConfig::mass_spectrum(),
        }
    }
}

/// Options that vary between chromatograms searched with the same configuration
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct PeakSearchOptions {
    /// Prefer the largest peak containing the observed index over the largest peak overall
    pub return_closest_peak: bool,
    pub sim_data_present: bool,
}

impl Default for PeakSearchOptions {
    fn default() -> Self {
        Self {
            return_closest_peak: true,
            sim_data_present: false,
        }
    }
}

/// The outcome of [`SICPeakFinder::find_sic_peak`]
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SICPeakSearch {
    pub peak: SICPeak,
    /// The potential area statistics of this chromatogram alone
    pub potential_area_stats: PotentialAreaStats,
    /// The smoothed intensities between the peak's edges, empty if nothing was smoothed
    pub smoothed: SmoothedSubset,
    /// Whether the detector found the peak, rather than it being synthesized
    pub peak_found: bool,
    pub diagnostics: Vec<Diagnostic>,
}

/// The series peaks are detected in, and how it was made
#[derive(Debug)]
struct DetectionSeries {
    smoothed: Option<Vec<f64>>,
    search_smoothed: bool,
    width_floor: usize,
}

impl DetectionSeries {
    fn raw() -> Self {
        Self {
            smoothed: None,
            search_smoothed: false,
            width_floor: MINIMUM_PEAK_WIDTH,
        }
    }

    fn search<'a>(&'a self, raw: &'a [f64]) -> &'a [f64] {
        match &self.smoothed {
            Some(values) if self.search_smoothed => values,
            _ => raw,
        }
    }

    fn is_smoothed_search(&self) -> bool {
        self.smoothed.is_some() && self.search_smoothed
    }
}

/// Locates and characterizes the peak of a precursor ion in its selected ion chromatogram
#[derive(Debug, Clone, Default)]
pub struct SICPeakFinder<S: SmoothingProvider = FilterBank> {
    pub config: PeakFinderConfig,
    pub smoother: S,
}

impl SICPeakFinder<FilterBank> {
    pub fn new(config: PeakFinderConfig) -> Self {
        Self::with_smoother(config, FilterBank)
    }
}

impl<S: SmoothingProvider> SICPeakFinder<S> {
    pub fn with_smoother(config: PeakFinderConfig, smoother: S) -> Self {
        Self { config, smoother }
    }

    /// Estimate the noise level of a mass spectrum with the spectrum noise settings
    pub fn mass_spectrum_noise(&self, intensities: &[f64]) -> NoiseStats {
        BaselineNoiseEstimator::new(self.config.spectrum_noise).estimate(intensities)
    }

    fn detector(&self, absolute_minimum: f64, width: usize) -> PeakDetector {
        PeakDetector::builder()
            .intensity_threshold_fraction_of_max(self.config.intensity_threshold_fraction_of_max)
            .intensity_threshold_absolute_minimum(absolute_minimum)
            .peak_width_points_minimum(width)
            .peak_width_in_sigma(self.config.peak_width_in_sigma)
            .use_valleys_for_peak_width(self.config.use_valleys_for_peak_width)
            .move_peak_location_to_max_intensity(self.config.move_peak_location_to_max_intensity)
            .build()
    }

    /// The smallest summed intensity above the noise level of any window of
    /// `initial_width_maximum` points holding at least three such points.
    pub fn potential_area(&self, intensities: &[f64], noise: &NoiseStats) -> PotentialAreaStats {
        let n = intensities.len();
        let window = self.config.initial_width_maximum.max(1).min(n.max(1));

        let mut sum = 0.0;
        let mut count = 0usize;
        let mut best: Option<(f64, usize)> = None;
        let above = |v: f64| v > noise.noise_level;
        for i in 0..n {
            if above(intensities[i]) {
                sum += intensities[i];
                count += 1;
            }
            if i >= window && above(intensities[i - window]) {
                sum -= intensities[i - window];
                count -= 1;
            }
            if i + 1 >= window
                && count >= MINIMUM_POTENTIAL_POINTS
                && best.map_or(true, |(area, _)| sum < area)
            {
                best = Some((sum, count));
            }
        }
        match best {
            Some((area, count)) => PotentialAreaStats::new(area, count),
            None => PotentialAreaStats::new(1.0, 0),
        }
    }

    /// The initial minimum peak width in points, scaled by how far the weakest
    /// signal in the region rises above the noise.
    pub fn initial_peak_width(&self, n: usize, noise: &NoiseStats, region: &PotentialAreaStats) -> usize {
        let area = if region.is_valid() {
            region.minimum_potential_peak_area
        } else {
            1.0
        };
        let ratio = if noise.noise_level > 0.0 {
            area / noise.noise_level
        } else {
            1.0
        };
        let estimate = (self.config.initial_width_scaler * 10.0 * ratio.max(1.0).log10()).round();
        let maximum = self.config.initial_width_maximum.max(MINIMUM_PEAK_WIDTH);
        let width = if estimate.is_finite() {
            (estimate.max(0.0) as usize).clamp(MINIMUM_PEAK_WIDTH, maximum)
        } else {
            maximum
        };
        let limit = (0.8 * n as f64).floor() as usize;
        width.min(limit).max(MINIMUM_PEAK_WIDTH)
    }

    fn prepare_series(
        &self,
        raw: &[f64],
        width: usize,
        options: &PeakSearchOptions,
        diagnostics: &mut Vec<Diagnostic>,
    ) -> DetectionSeries {
        let smoothing = &self.config.smoothing;
        let n = raw.len();
        if !(smoothing.use_butterworth || smoothing.use_savitzky_golay) || n < MINIMUM_PEAK_WIDTH {
            return DetectionSeries::raw();
        }
        if width <= MINIMUM_SMOOTHING_WIDTH && !smoothing.smooth_regardless_of_minimum_width {
            return DetectionSeries::raw();
        }

        let mut values = raw.to_vec();
        let result = if smoothing.use_butterworth {
            let frequency = smoothing.butterworth_frequency(options.sim_data_present);
            self.smoother
                .butterworth(&mut values, 0, n - 1, frequency)
                .map(|_| ((1.0 / frequency).round() as usize).max(MINIMUM_PEAK_WIDTH))
        } else {
            let half_width = (width / 2).max(1);
            let order = smoothing.savitzky_golay_order.min(2 * half_width);
            self.smoother
                .savitzky_golay(&mut values, 0, n - 1, half_width, half_width, order)
                .map(|_| MINIMUM_PEAK_WIDTH)
        };

        match result {
            Ok(width_floor) => DetectionSeries {
                smoothed: Some(values),
                search_smoothed: smoothing.find_peaks_on_smoothed_data,
                width_floor: if smoothing.find_peaks_on_smoothed_data {
                    width_floor
                } else {
                    MINIMUM_PEAK_WIDTH
                },
            },
            Err(err) => {
                push_diagnostic(
                    diagnostics,
                    "Searching the raw chromatogram".to_string(),
                    Some(err.into()),
                );
                DetectionSeries::raw()
            }
        }
    }

    /// Choose the candidate with the largest area, limited to those that contain
    /// or are near the observed index when `return_closest_peak` is set.
    fn select_candidate(
        &self,
        candidates: &[PeakCandidate],
        scans: &[f64],
        observed: usize,
        options: &PeakSearchOptions,
    ) -> Option<PeakCandidate> {
        let max_distance = self.config.max_distance_no_overlap.max(0) as f64;
        let near = |c: &PeakCandidate| {
            if c.contains(observed) {
                true
            } else if observed < c.left_edge {
                scans[c.left_edge] - scans[observed] <= max_distance
            } else {
                scans[observed] - scans[c.right_edge] <= max_distance
            }
        };
        candidates
            .iter()
            .filter(|c| !options.return_closest_peak || near(*c))
            .fold(None, |best: Option<PeakCandidate>, c| match best {
                Some(b) if b.area >= c.area => Some(b),
                _ => Some(*c),
            })
    }

    /// Tighten the edges of `peak` against the raw data, then extend them
    /// outwards along `series` for as long as it keeps falling.
    fn refine_edges(&self, raw: &[f64], series: &[f64], peak: &mut SICPeak, smoothed: bool) {
        let n = raw.len();
        let apex = peak.index_max;
        let mut left = peak.index_base_left;
        let mut right = peak.index_base_right;

        while left + 1 < apex && raw[left] == 0.0 && raw[left + 1] == 0.0 {
            left += 1;
        }
        while right > apex + 1 && raw[right] == 0.0 && raw[right - 1] == 0.0 {
            right -= 1;
        }

        while left + 1 < apex && raw[left + 1] < raw[left] {
            left += 1;
        }
        while right > apex + 1 && raw[right - 1] < raw[right] {
            right -= 1;
        }

        let tolerance = self.config.max_upward_spike_fraction * series[apex];
        let max_spikes = if smoothed { 2 } else { 1 };

        let mut spikes = 0;
        while left > 0 {
            if series[left - 1] < series[left] {
                left -= 1;
                continue;
            }
            let rise = series[left - 1] - series[left];
            if spikes < max_spikes && rise <= tolerance && left >= 2 && series[left - 2] < series[left] {
                trace!("Stepping over a spike at {}", left - 1);
                spikes += 1;
                left -= 2;
            } else {
                break;
            }
        }

        spikes = 0;
        while right + 1 < n {
            if series[right + 1] < series[right] {
                right += 1;
                continue;
            }
            let rise = series[right + 1] - series[right];
            if spikes < max_spikes && rise <= tolerance && right + 2 < n && series[right + 2] < series[right] {
                trace!("Stepping over a spike at {}", right + 1);
                spikes += 1;
                right += 2;
            } else {
                break;
            }
        }

        peak.index_base_left = left;
        peak.index_base_right = right;
    }

    /// Count the lesser local maxima between the edges of `peak` that rise far
    /// enough above the valley separating them from the apex.
    pub(crate) fn count_shoulders(
        &self,
        scans: &[f64],
        series: &[f64],
        peak: &SICPeak,
        absolute_minimum: f64,
    ) -> usize {
        let apex_intensity = series[peak.index_max];
        let minimum_intensity = self.config.intensity_threshold_fraction_of_max * apex_intensity;
        let minimum_rise =
            self.config.max_upward_spike_fraction.min(SHOULDER_SPIKE_FRACTION) * apex_intensity;

        self.detector(absolute_minimum, MINIMUM_PEAK_WIDTH)
            .find_peaks(scans, series)
            .into_iter()
            .filter(|c| {
                if c.contains(peak.index_max) || !peak.contains(c.location) {
                    return false;
                }
                let intensity = series[c.location];
                let valley = if c.location < peak.index_max {
                    series[c.right_edge]
                } else {
                    series[c.left_edge]
                };
                intensity >= minimum_intensity && intensity - valley > minimum_rise
            })
            .count()
    }

    /// Find where the nearest substantial peak on either side of `peak` falls
    /// below half of its own maximum on the side facing `peak`.
    fn locate_neighbors(&self, series: &[f64], candidates: &[PeakCandidate], peak: &mut SICPeak) {
        let n = series.len();
        let apex = peak.index_max;
        let (left, right) = (peak.index_base_left, peak.index_base_right);
        let minimum = series[apex] * NEIGHBOR_INTENSITY_FRACTION;
        let qualifies = |c: &&PeakCandidate| series[c.location] >= minimum;

        peak.previous_peak_fwhm_point_right = 0;
        peak.next_peak_fwhm_point_left = n - 1;

        let previous = candidates
            .iter()
            .filter(|c| c.location < left)
            .filter(qualifies)
            .max_by_key(|c| c.location);
        if let Some(previous) = previous {
            let half = series[previous.location] / 2.0;
            let mut i = previous.location;
            while i < apex && series[i] >= half {
                i += 1;
            }
            peak.previous_peak_fwhm_point_right = i;
        }

        let next = candidates
            .iter()
            .filter(|c| c.location > right)
            .filter(qualifies)
            .min_by_key(|c| c.location);
        if let Some(next) = next {
            let half = series[next.location] / 2.0;
            let mut i = next.location;
            while i > apex && series[i] >= half {
                i -= 1;
            }
            peak.next_peak_fwhm_point_left = i;
        }
    }

    fn enforce_bounds(&self, peak: &mut SICPeak, n: usize, diagnostics: &mut Vec<Diagnostic>) {
        peak.index_max = peak.index_max.min(n - 1);
        peak.index_base_right = peak.index_base_right.min(n - 1);
        if peak.index_base_left > peak.index_max {
            report_invariant_violation(
                diagnostics,
                PeakFinderError::EdgeCrossedApex {
                    edge: peak.index_base_left,
                    apex: peak.index_max,
                },
            );
            peak.index_base_left = peak.index_max;
        }
        if peak.index_base_right < peak.index_max {
            report_invariant_violation(
                diagnostics,
                PeakFinderError::EdgeCrossedApex {
                    edge: peak.index_base_right,
                    apex: peak.index_max,
                },
            );
            peak.index_base_right = peak.index_max;
        }
    }

    /// Fill in the width, noise, area, moments and signal-to-noise of `peak`
    fn characterize(
        &self,
        scans: &[f64],
        intensities: &[f64],
        peak: &mut SICPeak,
        estimator: &BaselineNoiseEstimator,
        noise: NoiseStats,
    ) {
        peak.max_intensity = intensities[peak.index_max];
        peak.parent_ion_intensity = intensities[peak.index_observed];

        let mode = estimator.config.mode;
        let use_vicinity = mode == NoiseMode::MeanOfDataInPeakVicinity
            || (self.config.reestimate_noise_in_peak_vicinity && mode != NoiseMode::AbsoluteThreshold);
        let noise = if use_vicinity {
            let vicinity = estimator.estimate_in_peak_vicinity(scans, intensities, peak);
            debug!("Noise near the peak is {vicinity}, was {noise}");
            vicinity
        } else {
            noise
        };
        peak.baseline_noise = noise;

        peak.fwhm_scan_width = full_width_at_half_max(scans, intensities, peak, noise.noise_level, true);
        peak.area = sic_peak_area(scans, intensities, peak);
        peak.statistical_moments = statistical_moments(scans, intensities, peak, noise.noise_level);
        peak.signal_to_noise = signal_to_noise(peak.max_intensity, noise.noise_level);
    }

    /// Find and describe the peak of the ion observed at `observed_index` in `data`.
    ///
    /// `region` accumulates potential area statistics across chromatograms from
    /// the same region. It is read to pick the initial peak width and updated
    /// with this chromatogram's statistics.
    pub fn find_sic_peak(
        &self,
        data: &[SamplePoint],
        observed_index: usize,
        options: &PeakSearchOptions,
        region: &mut PotentialAreaStats,
    ) -> SICPeakSearch {
        let mut diagnostics = Vec::new();
        let estimator = BaselineNoiseEstimator::new(self.config.sic_noise);
        let n = data.len();

        if n == 0 {
            push_diagnostic(
                &mut diagnostics,
                "Nothing to search".to_string(),
                Some(PeakFinderError::EmptyChromatogram),
            );
            let peak = SICPeak {
                baseline_noise: estimator.estimate(&[]),
                ..SICPeak::single_point(0, 0)
            };
            return SICPeakSearch {
                peak,
                potential_area_stats: PotentialAreaStats::new(1.0, 0),
                smoothed: SmoothedSubset::default(),
                peak_found: false,
                diagnostics,
            };
        }

        let observed = if observed_index >= n {
            push_diagnostic(
                &mut diagnostics,
                "Using the last point instead".to_string(),
                Some(PeakFinderError::ObservedIndexOutOfBounds {
                    index: observed_index,
                    length: n,
                }),
            );
            n - 1
        } else {
            observed_index
        };

        let (scans, mut intensities) = to_arrays(data);
        let replaced = clamp_non_finite(&mut intensities);
        if replaced > 0 {
            push_diagnostic(
                &mut diagnostics,
                "Clamped intensities to finite values".to_string(),
                Some(PeakFinderError::NonFiniteIntensities(replaced)),
            );
        }
        debug!(
            "Searching for the peak of m/z {:.4} observed at scan {}",
            data[observed].coordinate(),
            data[observed].scan_number
        );

        let noise = estimator.estimate_at_index(&intensities, observed);
        let potential_area_stats = self.potential_area(&intensities, &noise);
        region.update_from(&potential_area_stats);
        let absolute_minimum = self
            .config
            .intensity_threshold_absolute_minimum
            .max(noise.noise_level * self.config.sic_noise.minimum_signal_to_noise);

        let mut width = self.initial_peak_width(n, &noise, region);
        debug!("Initial peak width is {width} points with {noise}");

        let (detection, selection) = loop {
            let detection = self.prepare_series(&intensities, width, options, &mut diagnostics);
            let series = detection.search(&intensities);
            let candidates = self
                .detector(absolute_minimum, width.max(detection.width_floor))
                .find_peaks(&scans, series);
            trace!("Found {} candidates with width {width}", candidates.len());

            if let Some(best) = self.select_candidate(&candidates, &scans, observed, options) {
                break (detection, Some((best, candidates)));
            }
            if width <= MINIMUM_PEAK_WIDTH {
                break (detection, None);
            }
            width = (width / 2).max(MINIMUM_PEAK_WIDTH);
            debug!("No peak found, retrying with a width of {width} points");
        };

        let series = detection.search(&intensities);
        let (mut peak, peak_found) = match selection {
            Some((best, candidates)) => {
                let index_max = argmax(&intensities[best.left_edge..=best.right_edge])
                    .map(|(i, _)| best.left_edge + i)
                    .unwrap_or(best.location);
                let mut peak = SICPeak {
                    index_observed: observed,
                    index_max,
                    index_base_left: best.left_edge,
                    index_base_right: best.right_edge,
                    ..SICPeak::single_point(observed, n - 1)
                };
                self.refine_edges(&intensities, series, &mut peak, detection.is_smoothed_search());
                self.enforce_bounds(&mut peak, n, &mut diagnostics);
                peak.shoulder_count = self.count_shoulders(&scans, series, &peak, absolute_minimum);
                self.locate_neighbors(series, &candidates, &mut peak);
                debug!("Selected {best}, refined to {peak}");
                (peak, true)
            }
            None => {
                push_diagnostic(
                    &mut diagnostics,
                    "Using a single point peak".to_string(),
                    Some(PeakFinderError::NoPeakFound(observed)),
                );
                (SICPeak::single_point(observed, n - 1), false)
            }
        };

        self.characterize(&scans, &intensities, &mut peak, &estimator, noise);

        let smoothed = match &detection.smoothed {
            Some(values) => SmoothedSubset::new(values, peak.index_base_left, peak.index_base_right),
            None => SmoothedSubset {
                start_index: peak.index_base_left,
                values: Vec::new(),
            },
        };

        SICPeakSearch {
            peak,
            potential_area_stats,
            smoothed,
            peak_found,
            diagnostics,
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::test_data::{chromatogram, gaussian_series, noisy, scan_axis, single_peak, two_peaks};
    use rstest::rstest;

    fn search(
        finder: &SICPeakFinder,
        data: &[SamplePoint],
        observed: usize,
        options: PeakSearchOptions,
    ) -> SICPeakSearch {
        let mut region = PotentialAreaStats::default();
        finder.find_sic_peak(data, observed, &options, &mut region)
    }

    #[test_log::test]
    fn test_single_gaussian() {
        let data = single_peak();
        let finder = SICPeakFinder::new(PeakFinderConfig::default());
        let result = search(&finder, &data, 49, PeakSearchOptions::default());
        let peak = &result.peak;
        assert!(result.peak_found, "{:?}", result.diagnostics);
        assert!(result.diagnostics.is_empty(), "{:?}", result.diagnostics);
        assert!((data[peak.index_max].scan_number - 50).abs() <= 1, "{peak}");
        assert!((11..=12).contains(&peak.fwhm_scan_width), "{peak}");
        assert!((peak.signal_to_noise - 100.0).abs() < 5.0, "{peak}");
        assert!(peak.index_base_left < 40 && peak.index_base_right > 58, "{peak}");
        assert_eq!(peak.shoulder_count, 0);
        assert_eq!(peak.parent_ion_intensity, data[49].intensity);
        assert_eq!(peak.statistical_moments.center_of_mass_scan, 50);
        assert!(peak.area > 12000.0);
        assert_eq!(result.smoothed.start_index, peak.index_base_left);
        assert_eq!(
            result.smoothed.len(),
            peak.index_base_right - peak.index_base_left + 1
        );
    }

    #[test_log::test]
    fn test_empty_chromatogram() {
        let finder = SICPeakFinder::new(PeakFinderConfig::default());
        let result = search(&finder, &[], 0, PeakSearchOptions::default());
        assert!(!result.peak_found);
        assert_eq!(result.peak.index_max, 0);
        assert_eq!(result.peak.index_base_left, 0);
        assert_eq!(result.peak.index_base_right, 0);
        assert_eq!(result.peak.baseline_noise.noise_level, 1.0);
        assert_eq!(result.peak.baseline_noise.points_used, 0);
        assert_eq!(result.diagnostics[0].cause, Some(PeakFinderError::EmptyChromatogram));
    }

    #[rstest]
    #[case(true, 20)]
    #[case(false, 80)]
    fn test_closest_peak_selection(#[case] return_closest_peak: bool, #[case] expected_scan: i32) {
        let data = two_peaks();
        let finder = SICPeakFinder::new(PeakFinderConfig::default());
        let options = PeakSearchOptions {
            return_closest_peak,
            ..Default::default()
        };
        let result = search(&finder, &data, 21, options);
        assert!(result.peak_found);
        let apex_scan = data[result.peak.index_max].scan_number;
        assert!((apex_scan - expected_scan).abs() <= 1, "{}", result.peak);
    }

    #[test]
    fn test_neighbor_half_max_points() {
        let data = two_peaks();
        let finder = SICPeakFinder::new(PeakFinderConfig::default());
        let result = search(&finder, &data, 79, PeakSearchOptions::default());
        let peak = &result.peak;
        // The weak peak is less than a third of the strong one
        assert_eq!(peak.previous_peak_fwhm_point_right, 0);
        assert_eq!(peak.next_peak_fwhm_point_left, data.len() - 1);

        let result = search(&finder, &data, 19, PeakSearchOptions::default());
        let peak = &result.peak;
        assert_eq!(peak.previous_peak_fwhm_point_right, 0);
        let next = peak.next_peak_fwhm_point_left;
        assert!(next > peak.index_base_right && next < 79, "{next}");
    }

    #[test_log::test]
    fn test_no_apex_falls_back() {
        let scans = scan_axis(1, 40);
        let intensities: Vec<f64> = (0..40).map(|i| 400.0 - 5.0 * i as f64).collect();
        let data = chromatogram(&scans, &intensities, 400.0);
        let finder = SICPeakFinder::new(PeakFinderConfig {
            smoothing: SmoothingConfig::disabled(),
            ..Default::default()
        });
        let result = search(&finder, &data, 12, PeakSearchOptions::default());
        assert!(!result.peak_found);
        assert_eq!(result.peak.index_max, 12);
        assert_eq!(result.peak.index_base_left, 12);
        assert_eq!(result.peak.index_base_right, 12);
        assert!(result
            .diagnostics
            .iter()
            .any(|d| d.cause == Some(PeakFinderError::NoPeakFound(12))));
    }

    #[test]
    fn test_observed_index_out_of_bounds() {
        let data = single_peak();
        let finder = SICPeakFinder::new(PeakFinderConfig::default());
        let result = search(&finder, &data, 500, PeakSearchOptions::default());
        assert_eq!(result.peak.index_observed, 99);
        assert_eq!(
            result.diagnostics[0].cause,
            Some(PeakFinderError::ObservedIndexOutOfBounds { index: 500, length: 100 })
        );
    }

    #[test]
    fn test_count_shoulders() {
        let scans = scan_axis(1, 100);
        let series = gaussian_series(&scans, &[(50.0, 5.0, 1000.0), (64.0, 2.0, 500.0)], 0.0);
        let finder = SICPeakFinder::new(PeakFinderConfig::default());
        let peak = SICPeak {
            index_max: 49,
            index_base_left: 30,
            index_base_right: 80,
            ..Default::default()
        };
        assert_eq!(finder.count_shoulders(&scans, &series, &peak, 0.0), 1);

        let narrow = SICPeak {
            index_base_right: 58,
            ..peak
        };
        assert_eq!(finder.count_shoulders(&scans, &series, &narrow, 0.0), 0);
    }

    #[test]
    fn test_initial_peak_width() {
        let finder = SICPeakFinder::new(PeakFinderConfig::default());
        let noise = NoiseStats::new(10.0, 1.0, 50, NoiseMode::TrimmedMedianByAbundance);
        assert_eq!(finder.initial_peak_width(100, &noise, &PotentialAreaStats::new(1000.0, 5)), 20);
        assert_eq!(finder.initial_peak_width(100, &noise, &PotentialAreaStats::new(1e12, 5)), 30);
        assert_eq!(finder.initial_peak_width(10, &noise, &PotentialAreaStats::new(1000.0, 5)), 8);
        assert_eq!(finder.initial_peak_width(100, &noise, &PotentialAreaStats::default()), 3);
        assert_eq!(finder.initial_peak_width(2, &noise, &PotentialAreaStats::new(1000.0, 5)), 3);
    }

    #[test]
    fn test_potential_area() {
        let config = PeakFinderConfig {
            initial_width_maximum: 4,
            ..Default::default()
        };
        let finder = SICPeakFinder::new(config);
        let noise = NoiseStats::new(10.0, 0.0, 0, NoiseMode::AbsoluteThreshold);
        let intensities = [5.0, 20.0, 30.0, 40.0, 5.0, 5.0, 100.0, 100.0, 100.0, 5.0];
        let stats = finder.potential_area(&intensities, &noise);
        assert_eq!(stats, PotentialAreaStats::new(90.0, 3));

        let stats = finder.potential_area(&[1.0, 2.0], &noise);
        assert_eq!(stats, PotentialAreaStats::new(1.0, 0));

        let mut region = PotentialAreaStats::default();
        let data = single_peak();
        let result = finder.find_sic_peak(&data, 49, &PeakSearchOptions::default(), &mut region);
        assert_eq!(region, result.potential_area_stats);
    }

    #[test]
    fn test_edge_refinement_steps_over_spike() {
        let finder = SICPeakFinder::new(PeakFinderConfig::default());
        let raw = [1.0, 2.0, 8.0, 6.0, 20.0, 50.0, 100.0, 50.0, 20.0, 10.0, 5.0];
        let mut peak = SICPeak {
            index_max: 6,
            index_base_left: 4,
            index_base_right: 8,
            ..Default::default()
        };
        finder.refine_edges(&raw, &raw, &mut peak, false);
        // The rise from 6 to 8 is under 20% of the apex and 2 is below 6
        assert_eq!(peak.index_base_left, 0);
        assert_eq!(peak.index_base_right, 10);

        let raw = [0.0, 0.0, 0.0, 0.0, 40.0, 100.0, 40.0, 0.0, 0.0, 0.0];
        let mut peak = SICPeak {
            index_max: 5,
            index_base_left: 0,
            index_base_right: 9,
            ..Default::default()
        };
        finder.refine_edges(&raw, &raw, &mut peak, false);
        assert_eq!(peak.index_base_left, 3);
        assert_eq!(peak.index_base_right, 7);
    }

    /// `tail` rising to an apex of 100, then `tail` reversed
    fn mirrored(tail: &[f64]) -> (Vec<f64>, usize) {
        let mut series = tail.to_vec();
        series.push(100.0);
        series.extend(tail.iter().rev());
        (series, tail.len())
    }

    #[rstest]
    #[case(&[1.0, 2.0, 9.0, 4.0, 12.0, 7.0, 20.0, 50.0], true, (0, 16))]
    #[case(&[1.0, 2.0, 9.0, 4.0, 12.0, 7.0, 20.0, 50.0], false, (3, 13))]
    #[case(&[0.5, 1.0, 3.0, 2.0, 9.0, 4.0, 12.0, 7.0, 20.0, 50.0], true, (3, 17))]
    #[case(&[0.5, 1.0, 3.0, 2.0, 9.0, 4.0, 12.0, 7.0, 20.0, 50.0], false, (5, 15))]
    #[case(&[1.0, 2.0, 40.0, 4.0, 20.0, 50.0], true, (3, 9))]
    fn test_spike_limit(#[case] tail: &[f64], #[case] smoothed: bool, #[case] expected: (usize, usize)) {
        let finder = SICPeakFinder::new(PeakFinderConfig::default());
        let (series, apex) = mirrored(tail);
        let mut peak = SICPeak {
            index_max: apex,
            index_base_left: apex - 2,
            index_base_right: apex + 2,
            ..Default::default()
        };
        finder.refine_edges(&series, &series, &mut peak, smoothed);
        assert_eq!((peak.index_base_left, peak.index_base_right), expected);
    }

    #[cfg(not(feature = "strict-invariants"))]
    #[test]
    fn test_crossed_edges_are_clamped() {
        let finder = SICPeakFinder::new(PeakFinderConfig::default());
        let mut peak = SICPeak {
            index_max: 5,
            index_base_left: 7,
            index_base_right: 3,
            ..Default::default()
        };
        let mut diagnostics = Vec::new();
        finder.enforce_bounds(&mut peak, 10, &mut diagnostics);
        assert_eq!((peak.index_base_left, peak.index_base_right), (5, 5));
        let causes: Vec<_> = diagnostics.into_iter().filter_map(|d| d.cause).collect();
        assert_eq!(
            causes,
            vec![
                PeakFinderError::EdgeCrossedApex { edge: 7, apex: 5 },
                PeakFinderError::EdgeCrossedApex { edge: 3, apex: 5 },
            ]
        );
    }

    #[cfg(feature = "strict-invariants")]
    #[test]
    #[should_panic(expected = "crossed the apex")]
    fn test_crossed_edges_panic_when_strict() {
        let finder = SICPeakFinder::new(PeakFinderConfig::default());
        let mut peak = SICPeak {
            index_max: 5,
            index_base_left: 7,
            index_base_right: 9,
            ..Default::default()
        };
        finder.enforce_bounds(&mut peak, 10, &mut Vec::new());
    }

    #[rstest]
    #[case(f64::NAN, 50.0)]
    #[case(f64::INFINITY, 0.0)]
    #[case(f64::NEG_INFINITY, 50.0)]
    fn test_non_finite_intensity(#[case] value: f64, #[case] minimum_signal_to_noise: f64) {
        let scans = scan_axis(1, 60);
        let mut intensities = gaussian_series(&scans, &[(30.0, 4.0, 1000.0)], 10.0);
        intensities[6] = value;
        let data = chromatogram(&scans, &intensities, 455.2);
        let finder = SICPeakFinder::new(PeakFinderConfig::default());
        let result = search(&finder, &data, 29, PeakSearchOptions::default());
        let peak = &result.peak;
        assert!(result.peak_found, "{peak} {:?}", result.diagnostics);
        assert!((data[peak.index_max].scan_number - 30).abs() <= 1, "{peak}");
        assert!(peak.signal_to_noise.is_finite() && peak.area.is_finite(), "{peak}");
        assert!(peak.signal_to_noise > minimum_signal_to_noise, "{peak}");
        assert_eq!(result.diagnostics[0].cause, Some(PeakFinderError::NonFiniteIntensities(1)));
    }

    struct BrokenSmoother;

    impl SmoothingProvider for BrokenSmoother {
        fn butterworth(&self, series: &mut [f64], _: usize, _: usize, _: f64) -> Result<(), SmoothingError> {
            Err(SmoothingError::IntervalTooSmall(0, 0, series.len()))
        }

        fn savitzky_golay(
            &self,
            series: &mut [f64],
            _: usize,
            _: usize,
            _: usize,
            _: usize,
            _: usize,
        ) -> Result<(), SmoothingError> {
            Err(SmoothingError::IntervalTooSmall(0, 0, series.len()))
        }
    }

    #[test_log::test]
    fn test_smoothing_failure_uses_raw_data() {
        let data = single_peak();
        let finder = SICPeakFinder::with_smoother(PeakFinderConfig::default(), BrokenSmoother);
        let mut region = PotentialAreaStats::default();
        let result = finder.find_sic_peak(&data, 49, &PeakSearchOptions::default(), &mut region);
        assert!(result.peak_found);
        assert!(result.smoothed.is_empty());
        assert!(matches!(
            result.diagnostics[0].cause,
            Some(PeakFinderError::Smoothing(SmoothingError::IntervalTooSmall(..)))
        ));
    }

    #[rstest]
    #[case(SmoothingConfig::disabled())]
    #[case(SmoothingConfig { use_butterworth: false, use_savitzky_golay: true, savitzky_golay_order: 2, ..Default::default() })]
    #[case(SmoothingConfig { find_peaks_on_smoothed_data: false, ..Default::default() })]
    fn test_smoothing_modes(#[case] smoothing: SmoothingConfig) {
        let scans = scan_axis(1, 120);
        let intensities = noisy(&gaussian_series(&scans, &[(60.0, 6.0, 2000.0)], 100.0), 30.0);
        let data = chromatogram(&scans, &intensities, 650.3);
        let finder = SICPeakFinder::new(PeakFinderConfig {
            smoothing,
            ..Default::default()
        });
        let result = search(&finder, &data, 58, PeakSearchOptions::default());
        assert!(result.peak_found, "{:?}", result.diagnostics);
        assert!((data[result.peak.index_max].scan_number - 60).abs() <= 2, "{}", result.peak);
        assert!(result.peak.contains(58));
    }

    #[test]
    fn test_parallel_searches() {
        use rayon::prelude::*;
        let finder = SICPeakFinder::new(PeakFinderConfig::default());
        let chromatograms: Vec<Vec<SamplePoint>> = (0..32)
            .map(|i| {
                let scans = scan_axis(1, 100);
                let center = 30.0 + i as f64;
                chromatogram(&scans, &gaussian_series(&scans, &[(center, 4.0, 500.0)], 5.0), 500.0)
            })
            .collect();
        let apexes: Vec<i32> = chromatograms
            .par_iter()
            .enumerate()
            .map(|(i, data)| {
                let mut region = PotentialAreaStats::default();
                let result = finder.find_sic_peak(data, 29 + i, &PeakSearchOptions::default(), &mut region);
                data[result.peak.index_max].scan_number
            })
            .collect();
        for (i, apex) in apexes.into_iter().enumerate() {
            assert!((apex - (30 + i as i32)).abs() <= 1);
        }
    }

    #[test]
    fn test_mass_spectrum_noise() {
        let finder = SICPeakFinder::new(PeakFinderConfig::default());
        let mut intensities = vec![50.0; 100];
        intensities[10] = 5000.0;
        let noise = finder.mass_spectrum_noise(&intensities);
        assert_eq!(noise.noise_level, 50.0);
        assert_eq!(noise.signal_threshold(finder.config.spectrum_noise.minimum_signal_to_noise), 100.0);
    }

    #[cfg(feature = "serde")]
    #[test]
    fn test_config_round_trip() {
        let config = PeakFinderConfig {
            max_distance_no_overlap: 5,
            sic_noise: NoiseEstimationConfig::default().with_mode(NoiseMode::DualTrimmedMeanByAbundance),
            ..Default::default()
        };
        let text = serde_json::to_string(&config).unwrap();
        let dup: PeakFinderConfig = serde_json::from_str(&text).unwrap();
        assert_eq!(config, dup);
    }
}
