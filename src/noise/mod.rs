//! Estimate the baseline noise level of an intensity series.
//!
//! Every mode first replaces non-positive intensities with the smallest positive
//! intensity in the series, and every mode clamps its result to the configured
//! minimum noise level.
use std::fmt;

use log::debug;

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

use crate::arrayops::floor_non_positive;

mod segmented;
mod trimmed;
mod vicinity;

pub use segmented::{noise_stats_at_index, t_test_significant, ConfidenceLevel, NoiseStatsSegment};

/// The trim fraction used whenever a mode falls back to a trimmed median
pub const FALLBACK_TRIM_FRACTION: f64 = 0.33;

/// The ways a noise level can be estimated
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub enum NoiseMode {
    /// Use [`NoiseEstimationConfig::absolute_level`] as is
    AbsoluteThreshold,
    /// The mean of the values in the lowest `trim_fraction` of the intensity range
    TrimmedMeanByAbundance,
    /// The mean of the lowest `trim_fraction` of the values
    TrimmedMeanByCount,
    /// The median of the values in the lowest `trim_fraction` of the intensity range
    #[default]
    TrimmedMedianByAbundance,
    /// The mean after discarding values more than `dual_trim_std_dev_limit`
    /// standard deviations from the mean
    DualTrimmedMeanByAbundance,
    /// The mean of the data flanking a peak
    MeanOfDataInPeakVicinity,
}

impl fmt::Display for NoiseMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}", self)
    }
}

/// Parameters for [`BaselineNoiseEstimator`]
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct NoiseEstimationConfig {
    pub mode: NoiseMode,
    /// The noise level reported in [`NoiseMode::AbsoluteThreshold`] mode
    pub absolute_level: f64,
    pub minimum_signal_to_noise: f64,
    /// No mode reports a noise level below this
    pub minimum_noise_level: f64,
    pub trim_fraction: f64,
    pub dual_trim_std_dev_limit: f64,
    pub dual_trim_segment_count: usize,
    /// The confidence needed to keep adjacent noise segments apart
    pub confidence_level: ConfidenceLevel,
}

impl Default for NoiseEstimationConfig {
    fn default() -> Self {
        Self {
            mode: NoiseMode::TrimmedMedianByAbundance,
            absolute_level: 0.0,
            minimum_signal_to_noise: 0.0,
            minimum_noise_level: 1.0,
            trim_fraction: 0.75,
            dual_trim_std_dev_limit: 5.0,
            dual_trim_segment_count: 3,
            confidence_level: ConfidenceLevel::default(),
        }
    }
}

impl NoiseEstimationConfig {
    /// The defaults for estimating the noise in a single mass spectrum
    pub fn mass_spectrum() -> Self {
        Self {
            trim_fraction: 0.5,
            minimum_signal_to_noise: 2.0,
            ..Default::default()
        }
    }

    pub fn with_mode(mut self, mode: NoiseMode) -> Self {
        self.mode = mode;
        self
    }
}

/// A noise level estimate and how it was made
#[derive(Debug, Clone, Copy, Default, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct NoiseStats {
    pub noise_level: f64,
    /// 0 if the noise level was not sampled or was clamped
    pub noise_std_dev: f64,
    pub points_used: usize,
    pub mode: NoiseMode,
}

impl NoiseStats {
    pub fn new(noise_level: f64, noise_std_dev: f64, points_used: usize, mode: NoiseMode) -> Self {
        Self {
            noise_level,
            noise_std_dev,
            points_used,
            mode,
        }
    }

    /// The intensity a signal must reach to be `minimum_signal_to_noise` times the noise
    pub fn signal_threshold(&self, minimum_signal_to_noise: f64) -> f64 {
        self.noise_level * minimum_signal_to_noise.max(1.0)
    }

    /// Raise the noise level to `minimum_noise_level`, discarding the standard
    /// deviation if it no longer describes the sampled data.
    pub fn clamp_to_minimum(mut self, minimum_noise_level: f64) -> Self {
        if !(self.noise_level >= minimum_noise_level) {
            self.noise_level = minimum_noise_level;
            self.noise_std_dev = 0.0;
        }
        self
    }
}

impl fmt::Display for NoiseStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "NoiseStats({:.3} ± {:.3}, n={}, {})",
            self.noise_level, self.noise_std_dev, self.points_used, self.mode
        )
    }
}

/// Estimates baseline noise under a [`NoiseEstimationConfig`]
#[derive(Debug, Clone, Copy, Default, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct BaselineNoiseEstimator {
    pub config: NoiseEstimationConfig,
}

impl From<NoiseEstimationConfig> for BaselineNoiseEstimator {
    fn from(config: NoiseEstimationConfig) -> Self {
        Self::new(config)
    }
}

impl BaselineNoiseEstimator {
    pub fn new(config: NoiseEstimationConfig) -> Self {
        Self { config }
    }

    fn empty(&self) -> NoiseStats {
        NoiseStats::new(self.config.minimum_noise_level, 0.0, 0, self.config.mode)
    }

    fn finalize(&self, stats: NoiseStats) -> NoiseStats {
        stats.clamp_to_minimum(self.config.minimum_noise_level)
    }

    /// Estimate the noise level of the whole series under the configured mode.
    ///
    /// [`NoiseMode::MeanOfDataInPeakVicinity`] needs a peak, so here it falls
    /// back to a trimmed median, see [`Self::estimate_in_peak_vicinity`].
    pub fn estimate(&self, intensities: &[f64]) -> NoiseStats {
        if self.config.mode == NoiseMode::AbsoluteThreshold {
            return self.finalize(NoiseStats::new(
                self.config.absolute_level,
                0.0,
                0,
                NoiseMode::AbsoluteThreshold,
            ));
        }
        if intensities.is_empty() {
            return self.empty();
        }
        let values = floor_non_positive(intensities);
        let stats = self.estimate_floored(&values);
        debug!("Estimated {stats} from {} points", values.len());
        self.finalize(stats)
    }

    /// Estimate the noise level of values that are already strictly positive, without clamping
    pub(crate) fn estimate_floored(&self, values: &[f64]) -> NoiseStats {
        let config = &self.config;
        match config.mode {
            NoiseMode::AbsoluteThreshold => {
                NoiseStats::new(config.absolute_level, 0.0, 0, NoiseMode::AbsoluteThreshold)
            }
            NoiseMode::TrimmedMeanByAbundance => {
                trimmed::trimmed_by_abundance(values, config.trim_fraction, false)
            }
            NoiseMode::TrimmedMedianByAbundance => {
                trimmed::trimmed_by_abundance(values, config.trim_fraction, true)
            }
            NoiseMode::TrimmedMeanByCount => trimmed::trimmed_mean_by_count(values, config.trim_fraction),
            NoiseMode::DualTrimmedMeanByAbundance => {
                trimmed::dual_trimmed_mean(values, config.dual_trim_std_dev_limit)
            }
            NoiseMode::MeanOfDataInPeakVicinity => {
                trimmed::trimmed_by_abundance(values, FALLBACK_TRIM_FRACTION, true)
            }
        }
    }

    /// Estimate the noise level that applies at `index`.
    ///
    /// In [`NoiseMode::DualTrimmedMeanByAbundance`] mode the series is split into
    /// segments whose noise levels are merged when they are not significantly
    /// different, and the level at `index` is interpolated from them. Every
    /// other mode describes the whole series.
    pub fn estimate_at_index(&self, intensities: &[f64], index: usize) -> NoiseStats {
        if self.config.mode != NoiseMode::DualTrimmedMeanByAbundance || intensities.is_empty() {
            return self.estimate(intensities);
        }
        let segments = self.estimate_segments(intensities);
        self.finalize(noise_stats_at_index(&segments, index))
    }
}
