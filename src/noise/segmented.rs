use std::fmt;

use log::trace;

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

use crate::arrayops::floor_non_positive;

use super::{trimmed, BaselineNoiseEstimator, NoiseStats};

/// The confidence levels with a tabulated two-sample t-test critical value
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub enum ConfidenceLevel {
    Conf80Pct,
    #[default]
    Conf90Pct,
    Conf95Pct,
    Conf98Pct,
    Conf99Pct,
    Conf99_5Pct,
    Conf99_8Pct,
    Conf99_9Pct,
}

const CRITICAL_VALUES: [f64; 8] = [1.886, 2.920, 4.303, 6.965, 9.925, 14.089, 22.327, 31.598];

impl ConfidenceLevel {
    pub const fn critical_value(&self) -> f64 {
        CRITICAL_VALUES[*self as usize]
    }
}

/// Test whether the means of two samples differ at `confidence`, using a pooled
/// variance two-sample t-test.
///
/// Returns whether the difference is significant and the t statistic.
pub fn t_test_significant(
    mean1: f64,
    std_dev1: f64,
    n1: usize,
    mean2: f64,
    std_dev2: f64,
    n2: usize,
    confidence: ConfidenceLevel,
) -> (bool, f64) {
    if n1 == 0 || n2 == 0 || n1 + n2 <= 2 {
        return (false, 0.0);
    }
    let (n1f, n2f) = (n1 as f64, n2 as f64);
    let pooled = (((n1f - 1.0) * std_dev1.powi(2) + (n2f - 1.0) * std_dev2.powi(2))
        / (n1f + n2f - 2.0))
        .sqrt();
    let difference = mean1 - mean2;
    if pooled < f64::EPSILON {
        let significant = difference.abs() > f64::EPSILON;
        return (significant, if significant { f64::MAX } else { 0.0 });
    }
    let t = (difference / pooled) * ((n1f * n2f) / (n1f + n2f)).sqrt();
    (t.abs() > confidence.critical_value(), t)
}

/// The noise level of a contiguous, inclusive range of a series
#[derive(Debug, Clone, Copy, Default, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct NoiseStatsSegment {
    pub start_index: usize,
    pub end_index: usize,
    pub stats: NoiseStats,
}

impl NoiseStatsSegment {
    pub fn new(start_index: usize, end_index: usize, stats: NoiseStats) -> Self {
        Self {
            start_index,
            end_index,
            stats,
        }
    }

    pub fn midpoint(&self) -> f64 {
        (self.start_index + self.end_index) as f64 / 2.0
    }

    pub fn contains(&self, index: usize) -> bool {
        self.start_index <= index && index <= self.end_index
    }

    pub fn len(&self) -> usize {
        self.end_index - self.start_index + 1
    }
}

impl fmt::Display for NoiseStatsSegment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}, {}] {}", self.start_index, self.end_index, self.stats)
    }
}

impl BaselineNoiseEstimator {
    /// Split the series into contiguous segments, estimate the dual trimmed mean
    /// of each, and merge adjacent segments whose noise levels are not
    /// significantly different.
    ///
    /// The segments always cover every index of `intensities` exactly once.
    pub fn estimate_segments(&self, intensities: &[f64]) -> Vec<NoiseStatsSegment> {
        let n = intensities.len();
        if n == 0 {
            return Vec::new();
        }
        let values = floor_non_positive(intensities);
        let limit = self.config.dual_trim_std_dev_limit;

        let segment_count = self.config.dual_trim_segment_count.min(n / 2).max(1);
        let segment_length = ((n as f64 / segment_count as f64).round() as usize).max(1);

        let mut segments = Vec::with_capacity(segment_count);
        let mut start = 0;
        for i in 0..segment_count {
            let end = if i + 1 == segment_count {
                n - 1
            } else {
                (start + segment_length - 1).min(n - 1)
            };
            let stats = trimmed::dual_trimmed_mean(&values[start..=end], limit);
            segments.push(NoiseStatsSegment::new(start, end, stats));
            if end + 1 >= n {
                break;
            }
            start = end + 1;
        }

        let mut i = segments.len().saturating_sub(1);
        while i > 0 {
            let left = &segments[i - 1].stats;
            let right = &segments[i].stats;
            let (significant, t) = t_test_significant(
                left.noise_level,
                left.noise_std_dev,
                left.points_used,
                right.noise_level,
                right.noise_std_dev,
                right.points_used,
                self.config.confidence_level,
            );
            if !significant {
                let start = segments[i - 1].start_index;
                let end = segments[i].end_index;
                trace!("Merging noise segments {} and {} (t = {t:.3})", segments[i - 1], segments[i]);
                segments[i - 1] = NoiseStatsSegment::new(
                    start,
                    end,
                    trimmed::dual_trimmed_mean(&values[start..=end], limit),
                );
                segments.remove(i);
            }
            i -= 1;
        }

        let minimum = self.config.minimum_noise_level;
        for segment in segments.iter_mut() {
            segment.stats = segment.stats.clamp_to_minimum(minimum);
        }
        segments
    }
}

/// Find the noise level at `index` from a list of segments.
///
/// Within the outer half of a segment the level is linearly interpolated
/// towards the midpoint of the adjacent segment.
pub fn noise_stats_at_index(segments: &[NoiseStatsSegment], index: usize) -> NoiseStats {
    let Some(last) = segments.len().checked_sub(1) else {
        return NoiseStats::default();
    };
    let position = segments
        .iter()
        .position(|s| s.contains(index))
        .unwrap_or(if index < segments[0].start_index { 0 } else { last });

    let segment = &segments[position];
    let mut stats = segment.stats;
    let x = index as f64;
    let mid = segment.midpoint();

    let neighbor = if x < mid && position > 0 {
        Some(&segments[position - 1])
    } else if x > mid && position < last {
        Some(&segments[position + 1])
    } else {
        None
    };

    if let Some(neighbor) = neighbor {
        let neighbor_mid = neighbor.midpoint();
        let span = mid - neighbor_mid;
        if span.abs() > f64::EPSILON {
            let fraction = (mid - x) / span;
            stats.noise_level = segment.stats.noise_level
                + fraction * (neighbor.stats.noise_level - segment.stats.noise_level);
        }
    }
    stats
}
