use std::fmt;

use mzpeaks::peak::MZPoint;
use mzpeaks::{CoordinateLike, IntensityMeasurement, MZ};

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

use crate::noise::NoiseStats;

/// A single observation along a selected ion chromatogram
#[derive(Debug, Clone, Copy, Default, PartialEq, PartialOrd)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct SamplePoint {
    pub scan_number: i32,
    pub intensity: f64,
    /// The m/z observed in this scan
    pub mass: f64,
    /// The index of the scan in the parent run's scan list
    pub scan_index: usize,
}

impl SamplePoint {
    pub fn new(scan_number: i32, intensity: f64, mass: f64, scan_index: usize) -> Self {
        Self {
            scan_number,
            intensity,
            mass,
            scan_index,
        }
    }
}

impl CoordinateLike<MZ> for SamplePoint {
    #[inline]
    fn coordinate(&self) -> f64 {
        self.mass
    }
}

impl IntensityMeasurement for SamplePoint {
    #[inline]
    fn intensity(&self) -> f32 {
        self.intensity as f32
    }
}

impl From<SamplePoint> for MZPoint {
    fn from(point: SamplePoint) -> Self {
        Self {
            mz: point.mass,
            intensity: point.intensity as f32,
        }
    }
}

impl fmt::Display for SamplePoint {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(
            f,
            "SamplePoint({}, {}, {}, {})",
            self.scan_number, self.intensity, self.mass, self.scan_index
        )
    }
}

/// Split a chromatogram into its scan number and intensity arrays
pub fn to_arrays(data: &[SamplePoint]) -> (Vec<f64>, Vec<f64>) {
    data.iter()
        .map(|p| (p.scan_number as f64, p.intensity))
        .unzip()
}

/// A putative peak reported by [`PeakDetector`](crate::peak_detector::PeakDetector).
///
/// All positions are indices into the series the detector was run on.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct PeakCandidate {
    /// The apex of the peak
    pub location: usize,
    pub left_edge: usize,
    pub right_edge: usize,
    /// The trapezoidal area between the edges
    pub area: f64,
    pub is_valid: bool,
}

impl PeakCandidate {
    pub fn new(location: usize, left_edge: usize, right_edge: usize, area: f64) -> Self {
        Self {
            location,
            left_edge,
            right_edge,
            area,
            is_valid: true,
        }
    }

    /// Whether `index` falls between the edges of this peak
    pub fn contains(&self, index: usize) -> bool {
        self.left_edge <= index && index <= self.right_edge
    }

    pub fn width(&self) -> usize {
        self.right_edge - self.left_edge + 1
    }
}

impl fmt::Display for PeakCandidate {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(
            f,
            "PeakCandidate({}, [{}, {}], {})",
            self.location, self.left_edge, self.right_edge, self.area
        )
    }
}

/// Shape statistics of a chromatographic peak treated as a distribution over scan numbers
#[derive(Debug, Clone, Copy, Default, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct StatisticalMoments {
    /// The zeroth moment, the area under the peak
    pub area: f64,
    /// The first moment, rounded to the nearest scan number
    pub center_of_mass_scan: i32,
    /// The square root of the second central moment
    pub std_dev: f64,
    /// The third central moment divided by the cube of `std_dev`
    pub skew: f64,
    /// The Kolmogorov-Smirnov statistic against a Gaussian with the same mean and standard deviation
    pub ks_statistic: f64,
    pub data_count_used: usize,
}

/// The summed intensity of the weakest window of signal in a chromatogram.
///
/// Used to compare how much signal is available across chromatograms from
/// the same region. The caller owns instances that span multiple searches.
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct PotentialAreaStats {
    pub minimum_potential_peak_area: f64,
    pub peak_count_basis: usize,
}

impl Default for PotentialAreaStats {
    fn default() -> Self {
        Self {
            minimum_potential_peak_area: 0.0,
            peak_count_basis: 0,
        }
    }
}

impl PotentialAreaStats {
    pub fn new(minimum_potential_peak_area: f64, peak_count_basis: usize) -> Self {
        Self {
            minimum_potential_peak_area,
            peak_count_basis,
        }
    }

    /// Whether these statistics were computed from any qualifying window
    pub fn is_valid(&self) -> bool {
        self.minimum_potential_peak_area > 1.0 && self.peak_count_basis > 0
    }

    /// Adopt `other` if it is valid and describes a weaker signal than `self`.
    ///
    /// Returns `true` if `self` was changed.
    pub fn update_from(&mut self, other: &PotentialAreaStats) -> bool {
        if !other.is_valid() {
            return false;
        }
        if self.peak_count_basis == 0
            || other.minimum_potential_peak_area < self.minimum_potential_peak_area
        {
            *self = *other;
            true
        } else {
            false
        }
    }
}

/// A contiguous stretch of a smoothed intensity series, for plotting alongside the raw data
#[derive(Debug, Clone, Default, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct SmoothedSubset {
    /// The index of the first value in the source chromatogram
    pub start_index: usize,
    pub values: Vec<f64>,
}

impl SmoothedSubset {
    pub fn new(series: &[f64], start_index: usize, end_index: usize) -> Self {
        if series.is_empty() || start_index > end_index {
            return Self {
                start_index,
                values: Vec::new(),
            };
        }
        let end_index = end_index.min(series.len() - 1);
        Self {
            start_index,
            values: series[start_index..=end_index].to_vec(),
        }
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}

/// The peak located in a selected ion chromatogram and its descriptors.
///
/// All `index_*` fields are indices into the chromatogram.
#[derive(Debug, Clone, Default, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct SICPeak {
    /// Where the precursor ion was originally observed
    pub index_observed: usize,
    pub index_max: usize,
    pub index_base_left: usize,
    pub index_base_right: usize,
    /// Where the nearest significant peak to the left falls below half of its maximum
    pub previous_peak_fwhm_point_right: usize,
    /// Where the nearest significant peak to the right falls below half of its maximum
    pub next_peak_fwhm_point_left: usize,
    pub fwhm_scan_width: i32,
    pub max_intensity: f64,
    pub area: f64,
    pub shoulder_count: usize,
    pub signal_to_noise: f64,
    pub baseline_noise: NoiseStats,
    pub statistical_moments: StatisticalMoments,
    pub parent_ion_intensity: f64,
}

impl SICPeak {
    /// A peak spanning only `index`
    pub fn single_point(index: usize, last_index: usize) -> Self {
        Self {
            index_observed: index,
            index_max: index,
            index_base_left: index,
            index_base_right: index,
            previous_peak_fwhm_point_right: 0,
            next_peak_fwhm_point_left: last_index,
            ..Default::default()
        }
    }

    pub fn contains(&self, index: usize) -> bool {
        self.index_base_left <= index && index <= self.index_base_right
    }
}

impl fmt::Display for SICPeak {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(
            f,
            "SICPeak(apex={}, base=[{}, {}], intensity={}, area={}, fwhm={}, s/n={})",
            self.index_max,
            self.index_base_left,
            self.index_base_right,
            self.max_intensity,
            self.area,
            self.fwhm_scan_width,
            self.signal_to_noise
        )
    }
}
