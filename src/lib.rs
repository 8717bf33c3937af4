//! `sicpeaks` locates and characterizes the chromatographic peak of a precursor
//! ion in its selected ion chromatogram (SIC).
//!
//! The search is driven by [`SICPeakFinder`], which estimates the baseline noise
//! of the chromatogram, optionally smooths it, detects candidate peaks with a
//! sliding polynomial fit in [`PeakDetector`] and picks the one belonging to the
//! observed ion. The chosen peak is then described by its width, area,
//! signal-to-noise ratio and [statistical moments](crate::moments).
//!
//! The noise estimators in [`noise`] and the filters in [`smooth`] can also be
//! used on their own.
//!
//! # Usage
//! ```
//! use sicpeaks::{PeakFinderConfig, PeakSearchOptions, PotentialAreaStats, SICPeakFinder, SamplePoint};
//!
//! let data: Vec<SamplePoint> = (1..=100)
//!     .map(|scan| {
//!         let x = scan as f64;
//!         let intensity = 10.0 + 1000.0 * (-(x - 50.0).powi(2) / 50.0).exp();
//!         SamplePoint::new(scan, intensity, 524.26, scan as usize)
//!     })
//!     .collect();
//!
//! let finder = SICPeakFinder::new(PeakFinderConfig::default());
//! let mut region = PotentialAreaStats::default();
//! let result = finder.find_sic_peak(&data, 49, &PeakSearchOptions::default(), &mut region);
//! assert!(result.peak_found);
//! assert_eq!(data[result.peak.index_max].scan_number, 50);
//! println!("{}", result.peak);
//! ```
pub mod arrayops;
pub mod least_squares;
pub mod moments;
pub mod noise;
pub mod peak;
pub mod peak_detector;
pub mod peak_finder;
pub mod peak_statistics;
pub mod prelude;
pub mod smooth;

#[cfg(test)]
mod test_data;

pub use crate::noise::{BaselineNoiseEstimator, NoiseEstimationConfig, NoiseMode, NoiseStats};
pub use crate::peak::{
    PeakCandidate, PotentialAreaStats, SICPeak, SamplePoint, SmoothedSubset, StatisticalMoments,
};
pub use crate::peak_detector::PeakDetector;
pub use crate::peak_finder::{
    Diagnostic, PeakFinderConfig, PeakFinderError, PeakSearchOptions, SICPeakFinder, SICPeakSearch,
    SmoothingConfig,
};
pub use crate::smooth::{FilterBank, SmoothingError, SmoothingProvider};
