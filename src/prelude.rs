pub use crate::noise::{BaselineNoiseEstimator, NoiseEstimationConfig, NoiseMode, NoiseStats};
pub use crate::peak::{PotentialAreaStats, SICPeak, SamplePoint};
pub use crate::peak_finder::{PeakFinderConfig, PeakSearchOptions, SICPeakFinder, SICPeakSearch};
pub use crate::smooth::SmoothingProvider;
