//! Locate peaks in a 1D series from the derivatives of a sliding quadratic fit.
//!
//! A quadratic is fit to every window of `peak_width_points_minimum` points. The
//! linear and quadratic coefficients estimate the first and second derivative
//! at the window's midpoint, and a peak is reported wherever the first
//! derivative changes sign from positive to non-positive.
use log::trace;

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

use crate::arrayops::{minmax, trapz};
use crate::least_squares::{fit_polynomial, PolynomialOrder};
use crate::peak::PeakCandidate;

/// The narrowest window that can support a quadratic fit
pub const MINIMUM_PEAK_WIDTH: usize = 3;

/// First and second derivative estimates at each point of a series.
///
/// Points without a full fitting window on both sides hold 0.
#[derive(Debug, Clone, Default)]
pub struct Derivatives {
    pub first: Vec<f64>,
    pub second: Vec<f64>,
}

/// Estimate the first and second derivative of `ys` with respect to `xs` by
/// fitting a quadratic to each window of `width` points.
///
/// Windows whose fit fails leave their midpoint's derivatives at 0.
pub fn fit_segment_derivatives(xs: &[f64], ys: &[f64], width: usize) -> Derivatives {
    let n = xs.len().min(ys.len());
    let mut derivatives = Derivatives {
        first: vec![0.0; n],
        second: vec![0.0; n],
    };
    if width < MINIMUM_PEAK_WIDTH || n < width {
        return derivatives;
    }

    let half_width = width / 2;
    let mut segment_x = Vec::with_capacity(width);
    for start in 0..=(n - width) {
        let mid = start + half_width;
        let x_mid = xs[mid];
        segment_x.clear();
        segment_x.extend(xs[start..start + width].iter().map(|x| x - x_mid));
        match fit_polynomial(&segment_x, &ys[start..start + width], PolynomialOrder::Quadratic) {
            Ok(coefs) => {
                derivatives.first[mid] = coefs.slope();
                derivatives.second[mid] = coefs.concavity();
            }
            Err(err) => {
                trace!("Failed to fit window starting at {start}: {err}");
            }
        }
    }
    derivatives
}

/// A magnitude-concavity peak detector
#[derive(Debug, Clone)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct PeakDetector {
    /// Peaks must reach this fraction of the series maximum
    pub intensity_threshold_fraction_of_max: f64,
    /// Peaks must reach at least this intensity regardless of the series maximum
    pub intensity_threshold_absolute_minimum: f64,
    /// The number of points in each fitting window
    pub peak_width_points_minimum: usize,
    /// The peak width in standard deviations when not using valleys to find edges
    pub peak_width_in_sigma: f64,
    /// Find peak edges by walking out to the nearest valley instead of using
    /// the curvature at the apex
    pub use_valleys_for_peak_width: bool,
    /// Search near the reported apex for the most intense point
    pub move_peak_location_to_max_intensity: bool,
}

impl Default for PeakDetector {
    fn default() -> Self {
        Self {
            intensity_threshold_fraction_of_max: 0.01,
            intensity_threshold_absolute_minimum: 0.0,
            peak_width_points_minimum: 5,
            peak_width_in_sigma: 4.0,
            use_valleys_for_peak_width: true,
            move_peak_location_to_max_intensity: true,
        }
    }
}

/// A builder for configuring [`PeakDetector`]
#[derive(Debug, Clone, Default)]
pub struct PeakDetectorBuilder {
    detector: PeakDetector,
}

impl PeakDetectorBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn intensity_threshold_fraction_of_max(mut self, value: f64) -> Self {
        self.detector.intensity_threshold_fraction_of_max = value;
        self
    }

    pub fn intensity_threshold_absolute_minimum(mut self, value: f64) -> Self {
        self.detector.intensity_threshold_absolute_minimum = value;
        self
    }

    pub fn peak_width_points_minimum(mut self, value: usize) -> Self {
        self.detector.peak_width_points_minimum = value;
        self
    }

    pub fn peak_width_in_sigma(mut self, value: f64) -> Self {
        self.detector.peak_width_in_sigma = value;
        self
    }

    pub fn use_valleys_for_peak_width(mut self, value: bool) -> Self {
        self.detector.use_valleys_for_peak_width = value;
        self
    }

    pub fn move_peak_location_to_max_intensity(mut self, value: bool) -> Self {
        self.detector.move_peak_location_to_max_intensity = value;
        self
    }

    pub fn build(self) -> PeakDetector {
        self.detector
    }
}

impl From<PeakDetectorBuilder> for PeakDetector {
    fn from(value: PeakDetectorBuilder) -> Self {
        value.build()
    }
}

impl PeakDetector {
    pub fn builder() -> PeakDetectorBuilder {
        PeakDetectorBuilder::new()
    }

    /// The intensity a peak's apex must exceed in a series whose maximum is `max_intensity`
    pub fn intensity_threshold(&self, max_intensity: f64) -> f64 {
        (max_intensity * self.intensity_threshold_fraction_of_max)
            .max(self.intensity_threshold_absolute_minimum)
    }

    /// Find all peaks in `ys`, using `xs` as the independent coordinate.
    ///
    /// Returns an empty list if there are fewer than [`MINIMUM_PEAK_WIDTH`] points.
    pub fn find_peaks(&self, xs: &[f64], ys: &[f64]) -> Vec<PeakCandidate> {
        let n = xs.len().min(ys.len());
        let mut peaks = Vec::new();
        if n < MINIMUM_PEAK_WIDTH {
            return peaks;
        }

        let width = self.peak_width_points_minimum.max(MINIMUM_PEAK_WIDTH).min(n);
        let half_width = width / 2;
        let (_, max_intensity) = minmax(&ys[..n]);
        let threshold = self.intensity_threshold(max_intensity);

        let derivatives = fit_segment_derivatives(&xs[..n], &ys[..n], width);
        let last_mid = n - width + half_width;

        for index in half_width..last_mid {
            if !(derivatives.first[index] > 0.0 && derivatives.first[index + 1] <= 0.0) {
                continue;
            }
            if !(ys[index] > threshold || ys[index + 1] > threshold) {
                continue;
            }

            let (left_edge, right_edge) = if self.use_valleys_for_peak_width {
                valley_edges(&derivatives.first, &ys[..n], index, half_width, threshold)
            } else {
                self.sigma_edges(&derivatives.second, &ys[..n], index)
            };

            let mut peak = PeakCandidate::new(index, left_edge, right_edge, 0.0);
            if self.move_peak_location_to_max_intensity {
                relocate_apex(&ys[..n], &mut peak, width);
            }
            clamp_to_bounds(&mut peak, n);
            peak.area = trapz(
                &xs[peak.left_edge..=peak.right_edge],
                &ys[peak.left_edge..=peak.right_edge],
            );
            trace!("Found {peak} with width {width}");
            peaks.push(peak);
        }
        peaks
    }

    /// Estimate the peak edges from the Gaussian standard deviation implied
    /// by the curvature at the apex.
    fn sigma_edges(&self, second_derivative: &[f64], ys: &[f64], index: usize) -> (usize, usize) {
        let n = ys.len();
        let max_width = 4 * n;
        let concavity = second_derivative[index];
        let width_points = if concavity.abs() < f64::EPSILON {
            max_width
        } else {
            let sigma = (ys[index] / concavity).abs().sqrt();
            let width = (self.peak_width_in_sigma * sigma).ceil();
            if !width.is_finite() || width > max_width as f64 {
                max_width
            } else if width < 2.0 {
                2
            } else {
                width as usize
            }
        };

        let half = width_points / 2;
        let left_edge = index.saturating_sub(half);
        let right_edge = if width_points % 2 == 0 {
            index + half - 1
        } else {
            index + half
        };
        (left_edge, right_edge.min(n - 1))
    }
}

/// Walk outwards from `index` until the derivative shows a valley or the
/// signal stays below `threshold` for more than `half_width` points.
fn valley_edges(
    first_derivative: &[f64],
    ys: &[f64],
    index: usize,
    half_width: usize,
    threshold: f64,
) -> (usize, usize) {
    let n = ys.len();
    let back_off = half_width.saturating_sub(1);

    let mut left_edge = 0;
    let mut low_count = 0;
    for i in (0..index).rev() {
        if first_derivative[i] <= 0.0 && first_derivative[i + 1] >= 0.0 {
            left_edge = i;
            break;
        } else if ys[i] < threshold {
            low_count += 1;
            if low_count > half_width {
                left_edge = i + back_off;
                break;
            }
        } else {
            low_count = 0;
        }
    }

    let mut right_edge = n - 1;
    low_count = 0;
    for i in (index + 1)..n {
        if i + 1 < n && first_derivative[i] <= 0.0 && first_derivative[i + 1] >= 0.0 {
            right_edge = i;
            break;
        } else if ys[i] < threshold {
            low_count += 1;
            if low_count > half_width {
                right_edge = i - back_off;
                break;
            }
        } else {
            low_count = 0;
        }
    }
    (left_edge, right_edge)
}

/// Move the apex to the most intense point within a third of the window width,
/// widening the edges if the apex moves past them.
fn relocate_apex(ys: &[f64], peak: &mut PeakCandidate, width: usize) {
    let reach = width / 3;
    let lo = peak.location.saturating_sub(reach);
    let hi = (peak.location + reach).min(ys.len() - 1);
    let mut best = peak.location;
    for i in lo..=hi {
        if ys[i] > ys[best] {
            best = i;
        }
    }
    if best != peak.location {
        trace!("Moving apex from {} to {best}", peak.location);
        peak.location = best;
        peak.left_edge = peak.left_edge.min(best);
        peak.right_edge = peak.right_edge.max(best);
    }
}

fn clamp_to_bounds(peak: &mut PeakCandidate, n: usize) {
    peak.location = peak.location.min(n - 1);
    peak.right_edge = peak.right_edge.min(n - 1);
    peak.left_edge = peak.left_edge.min(peak.location);
    peak.right_edge = peak.right_edge.max(peak.location);
}
