//! Smoothing filters applied to intensity series before peak detection.
//!
//! The peak finder only depends on the [`SmoothingProvider`] trait. [`FilterBank`]
//! is the default implementation: a zero-phase second order low-pass Butterworth
//! filter and a local polynomial Savitzky-Golay filter.
use nalgebra::{DMatrix, DVector};
use thiserror::Error;

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Error)]
pub enum SmoothingError {
    #[error("The sampling frequency must be between 0 and 1, received {0}")]
    InvalidSamplingFrequency(f64),
    #[error("The polynomial order term {0} must be less than the window size {1}")]
    PolynomialOrderTooLarge(usize, usize),
    #[error("Cannot smooth the interval [{0}, {1}] of a series with {2} points")]
    IntervalTooSmall(usize, usize, usize),
    #[error("Failed to solve for coefficients: {0}")]
    FailedToSolveCoefficients(&'static str),
}

/// A source of smoothing filters.
///
/// Both methods smooth `series[start..=end]` in place and leave the rest of
/// the series untouched.
pub trait SmoothingProvider {
    /// Apply a low-pass Butterworth filter whose cutoff is `sampling_frequency`
    /// times the Nyquist frequency.
    fn butterworth(
        &self,
        series: &mut [f64],
        start: usize,
        end: usize,
        sampling_frequency: f64,
    ) -> Result<(), SmoothingError>;

    /// Replace each point with the value at that point of a polynomial of
    /// `order` fit to the `left_width` points before it and the `right_width`
    /// points after it.
    fn savitzky_golay(
        &self,
        series: &mut [f64],
        start: usize,
        end: usize,
        left_width: usize,
        right_width: usize,
        order: usize,
    ) -> Result<(), SmoothingError>;
}

/// Coefficients of a second order IIR section, normalized so `a0 = 1`
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct Biquad {
    pub b0: f64,
    pub b1: f64,
    pub b2: f64,
    pub a1: f64,
    pub a2: f64,
}

impl Biquad {
    /// A second order low-pass Butterworth section via the bilinear transform.
    ///
    /// `cutoff` is a fraction of the Nyquist frequency.
    pub fn low_pass(cutoff: f64) -> Self {
        let k = (std::f64::consts::PI * cutoff / 2.0).tan();
        let k2 = k * k;
        let sqrt2 = std::f64::consts::SQRT_2;
        let norm = 1.0 / (1.0 + sqrt2 * k + k2);
        let b0 = k2 * norm;
        Self {
            b0,
            b1: 2.0 * b0,
            b2: b0,
            a1: 2.0 * (k2 - 1.0) * norm,
            a2: (1.0 - sqrt2 * k + k2) * norm,
        }
    }

    /// Filter `values` in place, starting from the steady state for a
    /// constant signal equal to the first value.
    pub fn filter(&self, values: &mut [f64]) {
        let Some(first) = values.first().copied() else {
            return;
        };
        let mut z2 = (self.b2 - self.a2) * first;
        let mut z1 = (self.b1 + self.b2 - self.a1 - self.a2) * first;
        for v in values.iter_mut() {
            let x = *v;
            let y = self.b0 * x + z1;
            z1 = self.b1 * x - self.a1 * y + z2;
            z2 = self.b2 * x - self.a2 * y;
            *v = y;
        }
    }

    /// Filter forwards then backwards, cancelling the phase shift
    pub fn filtfilt(&self, values: &mut [f64]) {
        self.filter(values);
        values.reverse();
        self.filter(values);
        values.reverse();
    }
}

/// Fit a polynomial of `order` to `(x, y)` by least squares with a singular
/// value decomposition of the Vandermonde matrix.
fn polyfit(x: &[f64], y: &[f64], order: usize) -> Result<Vec<f64>, SmoothingError> {
    let nc = order + 1;
    let nr = x.len();

    let mut system = DMatrix::<f64>::zeros(nr, nc);
    x.iter().enumerate().for_each(|(row_i, x)| {
        system[(row_i, 0)] = 1.0;
        (1..nc).for_each(|col_j| system[(row_i, col_j)] = x.powi(col_j as i32));
    });

    let beta = DVector::from_row_slice(y);
    let decomp = nalgebra::linalg::SVD::new(system, true, true);
    match decomp.solve(&beta, 1e-12) {
        Ok(val) => Ok(val.data.into()),
        Err(e) => Err(SmoothingError::FailedToSolveCoefficients(e)),
    }
}

/// The default [`SmoothingProvider`]
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct FilterBank;

impl FilterBank {
    fn check_interval(series: &[f64], start: usize, end: usize) -> Result<(), SmoothingError> {
        if start >= end || end >= series.len() {
            Err(SmoothingError::IntervalTooSmall(start, end, series.len()))
        } else {
            Ok(())
        }
    }
}

impl SmoothingProvider for FilterBank {
    fn butterworth(
        &self,
        series: &mut [f64],
        start: usize,
        end: usize,
        sampling_frequency: f64,
    ) -> Result<(), SmoothingError> {
        if !(sampling_frequency > 0.0 && sampling_frequency < 1.0) {
            return Err(SmoothingError::InvalidSamplingFrequency(sampling_frequency));
        }
        Self::check_interval(series, start, end)?;
        Biquad::low_pass(sampling_frequency).filtfilt(&mut series[start..=end]);
        Ok(())
    }

    fn savitzky_golay(
        &self,
        series: &mut [f64],
        start: usize,
        end: usize,
        left_width: usize,
        right_width: usize,
        order: usize,
    ) -> Result<(), SmoothingError> {
        let window_length = left_width + right_width + 1;
        if order >= window_length {
            return Err(SmoothingError::PolynomialOrderTooLarge(order, window_length));
        }
        Self::check_interval(series, start, end)?;

        let source = series[start..=end].to_vec();
        let n = source.len();
        let mut x = Vec::with_capacity(window_length);
        for i in 0..n {
            let lo = i.saturating_sub(left_width);
            let hi = (i + right_width).min(n - 1);
            x.clear();
            x.extend((lo..=hi).map(|j| j as f64 - i as f64));
            let local_order = order.min(hi - lo);
            let coefs = polyfit(&x, &source[lo..=hi], local_order)?;
            series[start + i] = coefs[0];
        }
        Ok(())
    }
}
