use std::iter::Sum;

use num_traits::Float;

/// Integrate `y` over `x` with the trapezoidal rule.
///
/// Segments where `x` does not advance contribute nothing, so repeated points
/// do not change the result.
pub fn trapz<T: Float + Sum>(x: &[T], y: &[T]) -> T {
    let n = x.len().min(y.len());
    if n < 2 {
        return T::zero();
    }
    let half = T::from(0.5).unwrap();
    (0..n - 1)
        .map(|i| {
            let delta = x[i + 1] - x[i];
            delta * half * (y[i + 1] + y[i])
        })
        .sum()
}

pub fn minmax<T: Float>(values: &[T]) -> (T, T) {
    let mut max = -T::infinity();
    let mut min = T::infinity();

    for v in values.iter() {
        if *v > max {
            max = *v;
        }
        if *v < min {
            min = *v
        }
    }
    (min, max)
}

/// The index and value of the largest element, preferring the first on ties.
pub fn argmax<T: Float>(values: &[T]) -> Option<(usize, T)> {
    values.iter().copied().enumerate().fold(None, |best, (i, v)| match best {
        Some((_, bv)) if bv >= v => best,
        _ => Some((i, v)),
    })
}

/// The smallest strictly positive value in `values`, or `default` if there are none.
pub fn minimum_positive<T: Float>(values: &[T], default: T) -> T {
    values
        .iter()
        .copied()
        .filter(|v| *v > T::zero())
        .fold(None, |acc: Option<T>, v| match acc {
            Some(a) if a <= v => Some(a),
            _ => Some(v),
        })
        .unwrap_or(default)
}

/// Replace every non-positive value with the smallest positive value present,
/// or with 1 if there are no positive values at all.
pub fn floor_non_positive(values: &[f64]) -> Vec<f64> {
    let floor = minimum_positive(values, 1.0);
    values
        .iter()
        .map(|v| if *v > 0.0 { *v } else { floor })
        .collect()
}

/// Replace NaN and negative infinity with 0 and positive infinity with the
/// largest finite value present, returning how many values were replaced.
pub fn clamp_non_finite(values: &mut [f64]) -> usize {
    let ceiling = values
        .iter()
        .copied()
        .filter(|v| v.is_finite())
        .fold(0.0, f64::max);
    let mut replaced = 0;
    for v in values.iter_mut().filter(|v| !v.is_finite()) {
        *v = if *v == f64::INFINITY { ceiling } else { 0.0 };
        replaced += 1;
    }
    replaced
}

/// The arithmetic mean and sample standard deviation of `values`.
///
/// The standard deviation is 0 when fewer than two values are given.
pub fn mean_and_std_dev(values: &[f64]) -> (f64, f64) {
    let n = values.len();
    if n == 0 {
        return (0.0, 0.0);
    }
    let mean = values.iter().sum::<f64>() / n as f64;
    if n < 2 {
        return (mean, 0.0);
    }
    let ss: f64 = values.iter().map(|v| (v - mean).powi(2)).sum();
    (mean, (ss / (n - 1) as f64).sqrt())
}
