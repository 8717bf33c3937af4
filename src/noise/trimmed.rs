use crate::arrayops::mean_and_std_dev;

use super::{NoiseMode, NoiseStats};

fn sorted(values: &[f64]) -> Vec<f64> {
    let mut values = values.to_vec();
    values.sort_by(|a, b| a.total_cmp(b));
    values
}

/// The median of an already sorted slice
pub(super) fn median(sorted_values: &[f64]) -> f64 {
    let n = sorted_values.len();
    match n {
        0 => 0.0,
        _ if n % 2 == 1 => sorted_values[n / 2],
        _ => (sorted_values[n / 2 - 1] + sorted_values[n / 2]) / 2.0,
    }
}

/// The mean or median of the values no greater than `min + trim_fraction * (max - min)`
pub(super) fn trimmed_by_abundance(values: &[f64], trim_fraction: f64, use_median: bool) -> NoiseStats {
    let mode = if use_median {
        NoiseMode::TrimmedMedianByAbundance
    } else {
        NoiseMode::TrimmedMeanByAbundance
    };
    if values.is_empty() {
        return NoiseStats::new(0.0, 0.0, 0, mode);
    }
    let values = sorted(values);
    let min = values[0];
    let max = values[values.len() - 1];
    let threshold = min + trim_fraction.clamp(0.0, 1.0) * (max - min);

    let count = values.partition_point(|v| *v <= threshold).max(1);
    let subset = &values[..count];
    let (mean, std_dev) = mean_and_std_dev(subset);
    let level = if use_median { median(subset) } else { mean };
    NoiseStats::new(level, std_dev, count, mode)
}

/// The mean of the lowest `trim_fraction` of the values
pub(super) fn trimmed_mean_by_count(values: &[f64], trim_fraction: f64) -> NoiseStats {
    if values.is_empty() {
        return NoiseStats::new(0.0, 0.0, 0, NoiseMode::TrimmedMeanByCount);
    }
    let values = sorted(values);
    let count = ((values.len() as f64 * trim_fraction.clamp(0.0, 1.0)).floor() as usize)
        .clamp(1, values.len());
    let (mean, std_dev) = mean_and_std_dev(&values[..count]);
    NoiseStats::new(mean, std_dev, count, NoiseMode::TrimmedMeanByCount)
}

/// The mean of the values within `std_dev_limit` standard deviations of the mean of all values
pub(super) fn dual_trimmed_mean(values: &[f64], std_dev_limit: f64) -> NoiseStats {
    if values.is_empty() {
        return NoiseStats::new(0.0, 0.0, 0, NoiseMode::DualTrimmedMeanByAbundance);
    }
    let values = sorted(values);
    let (mean, std_dev) = mean_and_std_dev(&values);
    let lower = mean - std_dev_limit * std_dev;
    let upper = mean + std_dev_limit * std_dev;

    let start = values.partition_point(|v| *v < lower);
    let end = values.partition_point(|v| *v <= upper);
    if start >= end {
        return NoiseStats::new(mean, std_dev, values.len(), NoiseMode::DualTrimmedMeanByAbundance);
    }
    let retained = &values[start..end];
    let (mean, std_dev) = mean_and_std_dev(retained);
    NoiseStats::new(mean, std_dev, retained.len(), NoiseMode::DualTrimmedMeanByAbundance)
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_median() {
        assert_eq!(median(&[1.0, 2.0, 9.0]), 2.0);
        assert_eq!(median(&[1.0, 2.0, 4.0, 9.0]), 3.0);
        assert_eq!(median(&[]), 0.0);
    }

    #[test]
    fn test_trimmed_by_abundance() {
        let values = [10.0, 12.0, 11.0, 100.0, 13.0, 14.0];
        // min 10, max 100, keeps values <= 32.5
        let stats = trimmed_by_abundance(&values, 0.25, false);
        assert_eq!(stats.points_used, 5);
        assert_eq!(stats.noise_level, 12.0);
        assert!((stats.noise_std_dev - 2.5f64.sqrt()).abs() < 1e-12);

        let stats = trimmed_by_abundance(&values, 0.25, true);
        assert_eq!(stats.noise_level, 12.0);
        assert_eq!(stats.mode, NoiseMode::TrimmedMedianByAbundance);

        let stats = trimmed_by_abundance(&[5.0, 5.0, 5.0], 0.0, true);
        assert_eq!(stats.points_used, 3);
        assert_eq!(stats.noise_level, 5.0);
    }

    #[test]
    fn test_trimmed_mean_by_count() {
        let values = [4.0, 1.0, 3.0, 2.0, 100.0];
        let stats = trimmed_mean_by_count(&values, 0.5);
        assert_eq!(stats.points_used, 2);
        assert_eq!(stats.noise_level, 1.5);
        let stats = trimmed_mean_by_count(&values, 0.01);
        assert_eq!(stats.points_used, 1);
        assert_eq!(stats.noise_level, 1.0);
    }

    #[test]
    fn test_dual_trimmed_mean() {
        let mut values = vec![10.0; 40];
        values.extend([9.0, 11.0, 9.0, 11.0]);
        values.push(1000.0);
        let stats = dual_trimmed_mean(&values, 2.0);
        assert_eq!(stats.points_used, 44);
        assert!((stats.noise_level - 10.0).abs() < 1e-12);
        assert!(stats.noise_std_dev < 1.0);
    }
}
