use criterion::{black_box, Criterion};

use sicpeaks::noise::{BaselineNoiseEstimator, NoiseEstimationConfig, NoiseMode};
use sicpeaks::prelude::*;

fn chromatogram(n: usize) -> Vec<SamplePoint> {
    (0..n)
        .map(|i| {
            let x = i as f64;
            let wobble = ((x * 12.9898).sin() * 43758.5453).fract() * 50.0;
            let center = n as f64 / 2.0;
            let intensity = 200.0 + wobble + 1e4 * (-(x - center).powi(2) / 98.0).exp();
            SamplePoint::new(i as i32 + 1, intensity, 733.4, i)
        })
        .collect()
}

fn find_sic_peak(c: &mut Criterion) {
    let data = chromatogram(300);
    let finder = SICPeakFinder::new(PeakFinderConfig::default());
    c.bench_function("find_sic_peak", |b| {
        b.iter(|| {
            let mut region = PotentialAreaStats::default();
            finder.find_sic_peak(black_box(&data), 150, &PeakSearchOptions::default(), &mut region)
        })
    });
}

fn noise_estimation(c: &mut Criterion) {
    let intensities: Vec<f64> = chromatogram(2000).iter().map(|p| p.intensity).collect();
    let median = BaselineNoiseEstimator::new(NoiseEstimationConfig::default());
    let dual = BaselineNoiseEstimator::new(
        NoiseEstimationConfig::default().with_mode(NoiseMode::DualTrimmedMeanByAbundance),
    );
    c.bench_function("trimmed_median_noise", |b| b.iter(|| median.estimate(black_box(&intensities))));
    c.bench_function("segmented_noise", |b| {
        b.iter(|| dual.estimate_at_index(black_box(&intensities), 1000))
    });
}

criterion::criterion_group!(benches, find_sic_peak, noise_estimation);
criterion::criterion_main!(benches);
