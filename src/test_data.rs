//! Synthetic chromatograms for tests
use crate::peak::SamplePoint;

macro_rules! assert_is_close {
    ($t1:expr, $t2:expr, $tol:expr, $label:literal) => {
        assert!(
            ($t1 - $t2).abs() < $tol,
            "Observed {} {}, expected {}, difference {}",
            $label,
            $t1,
            $t2,
            $t1 - $t2,
        );
    };
    ($t1:expr, $t2:expr, $tol:expr, $label:literal, $obj:ident) => {
        assert!(
            ($t1 - $t2).abs() < $tol,
            "Observed {} {}, expected {}, difference {} from {:?}",
            $label,
            $t1,
            $t2,
            $t1 - $t2,
            $obj
        );
    };
}

pub(crate) use assert_is_close;

/// `count` consecutive scan numbers starting at `start`
pub fn scan_axis(start: i32, count: usize) -> Vec<f64> {
    (0..count).map(|i| (start + i as i32) as f64).collect()
}

/// A flat `floor` plus a Gaussian for each `(center, sigma, amplitude)`
pub fn gaussian_series(xs: &[f64], peaks: &[(f64, f64, f64)], floor: f64) -> Vec<f64> {
    xs.iter()
        .map(|x| {
            floor
                + peaks
                    .iter()
                    .map(|(center, sigma, amplitude)| {
                        amplitude * (-(x - center).powi(2) / (2.0 * sigma.powi(2))).exp()
                    })
                    .sum::<f64>()
        })
        .collect()
}

/// Add reproducible uniform noise in `[-amplitude, amplitude)` to `values`
pub fn noisy(values: &[f64], amplitude: f64) -> Vec<f64> {
    values
        .iter()
        .enumerate()
        .map(|(i, v)| {
            let h = ((i as f64 + 1.0) * 12.9898).sin() * 43758.5453;
            let u = h - h.floor();
            v + amplitude * (2.0 * u - 1.0)
        })
        .collect()
}

pub fn chromatogram(scans: &[f64], intensities: &[f64], mass: f64) -> Vec<SamplePoint> {
    scans
        .iter()
        .zip(intensities.iter())
        .enumerate()
        .map(|(i, (scan, intensity))| SamplePoint::new(*scan as i32, *intensity, mass, i * 4))
        .collect()
}

/// Scans 1 to 100 with a Gaussian of height 1000 and width 5 at scan 50 over a floor of 10
pub fn single_peak() -> Vec<SamplePoint> {
    let scans = scan_axis(1, 100);
    let intensities = gaussian_series(&scans, &[(50.0, 5.0, 1000.0)], 10.0);
    chromatogram(&scans, &intensities, 524.26)
}

/// Scans 1 to 100 with a weak peak at scan 20 and a strong peak at scan 80
pub fn two_peaks() -> Vec<SamplePoint> {
    let scans = scan_axis(1, 100);
    let intensities = gaussian_series(&scans, &[(20.0, 3.0, 200.0), (80.0, 5.0, 1000.0)], 10.0);
    chromatogram(&scans, &intensities, 785.84)
}
