use std::{env, fs, io};

use sicpeaks::prelude::*;

/// Read `scan<TAB>intensity` lines, or build a noisy two peak chromatogram when no path is given
fn load(path: Option<String>) -> io::Result<Vec<SamplePoint>> {
    let Some(path) = path else {
        return Ok((1..=200)
            .map(|scan| {
                let x = scan as f64;
                let wobble = ((x * 12.9898).sin() * 43758.5453).fract() * 40.0;
                let intensity = 100.0
                    + wobble
                    + 800.0 * (-(x - 60.0).powi(2) / 18.0).exp()
                    + 5000.0 * (-(x - 130.0).powi(2) / 72.0).exp();
                SamplePoint::new(scan, intensity, 612.33, scan as usize)
            })
            .collect());
    };
    let mut points = Vec::new();
    for (i, line) in fs::read_to_string(path)?.lines().enumerate() {
        let mut tokens = line.split_whitespace();
        let (Some(scan), Some(intensity)) = (tokens.next(), tokens.next()) else {
            continue;
        };
        let scan: i32 = scan
            .parse()
            .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;
        let intensity: f64 = intensity
            .parse()
            .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;
        points.push(SamplePoint::new(scan, intensity, 0.0, i));
    }
    Ok(points)
}

fn main() -> io::Result<()> {
    pretty_env_logger::init();
    let data = load(env::args().nth(1))?;
    let observed: usize = env::args()
        .nth(2)
        .and_then(|s| s.parse().ok())
        .unwrap_or(data.len() / 2);

    let finder = SICPeakFinder::new(PeakFinderConfig::default());
    let mut region = PotentialAreaStats::default();
    for return_closest_peak in [true, false] {
        let options = PeakSearchOptions {
            return_closest_peak,
            ..Default::default()
        };
        let result = finder.find_sic_peak(&data, observed, &options, &mut region);
        println!("closest={return_closest_peak} found={} {}", result.peak_found, result.peak);
        println!("  noise: {}", result.peak.baseline_noise);
        println!("  moments: {:?}", result.peak.statistical_moments);
        for diagnostic in result.diagnostics.iter() {
            println!("  {diagnostic}");
        }
    }
    Ok(())
}
