use crate::domain::daily::DailyAggregate;
use crate::domain::insights::Anomaly;

pub const DEFAULT_Z_THRESHOLD: f64 = 2.0;
const MIN_POINTS: usize = 3;

/// Flags days whose clicks lie more than `threshold` population standard
/// deviations from the window mean.
pub fn detect_anomalies(series: &[DailyAggregate], threshold: f64) -> Vec<Anomaly> {
    if series.len() < MIN_POINTS {
        return Vec::new();
    }

    let n = series.len() as f64;
    let mean = series.iter().map(|d| d.clicks).sum::<f64>() / n;
    let variance = series
        .iter()
        .map(|d| (d.clicks - mean).powi(2))
        .sum::<f64>()
        / n;
    let stddev = variance.sqrt();
    if stddev == 0.0 || !stddev.is_finite() {
        return Vec::new();
    }

    series
        .iter()
        .filter_map(|d| {
            let z = (d.clicks - mean) / stddev;
            (z.abs() > threshold).then(|| Anomaly {
                date: d.date.clone(),
                clicks: d.clicks,
                z_score: z,
            })
        })
        .collect()
}
