//! Reduction of a date window of daily aggregates to a bounded payload.
//!
//! Everything here is a pure function of its inputs.

pub mod anomaly;
pub mod downsample;
pub mod trend;

use crate::domain::daily::DailyAggregate;
use crate::domain::insights::{DateWindow, InsightsPayload};
use crate::error::{CoreError, Result};

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SummaryOptions {
    pub max_points: usize,
    pub z_threshold: f64,
}

impl Default for SummaryOptions {
    fn default() -> Self {
        Self {
            max_points: downsample::DEFAULT_MAX_POINTS,
            z_threshold: anomaly::DEFAULT_Z_THRESHOLD,
        }
    }
}

/// Days whose key lies in `[start, end]` (inclusive, plain string order).
pub fn filter_by_range(series: &[DailyAggregate], start: &str, end: &str) -> Vec<DailyAggregate> {
    series
        .iter()
        .filter(|d| d.date.as_str() >= start && d.date.as_str() <= end)
        .cloned()
        .collect()
}

pub fn validate_window(start: &str, end: &str) -> Result<()> {
    if start > end {
        return Err(CoreError::InvalidRange(format!(
            "start {start} is after end {end}"
        )));
    }
    Ok(())
}

pub fn summarize(series: &[DailyAggregate], start: &str, end: &str) -> InsightsPayload {
    summarize_with(series, start, end, SummaryOptions::default())
}

pub fn summarize_with(
    series: &[DailyAggregate],
    start: &str,
    end: &str,
    opts: SummaryOptions,
) -> InsightsPayload {
    let mut window = filter_by_range(series, start, end);
    window.sort_by(|a, b| a.date.cmp(&b.date));

    InsightsPayload {
        range: DateWindow {
            start: start.to_string(),
            end: end.to_string(),
        },
        totals: trend::compute_totals(&window),
        trend: trend::compute_trend(&window),
        anomalies: anomaly::detect_anomalies(&window, opts.z_threshold),
        series_total_points: window.len(),
        series: downsample::downsample(&window, opts.max_points),
    }
}

/// Serializes the payload, rejecting it when it exceeds `max_bytes`.
pub fn serialize_within_limit(payload: &InsightsPayload, max_bytes: usize) -> Result<String> {
    let json = serde_json::to_string(payload)
        .map_err(|e| CoreError::Aggregation(format!("failed to serialize insights payload: {e}")))?;
    if json.len() > max_bytes {
        return Err(CoreError::RangeTooLarge {
            size: json.len(),
            limit: max_bytes,
        });
    }
    Ok(json)
}
