use crate::domain::daily::DailyAggregate;
use serde::{Deserialize, Serialize};

/// Bounded summary of one date window, built per request and never persisted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InsightsPayload {
    pub range: DateWindow,
    pub totals: Totals,
    pub trend: Trend,
    pub anomalies: Vec<Anomaly>,
    /// Number of days in the window before downsampling.
    pub series_total_points: usize,
    pub series: Vec<DailyAggregate>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DateWindow {
    pub start: String,
    pub end: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Totals {
    pub days: usize,
    pub clicks: f64,
    pub impressions: f64,
    pub ctr: f64,
    pub position: f64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Trend {
    /// Percent change first → last day; 0 when the first value is 0.
    pub clicks_change_pct: f64,
    pub impressions_change_pct: f64,
    pub peak: Option<DayPoint>,
    pub trough: Option<DayPoint>,
    pub biggest_spike: Option<StepChange>,
    pub biggest_drop: Option<StepChange>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DayPoint {
    pub date: String,
    pub clicks: f64,
}

/// Day-over-day change in clicks between two consecutive days of the window.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StepChange {
    pub from: String,
    pub to: String,
    pub delta: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Anomaly {
    pub date: String,
    pub clicks: f64,
    pub z_score: f64,
}
