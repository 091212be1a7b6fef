use crate::domain::record::RawRecord;
use serde::{Deserialize, Serialize};

/// Running totals for one date key during a single aggregation pass.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DateAccumulator {
    pub clicks_sum: f64,
    pub impressions_sum: f64,
    /// Σ ctr × impressions
    pub ctr_weighted_sum: f64,
    /// Σ position × impressions
    pub position_weighted_sum: f64,
}

impl DateAccumulator {
    pub fn add(&mut self, record: &RawRecord) {
        let clicks = finite_or_zero(record.clicks);
        let impressions = finite_or_zero(record.impressions);
        let ctr = finite_or_zero(record.click_through_rate);
        let position = finite_or_zero(record.mean_position);

        self.clicks_sum += clicks;
        self.impressions_sum += impressions;
        self.ctr_weighted_sum += ctr * impressions;
        self.position_weighted_sum += position * impressions;
    }

    pub fn finalize(self, date: String) -> DailyAggregate {
        DailyAggregate {
            date,
            clicks: finite_or_zero(self.clicks_sum),
            impressions: finite_or_zero(self.impressions_sum),
            ctr: weighted_mean(self.ctr_weighted_sum, self.impressions_sum),
            position: weighted_mean(self.position_weighted_sum, self.impressions_sum),
        }
    }
}

/// Finalized statistics for one date. `ctr` and `position` are always finite.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DailyAggregate {
    pub date: String,
    pub clicks: f64,
    pub impressions: f64,
    pub ctr: f64,
    pub position: f64,
}

/// Impression-weighted mean; zero when there is no weight or the result is not finite.
pub fn weighted_mean(weighted_sum: f64, weight: f64) -> f64 {
    if weight == 0.0 {
        return 0.0;
    }
    finite_or_zero(weighted_sum / weight)
}

pub fn finite_or_zero(v: f64) -> f64 {
    if v.is_finite() {
        v
    } else {
        0.0
    }
}
