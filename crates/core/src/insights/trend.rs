use crate::domain::daily::{weighted_mean, DailyAggregate};
use crate::domain::insights::{DayPoint, StepChange, Totals, Trend};

/// Sums over the window plus impression-weighted ctr/position.
pub fn compute_totals(series: &[DailyAggregate]) -> Totals {
    let mut clicks = 0.0;
    let mut impressions = 0.0;
    let mut ctr_weighted = 0.0;
    let mut position_weighted = 0.0;
    for d in series {
        clicks += d.clicks;
        impressions += d.impressions;
        ctr_weighted += d.ctr * d.impressions;
        position_weighted += d.position * d.impressions;
    }

    Totals {
        days: series.len(),
        clicks,
        impressions,
        ctr: weighted_mean(ctr_weighted, impressions),
        position: weighted_mean(position_weighted, impressions),
    }
}

/// Trend descriptors for a date-sorted series. Empty input gives an all-absent trend.
pub fn compute_trend(sorted: &[DailyAggregate]) -> Trend {
    let (Some(first), Some(last)) = (sorted.first(), sorted.last()) else {
        return Trend::default();
    };

    let peak = extreme_index(sorted, |candidate, best| candidate > best).map(|i| day_point(&sorted[i]));
    let trough = extreme_index(sorted, |candidate, best| candidate < best).map(|i| day_point(&sorted[i]));

    let mut biggest_spike: Option<StepChange> = None;
    let mut biggest_drop: Option<StepChange> = None;
    for w in sorted.windows(2) {
        let delta = w[1].clicks - w[0].clicks;
        if delta > 0.0 && biggest_spike.as_ref().map_or(true, |s| delta > s.delta) {
            biggest_spike = Some(step(&w[0], &w[1], delta));
        }
        if delta < 0.0 && biggest_drop.as_ref().map_or(true, |s| delta < s.delta) {
            biggest_drop = Some(step(&w[0], &w[1], delta));
        }
    }

    Trend {
        clicks_change_pct: pct_change(first.clicks, last.clicks),
        impressions_change_pct: pct_change(first.impressions, last.impressions),
        peak,
        trough,
        biggest_spike,
        biggest_drop,
    }
}

/// Index of the max (or min) clicks day. Strict comparison keeps the first occurrence on ties.
pub fn extreme_index(
    series: &[DailyAggregate],
    better: impl Fn(f64, f64) -> bool,
) -> Option<usize> {
    let mut best: Option<usize> = None;
    for (i, d) in series.iter().enumerate() {
        match best {
            Some(b) if !better(d.clicks, series[b].clicks) => {}
            _ => best = Some(i),
        }
    }
    best
}

pub fn pct_change(from: f64, to: f64) -> f64 {
    if from == 0.0 {
        return 0.0;
    }
    let pct = (to - from) / from * 100.0;
    if pct.is_finite() {
        pct
    } else {
        0.0
    }
}

fn day_point(d: &DailyAggregate) -> DayPoint {
    DayPoint {
        date: d.date.clone(),
        clicks: d.clicks,
    }
}

fn step(from: &DailyAggregate, to: &DailyAggregate, delta: f64) -> StepChange {
    StepChange {
        from: from.date.clone(),
        to: to.date.clone(),
        delta,
    }
}
