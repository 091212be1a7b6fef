use crate::domain::daily::DailyAggregate;
use crate::insights::trend::extreme_index;
use std::collections::BTreeSet;

pub const DEFAULT_MAX_POINTS: usize = 60;

/// Reduces a date-sorted series to at most `max_points` days.
///
/// Keeps every `ceil(n / max_points)`-th day plus the first day, the last
/// day, the peak and the trough. When that union is over the bound, surplus
/// stride samples are dropped from the tail; the four anchors always stay.
/// This deliberately differs from truncating to the first `max_points`
/// indices, which could lose the last day or a late peak/trough.
pub fn downsample(sorted: &[DailyAggregate], max_points: usize) -> Vec<DailyAggregate> {
    downsample_indices(sorted, max_points)
        .into_iter()
        .map(|i| sorted[i].clone())
        .collect()
}

pub fn downsample_indices(sorted: &[DailyAggregate], max_points: usize) -> Vec<usize> {
    let n = sorted.len();
    if n <= max_points {
        return (0..n).collect();
    }
    if max_points == 0 {
        return Vec::new();
    }

    let mut anchors = BTreeSet::from([0, n - 1]);
    if let Some(i) = extreme_index(sorted, |c, best| c > best) {
        anchors.insert(i);
    }
    if let Some(i) = extreme_index(sorted, |c, best| c < best) {
        anchors.insert(i);
    }

    let stride = n.div_ceil(max_points);
    let mut picked: BTreeSet<usize> = (0..n).step_by(stride).collect();
    picked.extend(anchors.iter().copied());

    if picked.len() > max_points {
        let surplus = picked.len() - max_points;
        let drop: Vec<usize> = picked
            .iter()
            .rev()
            .copied()
            .filter(|i| !anchors.contains(i))
            .take(surplus)
            .collect();
        for i in drop {
            picked.remove(&i);
        }
    }

    // Anchors alone (at most four) can still exceed a tiny bound.
    picked.into_iter().take(max_points).collect()
}
