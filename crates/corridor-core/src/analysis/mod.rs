//! Anomaly statistics from corridor/series comparison.
//!
//! For each direction the detector walks the samples in time order, tracks
//! excursion episodes against the interpolated boundary, and accumulates
//! per-sample durations and relative sizes. Raw arrays feed the live
//! response; percentile summaries are the cache-persisted shape.

pub mod concern;

use crate::grouper::value_at;
use crate::model::{AnomalyStats, CombinedStats, Direction, DirectionStats, Sample};

// ============================================================
// Stats calculation
// ============================================================

/// Computes `{above, below, combined}` for samples against the corridor.
///
/// With `raw = true` the duration/size arrays are the ascending-sorted raw
/// values; with `raw = false` they are replaced by fixed-length percentile
/// summaries over `percentiles` (the persisted shape).
pub fn calculate_anomaly_stats(
    samples: &[Sample],
    upper: &[Sample],
    lower: &[Sample],
    percentiles: &[i64],
    raw: bool,
) -> AnomalyStats {
    let mut sorted: Vec<Sample> = samples.to_vec();
    sorted.sort_by_key(|s| s.t);

    let mut above = direction_stats(&sorted, upper, Direction::Above);
    let mut below = direction_stats(&sorted, lower, Direction::Below);

    let combined = CombinedStats {
        time_outside_percent: above.time_outside_percent + below.time_outside_percent,
        anomaly_count: above.anomaly_count + below.anomaly_count,
    };

    if raw {
        sort_ascending(&mut above.durations);
        sort_ascending(&mut above.sizes);
        sort_ascending(&mut below.durations);
        sort_ascending(&mut below.sizes);
    } else {
        summarize(&mut above, percentiles);
        summarize(&mut below, percentiles);
    }

    AnomalyStats { above, below, combined }
}

/// One direction's episode walk over time-ordered samples.
fn direction_stats(sorted: &[Sample], boundary: &[Sample], direction: Direction) -> DirectionStats {
    let mut stats = DirectionStats::zero(direction);
    if sorted.is_empty() {
        return stats;
    }

    let mut in_anomaly = false;
    let mut anomaly_start = sorted[0].t;
    let mut running_duration = 0.0;
    let mut time_outside = 0.0;

    for (i, sample) in sorted.iter().enumerate() {
        let bound = value_at(boundary, sample.t);
        let outside = match direction {
            Direction::Above => sample.v > bound,
            Direction::Below => sample.v < bound,
        };

        if outside {
            if !in_anomaly {
                // The excursion started somewhere after the previous sample.
                anomaly_start = if i > 0 { sorted[i - 1].t } else { sample.t };
                in_anomaly = true;
            }
            running_duration = (sample.t - anomaly_start) as f64;
            stats.durations.push(running_duration);
            let size = (sample.v - bound).abs() / bound.max(1.0) * 100.0;
            stats.sizes.push(round2(size));
            stats.anomaly_count += 1;
        } else if in_anomaly {
            time_outside += running_duration;
            in_anomaly = false;
        }
    }
    if in_anomaly {
        time_outside += running_duration;
    }

    let span = (sorted[sorted.len() - 1].t - sorted[0].t) as f64;
    stats.time_outside_percent = if span > 0.0 {
        100.0 * time_outside / span
    } else {
        0.0
    };
    stats
}

// ============================================================
// Percentile summarization
// ============================================================

/// Replaces raw arrays with fixed-length percentile summaries.
///
/// With at most `|percentiles|` raw values the array is the ascending raw
/// values padded with `0.00`; otherwise each configured percentile is taken
/// by linear interpolation and rounded to 2 decimals.
fn summarize(stats: &mut DirectionStats, percentiles: &[i64]) {
    stats.durations = percentile_summary(&stats.durations, percentiles);
    stats.sizes = percentile_summary(&stats.sizes, percentiles);
}

fn percentile_summary(values: &[f64], percentiles: &[i64]) -> Vec<f64> {
    let target = percentiles.len();
    if values.len() <= target {
        let mut out = values.to_vec();
        sort_ascending(&mut out);
        out.resize(target, 0.0);
        return out;
    }

    let mut sorted = values.to_vec();
    sort_ascending(&mut sorted);
    percentiles
        .iter()
        .map(|&p| round2(interpolated_percentile(&sorted, p as f64)))
        .collect()
}

/// A single percentile over the positive values of the set.
///
/// Non-positive values are dropped first; returns 0 on an empty set.
pub fn calculate_percentile(values: &[f64], p: f64) -> f64 {
    let mut positive: Vec<f64> = values.iter().copied().filter(|v| *v > 0.0).collect();
    if positive.is_empty() {
        return 0.0;
    }
    sort_ascending(&mut positive);
    interpolated_percentile(&positive, p)
}

/// Linear interpolation at rank `(p/100)·(n−1)` over an ascending slice.
fn interpolated_percentile(sorted: &[f64], p: f64) -> f64 {
    let n = sorted.len();
    if n == 0 {
        return 0.0;
    }
    let rank = (p / 100.0) * (n - 1) as f64;
    let lo = rank.floor() as usize;
    let hi = rank.ceil() as usize;
    let lo = lo.min(n - 1);
    let hi = hi.min(n - 1);
    if lo == hi {
        return sorted[lo];
    }
    let frac = rank - lo as f64;
    sorted[lo] + (sorted[hi] - sorted[lo]) * frac
}

fn sort_ascending(values: &mut [f64]) {
    values.sort_by(|a, b| a.total_cmp(b));
}

fn round2(x: f64) -> f64 {
    (x * 100.0).round() / 100.0
}
