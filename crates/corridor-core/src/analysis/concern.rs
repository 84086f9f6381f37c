//! Integral "concern" scalars.
//!
//! Each scalar compares the present window's anomalies against the
//! historical envelope and lands in `[0, 1]`: the duration·size area of the
//! current excursions is set against the historical percentile area, passed
//! through `exp`, clamped at 10 and normalized.

use crate::config::DefaultPercentiles;
use crate::model::DirectionStats;

use super::calculate_percentile;

/// Concern from the single worst current anomaly.
///
/// Returns 0 when either side of the comparison has no area (no history,
/// no current excursions).
pub fn integral_concern(
    history: &DirectionStats,
    current: &DirectionStats,
    dp: &DefaultPercentiles,
) -> f64 {
    let hist_duration = calculate_percentile(&history.durations, dp.duration);
    let hist_size = calculate_percentile(&history.sizes, dp.size);
    if hist_duration == 0.0 || hist_size == 0.0 {
        return 0.0;
    }
    let hist_area = hist_duration * hist_size;

    let cur_duration = max_value(&current.durations) * dp.duration_multiplier;
    let cur_size = max_value(&current.sizes) * dp.size_multiplier;
    if cur_duration == 0.0 || cur_size == 0.0 {
        return 0.0;
    }

    clamp_ratio((cur_duration * cur_size / hist_area).exp())
}

/// Concern from the sum over all current anomalies.
///
/// The historical duration percentile is first adjusted for the live window
/// size: a window shorter than the historical percentile caps each
/// historical duration at `min(hist_duration, window/2)` before the
/// percentile is retaken.
pub fn concern_sum(
    history: &DirectionStats,
    current: &DirectionStats,
    dp: &DefaultPercentiles,
    window_secs: f64,
) -> f64 {
    let hist_duration = adjust_percentile(&history.durations, dp.duration, window_secs);
    let hist_size = calculate_percentile(&history.sizes, dp.size);
    if hist_duration == 0.0 || hist_size == 0.0 {
        return 0.0;
    }
    let hist_area = hist_duration * hist_size;

    let mut current_area = 0.0;
    for (duration, size) in current.durations.iter().zip(&current.sizes) {
        current_area += (duration * dp.duration_multiplier) * (size * dp.size_multiplier);
    }
    if current_area == 0.0 {
        return 0.0;
    }

    clamp_ratio((current_area / hist_area).exp())
}

/// Caps historical durations to the live window before taking the
/// percentile, so short windows are not drowned by long historical
/// excursions.
fn adjust_percentile(durations: &[f64], p: f64, window_secs: f64) -> f64 {
    let hist = calculate_percentile(durations, p);
    if hist == 0.0 || window_secs >= hist {
        return hist;
    }
    let cap = hist.min(window_secs / 2.0);
    let capped: Vec<f64> = durations.iter().map(|d| d.min(cap)).collect();
    calculate_percentile(&capped, p)
}

fn max_value(values: &[f64]) -> f64 {
    values.iter().copied().fold(0.0, f64::max)
}

fn clamp_ratio(ratio: f64) -> f64 {
    ratio.min(10.0) / 10.0
}
