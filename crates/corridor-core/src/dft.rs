//! Discrete Fourier baseline: detrending, harmonic selection, restoration.
//!
//! The boundary curves of the corridor are compressed to a linear trend plus
//! a handful of harmonics chosen by their amplitude–time contribution, and
//! restored over arbitrary horizons. Restoration phases run over the
//! dimensionless position inside the historical window, so projecting into a
//! live window stays continuous across the boundary.

use std::f64::consts::{FRAC_2_PI, PI};

use crate::model::{Harmonic, Sample, TrendLine};

/// OLS denominators below this are treated as degenerate (flat time axis).
const SLOPE_DENOM_EPS: f64 = 1e-10;

/// Harmonics with amplitude below this are dropped after selection.
pub const AMPLITUDE_FLOOR: f64 = 1e-12;

// ---------------------------------------------------------------------------
// Detrending
// ---------------------------------------------------------------------------

/// A detrended boundary series: the removed trend (absolute time) and the
/// residual signal fed to the transform.
#[derive(Clone, Debug, PartialEq)]
pub struct Detrended {
    pub trend: TrendLine,
    pub residual: Vec<f64>,
}

/// OLS slope over the samples, `None` when the denominator is degenerate
/// (single point, duplicate timestamps).
///
/// The normal equations run on `t − t0` to stay well-conditioned with epoch
/// timestamps; the slope is invariant under that shift.
pub fn ols_slope(samples: &[Sample]) -> Option<f64> {
    let n = samples.len();
    if n == 0 {
        return None;
    }
    let t0 = samples[0].t;
    let nf = n as f64;
    let mut sum_t = 0.0;
    let mut sum_y = 0.0;
    let mut sum_tt = 0.0;
    let mut sum_ty = 0.0;
    for s in samples {
        let t = (s.t - t0) as f64;
        sum_t += t;
        sum_y += s.v;
        sum_tt += t * t;
        sum_ty += t * s.v;
    }
    let mean_t = sum_t / nf;
    let mean_y = sum_y / nf;

    let denom = sum_tt - nf * mean_t * mean_t;
    if denom.abs() < SLOPE_DENOM_EPS {
        return None;
    }
    Some((sum_ty - nf * mean_t * mean_y) / denom)
}

/// Removes the fitted ramp `slope·(t − t0)` anchored at the first sample.
///
/// The series level deliberately stays in the residual — it becomes the DC
/// term, which downstream width enforcement reads as the boundary level.
/// The returned trend is the removed ramp in absolute form
/// (`intercept = −slope·t0`), so restoration adds back exactly what was
/// taken. A degenerate time axis removes the mean instead
/// (`slope = 0, intercept = mean_y`).
pub fn detrend_with_slope(samples: &[Sample], slope: Option<f64>) -> Detrended {
    if samples.is_empty() {
        return Detrended {
            trend: TrendLine::default(),
            residual: Vec::new(),
        };
    }
    match slope {
        Some(slope) => {
            let t0 = samples[0].t;
            let trend = TrendLine::new(slope, -slope * t0 as f64);
            let residual = samples.iter().map(|s| s.v - trend.value_at(s.t)).collect();
            Detrended { trend, residual }
        }
        None => {
            let mean_y = samples.iter().map(|s| s.v).sum::<f64>() / samples.len() as f64;
            Detrended {
                trend: TrendLine::new(0.0, mean_y),
                residual: samples.iter().map(|s| s.v - mean_y).collect(),
            }
        }
    }
}

/// Fits and removes the trend in one step.
pub fn detrend_series(samples: &[Sample]) -> Detrended {
    detrend_with_slope(samples, ols_slope(samples))
}

/// Arithmetic mean of the two boundary slopes, for `use_common_trend`.
/// A degenerate boundary contributes a flat slope.
pub fn common_slope(upper: &[Sample], lower: &[Sample]) -> f64 {
    (ols_slope(upper).unwrap_or(0.0) + ols_slope(lower).unwrap_or(0.0)) / 2.0
}

// ---------------------------------------------------------------------------
// Transform
// ---------------------------------------------------------------------------

/// Full real DFT over bins `k = 0 … ⌊N/2⌋`.
///
/// `amp_0 = |X_0|/N` (a negative mean enters through `phase = π`); for
/// `k ≥ 1`, `amp_k = 2·|X_k|/N`.
pub fn transform(x: &[f64]) -> Vec<Harmonic> {
    let n = x.len();
    if n == 0 {
        return Vec::new();
    }
    let nf = n as f64;

    let mut harmonics = Vec::with_capacity(n / 2 + 1);
    for k in 0..=n / 2 {
        let mut re = 0.0;
        let mut im = 0.0;
        for (i, &v) in x.iter().enumerate() {
            let angle = 2.0 * PI * k as f64 * i as f64 / nf;
            re += v * angle.cos();
            im -= v * angle.sin();
        }
        let norm = if k == 0 { nf } else { nf / 2.0 };
        let amplitude = (re * re + im * im).sqrt() / norm;
        let phase = if re == 0.0 && im == 0.0 {
            0.0
        } else {
            im.atan2(re)
        };
        harmonics.push(Harmonic {
            k: k as u32,
            amplitude,
            phase,
        });
    }
    harmonics
}

// ---------------------------------------------------------------------------
// Contribution-based selection
// ---------------------------------------------------------------------------

/// Integral contribution of one harmonic over the window `[0, T]`.
///
/// DC contributes `amp·T`; for `k ≥ 1` the integral
/// `∫₀ᵀ |amp·cos(2πkt/T + φ)| dt` is approximated by a midpoint Riemann sum
/// on the sampling grid.
fn contribution(h: &Harmonic, total_duration: f64, grid_points: usize) -> f64 {
    if h.k == 0 {
        return h.amplitude * total_duration;
    }
    if grid_points == 0 || total_duration <= 0.0 {
        return 0.0;
    }
    let dt = total_duration / grid_points as f64;
    let mut sum = 0.0;
    for i in 0..grid_points {
        let t = (i as f64 + 0.5) * dt;
        let angle = 2.0 * PI * h.k as f64 * t / total_duration + h.phase;
        sum += (h.amplitude * angle.cos()).abs() * dt;
    }
    sum
}

/// Keeps the DC term plus the `max_harmonics − 1` highest-contribution
/// non-DC harmonics.
///
/// A harmonic whose contribution falls below `min_amplitude · T · 2/π` (the
/// mean absolute integral of a `min_amplitude` cosine) is dropped before
/// ranking; amplitudes below `AMPLITUDE_FLOOR` are filtered afterwards.
/// The result is ordered by `k`.
pub fn select_harmonics(
    harmonics: &[Harmonic],
    total_duration: f64,
    grid_points: usize,
    max_harmonics: usize,
    min_amplitude: f64,
) -> Vec<Harmonic> {
    let threshold = min_amplitude * total_duration * FRAC_2_PI;

    let mut survivors: Vec<(Harmonic, f64)> = harmonics
        .iter()
        .map(|h| (*h, contribution(h, total_duration, grid_points)))
        .filter(|(_, c)| *c >= threshold)
        .collect();

    let dc: Vec<Harmonic> = survivors
        .iter()
        .filter(|(h, _)| h.k == 0)
        .map(|(h, _)| *h)
        .collect();

    survivors.retain(|(h, _)| h.k != 0);
    survivors.sort_by(|a, b| b.1.total_cmp(&a.1));
    survivors.truncate(max_harmonics.saturating_sub(1));

    let mut selected: Vec<Harmonic> = dc
        .into_iter()
        .chain(survivors.into_iter().map(|(h, _)| h))
        .filter(|h| h.amplitude >= AMPLITUDE_FLOOR)
        .collect();
    selected.sort_by_key(|h| h.k);
    selected
}

// ---------------------------------------------------------------------------
// Restoration
// ---------------------------------------------------------------------------

/// Restores a curve on `{start, start+step, …, ≤ end}`.
///
/// The phase argument uses `θ = (t − data_start) / total_duration`, not raw
/// time, so harmonics continue smoothly past the historical window when
/// projecting into the live one. The trend, when given, is added in absolute
/// time.
pub fn restore(
    coeffs: &[Harmonic],
    trend: Option<&TrendLine>,
    data_start: i64,
    total_duration: i64,
    start: i64,
    end: i64,
    step: i64,
) -> Vec<Sample> {
    if step < 1 || end < start {
        return Vec::new();
    }
    let duration = total_duration as f64;

    let mut out = Vec::with_capacity(((end - start) / step + 1) as usize);
    let mut t = start;
    while t <= end {
        let theta = if duration > 0.0 {
            (t - data_start) as f64 / duration
        } else {
            0.0
        };
        let mut y = 0.0;
        for h in coeffs {
            y += h.amplitude * (2.0 * PI * h.k as f64 * theta + h.phase).cos();
        }
        if let Some(trend) = trend {
            y += trend.value_at(t);
        }
        out.push(Sample::new(t, y));
        t += step;
    }
    out
}
