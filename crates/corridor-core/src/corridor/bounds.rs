//! Raw upper/lower envelopes from historical samples.

use crate::config::ConfigError;
use crate::model::Sample;

/// Derives the raw corridor envelopes via a sliding window plus margin.
///
/// For each index the window of `window_size` grid points (half on each
/// side, clipped at the edges) yields
/// `upper = max(window) + margin`, `lower = min(window) − margin` with
/// `margin = mean(window) · margin_percent / 100`. Output lengths equal the
/// input length; widening `margin_percent` never narrows the envelopes.
pub fn build_bounds(
    samples: &[Sample],
    window_size: i64,
    margin_percent: f64,
) -> Result<(Vec<Sample>, Vec<Sample>), ConfigError> {
    if window_size <= 0 {
        return Err(ConfigError::Invalid {
            key: "corrdor_params.window_size",
            reason: format!("must be positive, got {}", window_size),
        });
    }
    if margin_percent <= 0.0 {
        return Err(ConfigError::Invalid {
            key: "corrdor_params.margin_percent",
            reason: format!("must be positive, got {}", margin_percent),
        });
    }

    let n = samples.len();
    let mut upper = Vec::with_capacity(n);
    let mut lower = Vec::with_capacity(n);
    let half = (window_size / 2) as usize;

    for i in 0..n {
        let lo = i.saturating_sub(half);
        let hi = (i + half).min(n - 1);
        let window = &samples[lo..=hi];

        let mut min = f64::INFINITY;
        let mut max = f64::NEG_INFINITY;
        let mut sum = 0.0;
        for s in window {
            min = min.min(s.v);
            max = max.max(s.v);
            sum += s.v;
        }
        let avg = sum / window.len() as f64;
        let margin = avg * margin_percent / 100.0;

        upper.push(Sample::new(samples[i].t, max + margin));
        lower.push(Sample::new(samples[i].t, min - margin));
    }
    Ok((upper, lower))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn series(values: &[f64]) -> Vec<Sample> {
        values
            .iter()
            .enumerate()
            .map(|(i, &v)| Sample::new(i as i64 * 10, v))
            .collect()
    }

    #[test]
    fn envelopes_track_window_extremes() {
        let samples = series(&[1.0, 2.0, 3.0, 2.0, 1.0]);
        let (upper, lower) = build_bounds(&samples, 2, 10.0).unwrap();
        assert_eq!(upper.len(), 5);
        assert_eq!(lower.len(), 5);

        // Index 2: window [1..=3] = {2,3,2}, avg 7/3, margin 7/30.
        let margin = (7.0 / 3.0) * 0.1;
        assert!((upper[2].v - (3.0 + margin)).abs() < 1e-12);
        assert!((lower[2].v - (2.0 - margin)).abs() < 1e-12);

        // Edges clip the window instead of failing.
        assert!((upper[0].v - (2.0 + 1.5 * 0.1)).abs() < 1e-12);
    }

    #[test]
    fn wider_margin_never_narrows() {
        let samples = series(&[4.0, 7.0, 5.0, 9.0, 6.0, 3.0]);
        let (up5, lo5) = build_bounds(&samples, 4, 5.0).unwrap();
        let (up20, lo20) = build_bounds(&samples, 4, 20.0).unwrap();
        for i in 0..samples.len() {
            assert!(up20[i].v >= up5[i].v);
            assert!(lo20[i].v <= lo5[i].v);
        }
    }

    #[test]
    fn empty_input_yields_empty_envelopes() {
        let (upper, lower) = build_bounds(&[], 4, 5.0).unwrap();
        assert!(upper.is_empty());
        assert!(lower.is_empty());
    }

    #[test]
    fn rejects_non_positive_parameters() {
        assert!(build_bounds(&series(&[1.0]), 0, 5.0).is_err());
        assert!(build_bounds(&series(&[1.0]), 4, 0.0).is_err());
        assert!(build_bounds(&series(&[1.0]), 4, -2.0).is_err());
    }
}
