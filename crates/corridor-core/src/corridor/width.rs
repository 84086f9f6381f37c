//! Minimum corridor width enforcement.
//!
//! Restored corridors can pinch shut where the harmonics of the two
//! boundaries interfere. This pass guarantees a minimum spread everywhere by
//! piecewise-linear repair between "healthy-width" break points.

use tracing::warn;

use crate::model::Sample;

/// A grid point whose local width already satisfies the minimum.
#[derive(Clone, Copy, Debug)]
struct BreakPoint {
    t: i64,
    upper: f64,
    lower: f64,
}

/// Enforces a minimum spread between `upper` and `lower` in place.
///
/// `minWidth = factor·|dc_upper − dc_lower|`, falling back to
/// `factor·max(|dc_upper|, |dc_lower|, 1)` when the DC terms give no usable
/// separation. Indices already at or above the minimum are preserved;
/// pinched stretches are overwritten with the linear interpolation between
/// the neighboring break points, so both curves stay continuous in time.
///
/// After the pass `upper_i − lower_i ≥ minWidth − ε` at every index.
pub fn ensure_width(
    upper: &mut [Sample],
    lower: &mut [Sample],
    dc_upper: f64,
    dc_lower: f64,
    factor: f64,
) {
    debug_assert_eq!(upper.len(), lower.len());
    let n = upper.len();
    if n == 0 {
        return;
    }

    let mut min_width = factor * (dc_upper - dc_lower).abs();
    if min_width <= 0.0 {
        min_width = factor * dc_upper.abs().max(dc_lower.abs()).max(1.0);
    }

    let mut breaks: Vec<BreakPoint> = (0..n)
        .filter(|&i| upper[i].v - lower[i].v >= min_width)
        .map(|i| BreakPoint {
            t: upper[i].t,
            upper: upper[i].v,
            lower: lower[i].v,
        })
        .collect();

    if breaks.is_empty() {
        // Nothing healthy to interpolate from: collapse to a constant band.
        warn!(
            "corridor narrower than {} everywhere, collapsing to constant band",
            min_width
        );
        let center = (dc_upper + dc_lower) / 2.0;
        for i in 0..n {
            upper[i].v = center + min_width / 2.0;
            lower[i].v = center - min_width / 2.0;
        }
        return;
    }

    // Break points must cover both endpoints for the interpolation to be
    // defined at every index.
    if breaks[0].t > upper[0].t {
        let first = breaks[0];
        breaks.insert(0, BreakPoint { t: upper[0].t, ..first });
    }
    if breaks[breaks.len() - 1].t < upper[n - 1].t {
        let last = breaks[breaks.len() - 1];
        breaks.push(BreakPoint { t: upper[n - 1].t, ..last });
    }
    breaks.sort_by_key(|b| b.t);

    let mut seg = 0;
    for i in 0..n {
        if upper[i].v - lower[i].v >= min_width {
            continue;
        }
        let t = upper[i].t;
        while seg + 1 < breaks.len() - 1 && breaks[seg + 1].t < t {
            seg += 1;
        }
        let (left, right) = (breaks[seg], breaks[seg + 1]);
        let frac = if right.t == left.t {
            0.0
        } else {
            (t - left.t) as f64 / (right.t - left.t) as f64
        };
        upper[i].v = left.upper + (right.upper - left.upper) * frac;
        lower[i].v = left.lower + (right.lower - left.lower) * frac;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const EPS: f64 = 1e-9;

    fn pair(values: &[(f64, f64)]) -> (Vec<Sample>, Vec<Sample>) {
        let upper = values
            .iter()
            .enumerate()
            .map(|(i, &(u, _))| Sample::new(i as i64 * 10, u))
            .collect();
        let lower = values
            .iter()
            .enumerate()
            .map(|(i, &(_, l))| Sample::new(i as i64 * 10, l))
            .collect();
        (upper, lower)
    }

    fn assert_min_width(upper: &[Sample], lower: &[Sample], min_width: f64) {
        for (u, l) in upper.iter().zip(lower) {
            assert!(
                u.v - l.v + EPS >= min_width,
                "width {} < {} at t={}",
                u.v - l.v,
                min_width,
                u.t
            );
        }
    }

    #[test]
    fn healthy_corridor_is_untouched() {
        let (mut upper, mut lower) = pair(&[(10.0, 0.0), (11.0, 1.0), (12.0, 2.0)]);
        let (orig_u, orig_l) = (upper.clone(), lower.clone());
        // dc gap 10, factor 0.5 → min width 5; everything is at width 10.
        ensure_width(&mut upper, &mut lower, 10.0, 0.0, 0.5);
        assert_eq!(upper, orig_u);
        assert_eq!(lower, orig_l);
    }

    #[test]
    fn pinched_stretch_is_interpolated() {
        // Width collapses to 1 in the middle; healthy at both ends.
        let (mut upper, mut lower) = pair(&[
            (10.0, 0.0),
            (8.0, 7.0),
            (9.0, 8.0),
            (10.0, 0.0),
        ]);
        ensure_width(&mut upper, &mut lower, 10.0, 0.0, 0.5);
        assert_min_width(&upper, &lower, 5.0);

        // Interior points now lie on the chord between the endpoint breaks.
        assert!((upper[1].v - 10.0).abs() < EPS);
        assert!((lower[1].v - 0.0).abs() < EPS);
        // Healthy endpoints untouched.
        assert_eq!(upper[0].v, 10.0);
        assert_eq!(upper[3].v, 10.0);
    }

    #[test]
    fn collapse_to_constant_band_when_no_breaks() {
        // S3 shape: both DC amplitudes zero, corridor everywhere too narrow.
        let (mut upper, mut lower) = pair(&[(0.1, 0.0), (0.0, -0.1), (0.05, 0.0)]);
        ensure_width(&mut upper, &mut lower, 0.0, 0.0, 0.3);

        // min width = 0.3·max(0, 0, 1) = 0.3, centered at 0.
        for (u, l) in upper.iter().zip(&lower) {
            assert!((u.v - 0.15).abs() < EPS);
            assert!((l.v + 0.15).abs() < EPS);
        }
    }

    #[test]
    fn missing_edge_breaks_are_extended() {
        // Only the middle index is healthy; edges get its values.
        let (mut upper, mut lower) = pair(&[(1.0, 0.5), (10.0, 0.0), (1.0, 0.5)]);
        ensure_width(&mut upper, &mut lower, 10.0, 0.0, 0.5);
        assert_min_width(&upper, &lower, 5.0);
        assert!((upper[0].v - 10.0).abs() < EPS);
        assert!((lower[2].v - 0.0).abs() < EPS);
    }

    #[test]
    fn interpolated_width_never_dips_below_minimum() {
        // Two healthy breaks with different widths; everything between is
        // a convex combination, so the invariant holds throughout.
        let (mut upper, mut lower) = pair(&[
            (10.0, 0.0),
            (3.0, 2.0),
            (4.0, 3.5),
            (2.0, 1.0),
            (20.0, 5.0),
        ]);
        ensure_width(&mut upper, &mut lower, 8.0, 0.0, 0.5);
        assert_min_width(&upper, &lower, 4.0);
    }

    #[test]
    fn empty_input_is_a_noop() {
        ensure_width(&mut [], &mut [], 1.0, 0.0, 0.5);
    }
}
