//! Label-set grouping and uniform-grid resampling.
//!
//! Raw upstream samples arrive as one flat list with per-sample label maps;
//! the pipeline works on one series per distinct label set, resampled onto a
//! uniform grid. This module is the single source of truth for both steps.

use std::collections::BTreeMap;

use tracing::warn;

use crate::config::ConfigError;
use crate::model::{LabelSet, Sample, labels_fingerprint};
use crate::source::RawSample;
use crate::util::parse_source_time;

/// One grouped series: its canonical labels and time-ordered samples.
#[derive(Clone, Debug, PartialEq)]
pub struct GroupedSeries {
    pub labels: LabelSet,
    pub samples: Vec<Sample>,
}

/// Splits raw samples by label set.
///
/// Drops `__name__`, sorts label keys (via `LabelSet`), parses each
/// timestamp to epoch seconds and orders every group by time. Samples with
/// unparsable timestamps are skipped with a warning; grouping never fails.
pub fn group(raw: &[RawSample]) -> BTreeMap<String, GroupedSeries> {
    let mut groups: BTreeMap<String, GroupedSeries> = BTreeMap::new();

    for sample in raw {
        let t = match parse_source_time(&sample.time) {
            Ok(t) => t,
            Err(e) => {
                warn!("skipping sample with bad timestamp: {}", e);
                continue;
            }
        };

        let labels: LabelSet = sample
            .labels
            .iter()
            .filter(|(k, _)| k.as_str() != "__name__")
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect();
        let fingerprint = labels_fingerprint(&labels);

        groups
            .entry(fingerprint)
            .or_insert_with(|| GroupedSeries {
                labels,
                samples: Vec::new(),
            })
            .samples
            .push(Sample::new(t, sample.value));
    }

    for series in groups.values_mut() {
        series.samples.sort_by_key(|s| s.t);
    }
    groups
}

/// Resamples `samples` onto the grid `{start, start+step, …, ≤ end}` by
/// linear interpolation between the two bracketing samples.
///
/// Outside the data the nearest-side value is used; with no data every grid
/// point is 0. Requires `step ≥ 1` and `end ≥ start`.
pub fn interpolate(
    samples: &[Sample],
    start: i64,
    end: i64,
    step: i64,
) -> Result<Vec<Sample>, ConfigError> {
    if step < 1 {
        return Err(ConfigError::Invalid {
            key: "corrdor_params.step",
            reason: format!("must be ≥ 1, got {}", step),
        });
    }
    if end < start {
        return Err(ConfigError::Invalid {
            key: "corrdor_params.step",
            reason: format!("range end {} precedes start {}", end, start),
        });
    }

    let mut sorted: Vec<Sample> = samples.to_vec();
    sorted.sort_by_key(|s| s.t);

    let mut out = Vec::with_capacity(((end - start) / step + 1) as usize);
    let mut t = start;
    while t <= end {
        out.push(Sample::new(t, value_at(&sorted, t)));
        t += step;
    }
    Ok(out)
}

/// Linearly interpolated value of a time-ordered series at `t`.
///
/// Nearest-side value outside the data range, 0.0 for an empty series.
pub fn value_at(sorted: &[Sample], t: i64) -> f64 {
    if sorted.is_empty() {
        return 0.0;
    }
    let first = sorted[0];
    let last = sorted[sorted.len() - 1];
    if t <= first.t {
        return first.v;
    }
    if t >= last.t {
        return last.v;
    }

    // First sample with time ≥ t; the partition point is ≥ 1 here because
    // t > first.t.
    let idx = sorted.partition_point(|s| s.t < t);
    let right = sorted[idx];
    if right.t == t {
        return right.v;
    }
    let left = sorted[idx - 1];
    if right.t == left.t {
        return left.v;
    }
    let frac = (t - left.t) as f64 / (right.t - left.t) as f64;
    left.v + (right.v - left.v) * frac
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn raw(time: &str, value: f64, labels: &[(&str, &str)]) -> RawSample {
        RawSample {
            time: time.to_string(),
            value,
            labels: labels
                .iter()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect(),
        }
    }

    #[test]
    fn groups_by_label_set_and_drops_name() {
        let samples = vec![
            raw("100", 1.0, &[("__name__", "up"), ("job", "api")]),
            raw("40", 2.0, &[("__name__", "up"), ("job", "api")]),
            raw("100", 3.0, &[("__name__", "up"), ("job", "db")]),
        ];
        let groups = group(&samples);
        assert_eq!(groups.len(), 2);

        let api = groups.get(r#"{"job":"api"}"#).unwrap();
        assert!(!api.labels.contains_key("__name__"));
        // Sorted by time within the group.
        assert_eq!(api.samples, vec![Sample::new(40, 2.0), Sample::new(100, 1.0)]);
    }

    #[test]
    fn bad_timestamps_are_skipped() {
        let samples = vec![
            raw("not-a-time", 1.0, &[("job", "api")]),
            raw("50", 2.0, &[("job", "api")]),
        ];
        let groups = group(&samples);
        assert_eq!(groups.len(), 1);
        assert_eq!(groups.values().next().unwrap().samples.len(), 1);
    }

    #[test]
    fn interpolates_between_brackets() {
        let samples = vec![Sample::new(0, 0.0), Sample::new(10, 10.0)];
        let grid = interpolate(&samples, 0, 10, 5).unwrap();
        assert_eq!(
            grid,
            vec![Sample::new(0, 0.0), Sample::new(5, 5.0), Sample::new(10, 10.0)]
        );
    }

    #[test]
    fn clamps_outside_data() {
        let samples = vec![Sample::new(10, 3.0), Sample::new(20, 7.0)];
        let grid = interpolate(&samples, 0, 40, 10).unwrap();
        assert_eq!(grid[0].v, 3.0);
        assert_eq!(grid[4].v, 7.0);
    }

    #[test]
    fn empty_series_yields_zeros() {
        let grid = interpolate(&[], 0, 20, 10).unwrap();
        assert_eq!(grid.len(), 3);
        assert!(grid.iter().all(|s| s.v == 0.0));
    }

    #[test]
    fn unsorted_input_is_sorted_first() {
        let samples = vec![Sample::new(20, 7.0), Sample::new(0, 1.0)];
        let grid = interpolate(&samples, 0, 20, 10).unwrap();
        assert_eq!(grid[1].v, 4.0);
    }

    #[test]
    fn rejects_bad_grid() {
        assert!(interpolate(&[], 0, 10, 0).is_err());
        assert!(interpolate(&[], 10, 0, 5).is_err());
    }
}
