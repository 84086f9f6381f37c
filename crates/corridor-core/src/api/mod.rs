//! Prometheus `query_range` response shapes.
//!
//! The proxy answers in the standard matrix format so Grafana panels can
//! plot the corridor next to the original series. Each `SeriesResult`
//! expands into several matrix rows distinguished by a synthetic
//! `corridor` label: the untouched original, both corridor curves, and
//! scalar statistic rows emitted as single points at the window end.

use serde::Serialize;

use crate::model::{LabelSet, Sample};
use crate::provider::SeriesResult;

/// Top-level `query_range` response.
#[derive(Debug, Serialize)]
pub struct QueryRangeResponse {
    pub status: &'static str,
    pub data: MatrixData,
}

#[derive(Debug, Serialize)]
pub struct MatrixData {
    #[serde(rename = "resultType")]
    pub result_type: &'static str,
    pub result: Vec<MatrixSeries>,
}

/// One matrix row: a label set and `[timestamp, "value"]` pairs.
#[derive(Debug, Serialize)]
pub struct MatrixSeries {
    pub metric: LabelSet,
    pub values: Vec<(i64, String)>,
}

/// Synthetic label distinguishing the emitted rows of one series.
const CORRIDOR_LABEL: &str = "corridor";

/// Builds the full response for one request's series results.
pub fn to_query_range_response(results: &[SeriesResult]) -> QueryRangeResponse {
    let mut rows = Vec::new();
    for result in results {
        rows.extend(series_rows(result));
    }
    QueryRangeResponse {
        status: "success",
        data: MatrixData {
            result_type: "matrix",
            result: rows,
        },
    }
}

/// Expands one series result into its matrix rows.
pub fn series_rows(result: &SeriesResult) -> Vec<MatrixSeries> {
    let mut rows = vec![MatrixSeries {
        metric: result.labels.clone(),
        values: to_values(&result.original),
    }];

    if !result.upper.is_empty() {
        rows.push(curve_row(result, "upper", &result.upper));
        rows.push(curve_row(result, "lower", &result.lower));
    }

    let at = result
        .original
        .last()
        .or_else(|| result.upper.last())
        .map(|s| s.t)
        .unwrap_or(0);
    let stats = [
        ("anomaly_percent_above", result.current_stats.above.time_outside_percent),
        ("anomaly_percent_below", result.current_stats.below.time_outside_percent),
        ("concern_above", result.concern_above),
        ("concern_below", result.concern_below),
        ("concern_sum_above", result.concern_sum_above),
        ("concern_sum_below", result.concern_sum_below),
        ("dft_rebuild_count", result.dft_rebuild_count as f64),
    ];
    for (name, value) in stats {
        rows.push(MatrixSeries {
            metric: labeled(&result.labels, name),
            values: vec![(at, format_value(value))],
        });
    }
    rows
}

fn curve_row(result: &SeriesResult, name: &str, curve: &[Sample]) -> MatrixSeries {
    MatrixSeries {
        metric: labeled(&result.labels, name),
        values: to_values(curve),
    }
}

fn labeled(labels: &LabelSet, kind: &str) -> LabelSet {
    let mut out = labels.clone();
    out.insert(CORRIDOR_LABEL.to_string(), kind.to_string());
    out
}

fn to_values(samples: &[Sample]) -> Vec<(i64, String)> {
    samples.iter().map(|s| (s.t, format_value(s.v))).collect()
}

/// Prometheus stringifies values; plain `{}` keeps integers short and
/// floats round-trippable.
fn format_value(v: f64) -> String {
    format!("{}", v)
}
