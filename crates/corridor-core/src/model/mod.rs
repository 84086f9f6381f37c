//! Domain records shared across the pipeline.
//!
//! Everything that crosses a component boundary is a typed record here;
//! raw JSON maps exist only at the DB and HTTP edges.

mod entry;
mod stats;

pub use entry::CacheEntry;
pub use stats::{AnomalyStats, CombinedStats, Direction, DirectionStats};

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// One measured point: epoch seconds and a value.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct Sample {
    pub t: i64,
    pub v: f64,
}

impl Sample {
    pub fn new(t: i64, v: f64) -> Self {
        Self { t, v }
    }
}

/// Label map of a series. `BTreeMap` keeps keys sorted, which makes the
/// serialized form canonical — the fingerprint relies on that.
pub type LabelSet = BTreeMap<String, String>;

/// Label marking a cache entry as a placeholder for a sparse metric.
pub const UNUSED_METRIC_LABEL: &str = "unused_metric";

/// Canonical JSON of a label map (sorted keys, `__name__` never present).
pub fn labels_fingerprint(labels: &LabelSet) -> String {
    serde_json::to_string(labels).unwrap_or_else(|_| "{}".to_string())
}

/// Cache key for one `(query, fingerprint)` pair: `MD5(query || fingerprint)`.
pub fn cache_key(query: &str, fingerprint: &str) -> String {
    format!("{:x}", md5::compute(format!("{query}{fingerprint}")))
}

/// Linear regression `y = slope·t + intercept` over absolute epoch seconds.
#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct TrendLine {
    pub slope: f64,
    pub intercept: f64,
}

impl TrendLine {
    pub fn new(slope: f64, intercept: f64) -> Self {
        Self { slope, intercept }
    }

    /// Trend value at time `t` (epoch seconds).
    pub fn value_at(&self, t: i64) -> f64 {
        self.slope * t as f64 + self.intercept
    }
}

/// One spectral component of a boundary curve.
///
/// `k = 0` is the DC term; for `k ≥ 1`, `amplitude = 2·|X_k|/N` and
/// `phase = atan2(Im, Re)`.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct Harmonic {
    pub k: u32,
    pub amplitude: f64,
    pub phase: f64,
}

/// One fully restorable boundary curve: harmonics plus linear trend.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct BoundaryCurve {
    pub coeffs: Vec<Harmonic>,
    pub trend: TrendLine,
}

/// The corridor: upper and lower restorable curves.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct CorridorSpec {
    pub upper: BoundaryCurve,
    pub lower: BoundaryCurve,
}

/// Amplitude of the DC term, 0.0 when the coefficient set is empty.
pub fn dc_amplitude(coeffs: &[Harmonic]) -> f64 {
    coeffs
        .iter()
        .find(|h| h.k == 0)
        .map(|h| h.amplitude)
        .unwrap_or(0.0)
}
