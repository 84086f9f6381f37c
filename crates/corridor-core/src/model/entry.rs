//! The persistent cache entry for one `(query, fingerprint)` pair.

use serde::{Deserialize, Serialize};

use super::{
    AnomalyStats, BoundaryCurve, CorridorSpec, Harmonic, LabelSet, TrendLine, UNUSED_METRIC_LABEL,
};

/// Everything the cache stores for one labeled series of one query.
///
/// Invariants:
/// - `step > 0`, `total_duration ≥ 0`;
/// - `config_hash` is the canonical hash of the effective config at store
///   time;
/// - a placeholder entry (`labels[unused_metric] = "true"`) has empty
///   coefficient arrays and zero trends;
/// - `dft_rebuild_count` only ever grows for a given cache key.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct CacheEntry {
    /// First historical timestamp (epoch seconds).
    pub data_start: i64,
    /// Grid step in seconds.
    pub step: i64,
    /// `data_end − data_start` in seconds.
    pub total_duration: i64,
    pub dft_rebuild_count: u32,
    pub labels: LabelSet,
    /// Entry creation time (epoch seconds), set on every recompute.
    pub created_at: i64,
    pub config_hash: String,
    /// Percentile-summarized stats over the historical window.
    pub anomaly_stats: AnomalyStats,
    pub dft_upper: Vec<Harmonic>,
    pub dft_lower: Vec<Harmonic>,
    pub upper_trend: TrendLine,
    pub lower_trend: TrendLine,
    /// Refreshed at most once per wall-clock hour.
    pub last_accessed: i64,
}

impl CacheEntry {
    /// True when this entry short-circuits computation for a sparse metric.
    pub fn is_placeholder(&self) -> bool {
        self.labels
            .get(UNUSED_METRIC_LABEL)
            .is_some_and(|v| v == "true")
    }

    /// The fully restorable corridor stored in this entry.
    pub fn corridor(&self) -> CorridorSpec {
        CorridorSpec {
            upper: BoundaryCurve {
                coeffs: self.dft_upper.clone(),
                trend: self.upper_trend,
            },
            lower: BoundaryCurve {
                coeffs: self.dft_lower.clone(),
                trend: self.lower_trend,
            },
        }
    }

    /// Builds a placeholder entry: empty coefficients, zero trend and stats.
    pub fn placeholder(mut labels: LabelSet, created_at: i64, config_hash: String) -> Self {
        labels.insert(UNUSED_METRIC_LABEL.to_string(), "true".to_string());
        Self {
            data_start: 0,
            step: 0,
            total_duration: 0,
            dft_rebuild_count: 0,
            labels,
            created_at,
            config_hash,
            anomaly_stats: AnomalyStats::zero(),
            dft_upper: Vec::new(),
            dft_lower: Vec::new(),
            upper_trend: TrendLine::default(),
            lower_trend: TrendLine::default(),
            last_accessed: created_at,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn placeholder_detection() {
        let entry = CacheEntry::placeholder(LabelSet::new(), 1_700_000_000, "abc".into());
        assert!(entry.is_placeholder());
        assert!(entry.dft_upper.is_empty());
        assert_eq!(entry.anomaly_stats.combined.anomaly_count, 0);

        let mut labels = LabelSet::new();
        labels.insert("job".into(), "api".into());
        let normal = CacheEntry {
            labels,
            ..CacheEntry::placeholder(LabelSet::new(), 0, String::new())
        };
        assert!(!normal.is_placeholder());
    }
}
