//! Anomaly statistics records.

use serde::{Deserialize, Serialize};

/// Which side of the corridor a direction refers to.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    Above,
    Below,
}

impl Direction {
    pub fn as_str(self) -> &'static str {
        match self {
            Direction::Above => "above",
            Direction::Below => "below",
        }
    }
}

/// Per-direction anomaly statistics.
///
/// `durations` and `sizes` hold either the ascending-sorted raw values
/// (`raw=true`) or fixed-length percentile summaries (`raw=false`, the
/// cache-persisted shape).
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct DirectionStats {
    pub time_outside_percent: f64,
    pub anomaly_count: u32,
    pub durations: Vec<f64>,
    pub sizes: Vec<f64>,
    pub direction: Direction,
}

impl DirectionStats {
    pub fn zero(direction: Direction) -> Self {
        Self {
            time_outside_percent: 0.0,
            anomaly_count: 0,
            durations: Vec::new(),
            sizes: Vec::new(),
            direction,
        }
    }
}

/// Sum of the two directions; carries only the shared scalars.
#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct CombinedStats {
    pub time_outside_percent: f64,
    pub anomaly_count: u32,
}

/// Full result of one corridor/series comparison.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct AnomalyStats {
    pub above: DirectionStats,
    pub below: DirectionStats,
    pub combined: CombinedStats,
}

impl AnomalyStats {
    /// All-zero stats, used for placeholders and empty inputs.
    pub fn zero() -> Self {
        Self {
            above: DirectionStats::zero(Direction::Above),
            below: DirectionStats::zero(Direction::Below),
            combined: CombinedStats::default(),
        }
    }
}
