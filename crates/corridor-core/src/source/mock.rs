//! In-memory data source for tests.

use std::collections::HashMap;

use super::{DataSource, RawSample, SourceError};

/// Serves canned samples per metric, windowed by the requested range.
///
/// Sample generators register epoch-second timestamps directly; the mock
/// emits them in the passthrough numeric form the parser accepts.
#[derive(Default)]
pub struct MockSource {
    series: HashMap<String, Vec<RawSample>>,
}

impl MockSource {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a series of `(epoch_secs, value)` points under `metric`
    /// with the given labels (`__name__` is added automatically).
    pub fn with_series(
        mut self,
        metric: &str,
        labels: &[(&str, &str)],
        points: &[(i64, f64)],
    ) -> Self {
        let mut label_map: HashMap<String, String> = labels
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        label_map.insert("__name__".to_string(), metric.to_string());

        let samples: Vec<RawSample> = points
            .iter()
            .map(|&(t, v)| RawSample {
                time: t.to_string(),
                value: v,
                labels: label_map.clone(),
            })
            .collect();
        self.series.entry(metric.to_string()).or_default().extend(samples);
        self
    }
}

impl DataSource for MockSource {
    fn list_metrics(&self) -> Result<Vec<String>, SourceError> {
        let mut metrics: Vec<String> = self.series.keys().cloned().collect();
        metrics.sort();
        Ok(metrics)
    }

    fn query_range(
        &self,
        metric: &str,
        start: i64,
        end: i64,
        _step: i64,
    ) -> Result<Vec<RawSample>, SourceError> {
        let samples = self
            .series
            .get(metric)
            .ok_or_else(|| SourceError::Status {
                code: 404,
                message: format!("unknown metric '{}'", metric),
            })?;
        Ok(samples
            .iter()
            .filter(|s| {
                s.time
                    .parse::<i64>()
                    .map(|t| t >= start && t <= end)
                    .unwrap_or(true)
            })
            .cloned()
            .collect())
    }
}
