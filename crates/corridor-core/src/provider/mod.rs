//! Recompute-vs-reuse orchestration and the request-level service.
//!
//! `CorridorService` is the body of one proxied `query_range` request: it
//! applies per-query overrides, fetches and groups the live window, decides
//! per label group whether the cached corridor is still valid, rebuilds it
//! from history when not, and compares the live samples against the
//! restored, width-repaired corridor.
//!
//! Per-group processing is sequential; the only state shared between groups
//! is the cache connection.

use std::time::{Duration, Instant};

use chrono::Utc;
use tracing::{debug, warn};

use crate::analysis::concern::{concern_sum, integral_concern};
use crate::analysis::calculate_anomaly_stats;
use crate::cache::{CacheError, PersistentCache};
use crate::config::{Config, ConfigError};
use crate::corridor::{build_bounds, ensure_width};
use crate::dft;
use crate::grouper::{self, GroupedSeries};
use crate::model::{AnomalyStats, CacheEntry, LabelSet, Sample, dc_amplitude};
use crate::source::{DataSource, SourceError};

// ============================================================
// Errors and timing
// ============================================================

/// Request-level failure union.
#[derive(Debug)]
pub enum ServiceError {
    Config(ConfigError),
    Source(SourceError),
    Cache(CacheError),
}

impl std::fmt::Display for ServiceError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ServiceError::Config(e) => write!(f, "{}", e),
            ServiceError::Source(e) => write!(f, "{}", e),
            ServiceError::Cache(e) => write!(f, "{}", e),
        }
    }
}

impl std::error::Error for ServiceError {}

impl From<ConfigError> for ServiceError {
    fn from(e: ConfigError) -> Self {
        ServiceError::Config(e)
    }
}

impl From<SourceError> for ServiceError {
    fn from(e: SourceError) -> Self {
        ServiceError::Source(e)
    }
}

impl From<CacheError> for ServiceError {
    fn from(e: CacheError) -> Self {
        ServiceError::Cache(e)
    }
}

/// Timing of one request's pipeline phases, threaded through the service
/// instead of any process-wide recorder.
#[derive(Debug, Clone, Default)]
pub struct PipelineTiming {
    pub total: Duration,
    /// Live fetch + label grouping.
    pub grouping: Duration,
    /// History fetch and corridor rebuilds, summed over groups.
    pub recompute: Duration,
    /// Corridor restoration and width repair, summed over groups.
    pub restore: Duration,
    /// Anomaly statistics and concern scalars, summed over groups.
    pub stats: Duration,
}

// ============================================================
// Per-series result
// ============================================================

/// Everything the formatter needs for one labeled series.
#[derive(Clone, Debug)]
pub struct SeriesResult {
    pub labels: LabelSet,
    pub fingerprint: String,
    /// Live samples, untouched.
    pub original: Vec<Sample>,
    /// Restored and width-repaired corridor; empty for placeholder series.
    pub upper: Vec<Sample>,
    pub lower: Vec<Sample>,
    /// Live-window stats with raw duration/size arrays.
    pub current_stats: AnomalyStats,
    /// Percentile-summarized stats from the cached history.
    pub historical_stats: AnomalyStats,
    pub concern_above: f64,
    pub concern_below: f64,
    pub concern_sum_above: f64,
    pub concern_sum_below: f64,
    pub dft_rebuild_count: u32,
}

// ============================================================
// Service
// ============================================================

pub struct CorridorService<S: DataSource> {
    source: S,
    cache: PersistentCache,
    config: Config,
}

impl<S: DataSource> CorridorService<S> {
    pub fn new(source: S, cache: PersistentCache, config: Config) -> Self {
        Self { source, cache, config }
    }

    /// Services one `query_range` request at the current wall clock.
    pub fn query_range(
        &mut self,
        query: &str,
        start: i64,
        end: i64,
        step: i64,
    ) -> Result<(Vec<SeriesResult>, PipelineTiming), ServiceError> {
        self.query_range_at(query, start, end, step, Utc::now().timestamp())
    }

    /// Same as `query_range` with an explicit clock (for tests and replay).
    pub fn query_range_at(
        &mut self,
        query: &str,
        start: i64,
        end: i64,
        step: i64,
        now: i64,
    ) -> Result<(Vec<SeriesResult>, PipelineTiming), ServiceError> {
        let request_started = Instant::now();
        let mut timing = PipelineTiming::default();

        let (expr, config) = self.config.split_query(query)?;
        config.validate()?;

        let phase = Instant::now();
        let raw = self.source.query_range(expr, start, end, step)?;
        let groups = grouper::group(&raw);
        timing.grouping = phase.elapsed();

        // History is shared by every group that needs a rebuild; fetched
        // lazily so fully-cached requests never touch the upstream twice.
        let mut history_groups: Option<_> = None;

        let mut results = Vec::with_capacity(groups.len());
        for (index, (fingerprint, series)) in groups.into_iter().enumerate() {
            if index >= config.timeout.max_metrics {
                warn!(
                    "query '{}' exceeds timeout.max_metrics = {}, skipping remaining label groups",
                    expr, config.timeout.max_metrics
                );
                break;
            }

            let entry = if self.cache.should_recreate(query, &fingerprint, &config, now)? {
                let phase = Instant::now();
                if history_groups.is_none() {
                    history_groups = Some(self.fetch_history(expr, &config, now)?);
                }
                let history = history_groups
                    .as_ref()
                    .unwrap()
                    .get(&fingerprint)
                    .map(|g| g.samples.as_slice())
                    .unwrap_or(&[]);
                let entry = self.recalculate_stats(
                    query,
                    &fingerprint,
                    series.labels.clone(),
                    history,
                    &config,
                    now,
                )?;
                timing.recompute += phase.elapsed();
                entry
            } else {
                // should_recreate(false) implies the row exists; a row lost
                // in between degrades to a placeholder-free rebuild next
                // request.
                match self.cache.load(query, &fingerprint)? {
                    Some(entry) => entry,
                    None => {
                        warn!("cache row for '{}' vanished mid-request", fingerprint);
                        continue;
                    }
                }
            };

            if let Err(e) = self.cache.touch(query, &fingerprint, now) {
                warn!("cache touch failed: {}", e);
            }

            results.push(self.build_series_result(
                &fingerprint,
                series,
                entry,
                &config,
                start,
                end,
                step,
                &mut timing,
            ));
        }

        timing.total = request_started.elapsed();
        Ok((results, timing))
    }

    /// Rebuilds the corridor and historical stats for one label group and
    /// persists the result.
    ///
    /// Sparse history (fewer than `min_data_points` samples) produces a
    /// placeholder entry that short-circuits future work while fresh. A
    /// failed persist is logged and the freshly computed entry is still
    /// returned; the next request reads the previous row back and retries.
    pub fn recalculate_stats(
        &mut self,
        query: &str,
        fingerprint: &str,
        labels: LabelSet,
        history: &[Sample],
        config: &Config,
        now: i64,
    ) -> Result<CacheEntry, ServiceError> {
        let cached = self.cache.load(query, fingerprint)?;
        if let Some(cached) = &cached {
            let fresh = now - cached.created_at <= config.cache.database.max_ttl;
            if cached.is_placeholder() && fresh {
                return Ok(cached.clone());
            }
        }
        let next_rebuild = cached.map(|c| c.dft_rebuild_count + 1);

        if history.len() < config.corridor.min_data_points {
            debug!(
                "history for '{}' has {} samples (< {}), storing placeholder",
                fingerprint,
                history.len(),
                config.corridor.min_data_points
            );
            let mut entry = CacheEntry::placeholder(labels, now, config.hash());
            // A metric that was dense before keeps its grown rebuild count;
            // only a first-ever entry starts the placeholder at 0. This is
            // exactly what save() will persist, so the returned entry and
            // the row never disagree.
            entry.dft_rebuild_count = next_rebuild.unwrap_or(0);
            self.persist(query, fingerprint, &entry, config, now);
            return Ok(entry);
        }

        let data_start = history.iter().map(|s| s.t).min().unwrap_or(0);
        let data_end = history.iter().map(|s| s.t).max().unwrap_or(0);
        let total_duration = data_end - data_start;
        let step = config.corridor.step;
        let params = &config.corridor;

        let grid = grouper::interpolate(history, data_start, data_end, step)?;
        let (upper_raw, lower_raw) =
            build_bounds(&grid, params.window_size, params.margin_percent)?;

        let (upper_slope, lower_slope) = if params.use_common_trend {
            let slope = dft::common_slope(&upper_raw, &lower_raw);
            (Some(slope), Some(slope))
        } else {
            (dft::ols_slope(&upper_raw), dft::ols_slope(&lower_raw))
        };
        let upper_detrended = dft::detrend_with_slope(&upper_raw, upper_slope);
        let lower_detrended = dft::detrend_with_slope(&lower_raw, lower_slope);

        let select = |residual: &[f64]| {
            dft::select_harmonics(
                &dft::transform(residual),
                total_duration as f64,
                residual.len(),
                params.max_harmonics,
                params.min_amplitude,
            )
        };
        let dft_upper = select(&upper_detrended.residual);
        let dft_lower = select(&lower_detrended.residual);

        let upper_curve = dft::restore(
            &dft_upper,
            Some(&upper_detrended.trend),
            data_start,
            total_duration,
            data_start,
            data_end,
            step,
        );
        let lower_curve = dft::restore(
            &dft_lower,
            Some(&lower_detrended.trend),
            data_start,
            total_duration,
            data_start,
            data_end,
            step,
        );

        let anomaly_stats = calculate_anomaly_stats(
            &grid,
            &upper_curve,
            &lower_curve,
            &config.cache.percentiles,
            false,
        );

        let entry = CacheEntry {
            data_start,
            step,
            total_duration,
            dft_rebuild_count: next_rebuild.unwrap_or(1),
            labels,
            created_at: now,
            config_hash: config.hash(),
            anomaly_stats,
            dft_upper,
            dft_lower,
            upper_trend: upper_detrended.trend,
            lower_trend: lower_detrended.trend,
            last_accessed: now,
        };
        self.persist(query, fingerprint, &entry, config, now);
        Ok(entry)
    }

    /// Response row for a sparse metric: original samples untouched, no
    /// corridor, zero current stats, historical stats from the placeholder.
    pub fn process_insufficient_data(
        fingerprint: &str,
        original: Vec<Sample>,
        entry: &CacheEntry,
    ) -> SeriesResult {
        SeriesResult {
            labels: entry.labels.clone(),
            fingerprint: fingerprint.to_string(),
            original,
            upper: Vec::new(),
            lower: Vec::new(),
            current_stats: AnomalyStats::zero(),
            historical_stats: entry.anomaly_stats.clone(),
            concern_above: 0.0,
            concern_below: 0.0,
            concern_sum_above: 0.0,
            concern_sum_below: 0.0,
            dft_rebuild_count: entry.dft_rebuild_count,
        }
    }

    #[allow(clippy::too_many_arguments)]
    fn build_series_result(
        &self,
        fingerprint: &str,
        series: GroupedSeries,
        entry: CacheEntry,
        config: &Config,
        start: i64,
        end: i64,
        step: i64,
        timing: &mut PipelineTiming,
    ) -> SeriesResult {
        if entry.is_placeholder() {
            return Self::process_insufficient_data(fingerprint, series.samples, &entry);
        }

        let phase = Instant::now();
        let mut upper = dft::restore(
            &entry.dft_upper,
            Some(&entry.upper_trend),
            entry.data_start,
            entry.total_duration,
            start,
            end,
            step,
        );
        let mut lower = dft::restore(
            &entry.dft_lower,
            Some(&entry.lower_trend),
            entry.data_start,
            entry.total_duration,
            start,
            end,
            step,
        );

        if config.scale_corridor {
            scale_corridor(&mut upper, &mut lower, &series.samples);
        }

        ensure_width(
            &mut upper,
            &mut lower,
            dc_amplitude(&entry.dft_upper),
            dc_amplitude(&entry.dft_lower),
            config.corridor.min_corridor_width_factor,
        );
        timing.restore += phase.elapsed();

        let phase = Instant::now();
        let current_stats = calculate_anomaly_stats(
            &series.samples,
            &upper,
            &lower,
            &config.cache.percentiles,
            true,
        );

        let dp = &config.corridor.default_percentiles;
        let history = &entry.anomaly_stats;
        let window_secs = (end - start) as f64;
        let concern_above = integral_concern(&history.above, &current_stats.above, dp);
        let concern_below = integral_concern(&history.below, &current_stats.below, dp);
        let concern_sum_above = concern_sum(&history.above, &current_stats.above, dp, window_secs);
        let concern_sum_below = concern_sum(&history.below, &current_stats.below, dp, window_secs);
        timing.stats += phase.elapsed();

        SeriesResult {
            labels: series.labels,
            fingerprint: fingerprint.to_string(),
            original: series.samples,
            concern_above,
            concern_below,
            concern_sum_above,
            concern_sum_below,
            historical_stats: entry.anomaly_stats,
            current_stats,
            upper,
            lower,
            dft_rebuild_count: entry.dft_rebuild_count,
        }
    }

    /// Historical window per config: `historical_offset_days` back from now,
    /// `historical_period_days` long, on the corridor grid step.
    fn fetch_history(
        &self,
        expr: &str,
        config: &Config,
        now: i64,
    ) -> Result<std::collections::BTreeMap<String, GroupedSeries>, ServiceError> {
        let hist_end = now - config.corridor.historical_offset_days * 86400;
        let hist_start = hist_end - config.corridor.historical_period_days * 86400;
        let raw = self
            .source
            .query_range(expr, hist_start, hist_end, config.corridor.step)?;
        Ok(grouper::group(&raw))
    }

    /// Best-effort save: a store failure degrades the request, never fails it.
    fn persist(
        &mut self,
        query: &str,
        fingerprint: &str,
        entry: &CacheEntry,
        config: &Config,
        now: i64,
    ) {
        if let Err(e) = self.cache.save(query, fingerprint, entry, config, now) {
            warn!(
                "failed to persist cache entry for '{}': {}; continuing unpersisted",
                fingerprint, e
            );
        }
    }
}

/// Rescales both corridor curves so the midline mean matches the live
/// window's mean. Skipped when either mean is too close to zero for the
/// ratio to be meaningful.
fn scale_corridor(upper: &mut [Sample], lower: &mut [Sample], live: &[Sample]) {
    if live.is_empty() || upper.is_empty() {
        return;
    }
    let live_mean = live.iter().map(|s| s.v).sum::<f64>() / live.len() as f64;
    let midline_mean = upper
        .iter()
        .zip(lower.iter())
        .map(|(u, l)| (u.v + l.v) / 2.0)
        .sum::<f64>()
        / upper.len() as f64;
    if midline_mean.abs() < 1e-9 || live_mean.abs() < 1e-9 {
        return;
    }
    let ratio = live_mean / midline_mean;
    for s in upper.iter_mut() {
        s.v *= ratio;
    }
    for s in lower.iter_mut() {
        s.v *= ratio;
    }
}
