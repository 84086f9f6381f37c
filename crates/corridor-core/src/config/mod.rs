//! Effective configuration for the corridor pipeline.
//!
//! The config is a typed record; unknown and `save*` keys survive in `extra`
//! so the canonical hash can account for (or strip) them. Per-query overrides
//! (`query#dotted.key=value;...`) are applied to a per-request copy, never to
//! the shared config.

mod hash;

pub use hash::config_hash;

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

// ---------------------------------------------------------------------------
// Error type
// ---------------------------------------------------------------------------

/// Missing or invalid corridor parameters. Fatal to the current request;
/// the cache is never mutated on this path.
#[derive(Debug, Clone)]
pub enum ConfigError {
    /// A parameter failed validation (non-positive, out of range).
    Invalid { key: &'static str, reason: String },
    /// The config or an override string could not be parsed.
    Parse(String),
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigError::Invalid { key, reason } => {
                write!(f, "invalid config value for '{}': {}", key, reason)
            }
            ConfigError::Parse(msg) => write!(f, "failed to parse config: {}", msg),
        }
    }
}

impl std::error::Error for ConfigError {}

// ---------------------------------------------------------------------------
// Config sections
// ---------------------------------------------------------------------------

/// Percentile levels and multipliers feeding the concern scalars.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DefaultPercentiles {
    pub duration: f64,
    pub size: f64,
    pub duration_multiplier: f64,
    pub size_multiplier: f64,
}

impl Default for DefaultPercentiles {
    fn default() -> Self {
        Self {
            duration: 90.0,
            size: 90.0,
            duration_multiplier: 1.0,
            size_multiplier: 1.0,
        }
    }
}

/// Corridor synthesis parameters.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CorridorParams {
    /// Grid step in seconds.
    pub step: i64,
    /// Sliding-window width (grid points) for envelope construction.
    pub window_size: i64,
    pub margin_percent: f64,
    /// Harmonics kept per boundary, DC included.
    pub max_harmonics: usize,
    /// Amplitude floor for contribution-based selection.
    pub min_amplitude: f64,
    /// Below this many historical samples the metric gets a placeholder.
    pub min_data_points: usize,
    pub min_corridor_width_factor: f64,
    /// Replace both boundary slopes with their arithmetic mean.
    pub use_common_trend: bool,
    pub historical_offset_days: i64,
    pub historical_period_days: i64,
    pub default_percentiles: DefaultPercentiles,
}

impl Default for CorridorParams {
    fn default() -> Self {
        Self {
            step: 60,
            window_size: 10,
            margin_percent: 5.0,
            max_harmonics: 10,
            min_amplitude: 0.01,
            min_data_points: 10,
            min_corridor_width_factor: 0.1,
            use_common_trend: false,
            historical_offset_days: 0,
            historical_period_days: 14,
            default_percentiles: DefaultPercentiles::default(),
        }
    }
}

/// Location and freshness limits of the SQLite store.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DatabaseParams {
    pub path: String,
    /// Maximum entry age in seconds before a recompute is forced.
    pub max_ttl: i64,
}

impl Default for DatabaseParams {
    fn default() -> Self {
        Self {
            path: "./corridor-cache.db".to_string(),
            max_ttl: 7 * 86400,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheParams {
    pub database: DatabaseParams,
    /// Rebuilds past this count log a warning (never an error).
    pub max_rebuild_count: u32,
    /// Percentile levels for the persisted summary arrays.
    pub percentiles: Vec<i64>,
}

impl Default for CacheParams {
    fn default() -> Self {
        Self {
            database: DatabaseParams::default(),
            max_rebuild_count: 50,
            percentiles: vec![25, 50, 75, 90, 95],
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TimeoutParams {
    /// Label groups processed per request; further groups are skipped.
    pub max_metrics: usize,
}

impl Default for TimeoutParams {
    fn default() -> Self {
        Self { max_metrics: 50 }
    }
}

// ---------------------------------------------------------------------------
// Top-level config
// ---------------------------------------------------------------------------

/// The effective configuration.
///
/// Field names follow the dotted-key wire names consumed by the original
/// dashboards (`corrdor_params` spelling included).
#[derive(Clone, Debug, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    #[serde(rename = "corrdor_params")]
    pub corridor: CorridorParams,
    pub cache: CacheParams,
    #[serde(rename = "scaleCorridor")]
    pub scale_corridor: bool,
    pub timeout: TimeoutParams,
    /// Keys the core does not interpret (`save*` among them). Kept so the
    /// config hash sees the same tree the operator wrote.
    #[serde(flatten)]
    pub extra: BTreeMap<String, Value>,
}

impl Config {
    /// Validates the parameters every request depends on.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let c = &self.corridor;
        if c.step < 1 {
            return Err(ConfigError::Invalid {
                key: "corrdor_params.step",
                reason: format!("must be ≥ 1, got {}", c.step),
            });
        }
        if c.window_size <= 0 {
            return Err(ConfigError::Invalid {
                key: "corrdor_params.window_size",
                reason: format!("must be positive, got {}", c.window_size),
            });
        }
        if c.margin_percent <= 0.0 {
            return Err(ConfigError::Invalid {
                key: "corrdor_params.margin_percent",
                reason: format!("must be positive, got {}", c.margin_percent),
            });
        }
        if c.max_harmonics == 0 {
            return Err(ConfigError::Invalid {
                key: "corrdor_params.max_harmonics",
                reason: "must be ≥ 1".to_string(),
            });
        }
        if c.min_data_points == 0 {
            return Err(ConfigError::Invalid {
                key: "corrdor_params.min_data_points",
                reason: "must be ≥ 1".to_string(),
            });
        }
        Ok(())
    }

    /// Canonical MD5 hash of this config (see `config_hash`).
    pub fn hash(&self) -> String {
        config_hash(&self.to_value())
    }

    pub fn to_value(&self) -> Value {
        serde_json::to_value(self).unwrap_or(Value::Null)
    }

    pub fn from_value(value: Value) -> Result<Self, ConfigError> {
        serde_json::from_value(value).map_err(|e| ConfigError::Parse(e.to_string()))
    }

    /// Splits a query into `(expression, per-request config)`.
    ///
    /// Everything after `#` is a `;`-separated list of `dotted.key=value`
    /// overrides applied to a copy of `self`; the shared config is untouched.
    pub fn split_query<'q>(&self, query: &'q str) -> Result<(&'q str, Config), ConfigError> {
        match query.split_once('#') {
            None => Ok((query, self.clone())),
            Some((expr, overrides)) => {
                let mut tree = self.to_value();
                for pair in overrides.split(';') {
                    let pair = pair.trim();
                    if pair.is_empty() {
                        continue;
                    }
                    let (key, raw) = pair.split_once('=').ok_or_else(|| {
                        ConfigError::Parse(format!("override '{}' is not key=value", pair))
                    })?;
                    set_dotted(&mut tree, key.trim(), parse_override_value(raw.trim()));
                }
                Ok((expr, Config::from_value(tree)?))
            }
        }
    }

    /// Parses a flat `dotted.key = value` text config (one pair per line,
    /// `#`-prefixed comments allowed). The value grammar matches per-query
    /// overrides.
    pub fn from_dotted_str(text: &str) -> Result<Self, ConfigError> {
        let mut tree = Config::default().to_value();
        for (lineno, line) in text.lines().enumerate() {
            let line = line.trim();
            if line.is_empty() || line.starts_with('#') || line.starts_with(';') {
                continue;
            }
            let (key, raw) = line.split_once('=').ok_or_else(|| {
                ConfigError::Parse(format!("line {}: '{}' is not key=value", lineno + 1, line))
            })?;
            set_dotted(&mut tree, key.trim(), parse_override_value(raw.trim()));
        }
        Config::from_value(tree)
    }
}

// ---------------------------------------------------------------------------
// Dotted-key plumbing
// ---------------------------------------------------------------------------

/// Sets `tree[a][b][c] = value` for key `"a.b.c"`, creating objects on the way.
fn set_dotted(tree: &mut Value, dotted: &str, value: Value) {
    let mut parts: Vec<&str> = dotted.split('.').collect();
    let leaf = match parts.pop() {
        Some(leaf) => leaf,
        None => return,
    };

    let mut node = tree;
    for part in parts {
        node = as_object(node)
            .entry(part.to_string())
            .or_insert_with(|| Value::Object(serde_json::Map::new()));
    }
    as_object(node).insert(leaf.to_string(), value);
}

/// Coerces a node to an object, replacing scalar intermediates.
fn as_object(node: &mut Value) -> &mut serde_json::Map<String, Value> {
    if !node.is_object() {
        *node = Value::Object(serde_json::Map::new());
    }
    match node {
        Value::Object(map) => map,
        _ => unreachable!(),
    }
}

/// Override value grammar: `true`/`false`, comma-list, int, float, string.
fn parse_override_value(raw: &str) -> Value {
    if raw.contains(',') {
        return Value::Array(raw.split(',').map(|s| parse_scalar(s.trim())).collect());
    }
    parse_scalar(raw)
}

fn parse_scalar(raw: &str) -> Value {
    match raw {
        "true" => return Value::Bool(true),
        "false" => return Value::Bool(false),
        _ => {}
    }
    if let Ok(i) = raw.parse::<i64>() {
        return Value::from(i);
    }
    if let Ok(f) = raw.parse::<f64>() {
        return Value::from(f);
    }
    Value::String(raw.to_string())
}
