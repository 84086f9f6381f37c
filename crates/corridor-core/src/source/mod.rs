//! Upstream data source abstraction.
//!
//! The proxy treats its upstream (Grafana panels backed by Prometheus) as a
//! black box that can list metric expressions and evaluate one over a range.
//! Production implementations live behind this trait; tests use `MockSource`.

pub mod mock;

pub use mock::MockSource;

use std::collections::HashMap;

/// One raw point as delivered by the upstream.
///
/// `time` is `"YYYY-MM-DD HH:MM:SS"` local time (or epoch seconds); `labels`
/// includes the synthetic `__name__` identifying the metric and may carry
/// `panel_url`.
#[derive(Clone, Debug, PartialEq)]
pub struct RawSample {
    pub time: String,
    pub value: f64,
    pub labels: HashMap<String, String>,
}

/// Upstream unreachable or answering outside 2xx. Fails the request;
/// the cache is left untouched.
#[derive(Debug, Clone)]
pub enum SourceError {
    /// Transport-level failure (connect, timeout).
    Unreachable(String),
    /// Upstream answered with a non-success status.
    Status { code: u16, message: String },
    /// The upstream payload could not be interpreted.
    Malformed(String),
}

impl std::fmt::Display for SourceError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SourceError::Unreachable(msg) => write!(f, "upstream unreachable: {}", msg),
            SourceError::Status { code, message } => {
                write!(f, "upstream returned {}: {}", code, message)
            }
            SourceError::Malformed(msg) => write!(f, "malformed upstream payload: {}", msg),
        }
    }
}

impl std::error::Error for SourceError {}

/// A queryable metrics upstream.
pub trait DataSource {
    /// All metric expressions the upstream knows about.
    fn list_metrics(&self) -> Result<Vec<String>, SourceError>;

    /// Evaluates `metric` over `[start, end]` (epoch seconds) at `step`.
    fn query_range(
        &self,
        metric: &str,
        start: i64,
        end: i64,
        step: i64,
    ) -> Result<Vec<RawSample>, SourceError>;
}
