//! corridor-core — anomaly-corridor synthesis for Prometheus-shaped series.
//!
//! Builds a "normal range" band (the corridor) for each labeled time series
//! from a long historical window, using a trend-removed discrete Fourier
//! transform as the baseline, and compares live values against it.
//!
//! Provides:
//! - `source` — upstream data source abstraction (live, mock)
//! - `grouper` — label-set grouping and uniform-grid resampling
//! - `dft` — detrending, harmonic selection, restoration
//! - `corridor` — envelope construction and minimum-width repair
//! - `analysis` — per-direction anomaly statistics and concern scalars
//! - `provider` — recompute-vs-reuse orchestration over the cache
//! - `cache` — persistent SQLite store with additive schema migrations
//! - `api` — Prometheus `query_range` matrix response shapes
//! - `config`, `model`, `util` — configuration, domain records, helpers

pub mod analysis;
pub mod api;
pub mod cache;
pub mod config;
pub mod corridor;
pub mod dft;
pub mod grouper;
pub mod model;
pub mod provider;
pub mod source;
pub mod util;
