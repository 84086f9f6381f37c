//! Persistent result cache backed by SQLite.
//!
//! Two tables: `queries` (one row per query string) and `dft_cache` (one row
//! per `(query, labels fingerprint)` pair, holding the serialized corridor
//! coefficients, trends and historical anomaly stats). Startup inspects the
//! column lists and applies additive migrations only; the schema is
//! forward-migratable without rewrites.
//!
//! Writes are transactional — readers never observe a partially written
//! row. Transactions are safe to nest: only the outermost call opens and
//! commits.

mod migrate;

use std::collections::BTreeMap;
use std::path::Path;

use rusqlite::{Connection, OptionalExtension, params};
use tracing::{debug, warn};

use crate::config::Config;
use crate::model::{AnomalyStats, CacheEntry, Harmonic, LabelSet, TrendLine, cache_key};

// ---------------------------------------------------------------------------
// Error type
// ---------------------------------------------------------------------------

/// DB I/O failure. Recoverable: a request proceeds without persisting and a
/// later request retries.
#[derive(Debug)]
pub enum CacheError {
    Sqlite(rusqlite::Error),
    Serialize(serde_json::Error),
}

impl std::fmt::Display for CacheError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CacheError::Sqlite(e) => write!(f, "cache store failure: {}", e),
            CacheError::Serialize(e) => write!(f, "cache row serialization failure: {}", e),
        }
    }
}

impl std::error::Error for CacheError {}

impl From<rusqlite::Error> for CacheError {
    fn from(e: rusqlite::Error) -> Self {
        CacheError::Sqlite(e)
    }
}

impl From<serde_json::Error> for CacheError {
    fn from(e: serde_json::Error) -> Self {
        CacheError::Serialize(e)
    }
}

// ---------------------------------------------------------------------------
// Store
// ---------------------------------------------------------------------------

pub struct PersistentCache {
    conn: Connection,
}

impl PersistentCache {
    /// Opens (or creates) the cache file and brings the schema up to date.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, CacheError> {
        let conn = Connection::open(path)?;
        migrate::ensure_schema(&conn)?;
        Ok(Self { conn })
    }

    /// In-memory store for tests.
    pub fn open_in_memory() -> Result<Self, CacheError> {
        let conn = Connection::open_in_memory()?;
        migrate::ensure_schema(&conn)?;
        Ok(Self { conn })
    }

    /// Inserts or replaces the row for `(query, fingerprint)`.
    ///
    /// When a row already exists the stored rebuild count is forced
    /// monotone: `max(entry.dft_rebuild_count, stored + 1)`, so replaying
    /// the same entry bumps it by exactly one and concurrent overwrites
    /// never move it backwards. A first insert stores the entry's count
    /// verbatim (0 for placeholders).
    pub fn save(
        &mut self,
        query: &str,
        fingerprint: &str,
        entry: &CacheEntry,
        config: &Config,
        now: i64,
    ) -> Result<(), CacheError> {
        let key = cache_key(query, fingerprint);
        let custom_params = query.split_once('#').map(|(_, overrides)| overrides);

        let labels_json = serde_json::to_string(&entry.labels)?;
        let stats_json = serde_json::to_string(&entry.anomaly_stats)?;
        let upper_json = serde_json::to_string(&entry.dft_upper)?;
        let lower_json = serde_json::to_string(&entry.dft_lower)?;
        let upper_trend_json = serde_json::to_string(&entry.upper_trend)?;
        let lower_trend_json = serde_json::to_string(&entry.lower_trend)?;

        let max_rebuild_count = config.cache.max_rebuild_count;
        self.in_txn(|conn| {
            conn.execute(
                "INSERT INTO queries (query, custom_params, config_hash, last_accessed, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?4)
                 ON CONFLICT(query) DO UPDATE SET
                     custom_params = excluded.custom_params,
                     config_hash = excluded.config_hash,
                     last_accessed = excluded.last_accessed",
                params![query, custom_params, entry.config_hash, now],
            )?;
            let query_id: i64 = conn.query_row(
                "SELECT id FROM queries WHERE query = ?1",
                params![query],
                |row| row.get(0),
            )?;

            let stored: Option<u32> = conn
                .query_row(
                    "SELECT dft_rebuild_count FROM dft_cache
                     WHERE query_id = ?1 AND metric_hash = ?2",
                    params![query_id, key],
                    |row| row.get(0),
                )
                .optional()?;
            let rebuild_count = match stored {
                Some(prev) => entry.dft_rebuild_count.max(prev + 1),
                None => entry.dft_rebuild_count,
            };
            if rebuild_count > max_rebuild_count {
                warn!(
                    "cache entry for '{}' rebuilt {} times (limit {})",
                    query, rebuild_count, max_rebuild_count
                );
            }

            conn.execute(
                "INSERT OR REPLACE INTO dft_cache
                     (query_id, metric_hash, metric_json, data_start, step,
                      total_duration, dft_rebuild_count, labels_json, created_at,
                      anomaly_stats_json, dft_upper_json, dft_lower_json,
                      upper_trend_json, lower_trend_json, last_accessed)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15)",
                params![
                    query_id,
                    key,
                    fingerprint,
                    entry.data_start,
                    entry.step,
                    entry.total_duration,
                    rebuild_count,
                    labels_json,
                    entry.created_at,
                    stats_json,
                    upper_json,
                    lower_json,
                    upper_trend_json,
                    lower_trend_json,
                    entry.last_accessed,
                ],
            )?;
            Ok(())
        })
    }

    /// Loads the entry for `(query, fingerprint)`, `None` on miss.
    pub fn load(&self, query: &str, fingerprint: &str) -> Result<Option<CacheEntry>, CacheError> {
        let key = cache_key(query, fingerprint);
        let row = self
            .conn
            .query_row(
                "SELECT d.data_start, d.step, d.total_duration, d.dft_rebuild_count,
                        d.labels_json, d.created_at, q.config_hash,
                        d.anomaly_stats_json, d.dft_upper_json, d.dft_lower_json,
                        d.upper_trend_json, d.lower_trend_json, d.last_accessed
                 FROM dft_cache d JOIN queries q ON q.id = d.query_id
                 WHERE q.query = ?1 AND d.metric_hash = ?2",
                params![query, key],
                row_to_entry,
            )
            .optional()?;
        Ok(row)
    }

    /// All entries of one query, keyed by labels fingerprint.
    pub fn load_all(&self, query: &str) -> Result<BTreeMap<String, CacheEntry>, CacheError> {
        let mut stmt = self.conn.prepare(
            "SELECT d.data_start, d.step, d.total_duration, d.dft_rebuild_count,
                    d.labels_json, d.created_at, q.config_hash,
                    d.anomaly_stats_json, d.dft_upper_json, d.dft_lower_json,
                    d.upper_trend_json, d.lower_trend_json, d.last_accessed,
                    d.metric_json
             FROM dft_cache d JOIN queries q ON q.id = d.query_id
             WHERE q.query = ?1",
        )?;
        let rows = stmt.query_map(params![query], |row| {
            Ok((row.get::<_, String>(13)?, row_to_entry(row)?))
        })?;

        let mut out = BTreeMap::new();
        for row in rows {
            let (fingerprint, entry) = row?;
            out.insert(fingerprint, entry);
        }
        Ok(out)
    }

    pub fn exists(&self, query: &str, fingerprint: &str) -> Result<bool, CacheError> {
        Ok(self.load(query, fingerprint)?.is_some())
    }

    /// Whether the entry must be recomputed.
    ///
    /// Returns `false` only when the entry exists, is younger than
    /// `cache.database.max_ttl` and either matches the current config hash
    /// or is a placeholder (placeholders stay sticky across config changes
    /// while fresh).
    pub fn should_recreate(
        &self,
        query: &str,
        fingerprint: &str,
        config: &Config,
        now: i64,
    ) -> Result<bool, CacheError> {
        let Some(entry) = self.load(query, fingerprint)? else {
            return Ok(true);
        };
        if now - entry.created_at > config.cache.database.max_ttl {
            return Ok(true);
        }
        if entry.is_placeholder() {
            return Ok(false);
        }
        Ok(entry.config_hash != config.hash())
    }

    /// Refreshes `last_accessed`, but only when the wall-clock hour changed
    /// since the stored value — access-time updates stay cheap.
    pub fn touch(&mut self, query: &str, fingerprint: &str, now: i64) -> Result<(), CacheError> {
        let key = cache_key(query, fingerprint);
        let stored: Option<i64> = self
            .conn
            .query_row(
                "SELECT d.last_accessed FROM dft_cache d
                 JOIN queries q ON q.id = d.query_id
                 WHERE q.query = ?1 AND d.metric_hash = ?2",
                params![query, key],
                |row| row.get(0),
            )
            .optional()?;
        let Some(stored) = stored else {
            return Ok(());
        };
        if stored / 3600 == now / 3600 {
            return Ok(());
        }

        self.in_txn(|conn| {
            conn.execute(
                "UPDATE dft_cache SET last_accessed = ?1
                 WHERE metric_hash = ?2
                   AND query_id = (SELECT id FROM queries WHERE query = ?3)",
                params![now, key, query],
            )?;
            conn.execute(
                "UPDATE queries SET last_accessed = ?1 WHERE query = ?2",
                params![now, query],
            )?;
            Ok(())
        })
    }

    /// Deletes entries not accessed for `max_age_days` days, then removes
    /// query rows with no entries left. Returns (entries, queries) deleted.
    pub fn cleanup(&mut self, max_age_days: i64, now: i64) -> Result<(usize, usize), CacheError> {
        let cutoff = now - max_age_days * 86400;
        self.in_txn(|conn| {
            let entries = conn.execute(
                "DELETE FROM dft_cache WHERE last_accessed < ?1",
                params![cutoff],
            )?;
            let queries = conn.execute(
                "DELETE FROM queries
                 WHERE id NOT IN (SELECT DISTINCT query_id FROM dft_cache)",
                params![],
            )?;
            debug!("cache cleanup removed {} entries, {} queries", entries, queries);
            Ok((entries, queries))
        })
    }

    /// Runs `f` inside a transaction, joining one that is already open.
    /// Only the outermost call commits; any error rolls everything back.
    fn in_txn<T>(
        &mut self,
        f: impl FnOnce(&Connection) -> Result<T, CacheError>,
    ) -> Result<T, CacheError> {
        let outermost = self.conn.is_autocommit();
        if outermost {
            self.conn.execute_batch("BEGIN IMMEDIATE")?;
        }
        match f(&self.conn) {
            Ok(v) => {
                if outermost {
                    self.conn.execute_batch("COMMIT")?;
                }
                Ok(v)
            }
            Err(e) => {
                if outermost {
                    let _ = self.conn.execute_batch("ROLLBACK");
                }
                Err(e)
            }
        }
    }

    #[cfg(test)]
    pub(crate) fn conn(&self) -> &Connection {
        &self.conn
    }
}

fn row_to_entry(row: &rusqlite::Row<'_>) -> rusqlite::Result<CacheEntry> {
    let labels_json: String = row.get(4)?;
    let stats_json: String = row.get(7)?;
    let upper_json: String = row.get(8)?;
    let lower_json: String = row.get(9)?;
    let upper_trend_json: String = row.get(10)?;
    let lower_trend_json: String = row.get(11)?;

    Ok(CacheEntry {
        data_start: row.get(0)?,
        step: row.get(1)?,
        total_duration: row.get(2)?,
        dft_rebuild_count: row.get(3)?,
        labels: parse_json_column(&labels_json, LabelSet::new),
        created_at: row.get(5)?,
        config_hash: row.get::<_, Option<String>>(6)?.unwrap_or_default(),
        anomaly_stats: parse_json_column(&stats_json, AnomalyStats::zero),
        dft_upper: parse_json_column(&upper_json, Vec::<Harmonic>::new),
        dft_lower: parse_json_column(&lower_json, Vec::<Harmonic>::new),
        upper_trend: parse_json_column(&upper_trend_json, TrendLine::default),
        lower_trend: parse_json_column(&lower_trend_json, TrendLine::default),
        last_accessed: row.get(12)?,
    })
}

/// Tolerant JSON column read: a corrupt or legacy value degrades to the
/// zero default instead of failing the whole row.
fn parse_json_column<T: serde::de::DeserializeOwned>(json: &str, default: impl FnOnce() -> T) -> T {
    serde_json::from_str(json).unwrap_or_else(|e| {
        warn!("unreadable cache column ({}), using default", e);
        default()
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    const NOW: i64 = 1_750_000_000;

    fn labels(pairs: &[(&str, &str)]) -> LabelSet {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    fn sample_entry(config: &Config) -> CacheEntry {
        CacheEntry {
            data_start: NOW - 86400,
            step: 60,
            total_duration: 86400,
            dft_rebuild_count: 1,
            labels: labels(&[("job", "api")]),
            created_at: NOW,
            config_hash: config.hash(),
            anomaly_stats: AnomalyStats::zero(),
            dft_upper: vec![Harmonic { k: 0, amplitude: 10.0, phase: 0.0 }],
            dft_lower: vec![Harmonic { k: 0, amplitude: 2.0, phase: 0.0 }],
            upper_trend: TrendLine::new(0.001, -5.0),
            lower_trend: TrendLine::new(0.001, -9.0),
            last_accessed: NOW,
        }
    }

    #[test]
    fn save_load_round_trip() {
        let config = Config::default();
        let mut cache = PersistentCache::open_in_memory().unwrap();
        let entry = sample_entry(&config);

        cache.save("up", "{}", &entry, &config, NOW).unwrap();
        let loaded = cache.load("up", "{}").unwrap().unwrap();
        assert_eq!(loaded, entry);
        assert!(cache.load("up", r#"{"job":"db"}"#).unwrap().is_none());
        assert!(cache.exists("up", "{}").unwrap());
    }

    #[test]
    fn repeated_save_increments_rebuild_count_only() {
        let config = Config::default();
        let mut cache = PersistentCache::open_in_memory().unwrap();
        let entry = sample_entry(&config);

        cache.save("up", "{}", &entry, &config, NOW).unwrap();
        let first = cache.load("up", "{}").unwrap().unwrap();
        cache.save("up", "{}", &entry, &config, NOW + 10).unwrap();
        let second = cache.load("up", "{}").unwrap().unwrap();

        assert_eq!(second.dft_rebuild_count, first.dft_rebuild_count + 1);
        let normalized = CacheEntry {
            dft_rebuild_count: first.dft_rebuild_count,
            ..second.clone()
        };
        assert_eq!(normalized, first);
    }

    #[test]
    fn should_recreate_follows_hash_ttl_and_placeholder_rules() {
        let config = Config::default();
        let mut cache = PersistentCache::open_in_memory().unwrap();

        // Miss → recreate.
        assert!(cache.should_recreate("up", "{}", &config, NOW).unwrap());

        let entry = sample_entry(&config);
        cache.save("up", "{}", &entry, &config, NOW).unwrap();
        assert!(!cache.should_recreate("up", "{}", &config, NOW).unwrap());

        // Config changed → recreate; save*-only changes don't count.
        let mut changed = config.clone();
        changed.corridor.window_size = 30;
        assert!(cache.should_recreate("up", "{}", &changed, NOW).unwrap());
        let mut save_only = config.clone();
        save_only
            .extra
            .insert("save_foo".into(), serde_json::Value::from("bar"));
        assert!(!cache.should_recreate("up", "{}", &save_only, NOW).unwrap());

        // Past TTL → recreate even with matching hash.
        let expired = NOW + config.cache.database.max_ttl + 1;
        assert!(cache.should_recreate("up", "{}", &config, expired).unwrap());
    }

    #[test]
    fn placeholder_is_sticky_across_config_changes() {
        let config = Config::default();
        let mut cache = PersistentCache::open_in_memory().unwrap();
        let entry = CacheEntry::placeholder(labels(&[("job", "api")]), NOW, config.hash());
        cache.save("up", "{}", &entry, &config, NOW).unwrap();

        let mut changed = config.clone();
        changed.corridor.margin_percent = 42.0;
        assert!(!cache.should_recreate("up", "{}", &changed, NOW).unwrap());

        // But not past the TTL.
        let expired = NOW + config.cache.database.max_ttl + 1;
        assert!(cache.should_recreate("up", "{}", &changed, expired).unwrap());
    }

    #[test]
    fn touch_is_hourly_coarse() {
        let config = Config::default();
        let mut cache = PersistentCache::open_in_memory().unwrap();
        let entry = sample_entry(&config);
        cache.save("up", "{}", &entry, &config, NOW).unwrap();

        // Same hour: no refresh.
        cache.touch("up", "{}", NOW + 60).unwrap();
        assert_eq!(cache.load("up", "{}").unwrap().unwrap().last_accessed, NOW);

        // Next hour: refreshed.
        let later = (NOW / 3600 + 1) * 3600 + 5;
        cache.touch("up", "{}", later).unwrap();
        assert_eq!(cache.load("up", "{}").unwrap().unwrap().last_accessed, later);
    }

    #[test]
    fn cleanup_sweeps_stale_entries_and_dangling_queries() {
        let config = Config::default();
        let mut cache = PersistentCache::open_in_memory().unwrap();

        let stale = CacheEntry {
            last_accessed: NOW - 40 * 86400,
            ..sample_entry(&config)
        };
        let fresh = sample_entry(&config);
        cache.save("old_query", "{}", &stale, &config, NOW - 40 * 86400).unwrap();
        cache.save("new_query", "{}", &fresh, &config, NOW).unwrap();

        let (entries, queries) = cache.cleanup(30, NOW).unwrap();
        assert_eq!(entries, 1);
        assert_eq!(queries, 1);
        assert!(cache.load("old_query", "{}").unwrap().is_none());
        assert!(cache.load("new_query", "{}").unwrap().is_some());
    }

    #[test]
    fn load_all_maps_by_fingerprint() {
        let config = Config::default();
        let mut cache = PersistentCache::open_in_memory().unwrap();
        let a = sample_entry(&config);
        let b = CacheEntry {
            labels: labels(&[("job", "db")]),
            ..sample_entry(&config)
        };
        cache.save("up", r#"{"job":"api"}"#, &a, &config, NOW).unwrap();
        cache.save("up", r#"{"job":"db"}"#, &b, &config, NOW).unwrap();

        let all = cache.load_all("up").unwrap();
        assert_eq!(all.len(), 2);
        assert_eq!(all[r#"{"job":"api"}"#].labels, a.labels);
        assert_eq!(all[r#"{"job":"db"}"#].labels, b.labels);
    }

    #[test]
    fn custom_params_are_recorded_for_override_queries() {
        let config = Config::default();
        let mut cache = PersistentCache::open_in_memory().unwrap();
        let entry = sample_entry(&config);
        let query = "up#corrdor_params.window_size=30";
        cache.save(query, "{}", &entry, &config, NOW).unwrap();

        let params: Option<String> = cache
            .conn()
            .query_row(
                "SELECT custom_params FROM queries WHERE query = ?1",
                params![query],
                |row| row.get(0),
            )
            .unwrap();
        assert_eq!(params.as_deref(), Some("corrdor_params.window_size=30"));
    }
}
