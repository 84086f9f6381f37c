//! Schema creation and additive migrations.
//!
//! Migration never rewrites tables: startup inspects `PRAGMA table_info`
//! and adds any column introduced after the row was written. Running the
//! same migration twice is a no-op.

use rusqlite::Connection;
use tracing::info;

use super::CacheError;

const CREATE_SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS queries (
    id            INTEGER PRIMARY KEY AUTOINCREMENT,
    query         TEXT NOT NULL UNIQUE,
    custom_params TEXT,
    config_hash   TEXT,
    last_accessed INTEGER NOT NULL DEFAULT 0,
    created_at    INTEGER NOT NULL DEFAULT 0
);
CREATE TABLE IF NOT EXISTS dft_cache (
    id                 INTEGER PRIMARY KEY AUTOINCREMENT,
    query_id           INTEGER NOT NULL,
    metric_hash        TEXT NOT NULL,
    metric_json        TEXT NOT NULL,
    data_start         INTEGER NOT NULL DEFAULT 0,
    step               INTEGER NOT NULL DEFAULT 0,
    total_duration     INTEGER NOT NULL DEFAULT 0,
    dft_rebuild_count  INTEGER NOT NULL DEFAULT 0,
    labels_json        TEXT NOT NULL DEFAULT '{}',
    created_at         INTEGER NOT NULL DEFAULT 0,
    anomaly_stats_json TEXT NOT NULL DEFAULT '{}',
    dft_upper_json     TEXT NOT NULL DEFAULT '[]',
    dft_lower_json     TEXT NOT NULL DEFAULT '[]',
    upper_trend_json   TEXT NOT NULL DEFAULT '{\"slope\":0.0,\"intercept\":0.0}',
    lower_trend_json   TEXT NOT NULL DEFAULT '{\"slope\":0.0,\"intercept\":0.0}',
    last_accessed      INTEGER NOT NULL DEFAULT 0,
    UNIQUE (query_id, metric_hash)
);
CREATE INDEX IF NOT EXISTS idx_queries_query ON queries (query);
CREATE INDEX IF NOT EXISTS idx_dft_cache_query_id ON dft_cache (query_id);
CREATE INDEX IF NOT EXISTS idx_dft_cache_metric_hash ON dft_cache (metric_hash);
";

/// Columns added after the first released schema, with their definitions.
const QUERIES_ADDITIVE: &[(&str, &str)] = &[
    ("custom_params", "TEXT"),
    ("config_hash", "TEXT"),
];

const DFT_CACHE_ADDITIVE: &[(&str, &str)] = &[
    (
        "upper_trend_json",
        "TEXT NOT NULL DEFAULT '{\"slope\":0.0,\"intercept\":0.0}'",
    ),
    (
        "lower_trend_json",
        "TEXT NOT NULL DEFAULT '{\"slope\":0.0,\"intercept\":0.0}'",
    ),
];

/// Creates the schema on a fresh database, or applies additive column
/// migrations to an existing one. Idempotent.
pub fn ensure_schema(conn: &Connection) -> Result<(), CacheError> {
    if !table_exists(conn, "queries")? || !table_exists(conn, "dft_cache")? {
        conn.execute_batch(CREATE_SCHEMA)?;
        return Ok(());
    }

    add_missing_columns(conn, "queries", QUERIES_ADDITIVE)?;
    add_missing_columns(conn, "dft_cache", DFT_CACHE_ADDITIVE)?;

    // Indexes are cheap to assert on every startup.
    conn.execute_batch(
        "CREATE INDEX IF NOT EXISTS idx_queries_query ON queries (query);
         CREATE INDEX IF NOT EXISTS idx_dft_cache_query_id ON dft_cache (query_id);
         CREATE INDEX IF NOT EXISTS idx_dft_cache_metric_hash ON dft_cache (metric_hash);",
    )?;
    Ok(())
}

fn table_exists(conn: &Connection, table: &str) -> Result<bool, CacheError> {
    let count: i64 = conn.query_row(
        "SELECT COUNT(*) FROM sqlite_master WHERE type = 'table' AND name = ?1",
        [table],
        |row| row.get(0),
    )?;
    Ok(count > 0)
}

fn add_missing_columns(
    conn: &Connection,
    table: &str,
    additive: &[(&str, &str)],
) -> Result<(), CacheError> {
    let existing = table_columns(conn, table)?;
    for (name, definition) in additive {
        if existing.iter().any(|c| c == name) {
            continue;
        }
        info!("migrating cache schema: adding {}.{}", table, name);
        conn.execute_batch(&format!(
            "ALTER TABLE {} ADD COLUMN {} {}",
            table, name, definition
        ))?;
    }
    Ok(())
}

fn table_columns(conn: &Connection, table: &str) -> Result<Vec<String>, CacheError> {
    let mut stmt = conn.prepare(&format!("PRAGMA table_info({})", table))?;
    let names = stmt
        .query_map([], |row| row.get::<_, String>(1))?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(names)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::PersistentCache;
    use crate::config::Config;
    use crate::model::TrendLine;
    use rusqlite::params;

    /// Schema as it looked before the trend columns and query metadata
    /// were introduced.
    const LEGACY_SCHEMA: &str = "
    CREATE TABLE queries (
        id            INTEGER PRIMARY KEY AUTOINCREMENT,
        query         TEXT NOT NULL UNIQUE,
        last_accessed INTEGER NOT NULL DEFAULT 0,
        created_at    INTEGER NOT NULL DEFAULT 0
    );
    CREATE TABLE dft_cache (
        id                 INTEGER PRIMARY KEY AUTOINCREMENT,
        query_id           INTEGER NOT NULL,
        metric_hash        TEXT NOT NULL,
        metric_json        TEXT NOT NULL,
        data_start         INTEGER NOT NULL DEFAULT 0,
        step               INTEGER NOT NULL DEFAULT 0,
        total_duration     INTEGER NOT NULL DEFAULT 0,
        dft_rebuild_count  INTEGER NOT NULL DEFAULT 0,
        labels_json        TEXT NOT NULL DEFAULT '{}',
        created_at         INTEGER NOT NULL DEFAULT 0,
        anomaly_stats_json TEXT NOT NULL DEFAULT '{}',
        dft_upper_json     TEXT NOT NULL DEFAULT '[]',
        dft_lower_json     TEXT NOT NULL DEFAULT '[]',
        last_accessed      INTEGER NOT NULL DEFAULT 0,
        UNIQUE (query_id, metric_hash)
    );
    ";

    #[test]
    fn legacy_database_gains_columns_and_keeps_rows() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("cache.db");

        {
            let conn = Connection::open(&path).unwrap();
            conn.execute_batch(LEGACY_SCHEMA).unwrap();
            conn.execute(
                "INSERT INTO queries (query, last_accessed, created_at) VALUES ('up', 100, 100)",
                params![],
            )
            .unwrap();
            let key = crate::model::cache_key("up", "{}");
            conn.execute(
                "INSERT INTO dft_cache
                     (query_id, metric_hash, metric_json, data_start, step, total_duration,
                      dft_rebuild_count, labels_json, created_at, anomaly_stats_json,
                      dft_upper_json, dft_lower_json, last_accessed)
                 VALUES (1, ?1, '{}', 10, 60, 3600, 2, '{}', 100,
                         '{\"above\":null}', '[]', '[]', 100)",
                params![key],
            )
            .unwrap();
        }

        let cache = PersistentCache::open(&path).unwrap();
        let columns = table_columns(cache.conn(), "dft_cache").unwrap();
        assert!(columns.iter().any(|c| c == "upper_trend_json"));
        assert!(columns.iter().any(|c| c == "lower_trend_json"));
        let qcolumns = table_columns(cache.conn(), "queries").unwrap();
        assert!(qcolumns.iter().any(|c| c == "custom_params"));
        assert!(qcolumns.iter().any(|c| c == "config_hash"));

        // Prior row survives; the new columns read as zero trends, and the
        // unreadable legacy stats blob degrades to zero stats.
        let entry = cache.load("up", "{}").unwrap().unwrap();
        assert_eq!(entry.data_start, 10);
        assert_eq!(entry.dft_rebuild_count, 2);
        assert_eq!(entry.upper_trend, TrendLine::default());
        assert_eq!(entry.anomaly_stats, crate::model::AnomalyStats::zero());
    }

    #[test]
    fn migration_is_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("cache.db");
        drop(PersistentCache::open(&path).unwrap());
        drop(PersistentCache::open(&path).unwrap());

        let mut cache = PersistentCache::open(&path).unwrap();
        let config = Config::default();
        let entry = crate::model::CacheEntry::placeholder(
            crate::model::LabelSet::new(),
            1_750_000_000,
            config.hash(),
        );
        cache.save("up", "{}", &entry, &config, 1_750_000_000).unwrap();
        assert!(cache.load("up", "{}").unwrap().unwrap().is_placeholder());
    }
}
