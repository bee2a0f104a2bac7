//! SQLite-based session history.
//!
//! One row per finished session in `ski_sessions`. Writes go through the
//! retry policy; SQLite's own busy handler is disabled so lock contention
//! surfaces as `DatabaseError::Busy` immediately.

use std::path::Path;
use std::time::Duration;

use parking_lot::Mutex;
use rusqlite::{params, Connection};
use serde::Serialize;
use skiscore_core::{Config, DatabaseError, RusqliteErrorExt};
use skiscore_tracker::{SessionRecord, SessionStore};

use crate::retry::{with_retry, RetryConfig};

const MS_PER_DAY: i64 = 86_400_000;

/// A persisted session with its row id.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct StoredSession {
    pub id: i64,
    #[serde(flatten)]
    pub record: SessionRecord,
}

/// Totals across every stored session.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct SeasonSummary {
    pub sessions: u64,
    pub total_distance_km: f64,
    pub best_max_speed_kmh: f64,
    /// Distinct UTC days with at least one session
    pub days_on_snow: u64,
}

/// SQLite-based session storage.
pub struct SqliteSessionStore {
    conn: Mutex<Connection>,
    retry: RetryConfig,
}

impl SqliteSessionStore {
    /// Open (or create) the store at the given path.
    pub fn new<P: AsRef<Path>>(path: P, retry: RetryConfig) -> anyhow::Result<Self> {
        let conn = Connection::open(path)?;
        Self::with_connection(conn, retry)
    }

    /// Open the store described by the application config, creating the
    /// data directory if needed.
    pub fn open(config: &Config) -> anyhow::Result<Self> {
        std::fs::create_dir_all(&config.data_dir)?;
        let path = config.database_path();
        tracing::info!("Opening session database at {}", path.display());
        Self::new(path, RetryConfig::from(&config.storage))
    }

    /// Create an in-memory store.
    pub fn in_memory() -> anyhow::Result<Self> {
        let conn = Connection::open_in_memory()?;
        Self::with_connection(conn, RetryConfig::none())
    }

    fn with_connection(conn: Connection, retry: RetryConfig) -> anyhow::Result<Self> {
        conn.busy_timeout(Duration::ZERO)?;
        let store = Self { conn: Mutex::new(conn), retry };
        store.init_schema()?;
        Ok(store)
    }

    fn init_schema(&self) -> anyhow::Result<()> {
        self.conn.lock().execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS ski_sessions (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                date INTEGER NOT NULL,
                duration_ms INTEGER NOT NULL,
                max_speed_kmh REAL NOT NULL,
                avg_speed_kmh REAL NOT NULL,
                total_distance_km REAL NOT NULL,
                last_altitude_m REAL NOT NULL
            );

            CREATE INDEX IF NOT EXISTS idx_ski_sessions_date ON ski_sessions(date DESC);
            "#,
        )?;
        Ok(())
    }

    fn row_to_session(row: &rusqlite::Row) -> rusqlite::Result<StoredSession> {
        let duration_ms: i64 = row.get(2)?;

        Ok(StoredSession {
            id: row.get(0)?,
            record: SessionRecord {
                start_timestamp_ms: row.get(1)?,
                duration_ms: u64::try_from(duration_ms).unwrap_or(0),
                max_speed_kmh: row.get(3)?,
                avg_speed_kmh: row.get(4)?,
                total_distance_km: row.get(5)?,
                last_altitude_m: row.get(6)?,
            },
        })
    }

    /// Store a finished session, returning its row id.
    ///
    /// # Errors
    /// `DatabaseError::Busy` once retries are exhausted, or any permanent
    /// SQLite failure.
    pub fn insert(&self, record: &SessionRecord) -> Result<i64, DatabaseError> {
        let duration_ms = i64::try_from(record.duration_ms).unwrap_or(i64::MAX);

        let id = with_retry(&self.retry, || {
            let conn = self.conn.lock();
            conn.execute(
                r#"
                INSERT INTO ski_sessions
                    (date, duration_ms, max_speed_kmh, avg_speed_kmh, total_distance_km, last_altitude_m)
                VALUES (?1, ?2, ?3, ?4, ?5, ?6)
                "#,
                params![
                    record.start_timestamp_ms,
                    duration_ms,
                    record.max_speed_kmh,
                    record.avg_speed_kmh,
                    record.total_distance_km,
                    record.last_altitude_m,
                ],
            )
            .map_err(RusqliteErrorExt::into_database_error)?;
            Ok(conn.last_insert_rowid())
        })?;

        tracing::debug!("Stored session with ID: {}", id);
        Ok(id)
    }

    /// All sessions, newest first.
    pub fn list(&self) -> Result<Vec<StoredSession>, DatabaseError> {
        let conn = self.conn.lock();
        let mut stmt = conn
            .prepare(
                "SELECT id, date, duration_ms, max_speed_kmh, avg_speed_kmh, total_distance_km, last_altitude_m
                 FROM ski_sessions
                 ORDER BY date DESC, id DESC",
            )
            .map_err(RusqliteErrorExt::into_database_error)?;

        let rows = stmt
            .query_map([], Self::row_to_session)
            .map_err(RusqliteErrorExt::into_database_error)?;

        rows.collect::<Result<Vec<_>, _>>()
            .map_err(RusqliteErrorExt::into_database_error)
    }

    /// Get the session count.
    pub fn count(&self) -> Result<u64, DatabaseError> {
        let count: i64 = self
            .conn
            .lock()
            .query_row("SELECT COUNT(*) FROM ski_sessions", [], |row| row.get(0))
            .map_err(RusqliteErrorExt::into_database_error)?;
        Ok(u64::try_from(count).unwrap_or(0))
    }

    /// Season totals; all zero when nothing is stored.
    pub fn season_summary(&self) -> Result<SeasonSummary, DatabaseError> {
        let conn = self.conn.lock();
        let (sessions, total_distance_km, best_max_speed_kmh, days): (i64, f64, f64, i64) = conn
            .query_row(
                "SELECT COUNT(*),
                        COALESCE(SUM(total_distance_km), 0.0),
                        COALESCE(MAX(max_speed_kmh), 0.0),
                        COUNT(DISTINCT date / ?1)
                 FROM ski_sessions",
                params![MS_PER_DAY],
                |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?, row.get(3)?)),
            )
            .map_err(RusqliteErrorExt::into_database_error)?;

        Ok(SeasonSummary {
            sessions: u64::try_from(sessions).unwrap_or(0),
            total_distance_km,
            best_max_speed_kmh,
            days_on_snow: u64::try_from(days).unwrap_or(0),
        })
    }
}

impl SessionStore for SqliteSessionStore {
    fn insert(&self, record: &SessionRecord) -> Result<i64, DatabaseError> {
        SqliteSessionStore::insert(self, record)
    }
}
