pub mod episodes;
pub mod runs;
pub mod signals;
pub mod trades;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use rusqlite::Connection;
use std::path::Path;
use std::sync::Arc;

use crate::error::{Error, Result};

refinery::embed_migrations!("migrations");

/// Handle over the sqlite database. Queries are short and serialized
/// through one connection; multi-row updates run in explicit transactions.
#[derive(Clone)]
pub struct Database {
    conn: Arc<Mutex<Connection>>,
}

impl Database {
    pub fn open(path: &Path) -> Result<Self> {
        let conn = Connection::open(path)
            .map_err(|e| Error::Internal(anyhow::anyhow!("open database: {e}")))?;
        Self::prepare(conn)
    }

    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()
            .map_err(|e| Error::Internal(anyhow::anyhow!("open in-memory database: {e}")))?;
        Self::prepare(conn)
    }

    fn prepare(mut conn: Connection) -> Result<Self> {
        conn.pragma_update(None, "journal_mode", "WAL").ok();
        conn.pragma_update(None, "foreign_keys", "ON")
            .map_err(|e| Error::Internal(anyhow::anyhow!("enable foreign keys: {e}")))?;
        migrations::runner()
            .run(&mut conn)
            .map_err(|e| Error::Internal(anyhow::anyhow!("run migrations: {e}")))?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    pub(crate) fn with_conn<T>(&self, f: impl FnOnce(&Connection) -> Result<T>) -> Result<T> {
        let conn = self.conn.lock();
        f(&conn)
    }

    pub(crate) fn with_tx<T>(
        &self,
        f: impl FnOnce(&rusqlite::Transaction<'_>) -> Result<T>,
    ) -> Result<T> {
        let mut conn = self.conn.lock();
        let tx = conn
            .transaction()
            .map_err(|e| Error::Internal(anyhow::anyhow!("begin transaction: {e}")))?;
        let out = f(&tx)?;
        tx.commit()
            .map_err(|e| Error::Internal(anyhow::anyhow!("commit transaction: {e}")))?;
        Ok(out)
    }
}

pub(crate) fn ts_to_sql(ts: DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(chrono::SecondsFormat::Micros, true)
}

pub(crate) fn ts_from_sql(raw: &str) -> Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| Error::Internal(anyhow::anyhow!("bad timestamp '{raw}': {e}")))
}

pub(crate) fn opt_ts_from_sql(raw: Option<String>) -> Result<Option<DateTime<Utc>>> {
    raw.map(|r| ts_from_sql(&r)).transpose()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn migrations_apply_cleanly() {
        let db = Database::open_in_memory().unwrap();
        let count: i64 = db
            .with_conn(|conn| {
                Ok(conn.query_row(
                    "SELECT count(*) FROM sqlite_master WHERE type = 'table' AND name IN (
                        'strategy_instances', 'strategy_signals', 'orchestration_runs',
                        'trade_approvals', 'trades', 'strategy_artifacts',
                        'artifact_approvals', 'market_episodes', 'negative_patterns',
                        'episode_pattern_matches')",
                    [],
                    |row| row.get(0),
                )?)
            })
            .unwrap();
        assert_eq!(count, 10);
    }

    #[test]
    fn timestamp_round_trip() {
        let ts = Utc.with_ymd_and_hms(2024, 5, 6, 7, 8, 9).unwrap();
        assert_eq!(ts_from_sql(&ts_to_sql(ts)).unwrap(), ts);
    }
}
