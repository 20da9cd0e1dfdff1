//! SQLite reading store.

use parking_lot::Mutex;
use rusqlite::{Connection, OptionalExtension, params};
use thermolog_common::{NewReading, Reading};
use tracing::{debug, info};

use crate::store::{ReadingStore, StoreError};

/// SQLite-backed reading store.
///
/// Thread-safe via an internal mutex (a SQLite `Connection` is not `Sync`).
/// Each trait call holds the lock for exactly one statement, so an insert is
/// never observed half-done and ids follow insertion order.
///
/// # Schema
///
/// ```sql
/// CREATE TABLE sensor_data (
///     id INTEGER PRIMARY KEY AUTOINCREMENT,
///     temperature REAL,
///     humidity REAL,
///     heat_index REAL,
///     timestamp INTEGER
/// );
/// ```
///
/// Absent reading fields are stored as `NULL`.
pub struct SqliteStore {
    conn: Mutex<Option<Connection>>,
}

impl SqliteStore {
    /// Open (or create) a file-based store.
    pub fn open(path: &str) -> Result<Self, StoreError> {
        let conn = Connection::open(path)?;
        let store = Self::from_connection(conn)?;
        info!(path, "Opened SQLite reading store");
        Ok(store)
    }

    /// Create an in-memory store (for testing).
    pub fn open_in_memory() -> Result<Self, StoreError> {
        Self::from_connection(Connection::open_in_memory()?)
    }

    fn from_connection(conn: Connection) -> Result<Self, StoreError> {
        conn.execute(
            "CREATE TABLE IF NOT EXISTS sensor_data (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                temperature REAL,
                humidity REAL,
                heat_index REAL,
                timestamp INTEGER
            )",
            [],
        )?;

        Ok(Self {
            conn: Mutex::new(Some(conn)),
        })
    }

    /// Run `f` against the open connection while holding the lock.
    fn with_conn<T>(
        &self,
        f: impl FnOnce(&Connection) -> rusqlite::Result<T>,
    ) -> Result<T, StoreError> {
        let guard = self.conn.lock();
        let conn = guard.as_ref().ok_or(StoreError::Closed)?;
        Ok(f(conn)?)
    }

    fn row_to_reading(row: &rusqlite::Row) -> rusqlite::Result<Reading> {
        Ok(Reading {
            id: row.get(0)?,
            temperature: row.get(1)?,
            humidity: row.get(2)?,
            heat_index: row.get(3)?,
            timestamp: row.get(4)?,
        })
    }
}

impl ReadingStore for SqliteStore {
    fn append(&self, reading: &NewReading) -> Result<i64, StoreError> {
        self.with_conn(|conn| {
            conn.execute(
                "INSERT INTO sensor_data (temperature, humidity, heat_index, timestamp)
                 VALUES (?1, ?2, ?3, ?4)",
                params![
                    reading.temperature,
                    reading.humidity,
                    reading.heat_index,
                    reading.timestamp,
                ],
            )?;
            Ok(conn.last_insert_rowid())
        })
    }

    fn latest(&self) -> Result<Option<Reading>, StoreError> {
        self.with_conn(|conn| {
            conn.query_row(
                "SELECT id, temperature, humidity, heat_index, timestamp
                 FROM sensor_data
                 ORDER BY id DESC
                 LIMIT 1",
                [],
                Self::row_to_reading,
            )
            .optional()
        })
    }

    fn history(&self, limit: usize) -> Result<Vec<Reading>, StoreError> {
        // Saturate: usize::MAX as i64 would be -1, which SQLite reads as "no limit"
        let limit = limit.min(i64::MAX as usize) as i64;

        self.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT id, temperature, humidity, heat_index, timestamp
                 FROM sensor_data
                 ORDER BY id DESC
                 LIMIT ?1",
            )?;
            let readings = stmt
                .query_map([limit], Self::row_to_reading)?
                .collect::<rusqlite::Result<Vec<_>>>()?;
            Ok(readings)
        })
    }

    fn count(&self) -> Result<usize, StoreError> {
        let count: i64 = self.with_conn(|conn| {
            conn.query_row("SELECT COUNT(*) FROM sensor_data", [], |row| row.get(0))
        })?;
        Ok(count as usize)
    }

    fn close(&self) -> Result<(), StoreError> {
        let Some(conn) = self.conn.lock().take() else {
            return Ok(());
        };
        conn.close().map_err(|(_, e)| StoreError::Sqlite(e))?;
        debug!("SQLite reading store closed");
        Ok(())
    }
}
