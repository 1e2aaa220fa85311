//! ==============================================================================
//! store.rs - reading store
//! ==============================================================================
//!
//! purpose:
//!     durable append-only collection of sensor readings.
//!     queryable by recency (latest) and by time range (since).
//!
//! design:
//!     - `ReadingStore` is a blocking trait. the async service offloads calls
//!       to the tokio blocking pool with spawn_blocking.
//!     - readings are immutable once appended: no update, no delete.
//!     - ties on timestamp are broken by insertion order.
//!
//! backends (selected by connection string):
//!     - "sqlite://<path>" or a bare path -> SqliteStore on disk
//!     - "sqlite::memory:"               -> SqliteStore in memory
//!     - "memory://"                     -> MemoryStore (tests / demos)
//!
//! ==============================================================================

use crate::domain::SensorReading;
use crate::error::StoreError;

use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension};
use std::path::Path;
use std::sync::{Arc, Mutex, PoisonError, RwLock};

pub trait ReadingStore: Send + Sync {
    /// persist one reading and return the stored record
    fn append(&self, reading: SensorReading) -> Result<SensorReading, StoreError>;
    /// newest reading by timestamp, `None` when the store is empty
    fn latest(&self) -> Result<Option<SensorReading>, StoreError>;
    /// readings with `timestamp >= from`, ascending
    fn since(&self, from: DateTime<Utc>) -> Result<Vec<SensorReading>, StoreError>;
}

/// open the store named by a connection string. called once per process.
pub fn open_store(url: &str) -> Result<Arc<dyn ReadingStore>, StoreError> {
    let url = url.trim();
    if url == "memory://" {
        return Ok(Arc::new(MemoryStore::default()));
    }
    if url == "sqlite::memory:" {
        return Ok(Arc::new(SqliteStore::in_memory()?));
    }
    let path = url.strip_prefix("sqlite://").unwrap_or(url);
    if path.is_empty() || path.contains("://") {
        return Err(StoreError::UnsupportedUrl(url.to_string()));
    }
    Ok(Arc::new(SqliteStore::open(path)?))
}

// ==============================================================================
// sqlite backend
// ==============================================================================

const SCHEMA: &str = "
    CREATE TABLE IF NOT EXISTS readings (
        id           INTEGER PRIMARY KEY AUTOINCREMENT,
        temperature  REAL    NOT NULL,
        ph           REAL    NOT NULL,
        ec           REAL    NOT NULL,
        water_level  REAL    NOT NULL,
        timestamp_ms INTEGER NOT NULL
    );
    CREATE INDEX IF NOT EXISTS idx_readings_timestamp ON readings(timestamp_ms);
";

type RawRow = (f64, f64, f64, f64, i64);

pub struct SqliteStore {
    conn: Mutex<Connection>,
}

impl SqliteStore {
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self, StoreError> {
        Self::init(Connection::open(path)?)
    }

    pub fn in_memory() -> Result<Self, StoreError> {
        Self::init(Connection::open_in_memory()?)
    }

    fn init(conn: Connection) -> Result<Self, StoreError> {
        conn.execute_batch(SCHEMA)?;
        Ok(Self { conn: Mutex::new(conn) })
    }

    fn decode((temperature, ph, ec, water_level, timestamp_ms): RawRow) -> Result<SensorReading, StoreError> {
        let timestamp = DateTime::from_timestamp_millis(timestamp_ms)
            .ok_or(StoreError::CorruptTimestamp(timestamp_ms))?;
        Ok(SensorReading { temperature, ph, ec, water_level, timestamp })
    }
}

fn raw_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<RawRow> {
    Ok((row.get(0)?, row.get(1)?, row.get(2)?, row.get(3)?, row.get(4)?))
}

impl ReadingStore for SqliteStore {
    fn append(&self, reading: SensorReading) -> Result<SensorReading, StoreError> {
        let conn = self.conn.lock().unwrap_or_else(PoisonError::into_inner);
        conn.execute(
            "INSERT INTO readings (temperature, ph, ec, water_level, timestamp_ms)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![
                reading.temperature,
                reading.ph,
                reading.ec,
                reading.water_level,
                reading.timestamp.timestamp_millis()
            ],
        )?;
        Ok(reading)
    }

    fn latest(&self) -> Result<Option<SensorReading>, StoreError> {
        let conn = self.conn.lock().unwrap_or_else(PoisonError::into_inner);
        let mut stmt = conn.prepare_cached(
            "SELECT temperature, ph, ec, water_level, timestamp_ms FROM readings
             ORDER BY timestamp_ms DESC, id DESC LIMIT 1",
        )?;
        let raw = stmt.query_row([], raw_row).optional()?;
        raw.map(Self::decode).transpose()
    }

    fn since(&self, from: DateTime<Utc>) -> Result<Vec<SensorReading>, StoreError> {
        let conn = self.conn.lock().unwrap_or_else(PoisonError::into_inner);
        let mut stmt = conn.prepare_cached(
            "SELECT temperature, ph, ec, water_level, timestamp_ms FROM readings
             WHERE timestamp_ms >= ?1
             ORDER BY timestamp_ms ASC, id ASC",
        )?;
        let rows = stmt.query_map(params![from.timestamp_millis()], raw_row)?;
        rows.map(|raw| -> Result<SensorReading, StoreError> { Self::decode(raw?) })
            .collect()
    }
}

// ==============================================================================
// in-memory backend
// ==============================================================================

#[derive(Default)]
pub struct MemoryStore {
    readings: RwLock<Vec<SensorReading>>,
}

impl ReadingStore for MemoryStore {
    fn append(&self, reading: SensorReading) -> Result<SensorReading, StoreError> {
        self.readings
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .push(reading.clone());
        Ok(reading)
    }

    fn latest(&self) -> Result<Option<SensorReading>, StoreError> {
        let readings = self.readings.read().unwrap_or_else(PoisonError::into_inner);
        // later inserts win ties
        let newest = readings
            .iter()
            .fold(None::<&SensorReading>, |best, r| match best {
                Some(b) if b.timestamp > r.timestamp => Some(b),
                _ => Some(r),
            });
        Ok(newest.cloned())
    }

    fn since(&self, from: DateTime<Utc>) -> Result<Vec<SensorReading>, StoreError> {
        let readings = self.readings.read().unwrap_or_else(PoisonError::into_inner);
        let mut window: Vec<SensorReading> =
            readings.iter().filter(|r| r.timestamp >= from).cloned().collect();
        // stable sort keeps insertion order for equal timestamps
        window.sort_by_key(|r| r.timestamp);
        Ok(window)
    }
}
