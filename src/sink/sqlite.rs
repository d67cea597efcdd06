//! SqliteSink - stores one row per reading in a local database

use super::{Sink, SinkError, SinkFuture};
use crate::config::SqliteConfig;
use crate::rate_limit::RateLimiter;
use crate::reading::Reading;
use rusqlite::{Connection, params};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::UNIX_EPOCH;
use tracing::debug;

const CREATE_TABLE: &str = "CREATE TABLE IF NOT EXISTS fermentation_readings (
    timestamp INTEGER,
    color TEXT,
    name TEXT,
    temp_f REAL,
    temp_c REAL,
    gravity REAL,
    abv REAL,
    attenuation REAL
)";

const INSERT_READING: &str = "INSERT INTO fermentation_readings \
    (timestamp, color, name, temp_f, temp_c, gravity, abv, attenuation) \
    VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)";

/// Persists readings into the `fermentation_readings` table.
///
/// Beacons broadcast every few seconds while the values barely move, so the
/// sink carries its own limiter (one row per color per minute by default).
pub struct SqliteSink {
    name: String,
    enabled: bool,
    path: PathBuf,
    conn: Option<Connection>,
    limiter: RateLimiter,
}

impl SqliteSink {
    pub fn new(config: &SqliteConfig) -> Result<Self, SinkError> {
        let name = format!("SQLite ({})", config.path.display());
        let limiter = RateLimiter::new(config.rate, config.period)
            .map_err(|e| SinkError::Setup(format!("{name}: {e}")))?;
        Ok(Self {
            name,
            enabled: config.enabled,
            path: config.path.clone(),
            conn: None,
            limiter,
        })
    }

    fn open(path: &Path) -> Result<Connection, SinkError> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)?;
        }
        let conn = Connection::open(path)?;
        conn.execute(CREATE_TABLE, [])?;
        Ok(conn)
    }

    fn insert(&mut self, reading: &Reading) -> Result<(), SinkError> {
        let conn = match self.conn.take() {
            Some(conn) => conn,
            None => Self::open(&self.path)?,
        };
        let conn = self.conn.insert(conn);

        let timestamp = reading
            .timestamp
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_secs() as i64)
            .unwrap_or_default();
        conn.execute(
            INSERT_READING,
            params![
                timestamp,
                reading.color,
                reading.name,
                reading.temp_fahrenheit,
                reading.temp_celsius,
                reading.gravity,
                reading.alcohol_by_volume,
                reading.apparent_attenuation,
            ],
        )?;
        debug!(sink = %self.name, color = %reading.color, "Row inserted");
        Ok(())
    }
}

impl Sink for SqliteSink {
    fn name(&self) -> &str {
        &self.name
    }

    fn enabled(&self) -> bool {
        self.enabled
    }

    fn start(&mut self) -> SinkFuture<'_, Option<String>> {
        Box::pin(async move {
            self.conn = Some(Self::open(&self.path)?);
            Ok(None)
        })
    }

    fn write<'a>(&'a mut self, reading: &'a Reading) -> SinkFuture<'a, ()> {
        Box::pin(async move { self.insert(reading) })
    }

    fn limiter(&mut self) -> Option<&mut RateLimiter> {
        Some(&mut self.limiter)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::DEFAULT_SQLITE_PERIOD;
    use crate::test_utils::reading;
    use std::time::Duration;
    use tempfile::tempdir;

    fn config(path: PathBuf) -> SqliteConfig {
        SqliteConfig {
            path,
            ..SqliteConfig::default()
        }
    }

    fn rows(path: &Path) -> Vec<(i64, String, f64, i32, f64)> {
        let conn = Connection::open(path).unwrap();
        let mut stmt = conn
            .prepare(
                "SELECT timestamp, color, temp_f, temp_c, gravity \
                 FROM fermentation_readings ORDER BY rowid",
            )
            .unwrap();
        stmt.query_map([], |row| {
            Ok((row.get(0)?, row.get(1)?, row.get(2)?, row.get(3)?, row.get(4)?))
        })
        .unwrap()
        .collect::<Result<_, _>>()
        .unwrap()
    }

    #[test]
    fn test_enabled_by_default() {
        let sink = SqliteSink::new(&SqliteConfig::default()).unwrap();
        assert!(sink.enabled());
        assert_eq!(sink.name(), "SQLite (tilt-relay.db)");

        let off = SqliteConfig {
            enabled: false,
            ..SqliteConfig::default()
        };
        assert!(!SqliteSink::new(&off).unwrap().enabled());
    }

    #[test]
    fn test_rejects_invalid_rate() {
        let bad = SqliteConfig {
            rate: 0.0,
            ..SqliteConfig::default()
        };
        assert!(matches!(SqliteSink::new(&bad), Err(SinkError::Setup(_))));
    }

    #[tokio::test]
    async fn test_start_creates_table() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("data").join("tilt.db");
        let mut sink = SqliteSink::new(&config(path.clone())).unwrap();

        sink.start().await.unwrap();

        assert!(path.exists());
        assert!(rows(&path).is_empty());
    }

    #[tokio::test]
    async fn test_one_row_per_reading() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("tilt.db");
        let mut sink = SqliteSink::new(&config(path.clone())).unwrap();
        sink.start().await.unwrap();

        sink.write(&reading("red", 70.0, 1.050)).await.unwrap();
        sink.write(&reading("blue", 66.0, 1.010)).await.unwrap();

        assert_eq!(
            rows(&path),
            vec![
                (1_000_000_000, "red".to_string(), 70.0, 21, 1.050),
                (1_000_000_000, "blue".to_string(), 66.0, 19, 1.010),
            ]
        );
    }

    #[tokio::test]
    async fn test_existing_rows_are_kept() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("tilt.db");

        let mut first = SqliteSink::new(&config(path.clone())).unwrap();
        first.start().await.unwrap();
        first.write(&reading("red", 70.0, 1.050)).await.unwrap();
        drop(first);

        let mut second = SqliteSink::new(&config(path.clone())).unwrap();
        second.start().await.unwrap();
        second.write(&reading("red", 71.0, 1.049)).await.unwrap();

        assert_eq!(rows(&path).len(), 2);
    }

    #[tokio::test]
    async fn test_unwritable_path_fails_to_start() {
        let dir = tempdir().unwrap();
        // A directory cannot be opened as a database file
        let mut sink = SqliteSink::new(&config(dir.path().to_path_buf())).unwrap();
        assert!(sink.start().await.is_err());
    }

    #[test]
    fn test_limiter_once_per_minute_per_color() {
        let mut sink = SqliteSink::new(&SqliteConfig::default()).unwrap();
        assert_eq!(DEFAULT_SQLITE_PERIOD, Duration::from_secs(60));

        let limiter = sink.limiter().unwrap();
        assert!(limiter.admit("red").is_admitted());
        assert!(!limiter.admit("red").is_admitted());
        assert!(limiter.admit("blue").is_admitted());
    }
}
