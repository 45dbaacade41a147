//! SQLite price adapter.
//!
//! One `bars` table holds raw observations for every instrument. Chunks are
//! calendar years of the `timestamp` column.

use crate::domain::bar::{parse_timestamp, Bar, RawBar};
use crate::domain::error::ThalesError;
use crate::ports::config_port::ConfigPort;
use crate::ports::price_port::PriceChunkPort;
use chrono::NaiveDateTime;
use r2d2::Pool;
use r2d2_sqlite::SqliteConnectionManager;
use rusqlite::params;

const TS_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

pub struct SqliteAdapter {
    pool: Pool<SqliteConnectionManager>,
}

fn query_err(e: rusqlite::Error) -> ThalesError {
    ThalesError::DataSource {
        reason: format!("sqlite: {}", e),
    }
}

fn pool_err(e: r2d2::Error) -> ThalesError {
    ThalesError::DataSource {
        reason: format!("sqlite pool: {}", e),
    }
}

fn format_ts(ts: NaiveDateTime) -> String {
    ts.format(TS_FORMAT).to_string()
}

fn parse_column(text: &str, col: usize) -> rusqlite::Result<NaiveDateTime> {
    parse_timestamp(text).ok_or_else(|| {
        rusqlite::Error::FromSqlConversionFailure(
            col,
            rusqlite::types::Type::Text,
            format!("invalid timestamp '{}'", text).into(),
        )
    })
}

impl SqliteAdapter {
    /// Open the database named by `[data] path`.
    pub fn from_config(config: &dyn ConfigPort) -> Result<Self, ThalesError> {
        let db_path = config
            .get_string("data", "path")
            .ok_or_else(|| ThalesError::ConfigMissing {
                section: "data".into(),
                key: "path".into(),
            })?;

        let pool_size = config.get_int("data", "pool_size", 4);
        let pool_size = u32::try_from(pool_size)
            .ok()
            .filter(|&n| n >= 1)
            .ok_or_else(|| ThalesError::ConfigInvalid {
                section: "data".into(),
                key: "pool_size".into(),
                reason: format!("must be between 1 and {}, got {}", u32::MAX, pool_size),
            })?;

        let manager = SqliteConnectionManager::file(&db_path);
        let pool = Pool::builder()
            .max_size(pool_size)
            .build(manager)
            .map_err(pool_err)?;

        Ok(Self { pool })
    }

    pub fn in_memory() -> Result<Self, ThalesError> {
        let manager = SqliteConnectionManager::memory();
        let pool = Pool::builder()
            .max_size(1)
            .build(manager)
            .map_err(pool_err)?;

        Ok(Self { pool })
    }

    pub fn initialize_schema(&self) -> Result<(), ThalesError> {
        let conn = self.pool.get().map_err(pool_err)?;

        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS bars (
                instrument TEXT NOT NULL,
                timestamp TEXT NOT NULL,
                open REAL NOT NULL,
                high REAL NOT NULL,
                low REAL NOT NULL,
                close REAL NOT NULL,
                volume REAL,
                request_time TEXT
            );
            CREATE INDEX IF NOT EXISTS idx_bars_instrument_ts ON bars(instrument, timestamp);",
        )
        .map_err(query_err)?;

        Ok(())
    }

    /// Append raw observations. Duplicates are kept and resolved on load.
    pub fn insert_bars(&self, instrument: &str, bars: &[RawBar]) -> Result<(), ThalesError> {
        let mut conn = self.pool.get().map_err(pool_err)?;
        let tx = conn.transaction().map_err(query_err)?;

        for raw in bars {
            let bar = &raw.bar;
            tx.execute(
                "INSERT INTO bars (instrument, timestamp, open, high, low, close, volume, request_time)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
                params![
                    instrument,
                    format_ts(bar.timestamp),
                    bar.open,
                    bar.high,
                    bar.low,
                    bar.close,
                    bar.volume,
                    raw.request_time.map(format_ts),
                ],
            )
            .map_err(query_err)?;
        }

        tx.commit().map_err(query_err)?;
        Ok(())
    }
}

impl PriceChunkPort for SqliteAdapter {
    fn chunk_years(&self, instrument: &str) -> Result<Vec<i32>, ThalesError> {
        let conn = self.pool.get().map_err(pool_err)?;
        let mut stmt = conn
            .prepare(
                "SELECT DISTINCT CAST(substr(timestamp, 1, 4) AS INTEGER)
                 FROM bars WHERE instrument = ?1 ORDER BY 1",
            )
            .map_err(query_err)?;

        let rows = stmt
            .query_map(params![instrument], |row| row.get::<_, i32>(0))
            .map_err(query_err)?;

        let mut years = Vec::new();
        for row in rows {
            years.push(row.map_err(query_err)?);
        }
        Ok(years)
    }

    fn load_chunk(&self, instrument: &str, year: i32) -> Result<Vec<RawBar>, ThalesError> {
        let conn = self.pool.get().map_err(pool_err)?;
        let from = format!("{:04}-01-01 00:00:00", year);
        let to = format!("{:04}-01-01 00:00:00", year + 1);

        let mut stmt = conn
            .prepare(
                "SELECT timestamp, open, high, low, close, volume, request_time
                 FROM bars
                 WHERE instrument = ?1 AND timestamp >= ?2 AND timestamp < ?3
                 ORDER BY timestamp ASC, rowid ASC",
            )
            .map_err(query_err)?;

        let rows = stmt
            .query_map(params![instrument, from, to], |row| {
                let ts: String = row.get(0)?;
                let request_time: Option<String> = row.get(6)?;
                Ok(RawBar {
                    bar: Bar {
                        timestamp: parse_column(&ts, 0)?,
                        open: row.get(1)?,
                        high: row.get(2)?,
                        low: row.get(3)?,
                        close: row.get(4)?,
                        volume: row.get(5)?,
                    },
                    request_time: request_time.as_deref().map(|t| parse_column(t, 6)).transpose()?,
                })
            })
            .map_err(query_err)?;

        let mut bars = Vec::new();
        for row in rows {
            bars.push(row.map_err(query_err)?);
        }
        Ok(bars)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::file_config_adapter::FileConfigAdapter;
    use chrono::NaiveDate;

    struct EmptyConfig;

    impl ConfigPort for EmptyConfig {
        fn get_string(&self, _section: &str, _key: &str) -> Option<String> {
            None
        }
        fn get_int(&self, _section: &str, _key: &str, default: i64) -> i64 {
            default
        }
    }

    fn raw(y: i32, m: u32, d: u32, h: u32, close: f64) -> RawBar {
        RawBar::new(Bar {
            timestamp: NaiveDate::from_ymd_opt(y, m, d)
                .unwrap()
                .and_hms_opt(h, 0, 0)
                .unwrap(),
            open: close,
            high: close + 1.0,
            low: close - 1.0,
            close,
            volume: Some(10.0),
        })
    }

    fn seeded() -> SqliteAdapter {
        let adapter = SqliteAdapter::in_memory().unwrap();
        adapter.initialize_schema().unwrap();
        let fetched = NaiveDate::from_ymd_opt(2021, 1, 1)
            .unwrap()
            .and_hms_opt(0, 0, 0)
            .unwrap();
        adapter
            .insert_bars(
                "EUR_USD",
                &[
                    raw(2019, 12, 31, 22, 1.0),
                    raw(2020, 1, 2, 8, 2.0),
                    raw(2020, 1, 2, 8, 2.5).fetched_at(fetched),
                ],
            )
            .unwrap();
        adapter
            .insert_bars("GBP_USD", &[raw(2018, 5, 1, 8, 9.0)])
            .unwrap();
        adapter
    }

    #[test]
    fn from_config_missing_path() {
        let result = SqliteAdapter::from_config(&EmptyConfig);
        assert!(matches!(result, Err(ThalesError::ConfigMissing { .. })));
    }

    #[test]
    fn pool_size_out_of_range_is_rejected() {
        for size in ["0", "-3", "4294967296"] {
            let config = FileConfigAdapter::from_string(&format!(
                "[data]\npath = :memory:\npool_size = {}\n",
                size
            ))
            .unwrap();
            let result = SqliteAdapter::from_config(&config);
            assert!(
                matches!(&result, Err(ThalesError::ConfigInvalid { key, .. }) if key == "pool_size"),
                "pool_size = {}",
                size
            );
        }
    }

    #[test]
    fn chunk_years_per_instrument() {
        let adapter = seeded();
        assert_eq!(adapter.chunk_years("EUR_USD").unwrap(), vec![2019, 2020]);
        assert_eq!(adapter.chunk_years("GBP_USD").unwrap(), vec![2018]);
        assert!(adapter.chunk_years("USD_JPY").unwrap().is_empty());
    }

    #[test]
    fn load_chunk_keeps_raw_duplicates_in_insert_order() {
        let adapter = seeded();
        let rows = adapter.load_chunk("EUR_USD", 2020).unwrap();
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].bar.close, 2.0);
        assert!(rows[0].request_time.is_none());
        assert_eq!(rows[1].bar.close, 2.5);
        assert!(rows[1].request_time.is_some());
        assert_eq!(rows[1].bar.volume, Some(10.0));
    }

    #[test]
    fn load_chunk_respects_year_bounds() {
        let adapter = seeded();
        let rows = adapter.load_chunk("EUR_USD", 2019).unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].bar.close, 1.0);
    }
}
