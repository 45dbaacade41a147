//! CSV file price adapter.
//!
//! Layout: `<base>/<instrument>/<year>.csv`, header
//! `timestamp,open,high,low,close[,volume][,request_time]`.

use crate::domain::bar::{parse_timestamp, Bar, RawBar};
use crate::domain::error::ThalesError;
use crate::ports::price_port::PriceChunkPort;
use std::fs;
use std::path::PathBuf;
use tracing::debug;

pub struct CsvAdapter {
    base_path: PathBuf,
}

struct Columns {
    timestamp: usize,
    open: usize,
    high: usize,
    low: usize,
    close: usize,
    volume: Option<usize>,
    request_time: Option<usize>,
}

impl Columns {
    fn from_headers(headers: &csv::StringRecord, path: &str) -> Result<Self, ThalesError> {
        let find = |name: &str| headers.iter().position(|h| h.trim().eq_ignore_ascii_case(name));
        let require = |name: &str| {
            find(name).ok_or_else(|| ThalesError::DataSource {
                reason: format!("{}: missing {} column", path, name),
            })
        };
        Ok(Self {
            timestamp: require("timestamp")?,
            open: require("open")?,
            high: require("high")?,
            low: require("low")?,
            close: require("close")?,
            volume: find("volume"),
            request_time: find("request_time"),
        })
    }
}

impl CsvAdapter {
    pub fn new(base_path: PathBuf) -> Self {
        Self { base_path }
    }

    fn instrument_dir(&self, instrument: &str) -> PathBuf {
        self.base_path.join(instrument)
    }

    fn chunk_path(&self, instrument: &str, year: i32) -> PathBuf {
        self.instrument_dir(instrument).join(format!("{}.csv", year))
    }
}

fn parse_price(record: &csv::StringRecord, idx: usize, name: &str, line: u64) -> Result<f64, ThalesError> {
    let raw = record.get(idx).ok_or_else(|| ThalesError::DataSource {
        reason: format!("line {}: missing {} value", line, name),
    })?;
    raw.trim().parse().map_err(|e| ThalesError::DataSource {
        reason: format!("line {}: invalid {} value '{}': {}", line, name, raw, e),
    })
}

impl PriceChunkPort for CsvAdapter {
    fn chunk_years(&self, instrument: &str) -> Result<Vec<i32>, ThalesError> {
        let dir = self.instrument_dir(instrument);
        let entries = fs::read_dir(&dir).map_err(|e| ThalesError::DataSource {
            reason: format!("failed to read directory {}: {}", dir.display(), e),
        })?;

        let mut years = Vec::new();
        for entry in entries {
            let entry = entry.map_err(|e| ThalesError::DataSource {
                reason: format!("directory entry error: {}", e),
            })?;
            let name = entry.file_name();
            let name_str = name.to_string_lossy();
            if let Some(year) = name_str.strip_suffix(".csv").and_then(|y| y.parse::<i32>().ok()) {
                years.push(year);
            }
        }

        years.sort_unstable();
        Ok(years)
    }

    fn load_chunk(&self, instrument: &str, year: i32) -> Result<Vec<RawBar>, ThalesError> {
        let path = self.chunk_path(instrument, year);
        let shown = path.display().to_string();
        let content = fs::read_to_string(&path).map_err(|e| ThalesError::DataSource {
            reason: format!("failed to read {}: {}", shown, e),
        })?;

        let mut rdr = csv::Reader::from_reader(content.as_bytes());
        let headers = rdr.headers().map_err(|e| ThalesError::DataSource {
            reason: format!("{}: CSV header error: {}", shown, e),
        })?;
        let cols = Columns::from_headers(headers, &shown)?;

        let mut bars = Vec::new();
        for result in rdr.records() {
            let record = result.map_err(|e| ThalesError::DataSource {
                reason: format!("{}: CSV parse error: {}", shown, e),
            })?;
            let line = record.position().map_or(0, |p| p.line());

            let ts_str = record.get(cols.timestamp).unwrap_or_default();
            let timestamp = parse_timestamp(ts_str).ok_or_else(|| ThalesError::DataSource {
                reason: format!("{} line {}: invalid timestamp '{}'", shown, line, ts_str),
            })?;

            let volume = match cols.volume {
                Some(i) if record.get(i).is_some_and(|v| !v.trim().is_empty()) => {
                    Some(parse_price(&record, i, "volume", line)?)
                }
                _ => None,
            };
            let request_time = cols
                .request_time
                .and_then(|i| record.get(i))
                .filter(|v| !v.trim().is_empty())
                .map(|v| {
                    parse_timestamp(v).ok_or_else(|| ThalesError::DataSource {
                        reason: format!("{} line {}: invalid request_time '{}'", shown, line, v),
                    })
                })
                .transpose()?;

            bars.push(RawBar {
                bar: Bar {
                    timestamp,
                    open: parse_price(&record, cols.open, "open", line)?,
                    high: parse_price(&record, cols.high, "high", line)?,
                    low: parse_price(&record, cols.low, "low", line)?,
                    close: parse_price(&record, cols.close, "close", line)?,
                    volume,
                },
                request_time,
            });
        }

        debug!(path = %shown, rows = bars.len(), "read csv chunk");
        Ok(bars)
    }
}
