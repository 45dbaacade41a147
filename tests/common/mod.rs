#![allow(dead_code)]

use chrono::{Datelike, NaiveDateTime};
use std::collections::{BTreeMap, HashMap};
use thales::domain::bar::{parse_timestamp, Bar, RawBar};
use thales::domain::error::ThalesError;
use thales::domain::scope::{Partition, RunScope};
use thales::ports::price_port::PriceChunkPort;
use thales::ports::signal_port::{AuxiliarySignalPort, Signals, BASELINE};

/// In-memory price source keyed by instrument and year.
pub struct MockChunkPort {
    pub chunks: BTreeMap<(String, i32), Vec<RawBar>>,
    pub errors: HashMap<String, String>,
}

impl MockChunkPort {
    pub fn new() -> Self {
        Self {
            chunks: BTreeMap::new(),
            errors: HashMap::new(),
        }
    }

    pub fn with_bars(self, instrument: &str, bars: Vec<Bar>) -> Self {
        self.with_raw(instrument, bars.into_iter().map(RawBar::new).collect())
    }

    pub fn with_raw(mut self, instrument: &str, raws: Vec<RawBar>) -> Self {
        for raw in raws {
            let year = raw.bar.timestamp.year();
            self.chunks
                .entry((instrument.to_string(), year))
                .or_default()
                .push(raw);
        }
        self
    }

    /// Put `raws` in the chunk for `year` whatever their timestamps.
    pub fn with_chunk(mut self, instrument: &str, year: i32, raws: Vec<RawBar>) -> Self {
        self.chunks
            .entry((instrument.to_string(), year))
            .or_default()
            .extend(raws);
        self
    }

    pub fn with_error(mut self, instrument: &str, reason: &str) -> Self {
        self.errors.insert(instrument.to_string(), reason.to_string());
        self
    }
}

impl PriceChunkPort for MockChunkPort {
    fn chunk_years(&self, instrument: &str) -> Result<Vec<i32>, ThalesError> {
        if let Some(reason) = self.errors.get(instrument) {
            return Err(ThalesError::DataSource {
                reason: reason.clone(),
            });
        }
        Ok(self
            .chunks
            .keys()
            .filter(|(i, _)| i == instrument)
            .map(|(_, y)| *y)
            .collect())
    }

    fn load_chunk(&self, instrument: &str, year: i32) -> Result<Vec<RawBar>, ThalesError> {
        Ok(self
            .chunks
            .get(&(instrument.to_string(), year))
            .cloned()
            .unwrap_or_default())
    }
}

/// The same baseline for every timestamp.
pub struct ConstantMean(pub f64);

impl AuxiliarySignalPort for ConstantMean {
    fn signals_at(&self, _timestamp: NaiveDateTime) -> Option<Signals> {
        let mut s = Signals::new();
        s.insert(BASELINE.to_string(), self.0);
        Some(s)
    }
}

pub fn ts(s: &str) -> NaiveDateTime {
    parse_timestamp(s).unwrap()
}

pub fn make_bar(t: &str, open: f64, high: f64, low: f64, close: f64) -> Bar {
    Bar {
        timestamp: ts(t),
        open,
        high,
        low,
        close,
        volume: None,
    }
}

/// A bar that trades flat at `price`.
pub fn flat_bar(t: &str, price: f64) -> Bar {
    make_bar(t, price, price, price, price)
}

pub fn backtest_partition(strategy: &str, run: &str) -> Partition {
    Partition::new(strategy, RunScope::backtest(run).unwrap()).unwrap()
}

pub fn live_partition(strategy: &str) -> Partition {
    Partition::new(strategy, RunScope::Live).unwrap()
}
