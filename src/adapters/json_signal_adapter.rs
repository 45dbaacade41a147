//! Auxiliary signals read from a directory of per-day JSON documents.
//!
//! `<dir>/<YYYY-MM-DD>.json` holds an object of named numbers, e.g.
//! `{"mean": 138.42}`. Each day is read at most once.

use chrono::{NaiveDate, NaiveDateTime};
use std::cell::RefCell;
use std::collections::HashMap;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

use crate::domain::error::ThalesError;
use crate::ports::signal_port::{AuxiliarySignalPort, Signals};

pub struct JsonSignalAdapter {
    dir: PathBuf,
    cache: RefCell<HashMap<NaiveDate, Option<Signals>>>,
}

impl JsonSignalAdapter {
    pub fn new(dir: PathBuf) -> Self {
        Self {
            dir,
            cache: RefCell::new(HashMap::new()),
        }
    }

    fn day_path(&self, date: NaiveDate) -> PathBuf {
        self.dir.join(format!("{}.json", date.format("%Y-%m-%d")))
    }

    /// Write one day's signals, replacing any existing document.
    pub fn write_day(&self, date: NaiveDate, signals: &Signals) -> Result<(), ThalesError> {
        fs::create_dir_all(&self.dir)?;
        let path = self.day_path(date);
        let text = serde_json::to_string_pretty(signals).map_err(|e| ThalesError::Storage {
            path: path.display().to_string(),
            reason: e.to_string(),
        })?;
        fs::write(&path, text)?;
        self.cache.borrow_mut().remove(&date);
        Ok(())
    }

    fn read_day(&self, date: NaiveDate) -> Option<Signals> {
        let path = self.day_path(date);
        let text = match read_document(&path) {
            Ok(Some(text)) => text,
            Ok(None) => {
                debug!(path = %path.display(), "no signal document");
                return None;
            }
            Err(e) => {
                warn!(path = %path.display(), error = %e, "failed to read signal document");
                return None;
            }
        };
        match serde_json::from_str::<Signals>(&text) {
            Ok(signals) => Some(signals),
            Err(e) => {
                warn!(path = %path.display(), error = %e, "unreadable signal document");
                None
            }
        }
    }
}

/// A missing document is `Ok(None)`; any other failure is an error.
fn read_document(path: &Path) -> io::Result<Option<String>> {
    match fs::read_to_string(path) {
        Ok(text) => Ok(Some(text)),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
        Err(e) => Err(e),
    }
}

impl AuxiliarySignalPort for JsonSignalAdapter {
    fn signals_at(&self, timestamp: NaiveDateTime) -> Option<Signals> {
        let date = timestamp.date();
        if let Some(cached) = self.cache.borrow().get(&date) {
            return cached.clone();
        }
        let signals = self.read_day(date);
        self.cache.borrow_mut().insert(date, signals.clone());
        signals
    }
}
