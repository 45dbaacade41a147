//! Cursor over the bars of one instrument, backed by yearly chunks.
//!
//! Chunks are pulled from a [`PriceChunkPort`] in year order the first time
//! the cursor needs a bar beyond what is loaded, so a range spanning several
//! years reads as one continuous sequence.
//!
//! Duplicate timestamps are resolved by [`merge_observations`]: the
//! observation with the strictly latest `request_time` wins, an observation
//! with a `request_time` beats one without, and otherwise the first-loaded
//! observation is kept. Each incoming chunk is merged against the bars the
//! cursor has not reached yet, so a re-fetch stored in a later chunk still
//! replaces an older copy. Before the cursor settles on a bar dated in year
//! `Y`, every pending chunk up to `Y + 1` is loaded; bars the cursor has
//! passed are never rewritten.

use chrono::{Datelike, Duration, NaiveDate, NaiveDateTime, NaiveTime, Timelike};
use std::collections::VecDeque;
use tracing::debug;

use crate::domain::bar::{Bar, RawBar};
use crate::domain::error::ThalesError;
use crate::ports::price_port::PriceChunkPort;

pub const DEFAULT_MAX_LOOKAHEAD: usize = 100_000;

/// Relative jump for [`PriceSeries::advance_by`]. The cursor time is first
/// truncated to the unit (midnight, top of the hour, start of the minute).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Step {
    Days(u32),
    Hours(u32),
    Minutes(u32),
}

impl Step {
    pub fn target_from(self, from: NaiveDateTime) -> NaiveDateTime {
        let date = from.date();
        match self {
            Step::Days(n) => date.and_time(NaiveTime::MIN) + Duration::days(i64::from(n)),
            Step::Hours(n) => {
                date.and_time(NaiveTime::MIN)
                    + Duration::hours(i64::from(from.hour()))
                    + Duration::hours(i64::from(n))
            }
            Step::Minutes(n) => {
                date.and_time(NaiveTime::MIN)
                    + Duration::minutes(i64::from(from.hour() * 60 + from.minute()))
                    + Duration::minutes(i64::from(n))
            }
        }
    }
}

/// Merge two batches of observations into one strictly increasing,
/// duplicate-free batch.
///
/// The result does not depend on argument order as long as observations of
/// the same timestamp carry distinct `request_time`s. On a tie (equal or
/// both absent) the one from `existing`, or the earlier one within a batch,
/// is kept; [`PriceSeries`] always loads years ascending and rows in source
/// order, so a given set of chunks yields one series.
pub fn merge_observations(existing: Vec<RawBar>, incoming: Vec<RawBar>) -> Vec<RawBar> {
    let mut all = existing;
    all.extend(incoming);
    // Stable: equal timestamps keep load order.
    all.sort_by_key(|raw| raw.bar.timestamp);

    let mut merged: Vec<RawBar> = Vec::with_capacity(all.len());
    for raw in all {
        match merged.last_mut() {
            Some(kept) if kept.bar.timestamp == raw.bar.timestamp => {
                if raw.request_time > kept.request_time {
                    *kept = raw;
                }
            }
            _ => merged.push(raw),
        }
    }
    merged
}

pub struct PriceSeries<'a> {
    port: &'a dyn PriceChunkPort,
    instrument: String,
    start: NaiveDateTime,
    /// Exclusive upper bound.
    end: Option<NaiveDateTime>,
    pending_years: VecDeque<i32>,
    bars: Vec<Bar>,
    /// `request_time` of each entry in `bars`.
    fetched: Vec<Option<NaiveDateTime>>,
    cursor: Option<usize>,
    max_lookahead: usize,
}

impl<'a> PriceSeries<'a> {
    /// Bars of `instrument` dated within `[start, end]`.
    pub fn load_range(
        port: &'a dyn PriceChunkPort,
        instrument: &str,
        start: NaiveDate,
        end: NaiveDate,
    ) -> Result<Self, ThalesError> {
        if end < start {
            return Err(ThalesError::DataSource {
                reason: format!("range end {} is before start {}", end, start),
            });
        }
        Self::build(port, instrument, start, Some(end))
    }

    /// Bars of `instrument` from `start` to the end of the available data.
    pub fn from_date(
        port: &'a dyn PriceChunkPort,
        instrument: &str,
        start: NaiveDate,
    ) -> Result<Self, ThalesError> {
        Self::build(port, instrument, start, None)
    }

    fn build(
        port: &'a dyn PriceChunkPort,
        instrument: &str,
        start: NaiveDate,
        end: Option<NaiveDate>,
    ) -> Result<Self, ThalesError> {
        let mut years: Vec<i32> = port
            .chunk_years(instrument)?
            .into_iter()
            .filter(|&y| y >= start.year() && end.is_none_or(|e| y <= e.year()))
            .collect();
        years.sort_unstable();
        years.dedup();
        if years.is_empty() {
            return Err(ThalesError::NoDataAvailable {
                reason: format!("no price chunks for {} from {}", instrument, start),
            });
        }

        Ok(Self {
            port,
            instrument: instrument.to_string(),
            start: start.and_time(NaiveTime::MIN),
            end: end.and_then(|e| e.succ_opt()).map(|e| e.and_time(NaiveTime::MIN)),
            pending_years: years.into(),
            bars: Vec::new(),
            fetched: Vec::new(),
            cursor: None,
            max_lookahead: DEFAULT_MAX_LOOKAHEAD,
        })
    }

    /// Bound on the number of bars `find_first_matching` may examine.
    pub fn with_max_lookahead(mut self, max_lookahead: usize) -> Self {
        self.max_lookahead = max_lookahead.max(1);
        self
    }

    /// Drop bars before `start` within the first day of the range. Only
    /// affects chunks not yet loaded.
    pub fn starting_at(mut self, start: NaiveDateTime) -> Self {
        if start > self.start {
            self.start = start;
        }
        self
    }

    pub fn max_lookahead(&self) -> usize {
        self.max_lookahead
    }

    pub fn instrument(&self) -> &str {
        &self.instrument
    }

    /// The bar under the cursor; `None` until the first move.
    pub fn current(&self) -> Option<&Bar> {
        self.cursor.map(|i| &self.bars[i])
    }

    fn next_index(&self) -> usize {
        self.cursor.map_or(0, |i| i + 1)
    }

    fn load_next_chunk(&mut self) -> Result<bool, ThalesError> {
        let Some(year) = self.pending_years.pop_front() else {
            return Ok(false);
        };
        let raw = self.port.load_chunk(&self.instrument, year)?;
        let rows = raw.len();
        let start = self.start;
        let end = self.end;

        let settled = self.next_index();
        let passed = settled.checked_sub(1).map(|i| self.bars[i].timestamp);
        let unvisited: Vec<RawBar> = self
            .bars
            .drain(settled..)
            .zip(self.fetched.drain(settled..))
            .map(|(bar, request_time)| RawBar { bar, request_time })
            .collect();
        let incoming: Vec<RawBar> = raw
            .into_iter()
            .filter(|r| r.bar.timestamp >= start && end.is_none_or(|e| r.bar.timestamp < e))
            .filter(|r| passed.is_none_or(|p| r.bar.timestamp > p))
            .collect();

        for r in merge_observations(unvisited, incoming) {
            self.bars.push(r.bar);
            self.fetched.push(r.request_time);
        }
        debug!(
            instrument = %self.instrument,
            year,
            rows,
            loaded = self.bars.len(),
            "loaded price chunk"
        );
        Ok(true)
    }

    /// Make sure `index` is loaded if data exists for it, along with any
    /// pending chunk that may hold a re-fetch of it.
    fn ensure_loaded(&mut self, index: usize) -> Result<bool, ThalesError> {
        while self.bars.len() <= index {
            if !self.load_next_chunk()? {
                return Ok(false);
            }
        }
        let horizon = self.bars[index].timestamp.year() + 1;
        while self.pending_years.front().is_some_and(|&y| y <= horizon) {
            self.load_next_chunk()?;
        }
        Ok(true)
    }

    fn exhausted(&self, what: &str) -> ThalesError {
        ThalesError::NoDataAvailable {
            reason: format!("{} {}", self.instrument, what),
        }
    }

    /// Move to the next bar.
    pub fn next_bar(&mut self) -> Result<Bar, ThalesError> {
        let next = self.next_index();
        if !self.ensure_loaded(next)? {
            return Err(self.exhausted("has no further bars"));
        }
        self.cursor = Some(next);
        Ok(self.bars[next].clone())
    }

    /// Move to the first bar at or after `timestamp`. The cursor never moves
    /// backwards; a target at or before the current bar returns it unchanged.
    pub fn advance_to(&mut self, timestamp: NaiveDateTime) -> Result<Bar, ThalesError> {
        if let Some(bar) = self.current() {
            if bar.timestamp >= timestamp {
                return Ok(bar.clone());
            }
        }
        let mut idx = self.next_index();
        loop {
            if !self.ensure_loaded(idx)? {
                return Err(self.exhausted(&format!("has no bar at or after {}", timestamp)));
            }
            if self.bars[idx].timestamp >= timestamp {
                self.cursor = Some(idx);
                return Ok(self.bars[idx].clone());
            }
            idx += 1;
        }
    }

    /// Jump relative to the current bar (or to the range start before the
    /// first move).
    pub fn advance_by(&mut self, step: Step) -> Result<Bar, ThalesError> {
        let from = self.current().map_or(self.start, |b| b.timestamp);
        self.advance_to(step.target_from(from))
    }

    /// Scan forward from the next bar for the first one satisfying
    /// `predicate`. At most `max_lookahead` bars are examined; on failure the
    /// cursor is left where it was.
    pub fn find_first_matching<F>(&mut self, mut predicate: F) -> Result<Bar, ThalesError>
    where
        F: FnMut(&Bar) -> bool,
    {
        let first = self.next_index();
        for idx in (first..).take(self.max_lookahead) {
            if !self.ensure_loaded(idx)? {
                return Err(self.exhausted("ran out of bars without a match"));
            }
            if predicate(&self.bars[idx]) {
                self.cursor = Some(idx);
                return Ok(self.bars[idx].clone());
            }
        }
        Err(self.exhausted(&format!("has no match within {} bars", self.max_lookahead)))
    }

    /// Load every remaining chunk and return the whole series.
    pub fn load_all(&mut self) -> Result<&[Bar], ThalesError> {
        while self.load_next_chunk()? {}
        Ok(&self.bars)
    }
}
