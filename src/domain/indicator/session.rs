//! Daily session midpoint baseline.
//!
//! For each date, the baseline is (max high + min low) / 2 over bars whose
//! hour falls in `[start_hour, end_hour)`. Bars inside the session have no
//! value. Bars after it use the same day's baseline. Bars before it use the
//! most recent earlier day that has one, looking back at most
//! `MAX_LOOKBACK_DAYS` calendar days.

use chrono::{Duration, NaiveDate, Timelike};
use std::collections::BTreeMap;

use crate::domain::bar::Bar;
use crate::domain::indicator::{IndicatorPoint, IndicatorSeries, IndicatorType};

pub const MAX_LOOKBACK_DAYS: i64 = 10;

pub fn calculate_session_midpoint(bars: &[Bar], start_hour: u32, end_hour: u32) -> IndicatorSeries {
    let indicator_type = IndicatorType::Session {
        start_hour,
        end_hour,
    };
    if bars.is_empty() || end_hour <= start_hour {
        return IndicatorSeries::empty(indicator_type);
    }

    let in_session = |bar: &Bar| {
        let hour = bar.timestamp.hour();
        hour >= start_hour && hour < end_hour
    };

    let mut ranges: BTreeMap<NaiveDate, (f64, f64)> = BTreeMap::new();
    for bar in bars.iter().filter(|b| in_session(b)) {
        ranges
            .entry(bar.date())
            .and_modify(|(high, low)| {
                *high = high.max(bar.high);
                *low = low.min(bar.low);
            })
            .or_insert((bar.high, bar.low));
    }
    let baselines: BTreeMap<NaiveDate, f64> = ranges
        .into_iter()
        .map(|(date, (high, low))| (date, (high + low) / 2.0))
        .collect();

    let previous_baseline = |date: NaiveDate| {
        (1..=MAX_LOOKBACK_DAYS)
            .map(|back| date - Duration::days(back))
            .find_map(|d| baselines.get(&d).copied())
    };

    let values = bars
        .iter()
        .map(|bar| {
            let hour = bar.timestamp.hour();
            let value = if in_session(bar) {
                None
            } else if hour >= end_hour {
                baselines.get(&bar.date()).copied()
            } else {
                previous_baseline(bar.date())
            };
            match value {
                Some(v) => IndicatorPoint::valid(bar.timestamp, v),
                None => IndicatorPoint::invalid(bar.timestamp),
            }
        })
        .collect();

    IndicatorSeries {
        indicator_type,
        values,
    }
}
