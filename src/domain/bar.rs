//! OHLC bar representation.

use chrono::{NaiveDate, NaiveDateTime};
use serde::{Deserialize, Serialize};

const TIMESTAMP_FORMATS: [&str; 3] = ["%Y-%m-%d %H:%M:%S", "%Y-%m-%dT%H:%M:%S", "%Y-%m-%d %H:%M"];

/// Parse `YYYY-MM-DD[( |T)HH:MM[:SS]]`; a bare date means midnight.
pub fn parse_timestamp(s: &str) -> Option<NaiveDateTime> {
    let s = s.trim();
    TIMESTAMP_FORMATS
        .iter()
        .find_map(|fmt| NaiveDateTime::parse_from_str(s, fmt).ok())
        .or_else(|| {
            NaiveDate::parse_from_str(s, "%Y-%m-%d")
                .ok()
                .and_then(|d| d.and_hms_opt(0, 0, 0))
        })
}

/// True if `s` is a bare `YYYY-MM-DD` date.
pub fn is_date_only(s: &str) -> bool {
    NaiveDate::parse_from_str(s.trim(), "%Y-%m-%d").is_ok()
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Bar {
    pub timestamp: NaiveDateTime,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub volume: Option<f64>,
}

impl Bar {
    pub fn date(&self) -> NaiveDate {
        self.timestamp.date()
    }

    /// (high + low) / 2
    pub fn midpoint(&self) -> f64 {
        (self.high + self.low) / 2.0
    }
}

/// One observation as delivered by a price source, before de-duplication.
///
/// `request_time` is when the observation was fetched; re-scraped data for
/// the same bar carries a later value.
#[derive(Debug, Clone, PartialEq)]
pub struct RawBar {
    pub bar: Bar,
    pub request_time: Option<NaiveDateTime>,
}

impl RawBar {
    pub fn new(bar: Bar) -> Self {
        Self {
            bar,
            request_time: None,
        }
    }

    pub fn fetched_at(mut self, request_time: NaiveDateTime) -> Self {
        self.request_time = Some(request_time);
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_bar() -> Bar {
        Bar {
            timestamp: NaiveDate::from_ymd_opt(2019, 9, 5)
                .unwrap()
                .and_hms_opt(8, 1, 0)
                .unwrap(),
            open: 138.10,
            high: 138.40,
            low: 137.90,
            close: 138.20,
            volume: None,
        }
    }

    #[test]
    fn date_strips_time() {
        let bar = sample_bar();
        assert_eq!(bar.date(), NaiveDate::from_ymd_opt(2019, 9, 5).unwrap());
    }

    #[test]
    fn midpoint() {
        let bar = sample_bar();
        assert!((bar.midpoint() - 138.15).abs() < 1e-9);
    }

    #[test]
    fn timestamp_formats() {
        let expected = NaiveDate::from_ymd_opt(2020, 1, 2)
            .unwrap()
            .and_hms_opt(8, 0, 0)
            .unwrap();
        assert_eq!(parse_timestamp("2020-01-02 08:00:00"), Some(expected));
        assert_eq!(parse_timestamp("2020-01-02T08:00:00"), Some(expected));
        assert_eq!(parse_timestamp(" 2020-01-02 08:00 "), Some(expected));
        assert!(parse_timestamp("2020-01-02").is_some());
        assert!(parse_timestamp("02/01/2020").is_none());
        assert!(is_date_only("2020-01-02"));
        assert!(!is_date_only("2020-01-02 08:00"));
    }

    #[test]
    fn raw_bar_request_time() {
        let fetched = NaiveDate::from_ymd_opt(2020, 1, 1)
            .unwrap()
            .and_hms_opt(0, 0, 0)
            .unwrap();
        let raw = RawBar::new(sample_bar()).fetched_at(fetched);
        assert_eq!(raw.request_time, Some(fetched));
    }
}
