//! Position records and realized P&L.
//!
//! A position is created open, closed exactly once, and never edited after
//! that. Realized figures (`delta`, `realized_return_ratio`, `hold_duration`)
//! only exist once it is closed.

use chrono::{Duration, NaiveDateTime};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use uuid::Uuid;

use super::error::ThalesError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Side {
    Long,
    Short,
}

impl fmt::Display for Side {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Side::Long => write!(f, "long"),
            Side::Short => write!(f, "short"),
        }
    }
}

/// A JSON scalar stored alongside a position for later analysis.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum MetaValue {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    Text(String),
}

pub type Metadata = BTreeMap<String, MetaValue>;

impl From<f64> for MetaValue {
    fn from(v: f64) -> Self {
        MetaValue::Float(v)
    }
}

impl From<i64> for MetaValue {
    fn from(v: i64) -> Self {
        MetaValue::Int(v)
    }
}

impl From<bool> for MetaValue {
    fn from(v: bool) -> Self {
        MetaValue::Bool(v)
    }
}

impl From<&str> for MetaValue {
    fn from(v: &str) -> Self {
        MetaValue::Text(v.to_string())
    }
}

impl From<String> for MetaValue {
    fn from(v: String) -> Self {
        MetaValue::Text(v)
    }
}

impl fmt::Display for MetaValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MetaValue::Null => write!(f, "null"),
            MetaValue::Bool(v) => write!(f, "{}", v),
            MetaValue::Int(v) => write!(f, "{}", v),
            MetaValue::Float(v) => write!(f, "{}", v),
            MetaValue::Text(v) => write!(f, "{}", v),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Position {
    id: Uuid,
    side: Side,
    open_time: NaiveDateTime,
    open_price: f64,
    size: f64,
    #[serde(default)]
    close_time: Option<NaiveDateTime>,
    #[serde(default)]
    close_price: Option<f64>,
    #[serde(default)]
    metadata: Metadata,
}

fn require_positive(name: &str, value: f64) -> Result<(), ThalesError> {
    if !value.is_finite() || value <= 0.0 {
        return Err(ThalesError::InvalidPositionParameters {
            reason: format!("{name} must be a positive finite number, got {value}"),
        });
    }
    Ok(())
}

impl Position {
    /// Create a new open position with a fresh id.
    pub fn open(
        side: Side,
        open_time: NaiveDateTime,
        open_price: f64,
        size: f64,
        metadata: Metadata,
    ) -> Result<Self, ThalesError> {
        require_positive("open_price", open_price)?;
        require_positive("size", size)?;
        Ok(Position {
            id: Uuid::new_v4(),
            side,
            open_time,
            open_price,
            size,
            close_time: None,
            close_price: None,
            metadata,
        })
    }

    /// Settle the position. Fails without touching the record if it is
    /// already closed or the close parameters are invalid.
    pub fn close(
        &mut self,
        close_time: NaiveDateTime,
        close_price: f64,
        metadata: Metadata,
    ) -> Result<(), ThalesError> {
        if !self.is_open() {
            return Err(ThalesError::PositionAlreadyClosed {
                id: self.id.to_string(),
            });
        }
        require_positive("close_price", close_price)?;
        if close_time <= self.open_time {
            return Err(ThalesError::InvalidPositionParameters {
                reason: format!(
                    "close_time {} must be after open_time {}",
                    close_time, self.open_time
                ),
            });
        }

        self.close_time = Some(close_time);
        self.close_price = Some(close_price);
        self.metadata.extend(metadata);
        Ok(())
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn side(&self) -> Side {
        self.side
    }

    pub fn open_time(&self) -> NaiveDateTime {
        self.open_time
    }

    pub fn open_price(&self) -> f64 {
        self.open_price
    }

    pub fn size(&self) -> f64 {
        self.size
    }

    pub fn close_time(&self) -> Option<NaiveDateTime> {
        self.close_time
    }

    pub fn close_price(&self) -> Option<f64> {
        self.close_price
    }

    pub fn metadata(&self) -> &Metadata {
        &self.metadata
    }

    pub fn is_open(&self) -> bool {
        self.close_time.is_none()
    }

    pub fn is_long(&self) -> bool {
        self.side == Side::Long
    }

    pub fn is_short(&self) -> bool {
        self.side == Side::Short
    }

    /// close / open, regardless of side.
    pub fn price_ratio(&self) -> Option<f64> {
        self.close_price.map(|close| close / self.open_price)
    }

    /// Long: close / open. Short: open / close.
    pub fn realized_return_ratio(&self) -> Option<f64> {
        let close = self.close_price?;
        Some(match self.side {
            Side::Long => close / self.open_price,
            Side::Short => self.open_price / close,
        })
    }

    /// Realized P&L in position-size units.
    pub fn delta(&self) -> Option<f64> {
        let long_delta = self.size * (self.price_ratio()? - 1.0);
        Some(match self.side {
            Side::Long => long_delta,
            Side::Short => -long_delta,
        })
    }

    pub fn hold_duration(&self) -> Option<Duration> {
        self.close_time.map(|close| close - self.open_time)
    }


    /// Checks the invariants a deserialized record must satisfy.
    pub(crate) fn check_record(&self) -> Result<(), String> {
        if !(self.open_price.is_finite() && self.open_price > 0.0) {
            return Err("open_price must be positive".into());
        }
        if !(self.size.is_finite() && self.size > 0.0) {
            return Err("size must be positive".into());
        }
        match (self.close_time, self.close_price) {
            (None, None) => Ok(()),
            (Some(t), Some(p)) => {
                if t <= self.open_time {
                    Err("close_time must be after open_time".into())
                } else if !(p.is_finite() && p > 0.0) {
                    Err("close_price must be positive".into())
                } else {
                    Ok(())
                }
            }
            _ => Err("close_time and close_price must be set together".into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use chrono::NaiveDate;

    fn ts(h: u32, m: u32) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2019, 9, 5)
            .unwrap()
            .and_hms_opt(h, m, 0)
            .unwrap()
    }

    fn sample_long() -> Position {
        Position::open(Side::Long, ts(8, 0), 100.0, 100.0, Metadata::new()).unwrap()
    }

    fn sample_short() -> Position {
        Position::open(Side::Short, ts(8, 0), 100.0, 100.0, Metadata::new()).unwrap()
    }

    #[test]
    fn open_position_has_no_realized_figures() {
        let pos = sample_long();
        assert!(pos.is_open());
        assert!(pos.delta().is_none());
        assert!(pos.realized_return_ratio().is_none());
        assert!(pos.hold_duration().is_none());
    }

    #[test]
    fn open_rejects_non_positive_price() {
        let err = Position::open(Side::Long, ts(8, 0), 0.0, 100.0, Metadata::new()).unwrap_err();
        assert!(matches!(err, ThalesError::InvalidPositionParameters { .. }));
    }

    #[test]
    fn open_rejects_non_positive_size() {
        assert!(Position::open(Side::Long, ts(8, 0), 100.0, -1.0, Metadata::new()).is_err());
        assert!(Position::open(Side::Long, ts(8, 0), 100.0, 0.0, Metadata::new()).is_err());
    }

    #[test]
    fn open_rejects_nan() {
        assert!(Position::open(Side::Short, ts(8, 0), f64::NAN, 1.0, Metadata::new()).is_err());
    }

    #[test]
    fn ids_are_unique() {
        assert_ne!(sample_long().id(), sample_long().id());
    }

    #[test]
    fn long_delta_profit() {
        let mut pos = sample_long();
        pos.close(ts(9, 0), 110.0, Metadata::new()).unwrap();
        assert_relative_eq!(pos.delta().unwrap(), 10.0, epsilon = 1e-9);
        assert_relative_eq!(pos.realized_return_ratio().unwrap(), 1.1, epsilon = 1e-12);
    }

    #[test]
    fn long_delta_loss() {
        let mut pos = sample_long();
        pos.close(ts(9, 0), 95.0, Metadata::new()).unwrap();
        assert_relative_eq!(pos.delta().unwrap(), -5.0, epsilon = 1e-9);
    }

    #[test]
    fn short_delta_is_negated_long_delta() {
        let mut pos = sample_short();
        pos.close(ts(9, 0), 90.0, Metadata::new()).unwrap();
        assert_relative_eq!(pos.delta().unwrap(), 10.0, epsilon = 1e-9);
        assert_relative_eq!(
            pos.realized_return_ratio().unwrap(),
            100.0 / 90.0,
            epsilon = 1e-12
        );
    }

    #[test]
    fn hold_duration_when_closed() {
        let mut pos = sample_long();
        pos.close(ts(9, 30), 101.0, Metadata::new()).unwrap();
        assert_eq!(pos.hold_duration(), Some(Duration::minutes(90)));
    }

    #[test]
    fn close_twice_fails_and_keeps_first_values() {
        let mut pos = sample_long();
        pos.close(ts(9, 0), 110.0, Metadata::new()).unwrap();
        let err = pos.close(ts(10, 0), 120.0, Metadata::new()).unwrap_err();
        assert!(matches!(err, ThalesError::PositionAlreadyClosed { .. }));
        assert_eq!(pos.close_time(), Some(ts(9, 0)));
        assert_eq!(pos.close_price(), Some(110.0));
    }

    #[test]
    fn close_must_be_after_open() {
        let mut pos = sample_long();
        let err = pos.close(ts(8, 0), 110.0, Metadata::new()).unwrap_err();
        assert!(matches!(err, ThalesError::InvalidPositionParameters { .. }));
        assert!(pos.is_open());
    }

    #[test]
    fn close_merges_metadata_new_keys_win() {
        let mut opening = Metadata::new();
        opening.insert("mean".into(), 100.0.into());
        opening.insert("reason".into(), "entry".into());
        let mut pos = Position::open(Side::Long, ts(8, 0), 100.0, 1.0, opening).unwrap();

        let mut closing = Metadata::new();
        closing.insert("reason".into(), "target".into());
        closing.insert("bars_held".into(), 12_i64.into());
        pos.close(ts(9, 0), 101.0, closing).unwrap();

        assert_eq!(pos.metadata()["mean"], MetaValue::Float(100.0));
        assert_eq!(pos.metadata()["reason"], MetaValue::Text("target".into()));
        assert_eq!(pos.metadata()["bars_held"], MetaValue::Int(12));
    }

    #[test]
    fn json_round_trip_preserves_fields() {
        let mut meta = Metadata::new();
        meta.insert("entry_signal".into(), 0.2.into());
        meta.insert("flag".into(), true.into());
        meta.insert("note".into(), MetaValue::Null);
        let mut pos = Position::open(Side::Short, ts(8, 0), 138.25, 100.0, meta).unwrap();
        pos.close(ts(8, 45), 138.0, Metadata::new()).unwrap();

        let text = serde_json::to_string_pretty(&pos).unwrap();
        let back: Position = serde_json::from_str(&text).unwrap();
        assert_eq!(back, pos);
    }

    #[test]
    fn check_record_rejects_half_closed() {
        let text = format!(
            r#"{{"id":"{}","side":"long","open_time":"2019-09-05T08:00:00","open_price":1.0,"size":1.0,"close_time":"2019-09-05T09:00:00"}}"#,
            Uuid::new_v4()
        );
        let pos: Position = serde_json::from_str(&text).unwrap();
        assert!(pos.check_record().is_err());
    }
}
