//! Bar conditions in `{field}_{op}_{value}` form, e.g. `close_ge_123.45`.
//!
//! Used as predicates for `PriceSeries::find_first_matching`. A list of
//! conditions matches when any one of them does.

use std::fmt;
use std::str::FromStr;

use super::bar::Bar;
use super::error::ThalesError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BarField {
    Open,
    High,
    Low,
    Close,
    Volume,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Comparison {
    Greater,
    GreaterEqual,
    Less,
    LessEqual,
}

#[derive(Debug, Clone, PartialEq)]
pub struct BarCondition {
    pub field: BarField,
    pub comparison: Comparison,
    pub value: f64,
}

impl BarField {
    fn read(self, bar: &Bar) -> Option<f64> {
        match self {
            BarField::Open => Some(bar.open),
            BarField::High => Some(bar.high),
            BarField::Low => Some(bar.low),
            BarField::Close => Some(bar.close),
            BarField::Volume => bar.volume,
        }
    }
}

impl BarCondition {
    pub fn matches(&self, bar: &Bar) -> bool {
        let Some(actual) = self.field.read(bar) else {
            return false;
        };
        match self.comparison {
            Comparison::Greater => actual > self.value,
            Comparison::GreaterEqual => actual >= self.value,
            Comparison::Less => actual < self.value,
            Comparison::LessEqual => actual <= self.value,
        }
    }
}

/// True if any condition matches the bar.
pub fn any_matches(conditions: &[BarCondition], bar: &Bar) -> bool {
    conditions.iter().any(|c| c.matches(bar))
}

impl FromStr for BarCondition {
    type Err = ThalesError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = |reason: &str| ThalesError::InvalidCondition {
            input: s.to_string(),
            reason: reason.to_string(),
        };

        let mut parts = s.trim().splitn(3, '_');
        let (Some(field), Some(op), Some(value)) = (parts.next(), parts.next(), parts.next())
        else {
            return Err(invalid("expected {field}_{op}_{value}"));
        };

        let field = match field.to_ascii_lowercase().as_str() {
            "open" => BarField::Open,
            "high" => BarField::High,
            "low" => BarField::Low,
            "close" => BarField::Close,
            "volume" => BarField::Volume,
            _ => return Err(invalid("unknown field")),
        };
        let comparison = match op.to_ascii_lowercase().as_str() {
            "g" => Comparison::Greater,
            "ge" => Comparison::GreaterEqual,
            "l" => Comparison::Less,
            "le" => Comparison::LessEqual,
            _ => return Err(invalid("operator must be one of g, ge, l, le")),
        };
        let value: f64 = value
            .parse()
            .map_err(|_| invalid("value is not a number"))?;
        if !value.is_finite() {
            return Err(invalid("value must be finite"));
        }

        Ok(BarCondition {
            field,
            comparison,
            value,
        })
    }
}

impl fmt::Display for BarCondition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let field = match self.field {
            BarField::Open => "open",
            BarField::High => "high",
            BarField::Low => "low",
            BarField::Close => "close",
            BarField::Volume => "volume",
        };
        let op = match self.comparison {
            Comparison::Greater => "g",
            Comparison::GreaterEqual => "ge",
            Comparison::Less => "l",
            Comparison::LessEqual => "le",
        };
        write!(f, "{}_{}_{}", field, op, self.value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    fn bar(close: f64) -> Bar {
        Bar {
            timestamp: NaiveDate::from_ymd_opt(2020, 3, 2)
                .unwrap()
                .and_hms_opt(9, 0, 0)
                .unwrap(),
            open: close,
            high: close + 1.0,
            low: close - 1.0,
            close,
            volume: None,
        }
    }

    #[test]
    fn parses_close_ge() {
        let cond: BarCondition = "close_ge_123.45".parse().unwrap();
        assert_eq!(cond.field, BarField::Close);
        assert_eq!(cond.comparison, Comparison::GreaterEqual);
        assert!((cond.value - 123.45).abs() < f64::EPSILON);
    }

    #[test]
    fn parses_negative_value() {
        let cond: BarCondition = "low_l_-1.5".parse().unwrap();
        assert_eq!(cond.comparison, Comparison::Less);
        assert!((cond.value + 1.5).abs() < f64::EPSILON);
    }

    #[test]
    fn rejects_unknown_operator() {
        let err = "close_eq_10".parse::<BarCondition>().unwrap_err();
        assert!(matches!(err, ThalesError::InvalidCondition { .. }));
    }

    #[test]
    fn rejects_unknown_field() {
        assert!("vwap_g_10".parse::<BarCondition>().is_err());
    }

    #[test]
    fn rejects_missing_parts() {
        assert!("close_g".parse::<BarCondition>().is_err());
        assert!("close_g_abc".parse::<BarCondition>().is_err());
    }

    #[test]
    fn matches_boundaries() {
        let ge: BarCondition = "close_ge_100".parse().unwrap();
        let g: BarCondition = "close_g_100".parse().unwrap();
        assert!(ge.matches(&bar(100.0)));
        assert!(!g.matches(&bar(100.0)));
        assert!(g.matches(&bar(100.5)));
    }

    #[test]
    fn volume_condition_needs_volume() {
        let cond: BarCondition = "volume_g_0".parse().unwrap();
        let mut b = bar(100.0);
        assert!(!cond.matches(&b));
        b.volume = Some(10.0);
        assert!(cond.matches(&b));
    }

    #[test]
    fn any_matches_is_or() {
        let conds: Vec<BarCondition> = vec![
            "high_g_200".parse().unwrap(),
            "low_l_95".parse().unwrap(),
        ];
        assert!(any_matches(&conds, &bar(95.5)));
        assert!(!any_matches(&conds, &bar(150.0)));
    }

    #[test]
    fn display_round_trips() {
        let cond: BarCondition = "high_le_1.25".parse().unwrap();
        assert_eq!(cond.to_string(), "high_le_1.25");
    }
}
