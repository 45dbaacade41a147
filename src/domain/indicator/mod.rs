//! Indicator computation over bar series.
//!
//! - `IndicatorPoint`: one value per input bar, flagged invalid during warmup
//! - `IndicatorType`: indicator identity + parameters, parsed from `SMA(20)`,
//!   `EMA(12)` or `SESSION(6,8)`
//! - `IndicatorSeries`: the computed series, looked up by timestamp
//! - `Indicator`: the single compute interface every indicator goes through

pub mod ema;
pub mod session;
pub mod sma;

use chrono::NaiveDateTime;
use std::fmt;
use std::str::FromStr;

use crate::domain::bar::Bar;
use crate::domain::error::ParseError;

#[derive(Debug, Clone, PartialEq)]
pub struct IndicatorPoint {
    pub timestamp: NaiveDateTime,
    pub valid: bool,
    pub value: f64,
}

impl IndicatorPoint {
    pub fn valid(timestamp: NaiveDateTime, value: f64) -> Self {
        Self {
            timestamp,
            valid: true,
            value,
        }
    }

    pub fn invalid(timestamp: NaiveDateTime) -> Self {
        Self {
            timestamp,
            valid: false,
            value: 0.0,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum IndicatorType {
    Sma(usize),
    Ema(usize),
    /// Midpoint of the `[start_hour, end_hour)` trading session of each day.
    Session { start_hour: u32, end_hour: u32 },
}

#[derive(Debug, Clone)]
pub struct IndicatorSeries {
    pub indicator_type: IndicatorType,
    pub values: Vec<IndicatorPoint>,
}

impl IndicatorSeries {
    pub fn empty(indicator_type: IndicatorType) -> Self {
        Self {
            indicator_type,
            values: Vec::new(),
        }
    }

    /// Value at exactly `timestamp`, if the series has a valid point there.
    pub fn value_at(&self, timestamp: NaiveDateTime) -> Option<f64> {
        let idx = self
            .values
            .binary_search_by(|p| p.timestamp.cmp(&timestamp))
            .ok()?;
        let point = &self.values[idx];
        point.valid.then_some(point.value)
    }

    pub fn valid_count(&self) -> usize {
        self.values.iter().filter(|p| p.valid).count()
    }
}

pub trait Indicator {
    fn name(&self) -> String;

    /// One point per input bar, in the same order.
    fn compute(&self, bars: &[Bar]) -> IndicatorSeries;
}

impl Indicator for IndicatorType {
    fn name(&self) -> String {
        self.to_string()
    }

    fn compute(&self, bars: &[Bar]) -> IndicatorSeries {
        match *self {
            IndicatorType::Sma(period) => sma::calculate_sma(bars, period),
            IndicatorType::Ema(period) => ema::calculate_ema(bars, period),
            IndicatorType::Session {
                start_hour,
                end_hour,
            } => session::calculate_session_midpoint(bars, start_hour, end_hour),
        }
    }
}

impl fmt::Display for IndicatorType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            IndicatorType::Sma(period) => write!(f, "SMA({})", period),
            IndicatorType::Ema(period) => write!(f, "EMA({})", period),
            IndicatorType::Session {
                start_hour,
                end_hour,
            } => write!(f, "SESSION({},{})", start_hour, end_hour),
        }
    }
}

struct Parser<'a> {
    input: &'a str,
    pos: usize,
}

impl<'a> Parser<'a> {
    fn new(input: &'a str) -> Self {
        Self { input, pos: 0 }
    }

    fn remaining(&self) -> &'a str {
        &self.input[self.pos..]
    }

    fn peek(&self) -> Option<char> {
        self.remaining().chars().next()
    }

    fn skip_whitespace(&mut self) {
        while let Some(ch) = self.peek() {
            if !ch.is_whitespace() {
                break;
            }
            self.pos += ch.len_utf8();
        }
    }

    fn expect_char(&mut self, expected: char) -> Result<(), ParseError> {
        self.skip_whitespace();
        match self.peek() {
            Some(ch) if ch == expected => {
                self.pos += ch.len_utf8();
                Ok(())
            }
            Some(ch) => Err(ParseError {
                message: format!("expected '{}', found '{}'", expected, ch),
                position: self.pos,
            }),
            None => Err(ParseError {
                message: format!("expected '{}', found end of input", expected),
                position: self.pos,
            }),
        }
    }

    fn parse_name(&mut self) -> String {
        self.skip_whitespace();
        let start = self.pos;
        while let Some(ch) = self.peek() {
            if !ch.is_ascii_alphabetic() {
                break;
            }
            self.pos += 1;
        }
        self.input[start..self.pos].to_ascii_uppercase()
    }

    fn parse_integer(&mut self) -> Result<usize, ParseError> {
        self.skip_whitespace();
        let start = self.pos;
        while matches!(self.peek(), Some(ch) if ch.is_ascii_digit()) {
            self.pos += 1;
        }
        if start == self.pos {
            return Err(ParseError {
                message: "expected integer".to_string(),
                position: start,
            });
        }
        let num_str = &self.input[start..self.pos];
        num_str.parse::<usize>().map_err(|_| ParseError {
            message: format!("invalid integer: {}", num_str),
            position: start,
        })
    }

    fn parse_period(&mut self) -> Result<usize, ParseError> {
        let start = self.pos;
        let period = self.parse_integer()?;
        if period == 0 {
            return Err(ParseError {
                message: "period must be at least 1".to_string(),
                position: start,
            });
        }
        Ok(period)
    }

    fn parse_hour(&mut self) -> Result<u32, ParseError> {
        let start = self.pos;
        let hour = self.parse_integer()?;
        if hour > 24 {
            return Err(ParseError {
                message: format!("hour {} out of range 0-24", hour),
                position: start,
            });
        }
        Ok(hour as u32)
    }

    fn parse(mut self) -> Result<IndicatorType, ParseError> {
        let name_pos = self.pos;
        let name = self.parse_name();
        self.expect_char('(')?;
        let indicator = match name.as_str() {
            "SMA" => IndicatorType::Sma(self.parse_period()?),
            "EMA" => IndicatorType::Ema(self.parse_period()?),
            "SESSION" => {
                let start_pos = self.pos;
                let start_hour = self.parse_hour()?;
                self.expect_char(',')?;
                let end_hour = self.parse_hour()?;
                if end_hour <= start_hour {
                    return Err(ParseError {
                        message: "session end hour must be after start hour".to_string(),
                        position: start_pos,
                    });
                }
                IndicatorType::Session {
                    start_hour,
                    end_hour,
                }
            }
            other => {
                return Err(ParseError {
                    message: format!("unknown indicator '{}'", other),
                    position: name_pos,
                });
            }
        };
        self.expect_char(')')?;
        self.skip_whitespace();
        if self.pos < self.input.len() {
            return Err(ParseError {
                message: "unexpected trailing input".to_string(),
                position: self.pos,
            });
        }
        Ok(indicator)
    }
}

impl FromStr for IndicatorType {
    type Err = ParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Parser::new(s).parse()
    }
}
