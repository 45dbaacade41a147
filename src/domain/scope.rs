//! Position partitions: strategy name plus run scope.

use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use super::error::ThalesError;

const LIVE: &str = "live";

/// Format of generated backtest run names; sorts chronologically.
pub const RUN_NAME_FORMAT: &str = "%Y%m%dT%H%M%S%3f";

/// Either live trading or one named backtest run.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum RunScope {
    Live,
    Backtest(String),
}

fn validate_name(kind: &str, name: &str) -> Result<(), ThalesError> {
    let invalid = |reason: &str| ThalesError::InvalidScope {
        name: name.to_string(),
        reason: format!("{kind} {reason}"),
    };
    if name.is_empty() {
        return Err(invalid("must not be empty"));
    }
    if name.starts_with('.') {
        return Err(invalid("must not start with '.'"));
    }
    if !name
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-' || c == '.')
    {
        return Err(invalid("may only contain letters, digits, '_', '-' and '.'"));
    }
    Ok(())
}

impl RunScope {
    pub fn backtest(name: impl Into<String>) -> Result<Self, ThalesError> {
        let name = name.into();
        validate_name("run name", &name)?;
        if name.eq_ignore_ascii_case(LIVE) {
            return Err(ThalesError::InvalidScope {
                name,
                reason: "run name 'live' is reserved".into(),
            });
        }
        Ok(RunScope::Backtest(name))
    }

    /// A backtest scope named after `now`.
    pub fn timestamped(now: NaiveDateTime) -> Self {
        RunScope::Backtest(now.format(RUN_NAME_FORMAT).to_string())
    }

    pub fn is_live(&self) -> bool {
        matches!(self, RunScope::Live)
    }

    pub fn name(&self) -> &str {
        match self {
            RunScope::Live => LIVE,
            RunScope::Backtest(name) => name,
        }
    }
}

impl fmt::Display for RunScope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for RunScope {
    type Err = ThalesError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s == LIVE {
            Ok(RunScope::Live)
        } else {
            RunScope::backtest(s)
        }
    }
}

impl TryFrom<String> for RunScope {
    type Error = ThalesError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<RunScope> for String {
    fn from(scope: RunScope) -> Self {
        scope.name().to_string()
    }
}

/// One `(strategy, scope)` partition of the position store.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Partition {
    strategy: String,
    scope: RunScope,
}

impl Partition {
    pub fn new(strategy: impl Into<String>, scope: RunScope) -> Result<Self, ThalesError> {
        let strategy = strategy.into();
        validate_name("strategy name", &strategy)?;
        Ok(Self { strategy, scope })
    }

    pub fn strategy(&self) -> &str {
        &self.strategy
    }

    pub fn scope(&self) -> &RunScope {
        &self.scope
    }
}

impl fmt::Display for Partition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.strategy, self.scope)
    }
}
