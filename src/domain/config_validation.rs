//! Configuration loading and validation.
//!
//! Every key is checked up front so a run never starts on a half-valid
//! config. Errors name the offending section and key.

use std::path::PathBuf;
use std::str::FromStr;

use chrono::{NaiveDateTime, NaiveTime};

use crate::domain::backtest::Budget;
use crate::domain::bar::{is_date_only, parse_timestamp};
use crate::domain::error::ThalesError;
use crate::domain::indicator::IndicatorType;
use crate::domain::mean_reversion::{DEFAULT_SIZE, ExitAnchor, MeanReversionParams, ShortTargetRule};
use crate::domain::price_series::DEFAULT_MAX_LOOKAHEAD;
use crate::domain::scope::RunScope;
use crate::ports::config_port::ConfigPort;

pub const DEFAULT_LOG_LEVEL: &str = "info";

/// Upper bound accepted for `[data] max_lookahead`.
pub const MAX_LOOKAHEAD_LIMIT: usize = 50_000_000;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DataSource {
    Csv,
    Sqlite,
}

#[derive(Debug, Clone, PartialEq)]
pub struct DataSettings {
    pub source: DataSource,
    pub path: PathBuf,
    pub instrument: String,
    pub max_lookahead: usize,
}

#[derive(Debug, Clone, PartialEq)]
pub struct BacktestSettings {
    pub strategy: String,
    pub start: NaiveDateTime,
    pub end: Option<NaiveDateTime>,
    pub n_days: Option<u32>,
    pub run_name: Option<String>,
}

impl BacktestSettings {
    /// A day budget wins over the end timestamp when both are set.
    pub fn budget(&self) -> Budget {
        match (self.n_days, self.end) {
            (Some(n), _) => Budget::Days(n),
            (None, Some(end)) => Budget::Until(end),
            (None, None) => Budget::Days(1),
        }
    }

    /// The configured run scope, or a timestamped one.
    pub fn scope(&self, now: NaiveDateTime) -> Result<RunScope, ThalesError> {
        match &self.run_name {
            Some(name) => RunScope::backtest(name.clone()),
            None => Ok(RunScope::timestamped(now)),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum SignalSource {
    Indicator(IndicatorType),
    Json(PathBuf),
}

#[derive(Debug, Clone)]
pub struct Settings {
    pub data: DataSettings,
    pub positions_root: PathBuf,
    pub backtest: BacktestSettings,
    pub policy: MeanReversionParams,
    pub signals: SignalSource,
    pub log_level: String,
}

pub fn validate_config(config: &dyn ConfigPort) -> Result<(), ThalesError> {
    load_settings(config).map(|_| ())
}

pub fn load_settings(config: &dyn ConfigPort) -> Result<Settings, ThalesError> {
    Ok(Settings {
        data: data_settings(config)?,
        positions_root: positions_root(config)?,
        backtest: backtest_settings(config)?,
        policy: policy_params(config)?,
        signals: signal_source(config)?,
        log_level: log_level(config),
    })
}

pub fn log_level(config: &dyn ConfigPort) -> String {
    config
        .get_string("logging", "level")
        .unwrap_or_else(|| DEFAULT_LOG_LEVEL.to_string())
}

pub fn data_settings(config: &dyn ConfigPort) -> Result<DataSettings, ThalesError> {
    let source = match config.get_string("data", "source").as_deref() {
        None | Some("csv") => DataSource::Csv,
        Some("sqlite") => DataSource::Sqlite,
        Some(other) => {
            return Err(invalid("data", "source", format!("expected csv or sqlite, got '{}'", other)));
        }
    };

    let max_lookahead = match optional_parse::<usize>(config, "data", "max_lookahead")? {
        Some(0) => return Err(invalid("data", "max_lookahead", "must be at least 1")),
        Some(n) if n > MAX_LOOKAHEAD_LIMIT => {
            return Err(invalid(
                "data",
                "max_lookahead",
                format!("must be at most {}", MAX_LOOKAHEAD_LIMIT),
            ));
        }
        Some(n) => n,
        None => DEFAULT_MAX_LOOKAHEAD,
    };

    Ok(DataSettings {
        source,
        path: PathBuf::from(required(config, "data", "path")?),
        instrument: required(config, "data", "instrument")?,
        max_lookahead,
    })
}

pub fn positions_root(config: &dyn ConfigPort) -> Result<PathBuf, ThalesError> {
    required(config, "positions", "root").map(PathBuf::from)
}

pub fn backtest_settings(config: &dyn ConfigPort) -> Result<BacktestSettings, ThalesError> {
    let strategy = required(config, "backtest", "strategy")?;
    if strategy.contains(['/', '\\']) || strategy == "." || strategy == ".." {
        return Err(invalid("backtest", "strategy", "must be a plain name"));
    }

    let start = parse_time(&required(config, "backtest", "start")?, "start", false)?;
    let end = config
        .get_string("backtest", "end")
        .map(|s| parse_time(&s, "end", true))
        .transpose()?;

    let n_days = match optional_parse::<u32>(config, "backtest", "n_days")? {
        Some(0) => return Err(invalid("backtest", "n_days", "must be at least 1")),
        other => other,
    };

    match end {
        Some(end) if end < start => {
            return Err(invalid("backtest", "start", "start must not be after end"));
        }
        None if n_days.is_none() => {
            return Err(ThalesError::ConfigMissing {
                section: "backtest".to_string(),
                key: "end".to_string(),
            });
        }
        _ => {}
    }

    let run_name = config.get_string("backtest", "run_name");
    if let Some(name) = &run_name {
        RunScope::backtest(name.clone()).map_err(|e| invalid("backtest", "run_name", e.to_string()))?;
    }

    Ok(BacktestSettings {
        strategy,
        start,
        end,
        n_days,
        run_name,
    })
}

pub fn policy_params(config: &dyn ConfigPort) -> Result<MeanReversionParams, ThalesError> {
    let mut params = MeanReversionParams::new(
        required_f64(config, "policy", "entry_signal")?,
        required_f64(config, "policy", "exit_signal")?,
        required_f64(config, "policy", "stop_loss_long")?,
        required_f64(config, "policy", "stop_loss_short")?,
    );
    params.size = optional_parse::<f64>(config, "policy", "size")?.unwrap_or(DEFAULT_SIZE);
    params.allow_short = optional_flag(config, "policy", "allow_short")?.unwrap_or(true);
    params.exit_anchor = optional_parse::<ExitAnchor>(config, "policy", "exit_anchor")?.unwrap_or_default();
    params.short_target =
        optional_parse::<ShortTargetRule>(config, "policy", "short_target")?.unwrap_or_default();
    params.validate()?;
    Ok(params)
}

pub fn signal_source(config: &dyn ConfigPort) -> Result<SignalSource, ThalesError> {
    match config.get_string("signals", "source").as_deref() {
        None | Some("indicator") => {
            let expr = required(config, "signals", "indicator")?;
            let indicator = IndicatorType::from_str(&expr)
                .map_err(|e| invalid("signals", "indicator", e.display_with_context(&expr)))?;
            Ok(SignalSource::Indicator(indicator))
        }
        Some("json") => Ok(SignalSource::Json(PathBuf::from(required(config, "signals", "path")?))),
        Some(other) => Err(invalid(
            "signals",
            "source",
            format!("expected indicator or json, got '{}'", other),
        )),
    }
}

/// Dates alone mean midnight, or the last second of the day for an end bound.
fn parse_time(value: &str, key: &str, end_of_day: bool) -> Result<NaiveDateTime, ThalesError> {
    let ts = parse_timestamp(value).ok_or_else(|| {
        invalid(
            "backtest",
            key,
            format!("invalid {} '{}', expected YYYY-MM-DD[ HH:MM[:SS]]", key, value),
        )
    })?;
    if end_of_day && is_date_only(value) {
        let last = NaiveTime::from_hms_opt(23, 59, 59).unwrap_or(NaiveTime::MIN);
        return Ok(ts.date().and_time(last));
    }
    Ok(ts)
}

fn required(config: &dyn ConfigPort, section: &str, key: &str) -> Result<String, ThalesError> {
    config
        .get_string(section, key)
        .filter(|s| !s.trim().is_empty())
        .ok_or_else(|| ThalesError::ConfigMissing {
            section: section.to_string(),
            key: key.to_string(),
        })
}

fn required_f64(config: &dyn ConfigPort, section: &str, key: &str) -> Result<f64, ThalesError> {
    let raw = required(config, section, key)?;
    raw.trim()
        .parse()
        .map_err(|_| invalid(section, key, format!("'{}' is not a number", raw)))
}

fn optional_parse<T>(config: &dyn ConfigPort, section: &str, key: &str) -> Result<Option<T>, ThalesError>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    config
        .get_string(section, key)
        .map(|raw| {
            raw.trim()
                .parse::<T>()
                .map_err(|e| invalid(section, key, format!("'{}': {}", raw, e)))
        })
        .transpose()
}

/// Boolean spellings accepted in config files.
pub fn parse_flag(value: &str) -> Option<bool> {
    match value.trim().to_lowercase().as_str() {
        "true" | "yes" | "on" | "1" => Some(true),
        "false" | "no" | "off" | "0" => Some(false),
        _ => None,
    }
}

fn optional_flag(config: &dyn ConfigPort, section: &str, key: &str) -> Result<Option<bool>, ThalesError> {
    config
        .get_string(section, key)
        .map(|raw| {
            parse_flag(&raw)
                .ok_or_else(|| invalid(section, key, format!("'{}': expected true or false", raw)))
        })
        .transpose()
}

fn invalid(section: &str, key: &str, reason: impl Into<String>) -> ThalesError {
    ThalesError::ConfigInvalid {
        section: section.to_string(),
        key: key.to_string(),
        reason: reason.into(),
    }
}
