//! Mean-reversion policy around a daily baseline.
//!
//! Entries (only when flat and not yet traded that day):
//! - Long if `high > mean + entry_signal` and `close < mean + exit_signal`
//! - Short if `low < mean - entry_signal` and `close > mean - exit_signal`
//!
//! Exits, with `anchor` being the open price or the current baseline
//! depending on [`ExitAnchor`]:
//! - Long stop `low < open_price - stop_loss_long`, target `high > anchor + exit_signal`
//! - Short stop `high > open_price + stop_loss_short`, target per [`ShortTargetRule`]
//!
//! All fills are at the bar's close. Any open or close marks the bar's date
//! as traded.

use chrono::NaiveDate;
use std::collections::BTreeSet;
use std::str::FromStr;
use tracing::debug;

use crate::domain::bar::Bar;
use crate::domain::error::ThalesError;
use crate::domain::policy::{Action, TradeDecisionPolicy};
use crate::domain::position::{Metadata, Position, Side};
use crate::ports::signal_port::{BASELINE, Signals};

pub const POLICY_NAME: &str = "mean_reversion";
pub const DEFAULT_SIZE: f64 = 100.0;

/// Reference level the exit target is measured from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ExitAnchor {
    #[default]
    OpenPrice,
    Baseline,
}

/// Comparison used for the short take-profit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ShortTargetRule {
    /// `low > anchor - exit_signal`
    #[default]
    Reference,
    /// `low < anchor - exit_signal`, the mirror image of the long target.
    Mirrored,
}

impl FromStr for ExitAnchor {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "open_price" | "open" => Ok(ExitAnchor::OpenPrice),
            "baseline" | "mean" => Ok(ExitAnchor::Baseline),
            other => Err(format!("expected open_price or baseline, got '{}'", other)),
        }
    }
}

impl FromStr for ShortTargetRule {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "reference" => Ok(ShortTargetRule::Reference),
            "mirrored" => Ok(ShortTargetRule::Mirrored),
            other => Err(format!("expected reference or mirrored, got '{}'", other)),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct MeanReversionParams {
    pub entry_signal: f64,
    pub exit_signal: f64,
    pub stop_loss_long: f64,
    pub stop_loss_short: f64,
    pub size: f64,
    pub allow_short: bool,
    pub exit_anchor: ExitAnchor,
    pub short_target: ShortTargetRule,
}

impl MeanReversionParams {
    pub fn new(entry_signal: f64, exit_signal: f64, stop_loss_long: f64, stop_loss_short: f64) -> Self {
        Self {
            entry_signal,
            exit_signal,
            stop_loss_long,
            stop_loss_short,
            size: DEFAULT_SIZE,
            allow_short: true,
            exit_anchor: ExitAnchor::default(),
            short_target: ShortTargetRule::default(),
        }
    }

    pub fn validate(&self) -> Result<(), ThalesError> {
        let invalid = |reason: String| Err(ThalesError::InvalidPolicyParameters { reason });
        let values = [
            ("entry_signal", self.entry_signal),
            ("exit_signal", self.exit_signal),
            ("stop_loss_long", self.stop_loss_long),
            ("stop_loss_short", self.stop_loss_short),
            ("size", self.size),
        ];
        if let Some((name, v)) = values.iter().find(|(_, v)| !v.is_finite()) {
            return invalid(format!("{} must be finite, got {}", name, v));
        }
        if self.entry_signal >= self.exit_signal {
            return invalid(format!(
                "entry_signal ({}) must be less than exit_signal ({})",
                self.entry_signal, self.exit_signal
            ));
        }
        if self.stop_loss_long < 0.0 || self.stop_loss_short < 0.0 {
            return invalid("stop losses must be >= 0".to_string());
        }
        if self.size <= 0.0 {
            return invalid(format!("size must be positive, got {}", self.size));
        }
        Ok(())
    }
}

#[derive(Debug)]
pub struct MeanReversionPolicy {
    params: MeanReversionParams,
    dates_traded: BTreeSet<NaiveDate>,
}

impl MeanReversionPolicy {
    pub fn new(params: MeanReversionParams) -> Result<Self, ThalesError> {
        params.validate()?;
        Ok(Self {
            params,
            dates_traded: BTreeSet::new(),
        })
    }

    pub fn params(&self) -> &MeanReversionParams {
        &self.params
    }

    fn entry_side(&self, bar: &Bar, mean: f64) -> Option<Side> {
        let p = &self.params;
        if bar.high > mean + p.entry_signal && bar.close < mean + p.exit_signal {
            return Some(Side::Long);
        }
        if p.allow_short && bar.low < mean - p.entry_signal && bar.close > mean - p.exit_signal {
            return Some(Side::Short);
        }
        None
    }

    /// `Some("stop" | "target")` if the position should be closed on `bar`.
    fn exit_reason(&self, position: &Position, bar: &Bar, mean: f64) -> Option<&'static str> {
        let p = &self.params;
        let open_price = position.open_price();
        let anchor = match p.exit_anchor {
            ExitAnchor::OpenPrice => open_price,
            ExitAnchor::Baseline => mean,
        };
        match position.side() {
            Side::Long => {
                if bar.low < open_price - p.stop_loss_long {
                    Some("stop")
                } else if bar.high > anchor + p.exit_signal {
                    Some("target")
                } else {
                    None
                }
            }
            Side::Short => {
                let target_hit = match p.short_target {
                    ShortTargetRule::Reference => bar.low > anchor - p.exit_signal,
                    ShortTargetRule::Mirrored => bar.low < anchor - p.exit_signal,
                };
                if bar.high > open_price + p.stop_loss_short {
                    Some("stop")
                } else if target_hit {
                    Some("target")
                } else {
                    None
                }
            }
        }
    }

    fn entry_metadata(&self, bar: &Bar, mean: f64) -> Metadata {
        let p = &self.params;
        let mut meta = Metadata::new();
        meta.insert(BASELINE.to_string(), mean.into());
        meta.insert("entry_signal".into(), p.entry_signal.into());
        meta.insert("exit_signal".into(), p.exit_signal.into());
        meta.insert("stop_loss_long".into(), p.stop_loss_long.into());
        meta.insert("stop_loss_short".into(), p.stop_loss_short.into());
        meta.insert("open_high".into(), bar.high.into());
        meta.insert("open_low".into(), bar.low.into());
        meta
    }

    fn exit_metadata(bar: &Bar, mean: f64, reason: &str) -> Metadata {
        let mut meta = Metadata::new();
        meta.insert("close_reason".into(), reason.into());
        meta.insert("close_mean".into(), mean.into());
        meta.insert("close_high".into(), bar.high.into());
        meta.insert("close_low".into(), bar.low.into());
        meta
    }
}

impl TradeDecisionPolicy for MeanReversionPolicy {
    fn name(&self) -> &str {
        POLICY_NAME
    }

    fn required_signals(&self) -> &[&'static str] {
        &[BASELINE]
    }

    fn decide(
        &mut self,
        bar: &Bar,
        open_positions: &[Position],
        signals: &Signals,
    ) -> Result<Vec<Action>, ThalesError> {
        let Some(&mean) = signals.get(BASELINE) else {
            return Err(ThalesError::Policy {
                policy: POLICY_NAME.to_string(),
                reason: format!("no '{}' signal at {}", BASELINE, bar.timestamp),
            });
        };

        if open_positions.is_empty() {
            if self.dates_traded.contains(&bar.date()) {
                return Ok(vec![Action::Hold]);
            }
            return Ok(match self.entry_side(bar, mean) {
                Some(side) => {
                    debug!(%side, timestamp = %bar.timestamp, mean, "entry signal");
                    self.dates_traded.insert(bar.date());
                    vec![Action::open(
                        side,
                        bar.close,
                        self.params.size,
                        self.entry_metadata(bar, mean),
                    )]
                }
                None => vec![Action::Hold],
            });
        }

        let mut actions = Vec::new();
        for position in open_positions {
            if let Some(reason) = self.exit_reason(position, bar, mean) {
                debug!(id = %position.id(), reason, timestamp = %bar.timestamp, "exit signal");
                actions.push(Action::Close {
                    position_id: position.id(),
                    price: bar.close,
                    metadata: Self::exit_metadata(bar, mean, reason),
                });
            }
        }
        if actions.is_empty() {
            actions.push(Action::Hold);
        } else {
            self.dates_traded.insert(bar.date());
        }
        Ok(actions)
    }
}
