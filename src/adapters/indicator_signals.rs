//! Auxiliary signals computed from an indicator over the price series.

use chrono::NaiveDateTime;
use std::collections::BTreeMap;

use crate::domain::bar::Bar;
use crate::domain::indicator::{Indicator, IndicatorSeries};
use crate::ports::signal_port::{AuxiliarySignalPort, Signals};

/// Publishes the valid points of one indicator series under `key`.
pub struct IndicatorSignals {
    key: String,
    values: BTreeMap<NaiveDateTime, f64>,
}

impl IndicatorSignals {
    pub fn new(key: impl Into<String>, series: &IndicatorSeries) -> Self {
        let values = series
            .values
            .iter()
            .filter(|p| p.valid)
            .map(|p| (p.timestamp, p.value))
            .collect();
        Self {
            key: key.into(),
            values,
        }
    }

    /// Compute `indicator` over `bars` and publish it under `key`.
    pub fn compute(key: impl Into<String>, indicator: &dyn Indicator, bars: &[Bar]) -> Self {
        Self::new(key, &indicator.compute(bars))
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}

impl AuxiliarySignalPort for IndicatorSignals {
    fn signals_at(&self, timestamp: NaiveDateTime) -> Option<Signals> {
        let value = *self.values.get(&timestamp)?;
        let mut signals = Signals::new();
        signals.insert(self.key.clone(), value);
        Some(signals)
    }
}
