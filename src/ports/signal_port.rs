//! Auxiliary signal lookup port.

use chrono::NaiveDateTime;
use std::collections::BTreeMap;

/// Named numeric values available to a policy for one bar.
pub type Signals = BTreeMap<String, f64>;

/// Key under which the daily baseline price is published.
pub const BASELINE: &str = "mean";

pub trait AuxiliarySignalPort {
    /// Signals applicable to the bar at `timestamp`, or `None` when the
    /// source has nothing for it.
    fn signals_at(&self, timestamp: NaiveDateTime) -> Option<Signals>;
}
