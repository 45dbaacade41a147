//! Run summaries over closed positions.
//!
//! Open positions never count towards a summary. An empty run yields
//! `trade_count == 0` with every other figure absent.

use chrono::{Duration, NaiveDateTime};
use uuid::Uuid;

use crate::domain::error::ThalesError;
use crate::domain::position::{Position, Side};
use crate::domain::scope::Partition;
use crate::ports::position_port::PositionStore;

#[derive(Debug, Clone, PartialEq)]
pub struct Stats {
    pub trade_count: usize,
    pub total_delta: Option<f64>,
    pub average_return_ratio: Option<f64>,
    pub average_hold_duration: Option<Duration>,
    pub win_count: Option<usize>,
    pub win_rate: Option<f64>,
    pub long_count: Option<usize>,
    pub short_count: Option<usize>,
}

impl Stats {
    pub fn empty() -> Self {
        Self {
            trade_count: 0,
            total_delta: None,
            average_return_ratio: None,
            average_hold_duration: None,
            win_count: None,
            win_rate: None,
            long_count: None,
            short_count: None,
        }
    }

    /// Summarize the closed positions among `positions`.
    pub fn compute(positions: &[Position]) -> Self {
        let closed: Vec<&Position> = positions.iter().filter(|p| !p.is_open()).collect();
        if closed.is_empty() {
            return Self::empty();
        }

        let n = closed.len();
        let mut total_delta = 0.0;
        let mut ratio_sum = 0.0;
        let mut hold_sum = Duration::zero();
        let mut wins = 0usize;
        let mut longs = 0usize;

        for p in &closed {
            let delta = p.delta().unwrap_or_default();
            total_delta += delta;
            ratio_sum += p.realized_return_ratio().unwrap_or(1.0);
            hold_sum += p.hold_duration().unwrap_or_else(Duration::zero);
            if delta > 0.0 {
                wins += 1;
            }
            if p.side() == Side::Long {
                longs += 1;
            }
        }

        Self {
            trade_count: n,
            total_delta: Some(total_delta),
            average_return_ratio: Some(ratio_sum / n as f64),
            average_hold_duration: Some(hold_sum / n as i32),
            win_count: Some(wins),
            win_rate: Some(wins as f64 / n as f64),
            long_count: Some(longs),
            short_count: Some(n - longs),
        }
    }
}

/// Summarize one partition of `store`.
pub fn summarize(store: &dyn PositionStore, partition: &Partition) -> Result<Stats, ThalesError> {
    Ok(Stats::compute(&store.list_closed(partition)?))
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeltaEvent {
    Open,
    Close,
}

#[derive(Debug, Clone, PartialEq)]
pub struct DeltaPoint {
    pub timestamp: NaiveDateTime,
    pub event: DeltaEvent,
    pub position_id: Uuid,
    pub running_total: f64,
}

/// Step series of realized P&L: one point per open and per close of every
/// closed position, time-ordered. Opens carry the total unchanged; closes
/// add the position's delta. At equal timestamps closes come first.
pub fn cumulative_delta_series(positions: &[Position]) -> Vec<DeltaPoint> {
    let mut events: Vec<(NaiveDateTime, DeltaEvent, Uuid, f64)> = Vec::new();
    for p in positions.iter().filter(|p| !p.is_open()) {
        events.push((p.open_time(), DeltaEvent::Open, p.id(), 0.0));
        if let (Some(t), Some(delta)) = (p.close_time(), p.delta()) {
            events.push((t, DeltaEvent::Close, p.id(), delta));
        }
    }

    let rank = |e: DeltaEvent| match e {
        DeltaEvent::Close => 0,
        DeltaEvent::Open => 1,
    };
    events.sort_by(|a, b| {
        a.0.cmp(&b.0)
            .then_with(|| rank(a.1).cmp(&rank(b.1)))
            .then_with(|| a.2.cmp(&b.2))
    });

    let mut total = 0.0;
    events
        .into_iter()
        .map(|(timestamp, event, position_id, delta)| {
            total += delta;
            DeltaPoint {
                timestamp,
                event,
                position_id,
                running_total: total,
            }
        })
        .collect()
}

/// [`cumulative_delta_series`] over one partition of `store`.
pub fn partition_delta_series(
    store: &dyn PositionStore,
    partition: &Partition,
) -> Result<Vec<DeltaPoint>, ThalesError> {
    Ok(cumulative_delta_series(&store.list_closed(partition)?))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::position::Metadata;
    use approx::assert_relative_eq;
    use chrono::NaiveDate;

    fn ts(h: u32) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2019, 9, 5)
            .unwrap()
            .and_hms_opt(h, 0, 0)
            .unwrap()
    }

    fn closed(side: Side, open_h: u32, open: f64, close_h: u32, close: f64) -> Position {
        let mut p = Position::open(side, ts(open_h), open, 100.0, Metadata::new()).unwrap();
        p.close(ts(close_h), close, Metadata::new()).unwrap();
        p
    }

    #[test]
    fn zero_trades_has_only_count() {
        let stats = Stats::compute(&[]);
        assert_eq!(stats, Stats::empty());
        assert_eq!(stats.trade_count, 0);
        assert!(stats.win_rate.is_none());
    }

    #[test]
    fn open_positions_are_ignored() {
        let open = Position::open(Side::Long, ts(8), 100.0, 1.0, Metadata::new()).unwrap();
        let stats = Stats::compute(&[open]);
        assert_eq!(stats.trade_count, 0);
    }

    #[test]
    fn mixed_trades() {
        let positions = vec![
            closed(Side::Long, 8, 100.0, 9, 110.0),
            closed(Side::Short, 10, 100.0, 13, 105.0),
        ];
        let stats = Stats::compute(&positions);
        assert_eq!(stats.trade_count, 2);
        assert_relative_eq!(stats.total_delta.unwrap(), 5.0, epsilon = 1e-9);
        assert_eq!(stats.win_count, Some(1));
        assert_relative_eq!(stats.win_rate.unwrap(), 0.5);
        assert_eq!(stats.average_hold_duration, Some(Duration::minutes(120)));
        assert_relative_eq!(
            stats.average_return_ratio.unwrap(),
            (1.1 + 100.0 / 105.0) / 2.0,
            epsilon = 1e-12
        );
        assert_eq!(stats.long_count, Some(1));
        assert_eq!(stats.short_count, Some(1));
    }

    #[test]
    fn breakeven_is_not_a_win() {
        let stats = Stats::compute(&[closed(Side::Long, 8, 100.0, 9, 100.0)]);
        assert_eq!(stats.win_count, Some(0));
    }

    #[test]
    fn series_interleaves_events() {
        let a = closed(Side::Long, 8, 100.0, 10, 101.0);
        let b = closed(Side::Long, 9, 100.0, 11, 102.0);
        let series = cumulative_delta_series(&[b.clone(), a.clone()]);
        let shape: Vec<(u32, DeltaEvent)> = series
            .iter()
            .map(|p| (chrono::Timelike::hour(&p.timestamp), p.event))
            .collect();
        assert_eq!(
            shape,
            vec![
                (8, DeltaEvent::Open),
                (9, DeltaEvent::Open),
                (10, DeltaEvent::Close),
                (11, DeltaEvent::Close),
            ]
        );
        assert_relative_eq!(series[1].running_total, 0.0);
        assert_relative_eq!(series[2].running_total, 1.0, epsilon = 1e-9);
        assert_relative_eq!(series[3].running_total, 3.0, epsilon = 1e-9);
    }

    #[test]
    fn close_sorts_before_open_at_same_time() {
        let a = closed(Side::Long, 8, 100.0, 10, 101.0);
        let b = closed(Side::Long, 10, 100.0, 11, 99.0);
        let series = cumulative_delta_series(&[b, a]);
        assert_eq!(series[1].event, DeltaEvent::Close);
        assert_eq!(series[2].event, DeltaEvent::Open);
        assert_relative_eq!(series[2].running_total, 1.0, epsilon = 1e-9);
    }

    #[test]
    fn series_excludes_open_positions() {
        let open = Position::open(Side::Long, ts(8), 100.0, 1.0, Metadata::new()).unwrap();
        assert!(cumulative_delta_series(&[open]).is_empty());
    }
}
