//! Backtest runner: replays a price series through a policy.
//!
//! `Ready -> Running -> {Completed, Exhausted, Failed}`. A runner is used
//! once. Positions still open when the run ends stay open in the store.

use chrono::{NaiveDate, NaiveDateTime};
use std::fmt;
use tracing::{debug, info, warn};

use crate::domain::bar::Bar;
use crate::domain::error::ThalesError;
use crate::domain::policy::{Action, TradeDecisionPolicy};
use crate::domain::position::{Metadata, MetaValue, Position, Side};
use crate::domain::price_series::PriceSeries;
use crate::domain::scope::Partition;
use crate::ports::position_port::PositionStore;
use crate::ports::signal_port::AuxiliarySignalPort;

/// When a run stops if the data lasts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Budget {
    /// Process bars from this many distinct trading dates.
    Days(u32),
    /// Process bars up to and including this timestamp.
    Until(NaiveDateTime),
}

impl fmt::Display for Budget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Budget::Days(n) => write!(f, "{} days", n),
            Budget::Until(end) => write!(f, "until {}", end),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunState {
    Ready,
    Running,
    Completed,
    Exhausted,
    Failed,
}

impl fmt::Display for RunState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            RunState::Ready => "ready",
            RunState::Running => "running",
            RunState::Completed => "completed",
            RunState::Exhausted => "exhausted",
            RunState::Failed => "failed",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct RunReport {
    pub state: RunState,
    pub bars_seen: usize,
    pub bars_evaluated: usize,
    pub bars_skipped: usize,
    pub positions_opened: usize,
    pub positions_closed: usize,
    pub days_seen: u32,
    pub first_timestamp: Option<NaiveDateTime>,
    pub last_timestamp: Option<NaiveDateTime>,
}

impl RunReport {
    fn new() -> Self {
        Self {
            state: RunState::Ready,
            bars_seen: 0,
            bars_evaluated: 0,
            bars_skipped: 0,
            positions_opened: 0,
            positions_closed: 0,
            days_seen: 0,
            first_timestamp: None,
            last_timestamp: None,
        }
    }

    fn to_metadata(&self) -> Metadata {
        let count = |n: usize| MetaValue::Int(n as i64);
        let ts = |t: Option<NaiveDateTime>| t.map_or(MetaValue::Null, |t| t.to_string().into());
        let mut meta = Metadata::new();
        meta.insert("state".into(), self.state.to_string().into());
        meta.insert("bars_seen".into(), count(self.bars_seen));
        meta.insert("bars_evaluated".into(), count(self.bars_evaluated));
        meta.insert("bars_skipped".into(), count(self.bars_skipped));
        meta.insert("positions_opened".into(), count(self.positions_opened));
        meta.insert("positions_closed".into(), count(self.positions_closed));
        meta.insert("days_seen".into(), MetaValue::Int(i64::from(self.days_seen)));
        meta.insert("first_bar".into(), ts(self.first_timestamp));
        meta.insert("last_bar".into(), ts(self.last_timestamp));
        meta
    }
}

pub struct BacktestRunner<'r> {
    series: PriceSeries<'r>,
    policy: &'r mut dyn TradeDecisionPolicy,
    store: &'r mut dyn PositionStore,
    signals: &'r dyn AuxiliarySignalPort,
    partition: Partition,
    budget: Budget,
    state: RunState,
    open_positions: Vec<Position>,
    last_date: Option<NaiveDate>,
    report: RunReport,
}

enum Flow {
    Continue,
    Stop(RunState),
}

impl<'r> BacktestRunner<'r> {
    pub fn new(
        series: PriceSeries<'r>,
        policy: &'r mut dyn TradeDecisionPolicy,
        store: &'r mut dyn PositionStore,
        signals: &'r dyn AuxiliarySignalPort,
        partition: Partition,
        budget: Budget,
    ) -> Self {
        Self {
            series,
            policy,
            store,
            signals,
            partition,
            budget,
            state: RunState::Ready,
            open_positions: Vec::new(),
            last_date: None,
            report: RunReport::new(),
        }
    }

    pub fn state(&self) -> RunState {
        self.state
    }

    pub fn partition(&self) -> &Partition {
        &self.partition
    }

    /// Drive the run to a terminal state. Errors from the policy, the store
    /// or the price source leave the runner `Failed` and are returned.
    pub fn run(&mut self) -> Result<RunReport, ThalesError> {
        if self.state != RunState::Ready {
            return Err(ThalesError::RunAlreadyStarted {
                state: self.state.to_string(),
            });
        }
        self.state = RunState::Running;
        info!(
            partition = %self.partition,
            policy = self.policy.name(),
            instrument = self.series.instrument(),
            budget = %self.budget,
            "backtest started"
        );

        match self.drive() {
            Ok(final_state) => {
                self.finish(final_state)?;
                Ok(self.report.clone())
            }
            Err(e) => {
                if let Err(save_err) = self.finish(RunState::Failed) {
                    warn!(error = %save_err, "could not record failed run");
                }
                Err(e)
            }
        }
    }

    fn finish(&mut self, final_state: RunState) -> Result<(), ThalesError> {
        self.state = final_state;
        self.report.state = final_state;
        info!(
            partition = %self.partition,
            state = %final_state,
            bars = self.report.bars_seen,
            skipped = self.report.bars_skipped,
            opened = self.report.positions_opened,
            closed = self.report.positions_closed,
            still_open = self.open_positions.len(),
            "backtest finished"
        );

        let mut meta = self.report.to_metadata();
        meta.insert("policy".into(), self.policy.name().into());
        meta.insert("instrument".into(), self.series.instrument().into());
        meta.insert("budget".into(), self.budget.to_string().into());
        self.store.save_run_metadata(&self.partition, meta)
    }

    fn drive(&mut self) -> Result<RunState, ThalesError> {
        self.open_positions = self.store.list_open(&self.partition)?;
        loop {
            let bar = match self.series.next_bar() {
                Ok(bar) => bar,
                Err(e) if e.is_no_data() => {
                    debug!(reason = %e, "price series exhausted");
                    return Ok(RunState::Exhausted);
                }
                Err(e) => return Err(e),
            };
            if let Flow::Stop(state) = self.step(&bar)? {
                return Ok(state);
            }
        }
    }

    fn budget_reached(&mut self, bar: &Bar) -> bool {
        match self.budget {
            Budget::Until(end) => bar.timestamp > end,
            Budget::Days(n) => {
                if self.last_date == Some(bar.date()) {
                    return false;
                }
                if self.report.days_seen >= n {
                    return true;
                }
                self.last_date = Some(bar.date());
                self.report.days_seen += 1;
                false
            }
        }
    }

    fn step(&mut self, bar: &Bar) -> Result<Flow, ThalesError> {
        if self.budget_reached(bar) {
            return Ok(Flow::Stop(RunState::Completed));
        }
        self.report.bars_seen += 1;
        self.report.first_timestamp.get_or_insert(bar.timestamp);
        self.report.last_timestamp = Some(bar.timestamp);

        let Some(signals) = self.signals.signals_at(bar.timestamp) else {
            debug!(timestamp = %bar.timestamp, "no auxiliary signals, skipping bar");
            self.report.bars_skipped += 1;
            return Ok(Flow::Continue);
        };
        if let Some(missing) = self
            .policy
            .required_signals()
            .iter()
            .find(|key| !signals.contains_key(**key))
        {
            debug!(timestamp = %bar.timestamp, signal = *missing, "missing signal, skipping bar");
            self.report.bars_skipped += 1;
            return Ok(Flow::Continue);
        }

        self.report.bars_evaluated += 1;
        let actions = self.policy.decide(bar, &self.open_positions, &signals)?;
        for action in actions {
            self.apply(bar, action)?;
        }
        Ok(Flow::Continue)
    }

    fn apply(&mut self, bar: &Bar, action: Action) -> Result<(), ThalesError> {
        match action {
            Action::Hold => {}
            Action::OpenLong {
                price,
                size,
                metadata,
            } => self.open(bar, Side::Long, price, size, metadata)?,
            Action::OpenShort {
                price,
                size,
                metadata,
            } => self.open(bar, Side::Short, price, size, metadata)?,
            Action::Close {
                position_id,
                price,
                metadata,
            } => {
                self.store
                    .close(&self.partition, position_id, bar.timestamp, price, metadata)?;
                self.open_positions.retain(|p| p.id() != position_id);
                self.report.positions_closed += 1;
            }
        }
        Ok(())
    }

    fn open(
        &mut self,
        bar: &Bar,
        side: Side,
        price: f64,
        size: f64,
        metadata: Metadata,
    ) -> Result<(), ThalesError> {
        let position = self
            .store
            .open(&self.partition, side, bar.timestamp, price, size, metadata)?;
        self.open_positions.push(position);
        self.report.positions_opened += 1;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::file_position_store::FilePositionStore;
    use crate::domain::bar::RawBar;
    use crate::domain::scope::RunScope;
    use crate::ports::price_port::PriceChunkPort;
    use crate::ports::signal_port::Signals;
    use tempfile::TempDir;

    struct OneYear(Vec<RawBar>);

    impl PriceChunkPort for OneYear {
        fn chunk_years(&self, _instrument: &str) -> Result<Vec<i32>, ThalesError> {
            Ok(vec![2020])
        }

        fn load_chunk(&self, _instrument: &str, _year: i32) -> Result<Vec<RawBar>, ThalesError> {
            Ok(self.0.clone())
        }
    }

    /// Signals for every bar except those at the listed hours.
    struct Gappy(Vec<u32>);

    impl AuxiliarySignalPort for Gappy {
        fn signals_at(&self, timestamp: NaiveDateTime) -> Option<Signals> {
            use chrono::Timelike;
            if self.0.contains(&timestamp.hour()) {
                return None;
            }
            let mut s = Signals::new();
            s.insert("mean".into(), 100.0);
            Some(s)
        }
    }

    /// Opens a long on the first evaluated bar, closes it on the third.
    struct Scripted {
        calls: usize,
        fail_on: Option<usize>,
    }

    impl TradeDecisionPolicy for Scripted {
        fn name(&self) -> &str {
            "scripted"
        }

        fn decide(
            &mut self,
            bar: &Bar,
            open_positions: &[Position],
            _signals: &Signals,
        ) -> Result<Vec<Action>, ThalesError> {
            self.calls += 1;
            if self.fail_on == Some(self.calls) {
                return Err(ThalesError::Policy {
                    policy: "scripted".into(),
                    reason: "boom".into(),
                });
            }
            Ok(match (self.calls, open_positions.first()) {
                (1, None) => vec![Action::open(Side::Long, bar.close, 10.0, Metadata::new())],
                (3, Some(p)) => vec![Action::Close {
                    position_id: p.id(),
                    price: bar.close,
                    metadata: Metadata::new(),
                }],
                _ => vec![Action::Hold],
            })
        }
    }

    fn bars(days: u32, per_day: u32) -> Vec<RawBar> {
        let mut out = Vec::new();
        for d in 0..days {
            for h in 0..per_day {
                let t = NaiveDate::from_ymd_opt(2020, 1, 2 + d)
                    .unwrap()
                    .and_hms_opt(9 + h, 0, 0)
                    .unwrap();
                let close = 100.0 + f64::from(d * per_day + h);
                out.push(RawBar::new(Bar {
                    timestamp: t,
                    open: close,
                    high: close,
                    low: close,
                    close,
                    volume: None,
                }));
            }
        }
        out
    }

    fn partition() -> Partition {
        Partition::new("test", RunScope::backtest("r1").unwrap()).unwrap()
    }

    fn series(port: &OneYear) -> PriceSeries<'_> {
        PriceSeries::from_date(port, "X", NaiveDate::from_ymd_opt(2020, 1, 1).unwrap()).unwrap()
    }

    #[test]
    fn runs_to_exhaustion_and_applies_actions() {
        let dir = TempDir::new().unwrap();
        let mut store = FilePositionStore::new(dir.path().to_path_buf());
        let port = OneYear(bars(2, 3));
        let signals = Gappy(vec![]);
        let mut policy = Scripted {
            calls: 0,
            fail_on: None,
        };
        let mut runner = BacktestRunner::new(
            series(&port),
            &mut policy,
            &mut store,
            &signals,
            partition(),
            Budget::Days(10),
        );
        let report = runner.run().unwrap();
        assert_eq!(report.state, RunState::Exhausted);
        assert_eq!(report.bars_seen, 6);
        assert_eq!(report.positions_opened, 1);
        assert_eq!(report.positions_closed, 1);
        assert_eq!(runner.state(), RunState::Exhausted);
        drop(runner);

        let closed = store.list_closed(&partition()).unwrap();
        assert_eq!(closed.len(), 1);
        assert!((closed[0].open_price() - 100.0).abs() < f64::EPSILON);
        assert!((closed[0].close_price().unwrap() - 102.0).abs() < f64::EPSILON);
    }

    #[test]
    fn day_budget_completes_and_leaves_positions_open() {
        let dir = TempDir::new().unwrap();
        let mut store = FilePositionStore::new(dir.path().to_path_buf());
        let port = OneYear(bars(3, 2));
        let signals = Gappy(vec![]);
        let mut policy = Scripted {
            calls: 0,
            fail_on: None,
        };
        let report = BacktestRunner::new(
            series(&port),
            &mut policy,
            &mut store,
            &signals,
            partition(),
            Budget::Days(1),
        )
        .run()
        .unwrap();
        assert_eq!(report.state, RunState::Completed);
        assert_eq!(report.bars_seen, 2);
        assert_eq!(report.days_seen, 1);
        assert_eq!(store.list_open(&partition()).unwrap().len(), 1);
        assert!(store.list_closed(&partition()).unwrap().is_empty());
    }

    #[test]
    fn until_budget_is_inclusive() {
        let dir = TempDir::new().unwrap();
        let mut store = FilePositionStore::new(dir.path().to_path_buf());
        let port = OneYear(bars(2, 3));
        let signals = Gappy(vec![]);
        let mut policy = Scripted {
            calls: 0,
            fail_on: None,
        };
        let end = NaiveDate::from_ymd_opt(2020, 1, 2)
            .unwrap()
            .and_hms_opt(10, 0, 0)
            .unwrap();
        let report = BacktestRunner::new(
            series(&port),
            &mut policy,
            &mut store,
            &signals,
            partition(),
            Budget::Until(end),
        )
        .run()
        .unwrap();
        assert_eq!(report.state, RunState::Completed);
        assert_eq!(report.bars_seen, 2);
        assert_eq!(report.last_timestamp, Some(end));
    }

    #[test]
    fn bars_without_signals_are_skipped() {
        let dir = TempDir::new().unwrap();
        let mut store = FilePositionStore::new(dir.path().to_path_buf());
        let port = OneYear(bars(1, 3));
        let signals = Gappy(vec![9]);
        let mut policy = Scripted {
            calls: 0,
            fail_on: None,
        };
        let report = BacktestRunner::new(
            series(&port),
            &mut policy,
            &mut store,
            &signals,
            partition(),
            Budget::Days(5),
        )
        .run()
        .unwrap();
        assert_eq!(report.bars_seen, 3);
        assert_eq!(report.bars_skipped, 1);
        assert_eq!(report.bars_evaluated, 2);
        assert_eq!(policy.calls, 2);
        // First evaluated bar is 10:00, close 101.
        let open = store.list_open(&partition()).unwrap();
        assert!((open[0].open_price() - 101.0).abs() < f64::EPSILON);
    }

    #[test]
    fn policy_error_fails_run_and_is_recorded() {
        let dir = TempDir::new().unwrap();
        let mut store = FilePositionStore::new(dir.path().to_path_buf());
        let port = OneYear(bars(1, 3));
        let signals = Gappy(vec![]);
        let mut policy = Scripted {
            calls: 0,
            fail_on: Some(2),
        };
        let mut runner = BacktestRunner::new(
            series(&port),
            &mut policy,
            &mut store,
            &signals,
            partition(),
            Budget::Days(5),
        );
        let err = runner.run().unwrap_err();
        assert!(matches!(err, ThalesError::Policy { .. }));
        assert_eq!(runner.state(), RunState::Failed);
        assert!(matches!(
            runner.run(),
            Err(ThalesError::RunAlreadyStarted { .. })
        ));
        drop(runner);
        let meta = store.run_metadata(&partition()).unwrap();
        assert_eq!(meta["state"], MetaValue::Text("failed".into()));
    }

    #[test]
    fn run_metadata_records_policy_and_counters() {
        let dir = TempDir::new().unwrap();
        let mut store = FilePositionStore::new(dir.path().to_path_buf());
        let port = OneYear(bars(1, 2));
        let signals = Gappy(vec![]);
        let mut policy = Scripted {
            calls: 0,
            fail_on: None,
        };
        BacktestRunner::new(
            series(&port),
            &mut policy,
            &mut store,
            &signals,
            partition(),
            Budget::Days(5),
        )
        .run()
        .unwrap();
        let meta = store.run_metadata(&partition()).unwrap();
        assert_eq!(meta["policy"], MetaValue::Text("scripted".into()));
        assert_eq!(meta["state"], MetaValue::Text("exhausted".into()));
        assert_eq!(meta["bars_seen"], MetaValue::Int(2));
    }
}
