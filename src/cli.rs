//! CLI definition and dispatch.

use chrono::{Duration, Local, NaiveDateTime};
use clap::{ArgGroup, Args, Parser, Subcommand};
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use tracing::info;
use tracing_subscriber::EnvFilter;

use crate::adapters::csv_adapter::CsvAdapter;
use crate::adapters::file_config_adapter::FileConfigAdapter;
use crate::adapters::file_position_store::FilePositionStore;
use crate::adapters::indicator_signals::IndicatorSignals;
use crate::adapters::json_signal_adapter::JsonSignalAdapter;
use crate::domain::backtest::{BacktestRunner, RunReport};
use crate::domain::bar::{parse_timestamp, Bar};
use crate::domain::condition::{any_matches, BarCondition};
use crate::domain::config_validation::{
    self, DataSettings, DataSource, Settings, SignalSource, DEFAULT_LOG_LEVEL,
};
use crate::domain::error::ThalesError;
use crate::domain::indicator::session::MAX_LOOKBACK_DAYS;
use crate::domain::mean_reversion::MeanReversionPolicy;
use crate::domain::performance::{self, DeltaEvent, DeltaPoint, Stats};
use crate::domain::position::Position;
use crate::domain::price_series::PriceSeries;
use crate::domain::scope::{Partition, RunScope};
use crate::ports::config_port::ConfigPort;
use crate::ports::position_port::PositionStore;
use crate::ports::price_port::PriceChunkPort;
use crate::ports::signal_port::{AuxiliarySignalPort, BASELINE};

#[derive(Parser, Debug)]
#[command(name = "thales", about = "Position tracking and mean-reversion backtests")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Args, Debug, Clone)]
pub struct StoreArgs {
    /// Position store root directory
    #[arg(long)]
    pub root: PathBuf,
    #[arg(long)]
    pub strategy: String,
}

/// Which partition to read. Defaults to the latest backtest run.
#[derive(Args, Debug, Clone, Default)]
pub struct ScopeArgs {
    #[arg(long, conflicts_with_all = ["latest", "live"])]
    pub run: Option<String>,
    #[arg(long, conflicts_with = "live")]
    pub latest: bool,
    #[arg(long)]
    pub live: bool,
}

#[derive(Args, Debug, Clone)]
#[command(group(ArgGroup::new("target").required(true).args(["run", "all_runs", "live"])))]
pub struct PurgeTarget {
    #[arg(long)]
    pub run: Option<String>,
    #[arg(long)]
    pub all_runs: bool,
    #[arg(long)]
    pub live: bool,
    /// Required to purge live positions
    #[arg(long, requires = "live")]
    pub confirm_live: bool,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Run a backtest and print its summary
    Backtest {
        #[arg(short, long)]
        config: PathBuf,
        #[arg(long)]
        run_name: Option<String>,
    },
    /// Summarize the closed positions of a partition
    Summary {
        #[command(flatten)]
        store: StoreArgs,
        #[command(flatten)]
        scope: ScopeArgs,
        /// Also print the cumulative delta series
        #[arg(long)]
        series: bool,
    },
    /// List positions of a partition
    Positions {
        #[command(flatten)]
        store: StoreArgs,
        #[command(flatten)]
        scope: ScopeArgs,
        #[arg(long)]
        closed: bool,
    },
    /// List backtest runs of a strategy
    Runs {
        #[command(flatten)]
        store: StoreArgs,
    },
    /// Delete positions
    Purge {
        #[command(flatten)]
        store: StoreArgs,
        #[command(flatten)]
        target: PurgeTarget,
    },
    /// Print the first bar at or after a time matching any condition
    Scan {
        #[arg(short, long)]
        config: PathBuf,
        #[arg(long)]
        from: String,
        #[arg(long = "condition", required = true)]
        conditions: Vec<String>,
    },
    /// Validate a configuration file
    Validate {
        #[arg(short, long)]
        config: PathBuf,
    },
}

pub fn run(cli: Cli) -> ExitCode {
    match cli.command {
        Command::Backtest { config, run_name } => run_backtest(&config, run_name),
        Command::Summary {
            store,
            scope,
            series,
        } => run_summary(&store, &scope, series),
        Command::Positions {
            store,
            scope,
            closed,
        } => run_positions(&store, &scope, closed),
        Command::Runs { store } => run_runs(&store),
        Command::Purge { store, target } => run_purge(&store, &target),
        Command::Scan {
            config,
            from,
            conditions,
        } => run_scan(&config, &from, &conditions),
        Command::Validate { config } => run_validate(&config),
    }
}

/// Install the stderr subscriber. `RUST_LOG` wins over `level`.
pub fn init_logging(level: &str) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .try_init();
}

fn fail(e: &ThalesError) -> ExitCode {
    eprintln!("error: {e}");
    e.into()
}

pub fn load_config(path: &Path) -> Result<FileConfigAdapter, ExitCode> {
    FileConfigAdapter::from_file(path).map_err(|e| fail(&e))
}

fn load_settings(path: &Path) -> Result<(FileConfigAdapter, Settings), ExitCode> {
    let adapter = load_config(path)?;
    let settings = config_validation::load_settings(&adapter).map_err(|e| fail(&e))?;
    Ok((adapter, settings))
}

pub fn open_price_port(
    config: &dyn ConfigPort,
    data: &DataSettings,
) -> Result<Box<dyn PriceChunkPort>, ThalesError> {
    match data.source {
        DataSource::Csv => Ok(Box::new(CsvAdapter::new(data.path.clone()))),
        #[cfg(feature = "sqlite")]
        DataSource::Sqlite => {
            use crate::adapters::sqlite_adapter::SqliteAdapter;
            Ok(Box::new(SqliteAdapter::from_config(config)?))
        }
        #[cfg(not(feature = "sqlite"))]
        DataSource::Sqlite => {
            let _ = config;
            Err(ThalesError::ConfigInvalid {
                section: "data".into(),
                key: "source".into(),
                reason: "built without the sqlite feature".into(),
            })
        }
    }
}

/// The baseline source for a run. Indicator baselines are computed over
/// the run's range plus enough earlier days to seed the first session.
pub fn build_signals(
    port: &dyn PriceChunkPort,
    settings: &Settings,
) -> Result<Box<dyn AuxiliarySignalPort>, ThalesError> {
    match &settings.signals {
        SignalSource::Json(dir) => Ok(Box::new(JsonSignalAdapter::new(dir.clone()))),
        SignalSource::Indicator(indicator) => {
            let bt = &settings.backtest;
            let from = bt.start.date() - Duration::days(MAX_LOOKBACK_DAYS);
            let instrument = &settings.data.instrument;
            let mut series = match bt.end {
                Some(end) => PriceSeries::load_range(port, instrument, from, end.date())?,
                None => PriceSeries::from_date(port, instrument, from)?,
            };
            let signals = IndicatorSignals::compute(BASELINE, indicator, series.load_all()?);
            info!(indicator = %indicator, points = signals.len(), "computed baseline");
            Ok(Box::new(signals))
        }
    }
}

#[derive(Debug)]
pub struct BacktestOutcome {
    pub partition: Partition,
    pub report: RunReport,
    pub stats: Stats,
}

/// Wire the configured adapters together and drive one run to completion.
pub fn execute_backtest(
    config: &dyn ConfigPort,
    settings: &Settings,
    now: NaiveDateTime,
) -> Result<BacktestOutcome, ThalesError> {
    let bt = &settings.backtest;
    let partition = Partition::new(bt.strategy.clone(), bt.scope(now)?)?;

    let port = open_price_port(config, &settings.data)?;
    let signals = build_signals(port.as_ref(), settings)?;

    let instrument = &settings.data.instrument;
    let series = match bt.end {
        Some(end) => PriceSeries::load_range(port.as_ref(), instrument, bt.start.date(), end.date())?,
        None => PriceSeries::from_date(port.as_ref(), instrument, bt.start.date())?,
    }
    .starting_at(bt.start)
    .with_max_lookahead(settings.data.max_lookahead);

    let mut policy = MeanReversionPolicy::new(settings.policy.clone())?;
    let mut store = FilePositionStore::new(settings.positions_root.clone());

    let report = BacktestRunner::new(
        series,
        &mut policy,
        &mut store,
        signals.as_ref(),
        partition.clone(),
        bt.budget(),
    )
    .run()?;

    let stats = performance::summarize(&store, &partition)?;
    Ok(BacktestOutcome {
        partition,
        report,
        stats,
    })
}

fn run_backtest(config_path: &Path, run_name: Option<String>) -> ExitCode {
    // Stage 1: Load and validate config
    let (adapter, mut settings) = match load_settings(config_path) {
        Ok(s) => s,
        Err(code) => return code,
    };
    init_logging(&settings.log_level);

    // Stage 2: Apply overrides
    if let Some(name) = run_name {
        if let Err(e) = RunScope::backtest(name.clone()) {
            return fail(&e);
        }
        settings.backtest.run_name = Some(name);
    }

    // Stage 3: Run
    let outcome = match execute_backtest(&adapter, &settings, Local::now().naive_local()) {
        Ok(o) => o,
        Err(e) => return fail(&e),
    };

    // Stage 4: Report
    println!("run:              {}", outcome.partition);
    println!("state:            {}", outcome.report.state);
    println!(
        "bars:             {} seen, {} evaluated, {} skipped",
        outcome.report.bars_seen, outcome.report.bars_evaluated, outcome.report.bars_skipped
    );
    println!(
        "positions:        {} opened, {} closed",
        outcome.report.positions_opened, outcome.report.positions_closed
    );
    print!("{}", format_stats(&outcome.stats));
    ExitCode::SUCCESS
}

/// Resolve scope flags against the store. No flag means the latest run.
pub fn resolve_partition(
    store: &dyn PositionStore,
    strategy: &str,
    scope: &ScopeArgs,
) -> Result<Partition, ThalesError> {
    let run_scope = if scope.live {
        RunScope::Live
    } else if let Some(name) = &scope.run {
        RunScope::backtest(name.clone())?
    } else {
        store
            .latest_run(strategy)?
            .ok_or_else(|| ThalesError::InvalidScope {
                name: "latest".into(),
                reason: format!("strategy {} has no backtest runs", strategy),
            })?
    };
    Partition::new(strategy, run_scope)
}

pub fn format_stats(stats: &Stats) -> String {
    let mut out = format!("trades:           {}\n", stats.trade_count);
    if let (Some(total), Some(ratio), Some(hold), Some(wins), Some(rate)) = (
        stats.total_delta,
        stats.average_return_ratio,
        stats.average_hold_duration,
        stats.win_count,
        stats.win_rate,
    ) {
        out.push_str(&format!("total delta:      {:.5}\n", total));
        out.push_str(&format!("avg return ratio: {:.5}\n", ratio));
        out.push_str(&format!("avg hold:         {} min\n", hold.num_minutes()));
        out.push_str(&format!("wins:             {} ({:.1}%)\n", wins, rate * 100.0));
        out.push_str(&format!(
            "long/short:       {}/{}\n",
            stats.long_count.unwrap_or(0),
            stats.short_count.unwrap_or(0)
        ));
    }
    out
}

pub fn format_delta_point(point: &DeltaPoint) -> String {
    let event = match point.event {
        DeltaEvent::Open => "open",
        DeltaEvent::Close => "close",
    };
    format!(
        "{}\t{}\t{}\t{:.5}",
        point.timestamp, event, point.position_id, point.running_total
    )
}

pub fn format_position(p: &Position) -> String {
    let opt = |v: Option<String>| v.unwrap_or_else(|| "-".to_string());
    format!(
        "{}\t{}\t{}\t{}\t{}\t{}\t{}\t{}",
        p.id(),
        p.side(),
        p.open_time(),
        p.open_price(),
        p.size(),
        opt(p.close_time().map(|t| t.to_string())),
        opt(p.close_price().map(|v| v.to_string())),
        opt(p.delta().map(|d| format!("{:.5}", d))),
    )
}

fn run_summary(store_args: &StoreArgs, scope: &ScopeArgs, series: bool) -> ExitCode {
    init_logging(DEFAULT_LOG_LEVEL);
    let store = FilePositionStore::new(store_args.root.clone());
    let partition = match resolve_partition(&store, &store_args.strategy, scope) {
        Ok(p) => p,
        Err(e) => return fail(&e),
    };

    let closed = match store.list_closed(&partition) {
        Ok(c) => c,
        Err(e) => return fail(&e),
    };
    println!("partition:        {}", partition);
    print!("{}", format_stats(&Stats::compute(&closed)));

    if series {
        println!();
        for point in performance::cumulative_delta_series(&closed) {
            println!("{}", format_delta_point(&point));
        }
    }
    ExitCode::SUCCESS
}

fn run_positions(store_args: &StoreArgs, scope: &ScopeArgs, closed: bool) -> ExitCode {
    init_logging(DEFAULT_LOG_LEVEL);
    let store = FilePositionStore::new(store_args.root.clone());
    let partition = match resolve_partition(&store, &store_args.strategy, scope) {
        Ok(p) => p,
        Err(e) => return fail(&e),
    };

    let positions = if closed {
        store.list_closed(&partition)
    } else {
        store.list_open(&partition)
    };
    match positions {
        Ok(positions) => {
            for p in &positions {
                println!("{}", format_position(p));
            }
            eprintln!("{} positions in {}", positions.len(), partition);
            ExitCode::SUCCESS
        }
        Err(e) => fail(&e),
    }
}

fn run_runs(store_args: &StoreArgs) -> ExitCode {
    init_logging(DEFAULT_LOG_LEVEL);
    let store = FilePositionStore::new(store_args.root.clone());
    match store.list_runs(&store_args.strategy) {
        Ok(runs) => {
            for run in &runs {
                println!("{}", run);
            }
            ExitCode::SUCCESS
        }
        Err(e) => fail(&e),
    }
}

fn run_purge(store_args: &StoreArgs, target: &PurgeTarget) -> ExitCode {
    init_logging(DEFAULT_LOG_LEVEL);
    let mut store = FilePositionStore::new(store_args.root.clone());
    let strategy = &store_args.strategy;

    let scopes = if target.live {
        vec![RunScope::Live]
    } else if let Some(name) = &target.run {
        match RunScope::backtest(name.clone()) {
            Ok(s) => vec![s],
            Err(e) => return fail(&e),
        }
    } else {
        match store.list_runs(strategy) {
            Ok(runs) => runs,
            Err(e) => return fail(&e),
        }
    };

    let mut removed = 0;
    for scope in scopes {
        let result = Partition::new(strategy.clone(), scope)
            .and_then(|partition| store.purge(&partition, target.confirm_live));
        match result {
            Ok(n) => removed += n,
            Err(e) => return fail(&e),
        }
    }
    println!("purged {} positions", removed);
    ExitCode::SUCCESS
}

/// First bar at or after `from` satisfying any of `conditions`.
pub fn scan_for_bar(
    port: &dyn PriceChunkPort,
    data: &DataSettings,
    from: NaiveDateTime,
    conditions: &[BarCondition],
) -> Result<Bar, ThalesError> {
    let mut series = PriceSeries::from_date(port, &data.instrument, from.date())?
        .starting_at(from)
        .with_max_lookahead(data.max_lookahead);
    series.find_first_matching(|bar| any_matches(conditions, bar))
}

fn run_scan(config_path: &Path, from: &str, conditions: &[String]) -> ExitCode {
    // Stage 1: Load config
    let adapter = match load_config(config_path) {
        Ok(a) => a,
        Err(code) => return code,
    };
    init_logging(&config_validation::log_level(&adapter));
    let data = match config_validation::data_settings(&adapter) {
        Ok(d) => d,
        Err(e) => return fail(&e),
    };

    // Stage 2: Parse arguments
    let Some(from) = parse_timestamp(from) else {
        eprintln!("error: invalid --from timestamp '{}'", from);
        return ExitCode::from(2);
    };
    let parsed: Result<Vec<BarCondition>, ThalesError> =
        conditions.iter().map(|c| c.parse()).collect();
    let parsed = match parsed {
        Ok(p) => p,
        Err(e) => return fail(&e),
    };

    // Stage 3: Scan
    let port = match open_price_port(&adapter, &data) {
        Ok(p) => p,
        Err(e) => return fail(&e),
    };
    match scan_for_bar(port.as_ref(), &data, from, &parsed) {
        Ok(bar) => {
            println!(
                "{}\t{}\t{}\t{}\t{}",
                bar.timestamp, bar.open, bar.high, bar.low, bar.close
            );
            ExitCode::SUCCESS
        }
        Err(e) => fail(&e),
    }
}

fn run_validate(config_path: &Path) -> ExitCode {
    eprintln!("Validating config: {}", config_path.display());
    let (_, settings) = match load_settings(config_path) {
        Ok(s) => s,
        Err(code) => return code,
    };

    eprintln!("  instrument: {}", settings.data.instrument);
    eprintln!("  strategy:   {}", settings.backtest.strategy);
    eprintln!("  budget:     {}", settings.backtest.budget());
    match &settings.signals {
        SignalSource::Indicator(i) => eprintln!("  baseline:   {}", i),
        SignalSource::Json(dir) => eprintln!("  baseline:   {}", dir.display()),
    }
    eprintln!("\nConfiguration is valid.");
    ExitCode::SUCCESS
}
