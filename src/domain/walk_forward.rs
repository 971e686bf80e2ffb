//! Walk-forward optimisation: search on each train half, validate once on
//! the matching test half, aggregate the out-of-sample results.

use crate::domain::aggregate::{AggregateMetrics, aggregate};
use crate::domain::config::RunConfig;
use crate::domain::error::{DataIssue, WfoError};
use crate::domain::market_data::MarketDataStore;
use crate::domain::metrics::Metrics;
use crate::domain::parameters::ParameterSet;
use crate::domain::schedule::{BacktestWindow, DroppedWindow, ScheduledWindow, build_schedule};
use crate::domain::search::{SearchMode, generate_candidates, search};
use crate::domain::signal::SignalEngine;
use crate::domain::simulator::{PortfolioSimulator, SimulationResult};
use chrono::NaiveDate;
use log::{info, warn};
use rayon::prelude::*;
use serde::Serialize;

/// Out-of-sample outcome of one window.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BacktestResult {
    pub window: BacktestWindow,
    pub train_days: usize,
    /// Parameters chosen on the train half.
    pub parameters: ParameterSet,
    /// In-sample score of `parameters`. Not a performance figure.
    pub train_score: f64,
    pub candidates_evaluated: usize,
    pub candidates_total: usize,
    pub budget_exhausted: bool,
    pub period_returns: Vec<f64>,
    pub metrics: Metrics,
    pub partial_data: bool,
    /// The single test-half simulation.
    pub test: SimulationResult,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RunReport {
    pub start: NaiveDate,
    pub end: NaiveDate,
    pub search_mode: SearchMode,
    pub seed: u64,
    pub windows: Vec<BacktestResult>,
    pub dropped: Vec<DroppedWindow>,
    pub aggregate: AggregateMetrics,
    /// Some window ran with missing data.
    pub partial_data: bool,
}

/// Run the whole walk-forward over a loaded store.
///
/// Windows are evaluated in parallel and reported in schedule order.
pub fn run_walk_forward(
    store: &MarketDataStore,
    config: &RunConfig,
) -> Result<RunReport, WfoError> {
    config.validate()?;

    let schedule = build_schedule(&config.window, store);
    info!(
        "{} windows scheduled, {} dropped",
        schedule.windows.len(),
        schedule.dropped.len()
    );

    let signals = SignalEngine::new(store, config.signal.clone());
    let simulator = PortfolioSimulator::new(&signals, &config.simulation);

    let windows = schedule
        .windows
        .par_iter()
        .map(|scheduled| evaluate_window(&simulator, scheduled, config))
        .collect::<Result<Vec<_>, _>>()?;

    let aggregate = aggregate(
        &windows,
        config.metrics.trading_days_per_year,
        config.drawdown_penalty,
    );
    let partial_data = windows.iter().any(|w| w.partial_data);

    Ok(RunReport {
        start: config.start(),
        end: config.end(),
        search_mode: config.search.mode,
        seed: config.search.seed,
        windows,
        dropped: schedule.dropped,
        aggregate,
        partial_data,
    })
}

/// Search the train half, then run the winner once on the test half.
pub fn evaluate_window(
    simulator: &PortfolioSimulator<'_>,
    scheduled: &ScheduledWindow,
    config: &RunConfig,
) -> Result<BacktestResult, WfoError> {
    let window = &scheduled.window;
    let (candidates, truncated) = generate_candidates(&config.space, &config.search, window.index)?;

    let outcome = search(
        simulator,
        &candidates,
        window.train_start,
        window.train_end,
        &config.search,
    )
    .ok_or_else(|| {
        WfoError::invalid("search", "mode", "the parameter space produced no candidates")
    })?;

    info!(
        "window {}: {} candidates on {}..{}, best score {:.6}",
        window.index, outcome.evaluated, window.train_start, window.train_end, outcome.best_score
    );

    let test = simulator.run(&outcome.best, window.test_start, window.test_end);
    for issue in &test.issues {
        if let DataIssue::HeldPriceGap { .. } = issue {
            warn!("window {}: {}", window.index, issue);
        }
    }

    let metrics = Metrics::compute(&test, &config.metrics);
    info!(
        "window {}: test {}..{} return {:.4}, max drawdown {:.4}",
        window.index, window.test_start, window.test_end, metrics.total_return, metrics.max_drawdown
    );

    Ok(BacktestResult {
        window: *window,
        train_days: scheduled.train_days,
        parameters: outcome.best,
        train_score: outcome.best_score,
        candidates_evaluated: outcome.evaluated,
        candidates_total: candidates.len(),
        budget_exhausted: truncated || outcome.budget_exhausted,
        period_returns: test.period_returns(),
        metrics,
        partial_data: test.is_partial(),
        test,
    })
}
