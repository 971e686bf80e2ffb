//! Folding out-of-sample window results into run-level statistics.

use super::metrics::{annualize, compute_drawdown};
use super::walk_forward::BacktestResult;
use serde::Serialize;

#[derive(Debug, Clone, PartialEq, Default, Serialize)]
pub struct AggregateMetrics {
    pub windows: usize,
    /// Compounded return across every test window.
    pub total_return: f64,
    pub cagr: f64,
    pub max_drawdown: f64,
    /// Share of windows with a positive test return.
    pub win_rate: f64,
    pub composite_score: f64,
    pub test_trading_days: usize,
}

/// cagr - drawdown_penalty * max_drawdown
pub fn composite_score(cagr: f64, max_drawdown: f64, drawdown_penalty: f64) -> f64 {
    cagr - drawdown_penalty * max_drawdown
}

/// Aggregate test windows in order.
///
/// CAGR annualizes the compounded return over the summed trading-day span of
/// the windows. Drawdown runs over the test equity curves chained end to
/// end, each rescaled to start where the previous one finished.
pub fn aggregate(
    results: &[BacktestResult],
    trading_days_per_year: f64,
    drawdown_penalty: f64,
) -> AggregateMetrics {
    if results.is_empty() {
        return AggregateMetrics::default();
    }

    let mut growth = 1.0_f64;
    let mut test_trading_days = 0usize;
    let mut winners = 0usize;
    let mut chained = vec![1.0_f64];

    for result in results {
        let test = &result.test;
        if test.initial_capital > 0.0 {
            chained.extend(
                test.equity_curve
                    .iter()
                    .map(|p| growth * p.equity / test.initial_capital),
            );
        }
        let window_return = test.total_return();
        growth *= 1.0 + window_return;
        test_trading_days += test.trading_days;
        if window_return > 0.0 {
            winners += 1;
        }
    }

    let cagr = annualize(growth, test_trading_days, trading_days_per_year);
    let (max_drawdown, _) = compute_drawdown(&chained);

    AggregateMetrics {
        windows: results.len(),
        total_return: growth - 1.0,
        cagr,
        max_drawdown,
        win_rate: winners as f64 / results.len() as f64,
        composite_score: composite_score(cagr, max_drawdown, drawdown_penalty),
        test_trading_days,
    }
}
