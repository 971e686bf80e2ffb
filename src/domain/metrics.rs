//! Performance metrics for a single simulation.

use super::simulator::SimulationResult;
use serde::Serialize;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MetricsConfig {
    pub trading_days_per_year: f64,
    pub risk_free_rate: f64,
}

impl Default for MetricsConfig {
    fn default() -> Self {
        MetricsConfig {
            trading_days_per_year: 252.0,
            risk_free_rate: 0.03,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Metrics {
    pub total_return: f64,
    pub cagr: f64,
    pub sharpe_ratio: f64,
    pub max_drawdown: f64,
    /// Longest run of equity points spent below a prior peak.
    pub max_drawdown_duration: usize,
    /// Share of rebalance periods with a positive return.
    pub period_win_rate: f64,
    pub trades_won: usize,
    pub trades_lost: usize,
    pub trades_breakeven: usize,
    pub trade_win_rate: f64,
    pub profit_factor: f64,
    pub avg_win: f64,
    pub avg_loss: f64,
    pub fill_count: usize,
    pub open_positions: usize,
}

impl Metrics {
    pub fn compute(result: &SimulationResult, config: &MetricsConfig) -> Self {
        let total_return = result.total_return();
        let cagr = annualize(1.0 + total_return, result.trading_days, config.trading_days_per_year);

        let mut equity = Vec::with_capacity(result.equity_curve.len() + 1);
        equity.push(result.initial_capital);
        equity.extend(result.equity_curve.iter().map(|p| p.equity));
        let (max_drawdown, max_drawdown_duration) = compute_drawdown(&equity);

        let returns = result.period_returns();
        let sharpe_ratio = compute_sharpe(&returns, result.trading_days, config);
        let period_win_rate = if returns.is_empty() {
            0.0
        } else {
            returns.iter().filter(|r| **r > 0.0).count() as f64 / returns.len() as f64
        };

        let mut trades_won = 0usize;
        let mut trades_lost = 0usize;
        let mut trades_breakeven = 0usize;
        let mut total_wins = 0.0_f64;
        let mut total_losses = 0.0_f64;

        for trade in &result.closed_trades {
            let pnl = trade.pnl;
            if pnl > 0.0 {
                trades_won += 1;
                total_wins += pnl;
            } else if pnl < 0.0 {
                trades_lost += 1;
                total_losses += pnl.abs();
            } else {
                trades_breakeven += 1;
            }
        }

        let total_trades = trades_won + trades_lost + trades_breakeven;
        let trade_win_rate = if total_trades > 0 {
            trades_won as f64 / total_trades as f64
        } else {
            0.0
        };

        let profit_factor = if total_losses > 0.0 {
            total_wins / total_losses
        } else if total_wins > 0.0 {
            f64::INFINITY
        } else {
            0.0
        };

        let avg_win = if trades_won > 0 {
            total_wins / trades_won as f64
        } else {
            0.0
        };

        let avg_loss = if trades_lost > 0 {
            total_losses / trades_lost as f64
        } else {
            0.0
        };

        Metrics {
            total_return,
            cagr,
            sharpe_ratio,
            max_drawdown,
            max_drawdown_duration,
            period_win_rate,
            trades_won,
            trades_lost,
            trades_breakeven,
            trade_win_rate,
            profit_factor,
            avg_win,
            avg_loss,
            fill_count: result.fills.len(),
            open_positions: result.open_positions.len(),
        }
    }
}

/// growth^(trading_days_per_year / trading_days) - 1, zero when undefined.
pub fn annualize(growth: f64, trading_days: usize, trading_days_per_year: f64) -> f64 {
    if trading_days == 0 || !growth.is_finite() {
        return 0.0;
    }
    if growth <= 0.0 {
        return -1.0;
    }
    growth.powf(trading_days_per_year / trading_days as f64) - 1.0
}

/// Largest peak-to-trough decline as a fraction of the peak, and the longest
/// stretch of points spent under water.
pub fn compute_drawdown(equity: &[f64]) -> (f64, usize) {
    let Some(&first) = equity.first() else {
        return (0.0, 0);
    };

    let mut peak = first;
    let mut max_dd = 0.0_f64;
    let mut max_dd_duration = 0usize;
    let mut current_dd_duration = 0usize;

    for &value in equity {
        if value >= peak {
            peak = value;
            current_dd_duration = 0;
        } else if peak > 0.0 {
            let dd = (peak - value) / peak;
            if dd > max_dd {
                max_dd = dd;
            }
            current_dd_duration += 1;
            if current_dd_duration > max_dd_duration {
                max_dd_duration = current_dd_duration;
            }
        }
    }

    (max_dd, max_dd_duration)
}

/// Annualized Sharpe over rebalance-period returns. The period length is
/// inferred from how many periods the trading days were split into.
fn compute_sharpe(returns: &[f64], trading_days: usize, config: &MetricsConfig) -> f64 {
    if returns.len() < 2 || trading_days == 0 {
        return 0.0;
    }

    let n = returns.len() as f64;
    let periods_per_year = n * config.trading_days_per_year / trading_days as f64;
    let mean = returns.iter().sum::<f64>() / n;
    let variance = returns.iter().map(|r| (r - mean).powi(2)).sum::<f64>() / n;
    let stddev = variance.sqrt();

    if stddev <= 0.0 || periods_per_year <= 0.0 {
        return 0.0;
    }
    let excess = mean - config.risk_free_rate / periods_per_year;
    excess / stddev * periods_per_year.sqrt()
}
