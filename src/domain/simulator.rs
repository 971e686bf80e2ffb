//! Portfolio simulation over one date range with one parameter set.
//!
//! Each rebalance date runs in a fixed order:
//!
//! 1. mark holdings to the day's close, carrying the last close across gaps
//! 2. execute deferred exits and stop-losses (checked against entry price)
//! 3. in a bear regime, liquidate and buy nothing
//! 4. select the top candidates
//! 5. sell holdings that are no longer selected
//! 6. buy new picks sized from post-sale equity
//! 7. record equity
//!
//! An instrument sold on a date is never bought back on the same date.

use crate::domain::error::DataIssue;
use crate::domain::execution::{self, EntryResult, ExecutionConfig, Fill, FillReason};
use crate::domain::parameters::ParameterSet;
use crate::domain::portfolio::{EquityPoint, Portfolio};
use crate::domain::position::{ClosedTrade, ExitReason, Position};
use crate::domain::signal::{Regime, SignalEngine};
use chrono::NaiveDate;
use log::debug;
use serde::Serialize;
use std::collections::BTreeSet;

#[derive(Debug, Clone, PartialEq)]
pub struct SimulationConfig {
    pub initial_capital: f64,
    pub execution: ExecutionConfig,
}

impl Default for SimulationConfig {
    fn default() -> Self {
        SimulationConfig {
            initial_capital: 1_000_000.0,
            execution: ExecutionConfig::default(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SimulationResult {
    pub start: NaiveDate,
    pub end: NaiveDate,
    /// Trading dates in `[start, end]`.
    pub trading_days: usize,
    pub initial_capital: f64,
    pub rebalance_count: usize,
    pub equity_curve: Vec<EquityPoint>,
    pub fills: Vec<Fill>,
    pub closed_trades: Vec<ClosedTrade>,
    /// Holdings still open at `end`, valued at their last mark.
    pub open_positions: Vec<Position>,
    pub issues: Vec<DataIssue>,
}

impl SimulationResult {
    pub fn final_equity(&self) -> f64 {
        self.equity_curve
            .last()
            .map_or(self.initial_capital, |p| p.equity)
    }

    pub fn total_return(&self) -> f64 {
        if self.initial_capital <= 0.0 {
            return 0.0;
        }
        self.final_equity() / self.initial_capital - 1.0
    }

    /// Simple returns between consecutive equity points, the first measured
    /// from initial capital.
    pub fn period_returns(&self) -> Vec<f64> {
        let mut previous = self.initial_capital;
        let mut returns = Vec::with_capacity(self.equity_curve.len());
        for point in &self.equity_curve {
            if previous > 0.0 {
                returns.push(point.equity / previous - 1.0);
            } else {
                returns.push(0.0);
            }
            previous = point.equity;
        }
        returns
    }

    /// True when a price or factor gap affected the run.
    pub fn is_partial(&self) -> bool {
        self.issues.iter().any(DataIssue::is_missing_data)
    }
}

/// Runs parameter sets against a shared, read-only signal engine.
pub struct PortfolioSimulator<'a> {
    signals: &'a SignalEngine<'a>,
    config: &'a SimulationConfig,
}

struct RunState {
    portfolio: Portfolio,
    issues: Vec<DataIssue>,
    rebalances: usize,
}

impl<'a> PortfolioSimulator<'a> {
    pub fn new(signals: &'a SignalEngine<'a>, config: &'a SimulationConfig) -> Self {
        Self { signals, config }
    }

    /// Simulate `params` over the trading dates in `[start, end]`.
    ///
    /// Rebalances fall on every `rebalance_interval_days`-th trading date,
    /// starting with the first. The last date is always marked so the
    /// result covers the whole range.
    pub fn run(&self, params: &ParameterSet, start: NaiveDate, end: NaiveDate) -> SimulationResult {
        let dates = self.signals.store().trading_dates(start, end);
        let interval = params.rebalance_interval_days.max(1);

        let mut state = RunState {
            portfolio: Portfolio::new(self.config.initial_capital),
            issues: Vec::new(),
            rebalances: 0,
        };

        for (i, &date) in dates.iter().enumerate() {
            if i % interval == 0 {
                self.rebalance(&mut state, params, date);
            } else if i + 1 == dates.len() {
                self.mark_holdings(&mut state, date);
                state.portfolio.record_equity(date);
            }
        }

        let portfolio = state.portfolio;
        SimulationResult {
            start,
            end,
            trading_days: dates.len(),
            initial_capital: self.config.initial_capital,
            rebalance_count: state.rebalances,
            equity_curve: portfolio.equity_curve,
            fills: portfolio.fills,
            closed_trades: portfolio.closed_trades,
            open_positions: portfolio.positions.into_values().collect(),
            issues: state.issues,
        }
    }

    fn rebalance(&self, state: &mut RunState, params: &ParameterSet, date: NaiveDate) {
        state.rebalances += 1;
        self.mark_holdings(state, date);

        let mut exited = self.exit_stops_and_deferred(state, params, date);

        if self.signals.regime(date) == Regime::Bear {
            debug!("{}: bear regime, liquidating", date);
            for code in state.portfolio.held_codes() {
                self.exit(state, &code, date, ExitReason::Regime, FillReason::Regime);
            }
            state.portfolio.record_equity(date);
            return;
        }

        let selection = self.signals.select(date, params, &exited);
        if selection.missing_factors > 0 {
            state.issues.push(DataIssue::CandidateGap {
                date,
                count: selection.missing_factors,
            });
        }
        if selection.picks.is_empty() {
            if selection.held_back == 0 {
                debug!("{}: nothing eligible, holding", date);
                state.issues.push(DataIssue::EmptyUniverse { date });
            }
            state.portfolio.record_equity(date);
            return;
        }

        let chosen: BTreeSet<&str> = selection.picks.iter().map(|s| s.code.as_str()).collect();
        for code in state.portfolio.held_codes() {
            if !chosen.contains(code.as_str())
                && self.exit(state, &code, date, ExitReason::Deselected, FillReason::Deselected)
            {
                exited.insert(code);
            }
        }

        let equity = state.portfolio.equity();
        let target_value = equity * params.position_fraction / params.holding_count.max(1) as f64;
        let store = self.signals.store();
        for pick in &selection.picks {
            if state.portfolio.has_position(&pick.code) || exited.contains(&pick.code) {
                continue;
            }
            let Some(price) = store.price(&pick.code, date) else {
                continue;
            };
            match execution::buy(
                &mut state.portfolio,
                &pick.code,
                price,
                date,
                target_value,
                &self.config.execution,
            ) {
                EntryResult::Entered { .. } => {}
                EntryResult::BelowOneLot => {
                    debug!("{}: {} target below one lot at {}", date, pick.code, price);
                }
                EntryResult::InsufficientCash => {
                    debug!("{}: {} skipped, cash exhausted", date, pick.code);
                }
            }
        }

        state.portfolio.record_equity(date);
    }

    /// Value every holding at the day's close, or at its last known close
    /// when the instrument did not trade.
    fn mark_holdings(&self, state: &mut RunState, date: NaiveDate) {
        let store = self.signals.store();
        for position in state.portfolio.positions.values_mut() {
            if let Some(price) = store.price(&position.code, date) {
                position.mark(date, price);
                continue;
            }
            if let Some((carried_from, carried_close)) = store.last_close(&position.code, date) {
                position.mark(carried_from, carried_close);
                debug!(
                    "{}: {} has no price, carrying {} from {}",
                    date, position.code, carried_close, carried_from
                );
                state.issues.push(DataIssue::HeldPriceGap {
                    code: position.code.clone(),
                    date,
                    carried_from,
                    carried_close,
                });
            }
        }
    }

    /// Returns the codes sold, which may not be re-bought today.
    fn exit_stops_and_deferred(
        &self,
        state: &mut RunState,
        params: &ParameterSet,
        date: NaiveDate,
    ) -> BTreeSet<String> {
        let store = self.signals.store();
        let mut exited = BTreeSet::new();

        for code in state.portfolio.held_codes() {
            let Some(position) = state.portfolio.positions.get_mut(&code) else {
                continue;
            };
            let price = store.price(&code, date);

            if let Some(reason) = position.pending_exit {
                if let Some(price) = price {
                    execution::sell(
                        &mut state.portfolio,
                        &code,
                        price,
                        date,
                        reason,
                        FillReason::DeferredExit,
                        &self.config.execution,
                    );
                    exited.insert(code);
                }
                continue;
            }

            let check_price = price.unwrap_or(position.mark_price);
            if !position.should_stop_loss(check_price, params.stop_loss_fraction) {
                continue;
            }
            match price {
                Some(price) => {
                    debug!("{}: stop-loss on {} at {}", date, code, price);
                    execution::sell(
                        &mut state.portfolio,
                        &code,
                        price,
                        date,
                        ExitReason::StopLoss,
                        FillReason::StopLoss,
                        &self.config.execution,
                    );
                    exited.insert(code);
                }
                None => position.pending_exit = Some(ExitReason::StopLoss),
            }
        }

        exited
    }

    /// Sell at today's close, or defer the sale when there is none. Returns
    /// whether a sale happened.
    fn exit(
        &self,
        state: &mut RunState,
        code: &str,
        date: NaiveDate,
        reason: ExitReason,
        fill_reason: FillReason,
    ) -> bool {
        match self.signals.store().price(code, date) {
            Some(price) => execution::sell(
                &mut state.portfolio,
                code,
                price,
                date,
                reason,
                fill_reason,
                &self.config.execution,
            )
            .is_some(),
            None => {
                if let Some(position) = state.portfolio.positions.get_mut(code) {
                    position.pending_exit.get_or_insert(reason);
                }
                false
            }
        }
    }
}
