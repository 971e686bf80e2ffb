//! Portfolio state and equity tracking.
//!
//! Positions are keyed by instrument code in a `BTreeMap` so that every pass
//! over the holdings, and therefore every floating-point sum, happens in the
//! same order on every run.

use chrono::NaiveDate;
use serde::Serialize;
use std::collections::BTreeMap;

use super::execution::Fill;
use super::position::{ClosedTrade, Position};

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EquityPoint {
    pub date: NaiveDate,
    pub equity: f64,
    pub cash: f64,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Portfolio {
    pub cash: f64,
    pub initial_capital: f64,
    pub positions: BTreeMap<String, Position>,
    pub closed_trades: Vec<ClosedTrade>,
    pub fills: Vec<Fill>,
    pub equity_curve: Vec<EquityPoint>,
}

impl Portfolio {
    pub fn new(initial_capital: f64) -> Self {
        Portfolio {
            cash: initial_capital,
            initial_capital,
            positions: BTreeMap::new(),
            closed_trades: Vec::new(),
            fills: Vec::new(),
            equity_curve: Vec::new(),
        }
    }

    pub fn add_position(&mut self, position: Position) {
        self.positions.insert(position.code.clone(), position);
    }

    pub fn get_position(&self, code: &str) -> Option<&Position> {
        self.positions.get(code)
    }

    pub fn has_position(&self, code: &str) -> bool {
        self.positions.contains_key(code)
    }

    pub fn remove_position(&mut self, code: &str) -> Option<Position> {
        self.positions.remove(code)
    }

    pub fn position_count(&self) -> usize {
        self.positions.len()
    }

    pub fn held_codes(&self) -> Vec<String> {
        self.positions.keys().cloned().collect()
    }

    pub fn record_trade(&mut self, trade: ClosedTrade) {
        self.closed_trades.push(trade);
    }

    pub fn record_fill(&mut self, fill: Fill) {
        self.fills.push(fill);
    }

    /// Cash plus every holding at its current mark.
    pub fn equity(&self) -> f64 {
        let position_value: f64 = self.positions.values().map(Position::market_value).sum();
        self.cash + position_value
    }

    pub fn record_equity(&mut self, date: NaiveDate) -> f64 {
        let equity = self.equity();
        self.equity_curve.push(EquityPoint {
            date,
            equity,
            cash: self.cash,
        });
        equity
    }
}
