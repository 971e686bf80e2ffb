//! Trade execution and fill simulation.
//!
//! Fills happen at the rebalance-date close. Quantities are whole lots, a
//! single friction rate (percent of traded value) applies to both sides, and
//! a buy never spends more cash than the portfolio holds.

use chrono::NaiveDate;
use serde::Serialize;

use super::portfolio::Portfolio;
use super::position::{ClosedTrade, ExitReason, Position};

#[derive(Debug, Clone, PartialEq)]
pub struct ExecutionConfig {
    pub lot_size: u64,
    pub friction_pct: f64,
}

impl Default for ExecutionConfig {
    fn default() -> Self {
        ExecutionConfig {
            lot_size: 100,
            friction_pct: 0.0,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Side {
    Buy,
    Sell,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FillReason {
    Selection,
    Deselected,
    StopLoss,
    Regime,
    DeferredExit,
}

impl From<ExitReason> for FillReason {
    fn from(reason: ExitReason) -> Self {
        match reason {
            ExitReason::Deselected => FillReason::Deselected,
            ExitReason::StopLoss => FillReason::StopLoss,
            ExitReason::Regime => FillReason::Regime,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Fill {
    pub date: NaiveDate,
    pub code: String,
    pub side: Side,
    pub shares: u64,
    pub price: f64,
    pub friction: f64,
    pub reason: FillReason,
}

/// friction = trade_value * friction_pct / 100
pub fn calculate_friction(trade_value: f64, config: &ExecutionConfig) -> f64 {
    trade_value * config.friction_pct / 100.0
}

/// floor(target_value / price / lot_size) * lot_size, saturating at the
/// largest whole-lot share count.
pub fn lot_quantity(target_value: f64, price: f64, lot_size: u64) -> u64 {
    if lot_size == 0 || !(price > 0.0) || !(target_value > 0.0) {
        return 0;
    }
    let lots = (target_value / price / lot_size as f64).floor();
    if !(lots.is_finite() && lots >= 1.0) {
        return 0;
    }
    (lots as u64)
        .checked_mul(lot_size)
        .unwrap_or(u64::MAX - u64::MAX % lot_size)
}

#[derive(Debug, Clone, PartialEq)]
pub enum EntryResult {
    Entered {
        shares: u64,
        cost: f64,
        friction: f64,
    },
    /// The target value is worth less than one lot.
    BelowOneLot,
    /// Not even one lot fits in the available cash.
    InsufficientCash,
}

/// Buy up to `target_value` of `code` at `price`, capped by available cash.
pub fn buy(
    portfolio: &mut Portfolio,
    code: &str,
    price: f64,
    date: NaiveDate,
    target_value: f64,
    config: &ExecutionConfig,
) -> EntryResult {
    let mut shares = lot_quantity(target_value, price, config.lot_size);
    if shares == 0 {
        return EntryResult::BelowOneLot;
    }

    let gross_price = price * (1.0 + config.friction_pct / 100.0);
    let affordable = lot_quantity(portfolio.cash, gross_price, config.lot_size);
    shares = shares.min(affordable);

    let (cost, friction) = loop {
        if shares == 0 {
            return EntryResult::InsufficientCash;
        }
        let cost = shares as f64 * price;
        let friction = calculate_friction(cost, config);
        if cost + friction <= portfolio.cash {
            break (cost, friction);
        }
        shares -= config.lot_size;
    };

    portfolio.cash -= cost + friction;

    let mut position = Position::open(code, shares, price, date);
    position.entry_friction = friction;
    portfolio.add_position(position);
    portfolio.record_fill(Fill {
        date,
        code: code.to_string(),
        side: Side::Buy,
        shares,
        price,
        friction,
        reason: FillReason::Selection,
    });

    EntryResult::Entered {
        shares,
        cost,
        friction,
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ExitResult {
    pub shares: u64,
    pub proceeds: f64,
    pub friction: f64,
    pub pnl: f64,
}

/// Sell the whole position in `code` at `price`.
///
/// P&L includes the friction paid on both legs of the round trip.
pub fn sell(
    portfolio: &mut Portfolio,
    code: &str,
    price: f64,
    date: NaiveDate,
    reason: ExitReason,
    fill_reason: FillReason,
    config: &ExecutionConfig,
) -> Option<ExitResult> {
    let position = portfolio.remove_position(code)?;

    let proceeds = position.shares as f64 * price;
    let friction = calculate_friction(proceeds, config);
    let pnl = position.unrealized_pnl(price) - position.entry_friction - friction;

    portfolio.cash += proceeds - friction;

    portfolio.record_fill(Fill {
        date,
        code: position.code.clone(),
        side: Side::Sell,
        shares: position.shares,
        price,
        friction,
        reason: fill_reason,
    });
    portfolio.record_trade(ClosedTrade {
        code: position.code,
        shares: position.shares,
        entry_price: position.entry_price,
        exit_price: price,
        entry_date: position.entry_date,
        exit_date: date,
        pnl,
        reason,
    });

    Some(ExitResult {
        shares: position.shares,
        proceeds,
        friction,
        pnl,
    })
}
