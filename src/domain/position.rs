//! Position tracking.

use chrono::NaiveDate;
use serde::Serialize;

/// A long holding. `shares` is always a multiple of the run's lot size.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Position {
    pub code: String,
    pub shares: u64,
    pub entry_price: f64,
    pub entry_date: NaiveDate,
    pub entry_friction: f64,
    /// Last valid close used to value the holding.
    pub mark_price: f64,
    pub mark_date: NaiveDate,
    /// Set when a sale was decided but no price existed to execute it.
    pub pending_exit: Option<ExitReason>,
}

impl Position {
    pub fn open(code: &str, shares: u64, price: f64, date: NaiveDate) -> Self {
        Position {
            code: code.to_string(),
            shares,
            entry_price: price,
            entry_date: date,
            entry_friction: 0.0,
            mark_price: price,
            mark_date: date,
            pending_exit: None,
        }
    }

    pub fn market_value(&self) -> f64 {
        self.shares as f64 * self.mark_price
    }

    pub fn mark(&mut self, date: NaiveDate, price: f64) {
        self.mark_date = date;
        self.mark_price = price;
    }

    pub fn unrealized_pnl(&self, price: f64) -> f64 {
        self.shares as f64 * (price - self.entry_price)
    }

    /// Loss relative to the original entry, never a trailing high.
    pub fn should_stop_loss(&self, price: f64, stop_loss_fraction: f64) -> bool {
        if self.entry_price <= 0.0 {
            return false;
        }
        (price - self.entry_price) / self.entry_price < -stop_loss_fraction
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ExitReason {
    Deselected,
    StopLoss,
    Regime,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ClosedTrade {
    pub code: String,
    pub shares: u64,
    pub entry_price: f64,
    pub exit_price: f64,
    pub entry_date: NaiveDate,
    pub exit_date: NaiveDate,
    pub pnl: f64,
    pub reason: ExitReason,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_position() -> Position {
        Position::open(
            "600036.SH",
            1000,
            50.0,
            NaiveDate::from_ymd_opt(2024, 1, 15).unwrap(),
        )
    }

    #[test]
    fn open_marks_at_entry() {
        let pos = sample_position();
        assert_eq!(pos.mark_price, 50.0);
        assert_eq!(pos.mark_date, pos.entry_date);
        assert!(pos.pending_exit.is_none());
        assert!((pos.market_value() - 50_000.0).abs() < f64::EPSILON);
    }

    #[test]
    fn market_value_follows_mark() {
        let mut pos = sample_position();
        pos.mark(NaiveDate::from_ymd_opt(2024, 1, 16).unwrap(), 55.0);
        assert!((pos.market_value() - 55_000.0).abs() < f64::EPSILON);
        assert!((pos.entry_price - 50.0).abs() < f64::EPSILON);
    }

    #[test]
    fn unrealized_pnl() {
        let pos = sample_position();
        assert!((pos.unrealized_pnl(55.0) - 5_000.0).abs() < f64::EPSILON);
        assert!((pos.unrealized_pnl(45.0) - (-5_000.0)).abs() < f64::EPSILON);
    }

    #[test]
    fn stop_loss_is_strict_and_relative_to_entry() {
        let pos = sample_position();
        // 10% loss does not breach a 10% stop; anything deeper does.
        assert!(!pos.should_stop_loss(45.0, 0.10));
        assert!(pos.should_stop_loss(44.9, 0.10));
        assert!(!pos.should_stop_loss(60.0, 0.10));
    }

    #[test]
    fn stop_loss_ignores_trailing_marks() {
        let mut pos = sample_position();
        pos.mark(NaiveDate::from_ymd_opt(2024, 2, 1).unwrap(), 80.0);
        assert!(!pos.should_stop_loss(48.0, 0.15));
    }
}
