//! Walk-forward window generation.
//!
//! Windows are laid out on the civil calendar from the configured spans and
//! then checked against the store's trading calendar. A window with too few
//! trading days in either half is dropped, never shortened.

use crate::domain::error::WindowTooShort;
use crate::domain::market_data::MarketDataStore;
use chrono::{Days, Months, NaiveDate};
use log::warn;
use serde::Serialize;
use std::fmt;

/// A calendar length such as `2y`, `6m` or `90d`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Span {
    Days(u32),
    Months(u32),
    Years(u32),
}

impl Span {
    pub fn parse(raw: &str) -> Result<Self, String> {
        let raw = raw.trim().to_ascii_lowercase();
        let Some(unit) = raw.chars().last() else {
            return Err("empty span".to_string());
        };
        let amount: u32 = raw[..raw.len() - unit.len_utf8()]
            .trim()
            .parse()
            .map_err(|_| format!("'{}' is not a span like 90d, 6m or 2y", raw))?;
        if amount == 0 {
            return Err(format!("span '{}' must be positive", raw));
        }
        match unit {
            'd' => Ok(Span::Days(amount)),
            'm' => Ok(Span::Months(amount)),
            'y' => Ok(Span::Years(amount)),
            _ => Err(format!("'{}' is not a span like 90d, 6m or 2y", raw)),
        }
    }

    /// `date` moved forward by this span, `None` past chrono's range.
    pub fn after(&self, date: NaiveDate) -> Option<NaiveDate> {
        match *self {
            Span::Days(n) => date.checked_add_days(Days::new(n.into())),
            Span::Months(n) => date.checked_add_months(Months::new(n)),
            Span::Years(n) => date.checked_add_months(Months::new(n.checked_mul(12)?)),
        }
    }
}

impl fmt::Display for Span {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Span::Days(n) => write!(f, "{}d", n),
            Span::Months(n) => write!(f, "{}m", n),
            Span::Years(n) => write!(f, "{}y", n),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct WindowConfig {
    pub start: NaiveDate,
    pub end: NaiveDate,
    pub train: Span,
    pub test: Span,
    pub roll: Span,
    pub min_trading_days: usize,
}

/// One (train, test) pair. Bounds are inclusive and `train_end < test_start`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct BacktestWindow {
    pub index: usize,
    pub train_start: NaiveDate,
    pub train_end: NaiveDate,
    pub test_start: NaiveDate,
    pub test_end: NaiveDate,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ScheduledWindow {
    pub window: BacktestWindow,
    pub train_days: usize,
    pub test_days: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DroppedWindow {
    pub window: BacktestWindow,
    pub reason: WindowTooShort,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize)]
pub struct Schedule {
    pub windows: Vec<ScheduledWindow>,
    pub dropped: Vec<DroppedWindow>,
}

/// Lay out windows from `config.start`, advancing by `roll` until the next
/// test half would end after `config.end`.
pub fn generate_windows(config: &WindowConfig) -> Vec<BacktestWindow> {
    let mut windows = Vec::new();
    let mut cursor = config.start;

    loop {
        let Some(window) = window_at(windows.len(), cursor, config) else {
            break;
        };
        if window.test_end > config.end {
            break;
        }
        windows.push(window);

        match config.roll.after(cursor) {
            Some(next) if next > cursor => cursor = next,
            _ => break,
        }
    }

    windows
}

fn window_at(
    index: usize,
    train_start: NaiveDate,
    config: &WindowConfig,
) -> Option<BacktestWindow> {
    let test_start = config.train.after(train_start)?;
    let train_end = test_start.pred_opt()?;
    let test_end = config.test.after(test_start)?.pred_opt()?;
    Some(BacktestWindow {
        index,
        train_start,
        train_end,
        test_start,
        test_end,
    })
}

/// Generate windows and split them by whether both halves hold at least
/// `min_trading_days` trading dates.
pub fn build_schedule(config: &WindowConfig, store: &MarketDataStore) -> Schedule {
    let mut schedule = Schedule::default();

    for window in generate_windows(config) {
        let train_days = store
            .trading_dates(window.train_start, window.train_end)
            .len();
        let test_days = store.trading_dates(window.test_start, window.test_end).len();

        if train_days < config.min_trading_days || test_days < config.min_trading_days {
            let reason = WindowTooShort {
                index: window.index,
                train_days,
                test_days,
                minimum: config.min_trading_days,
            };
            warn!("dropping {}", reason);
            schedule.dropped.push(DroppedWindow { window, reason });
        } else {
            schedule.windows.push(ScheduledWindow {
                window,
                train_days,
                test_days,
            });
        }
    }

    schedule
}
