//! Factor snapshots and factor normalization.
//!
//! Raw factors arrive on very different scales (a 20-day return around 0.05,
//! a price position in [0, 1], a Sharpe-like ratio around 1). Each factor name
//! belongs to a [`FactorFamily`] that maps the raw value onto a comparable
//! score contribution before weighting.

use chrono::NaiveDate;
use serde::Serialize;
use std::collections::BTreeMap;

/// Factor values of one instrument on one trade date. Sparse: a factor that
/// was not computed is simply absent from `values`.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FactorSnapshot {
    pub code: String,
    pub date: NaiveDate,
    pub values: BTreeMap<String, f64>,
}

impl FactorSnapshot {
    pub fn new(code: impl Into<String>, date: NaiveDate) -> Self {
        Self {
            code: code.into(),
            date,
            values: BTreeMap::new(),
        }
    }

    pub fn with(mut self, name: &str, value: f64) -> Self {
        self.values.insert(name.to_string(), value);
        self
    }

    /// Returns the factor only if present and finite.
    pub fn get(&self, name: &str) -> Option<f64> {
        self.values.get(name).copied().filter(|v| v.is_finite())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FactorFamily {
    Return,
    Volatility,
    PricePosition,
    MomentumAcceleration,
    SharpeLike,
    LowVolatilityScore,
    Drawdown,
    Other,
}

impl FactorFamily {
    pub fn of(name: &str) -> Self {
        if name.starts_with("ret_") {
            FactorFamily::Return
        } else if name.starts_with("vol_") {
            FactorFamily::Volatility
        } else if name.starts_with("price_pos_") {
            FactorFamily::PricePosition
        } else if name == "mom_accel" {
            FactorFamily::MomentumAcceleration
        } else if name == "sharpe_like" {
            FactorFamily::SharpeLike
        } else if name == "low_vol_score" {
            FactorFamily::LowVolatilityScore
        } else if name.starts_with("max_drawdown_") {
            FactorFamily::Drawdown
        } else {
            FactorFamily::Other
        }
    }

    pub fn normalize(self, value: f64) -> f64 {
        match self {
            FactorFamily::Return => value * 100.0,
            // Lower volatility scores higher.
            FactorFamily::Volatility => -value * 50.0,
            // Mid-range price positions score highest.
            FactorFamily::PricePosition => -(value - 0.5).abs() * 100.0,
            FactorFamily::MomentumAcceleration => value * 50.0,
            FactorFamily::SharpeLike => value * 20.0,
            FactorFamily::LowVolatilityScore => value * 30.0,
            FactorFamily::Drawdown => value * 30.0,
            FactorFamily::Other => value * 10.0,
        }
    }
}

pub fn normalize_factor(name: &str, value: f64) -> f64 {
    FactorFamily::of(name).normalize(value)
}
