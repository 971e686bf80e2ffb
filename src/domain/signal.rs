//! Selection scores and the market regime signal.
//!
//! The regime is a breadth proxy: the cross-sectional median close compared
//! with its own trailing moving average. It is precomputed once per store for
//! the whole calendar because it does not depend on strategy parameters.

use crate::domain::factor::normalize_factor;
use crate::domain::market_data::MarketDataStore;
use crate::domain::parameters::ParameterSet;
use chrono::NaiveDate;
use serde::Serialize;
use std::cmp::Ordering;
use std::collections::{BTreeMap, BTreeSet};

#[derive(Debug, Clone, PartialEq)]
pub struct SignalConfig {
    pub regime_ma_window: usize,
    pub regime_filter: bool,
    pub min_factor_count: usize,
    pub min_price: f64,
}

impl Default for SignalConfig {
    fn default() -> Self {
        SignalConfig {
            regime_ma_window: 20,
            regime_filter: true,
            min_factor_count: 1,
            min_price: 0.0,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Regime {
    Bull,
    Bear,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ScoredInstrument {
    pub code: String,
    pub score: f64,
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct Selection {
    /// Top instruments, best first.
    pub picks: Vec<ScoredInstrument>,
    /// Quoted instruments with a defined score.
    pub eligible: usize,
    /// Quoted instruments left out for lack of a usable factor snapshot.
    pub missing_factors: usize,
    /// Eligible instruments skipped because they were sold earlier the same day.
    pub held_back: usize,
}

pub struct SignalEngine<'a> {
    store: &'a MarketDataStore,
    config: SignalConfig,
    regimes: Vec<Regime>,
}

impl<'a> SignalEngine<'a> {
    pub fn new(store: &'a MarketDataStore, config: SignalConfig) -> Self {
        let regimes = if config.regime_filter {
            compute_regimes(store, config.regime_ma_window)
        } else {
            vec![Regime::Bull; store.calendar().len()]
        };
        Self {
            store,
            config,
            regimes,
        }
    }

    pub fn store(&self) -> &'a MarketDataStore {
        self.store
    }

    pub fn config(&self) -> &SignalConfig {
        &self.config
    }

    /// Regime on the latest trading date on or before `date`. Bull before the
    /// calendar starts.
    pub fn regime(&self, date: NaiveDate) -> Regime {
        match self.store.trading_days_through(date).checked_sub(1) {
            Some(idx) => self.regimes[idx],
            None => Regime::Bull,
        }
    }

    /// Weighted mean of normalized factors present for `code` as of `date`.
    ///
    /// Missing factors drop out of both numerator and denominator for this
    /// instrument only.
    pub fn score(
        &self,
        code: &str,
        date: NaiveDate,
        weights: &BTreeMap<String, f64>,
    ) -> Option<f64> {
        let snapshot = self.store.factors_as_of(code, date)?;

        let mut weighted = 0.0;
        let mut total_weight = 0.0;
        let mut present = 0usize;
        for (name, &weight) in weights {
            if weight == 0.0 {
                continue;
            }
            if let Some(value) = snapshot.get(name) {
                weighted += weight * normalize_factor(name, value);
                total_weight += weight.abs();
                present += 1;
            }
        }

        if present < self.config.min_factor_count.max(1) || total_weight <= 0.0 {
            return None;
        }
        Some(weighted / total_weight)
    }

    /// Top `holding_count` instruments quoted on `date`, best score first,
    /// ties broken by code ascending. Codes in `excluded` are skipped.
    pub fn select(
        &self,
        date: NaiveDate,
        params: &ParameterSet,
        excluded: &BTreeSet<String>,
    ) -> Selection {
        let mut scored = Vec::new();
        let mut missing_factors = 0usize;
        let mut held_back = 0usize;

        for code in self.store.universe(date) {
            match self.store.price(code, date) {
                Some(close) if close >= self.config.min_price => {}
                _ => continue,
            }
            let score = self.score(code, date, &params.factor_weights);
            if excluded.contains(code) {
                if score.is_some() {
                    held_back += 1;
                }
                continue;
            }
            match score {
                Some(score) => scored.push(ScoredInstrument {
                    code: code.to_string(),
                    score,
                }),
                None => missing_factors += 1,
            }
        }

        let eligible = scored.len();
        scored.sort_by(rank_order);
        scored.truncate(params.holding_count);

        Selection {
            picks: scored,
            eligible,
            missing_factors,
            held_back,
        }
    }
}

fn rank_order(a: &ScoredInstrument, b: &ScoredInstrument) -> Ordering {
    b.score
        .total_cmp(&a.score)
        .then_with(|| a.code.cmp(&b.code))
}

/// Bull when the median close is at or above its trailing `window`-date
/// average (current date included). Bull until a full window is available.
fn compute_regimes(store: &MarketDataStore, window: usize) -> Vec<Regime> {
    let window = window.max(1);
    let medians: Vec<Option<f64>> = store
        .calendar()
        .iter()
        .map(|&date| store.median_close(date))
        .collect();

    medians
        .iter()
        .enumerate()
        .map(|(i, current)| {
            let Some(current) = current else {
                return Regime::Bull;
            };
            if i + 1 < window {
                return Regime::Bull;
            }
            let trailing: Vec<f64> = medians[i + 1 - window..=i]
                .iter()
                .filter_map(|m| *m)
                .collect();
            if trailing.len() < window {
                return Regime::Bull;
            }
            let average = trailing.iter().sum::<f64>() / trailing.len() as f64;
            if *current >= average {
                Regime::Bull
            } else {
                Regime::Bear
            }
        })
        .collect()
}
