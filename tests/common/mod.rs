#![allow(dead_code)]

use chrono::{Datelike, Days, NaiveDate, Weekday};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::collections::BTreeMap;
use wfotrader::adapters::file_config_adapter::FileConfigAdapter;
use wfotrader::domain::config::RunConfig;
use wfotrader::domain::error::WfoError;
pub use wfotrader::domain::factor::FactorSnapshot;
use wfotrader::domain::parameters::ParameterSet;
pub use wfotrader::domain::price_bar::PriceBar;
use wfotrader::ports::data_port::DataPort;

pub struct MockDataPort {
    pub bars: Vec<PriceBar>,
    pub factors: Vec<FactorSnapshot>,
    pub error: Option<String>,
}

impl MockDataPort {
    pub fn new() -> Self {
        Self {
            bars: Vec::new(),
            factors: Vec::new(),
            error: None,
        }
    }

    pub fn with_bars(mut self, bars: Vec<PriceBar>) -> Self {
        self.bars.extend(bars);
        self
    }

    pub fn with_factors(mut self, factors: Vec<FactorSnapshot>) -> Self {
        self.factors.extend(factors);
        self
    }

    pub fn with_error(mut self, reason: &str) -> Self {
        self.error = Some(reason.to_string());
        self
    }

    fn check(&self) -> Result<(), WfoError> {
        match &self.error {
            Some(reason) => Err(WfoError::Data {
                reason: reason.clone(),
            }),
            None => Ok(()),
        }
    }
}

impl DataPort for MockDataPort {
    fn fetch_bars(
        &self,
        start_date: NaiveDate,
        end_date: NaiveDate,
    ) -> Result<Vec<PriceBar>, WfoError> {
        self.check()?;
        Ok(self
            .bars
            .iter()
            .filter(|b| b.date >= start_date && b.date <= end_date)
            .cloned()
            .collect())
    }

    fn fetch_factors(
        &self,
        start_date: NaiveDate,
        end_date: NaiveDate,
    ) -> Result<Vec<FactorSnapshot>, WfoError> {
        self.check()?;
        Ok(self
            .factors
            .iter()
            .filter(|s| s.date >= start_date && s.date <= end_date)
            .cloned()
            .collect())
    }

    fn list_instruments(&self) -> Result<Vec<String>, WfoError> {
        self.check()?;
        let mut codes: Vec<String> = self.bars.iter().map(|b| b.code.clone()).collect();
        codes.sort();
        codes.dedup();
        Ok(codes)
    }
}

pub fn date(y: i32, m: u32, d: u32) -> NaiveDate {
    NaiveDate::from_ymd_opt(y, m, d).unwrap()
}

pub fn make_bar(code: &str, date: NaiveDate, close: f64) -> PriceBar {
    PriceBar {
        code: code.to_string(),
        date,
        open: close,
        high: close * 1.01,
        low: close * 0.99,
        close,
        volume: 100_000.0,
    }
}

pub fn make_snapshot(code: &str, date: NaiveDate, factors: &[(&str, f64)]) -> FactorSnapshot {
    factors
        .iter()
        .fold(FactorSnapshot::new(code, date), |snap, (name, value)| {
            snap.with(name, *value)
        })
}

/// `count` consecutive weekdays starting at or after `start`.
pub fn weekdays(start: NaiveDate, count: usize) -> Vec<NaiveDate> {
    let mut dates = Vec::with_capacity(count);
    let mut day = start;
    while dates.len() < count {
        if !matches!(day.weekday(), Weekday::Sat | Weekday::Sun) {
            dates.push(day);
        }
        day = day + Days::new(1);
    }
    dates
}

/// Weekdays in `[start, end]`.
pub fn weekdays_between(start: NaiveDate, end: NaiveDate) -> Vec<NaiveDate> {
    start
        .iter_days()
        .take_while(|d| *d <= end)
        .filter(|d| !matches!(d.weekday(), Weekday::Sat | Weekday::Sun))
        .collect()
}

/// Seeded random-walk market. Each instrument gets its own drift; `ret_20`
/// and `vol_20` are computed from closes up to and including the bar date.
pub fn synthetic_market(
    codes: &[&str],
    dates: &[NaiveDate],
    seed: u64,
) -> (Vec<PriceBar>, Vec<FactorSnapshot>) {
    let mut rng = StdRng::seed_from_u64(seed);
    let mut bars = Vec::new();
    let mut factors = Vec::new();

    for (n, code) in codes.iter().enumerate() {
        let drift = (n as f64 - codes.len() as f64 / 2.0) * 0.0004;
        let mut close = 10.0 + n as f64 * 5.0;
        let mut closes = Vec::with_capacity(dates.len());

        for &day in dates {
            let shock: f64 = rng.gen_range(-0.02..0.02);
            close = (close * (1.0 + drift + shock)).max(0.5);
            closes.push(close);
            bars.push(make_bar(code, day, close));

            if closes.len() > 20 {
                let window = &closes[closes.len() - 21..];
                let ret = window[20] / window[0] - 1.0;
                let daily: Vec<f64> = window.windows(2).map(|w| w[1] / w[0] - 1.0).collect();
                let mean = daily.iter().sum::<f64>() / daily.len() as f64;
                let var =
                    daily.iter().map(|r| (r - mean).powi(2)).sum::<f64>() / daily.len() as f64;
                factors.push(make_snapshot(
                    code,
                    day,
                    &[("ret_20", ret), ("vol_20", var.sqrt())],
                ));
            }
        }
    }

    (bars, factors)
}

pub fn single_factor_params(holding_count: usize, interval: usize, stop: f64) -> ParameterSet {
    let mut factor_weights = BTreeMap::new();
    factor_weights.insert("ret_20".to_string(), 1.0);
    ParameterSet {
        position_fraction: 1.0,
        stop_loss_fraction: stop,
        holding_count,
        rebalance_interval_days: interval,
        factor_weights,
    }
}

pub fn run_config(ini: &str) -> RunConfig {
    let adapter = FileConfigAdapter::from_string(ini).unwrap();
    RunConfig::from_config(&adapter).unwrap()
}

/// Two-year run, 6-month train, 3-month test, 3-month roll, small grid.
pub const GRID_INI: &str = r#"
[data]
prices_csv = prices.csv
warmup_days = 60

[backtest]
start_date = 2021-01-01
end_date = 2022-12-31
initial_capital = 1000000
lot_size = 100
friction_pct = 0.1

[walk_forward]
train = 6m
test = 3m
roll = 3m
min_trading_days = 40

[signal]
regime_ma_window = 20

[search]
mode = grid
seed = 11

[parameters]
position_fraction = 0.5, 1.0
stop_loss_fraction = 0.1, 0.2
holding_count = 2
rebalance_interval_days = 5, 10

[weights]
ret_20 = 1.0, -1.0
vol_20 = 0.5
"#;
