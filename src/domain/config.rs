//! Run configuration: parsed from a [`ConfigPort`] and validated up front.
//!
//! Nothing is loaded or simulated until [`RunConfig::from_config`] succeeds.

use crate::domain::error::WfoError;
use crate::domain::execution::ExecutionConfig;
use crate::domain::metrics::MetricsConfig;
use crate::domain::parameters::{Axis, ParameterSpace};
use crate::domain::price_bar::parse_trade_date;
use crate::domain::schedule::{Span, WindowConfig};
use crate::domain::search::{SearchBudget, SearchConfig, SearchMode};
use crate::domain::signal::SignalConfig;
use crate::domain::simulator::SimulationConfig;
use crate::ports::config_port::ConfigPort;
use chrono::{Days, NaiveDate};
use rand::distributions::uniform::SampleUniform;
use std::collections::BTreeMap;
use std::fmt::Display;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

#[derive(Debug, Clone, PartialEq)]
pub enum DataSource {
    Csv {
        prices: PathBuf,
        factors: Option<PathBuf>,
    },
    Sqlite {
        path: PathBuf,
        pool_size: u32,
        factor_tables: Vec<String>,
    },
}

#[derive(Debug, Clone, PartialEq)]
pub struct DataConfig {
    pub source: DataSource,
    pub max_factor_staleness: usize,
    /// Calendar days loaded ahead of the first window so regime averages and
    /// factor lookups have history from day one.
    pub warmup_days: u64,
}

#[derive(Debug, Clone, PartialEq)]
pub struct RunConfig {
    pub data: DataConfig,
    pub window: WindowConfig,
    pub simulation: SimulationConfig,
    pub metrics: MetricsConfig,
    pub signal: SignalConfig,
    pub search: SearchConfig,
    pub space: ParameterSpace,
    pub drawdown_penalty: f64,
}

impl RunConfig {
    pub fn from_config(config: &dyn ConfigPort) -> Result<Self, WfoError> {
        let run = RunConfig {
            data: read_data(config)?,
            window: read_window(config)?,
            simulation: SimulationConfig {
                initial_capital: read_f64(config, "backtest", "initial_capital", 1_000_000.0)?,
                execution: ExecutionConfig {
                    lot_size: read_u64(config, "backtest", "lot_size", 100)?,
                    friction_pct: read_f64(config, "backtest", "friction_pct", 0.0)?,
                },
            },
            metrics: MetricsConfig {
                trading_days_per_year: read_f64(
                    config,
                    "backtest",
                    "trading_days_per_year",
                    252.0,
                )?,
                risk_free_rate: read_f64(config, "backtest", "risk_free_rate", 0.03)?,
            },
            signal: SignalConfig {
                regime_ma_window: read_usize(config, "signal", "regime_ma_window", 20)?,
                regime_filter: read_bool(config, "signal", "regime_filter", true)?,
                min_factor_count: read_usize(config, "signal", "min_factor_count", 1)?,
                min_price: read_f64(config, "signal", "min_price", 0.0)?,
            },
            search: read_search(config)?,
            space: read_space(config)?,
            drawdown_penalty: read_f64(config, "search", "drawdown_penalty", 0.5)?,
        };
        run.validate()?;
        Ok(run)
    }

    pub fn validate(&self) -> Result<(), WfoError> {
        validate_backtest(self)?;
        validate_window(&self.window)?;
        validate_signal(&self.signal)?;
        validate_search(self)?;
        Ok(())
    }

    pub fn start(&self) -> NaiveDate {
        self.window.start
    }

    pub fn end(&self) -> NaiveDate {
        self.window.end
    }

    /// First date to load, `warmup_days` before the run starts.
    pub fn load_start(&self) -> NaiveDate {
        self.window
            .start
            .checked_sub_days(Days::new(self.data.warmup_days))
            .unwrap_or(NaiveDate::MIN)
    }

    /// Candidates each window will evaluate, before any time limit.
    pub fn candidates_per_window(&self) -> usize {
        let generated = match self.search.mode {
            SearchMode::Grid => self.space.grid_size().unwrap_or(usize::MAX),
            SearchMode::Random { samples } => samples,
        };
        self.search
            .budget
            .max_candidates
            .map_or(generated, |max| generated.min(max))
    }
}

fn read_data(config: &dyn ConfigPort) -> Result<DataConfig, WfoError> {
    let source = match config
        .get_string("data", "source")
        .unwrap_or_else(|| "csv".to_string())
        .to_lowercase()
        .as_str()
    {
        "csv" => DataSource::Csv {
            prices: config
                .get_string("data", "prices_csv")
                .map(PathBuf::from)
                .ok_or_else(|| WfoError::missing("data", "prices_csv"))?,
            factors: config.get_string("data", "factors_csv").map(PathBuf::from),
        },
        "sqlite" => DataSource::Sqlite {
            path: config
                .get_string("sqlite", "path")
                .map(PathBuf::from)
                .ok_or_else(|| WfoError::missing("sqlite", "path"))?,
            pool_size: read_positive::<u32>(config, "sqlite", "pool_size", 4)?,
            factor_tables: config
                .get_string("sqlite", "factor_tables")
                .unwrap_or_else(|| "stock_factors".to_string())
                .split(',')
                .map(|t| t.trim().to_string())
                .filter(|t| !t.is_empty())
                .collect(),
        },
        other => {
            return Err(WfoError::invalid(
                "data",
                "source",
                format!("unknown source '{}', expected csv or sqlite", other),
            ));
        }
    };

    Ok(DataConfig {
        source,
        max_factor_staleness: read_usize(config, "data", "max_factor_staleness", 5)?,
        warmup_days: read_u64(config, "data", "warmup_days", 60)?,
    })
}

fn read_window(config: &dyn ConfigPort) -> Result<WindowConfig, WfoError> {
    Ok(WindowConfig {
        start: read_date(config, "backtest", "start_date")?,
        end: read_date(config, "backtest", "end_date")?,
        train: read_span(config, "train", Span::Years(2))?,
        test: read_span(config, "test", Span::Years(1))?,
        roll: read_span(config, "roll", Span::Years(1))?,
        min_trading_days: read_usize(config, "walk_forward", "min_trading_days", 100)?,
    })
}

fn read_search(config: &dyn ConfigPort) -> Result<SearchConfig, WfoError> {
    let mode = match config
        .get_string("search", "mode")
        .unwrap_or_else(|| "grid".to_string())
        .to_lowercase()
        .as_str()
    {
        "grid" => SearchMode::Grid,
        "random" => SearchMode::Random {
            samples: read_usize(config, "search", "samples", 100)?,
        },
        other => {
            return Err(WfoError::invalid(
                "search",
                "mode",
                format!("unknown mode '{}', expected grid or random", other),
            ));
        }
    };

    let max_candidates = match config.get_string("search", "max_candidates") {
        Some(_) => Some(read_usize(config, "search", "max_candidates", 0)?),
        None => None,
    };
    let time_limit = match config.get_string("search", "time_limit_secs") {
        Some(_) => {
            let secs = read_f64(config, "search", "time_limit_secs", 0.0)?;
            Some(Duration::try_from_secs_f64(secs).map_err(|_| {
                WfoError::invalid(
                    "search",
                    "time_limit_secs",
                    "must be a non-negative number of seconds",
                )
            })?)
        }
        None => None,
    };

    Ok(SearchConfig {
        mode,
        budget: SearchBudget {
            max_candidates,
            time_limit,
        },
        seed: read_u64(config, "search", "seed", 42)?,
        downside_penalty: read_f64(config, "search", "downside_penalty", 0.5)?,
    })
}

fn read_space(config: &dyn ConfigPort) -> Result<ParameterSpace, WfoError> {
    let mut factor_weights = BTreeMap::new();
    for name in config.keys("weights") {
        factor_weights.insert(name.clone(), read_axis::<f64>(config, "weights", &name)?);
    }

    Ok(ParameterSpace {
        position_fraction: read_axis(config, "parameters", "position_fraction")?,
        stop_loss_fraction: read_axis(config, "parameters", "stop_loss_fraction")?,
        holding_count: read_axis(config, "parameters", "holding_count")?,
        rebalance_interval_days: read_axis(config, "parameters", "rebalance_interval_days")?,
        factor_weights,
    })
}

fn read_axis<T>(config: &dyn ConfigPort, section: &str, key: &str) -> Result<Axis<T>, WfoError>
where
    T: Copy + PartialOrd + FromStr + SampleUniform,
    T::Err: Display,
{
    let raw = config
        .get_string(section, key)
        .ok_or_else(|| WfoError::missing(section, key))?;
    Axis::parse(&raw).map_err(|reason| WfoError::invalid(section, key, reason))
}

fn read_span(config: &dyn ConfigPort, key: &str, default: Span) -> Result<Span, WfoError> {
    match config.get_string("walk_forward", key) {
        Some(raw) => {
            Span::parse(&raw).map_err(|reason| WfoError::invalid("walk_forward", key, reason))
        }
        None => Ok(default),
    }
}

fn read_date(config: &dyn ConfigPort, section: &str, key: &str) -> Result<NaiveDate, WfoError> {
    let raw = config
        .get_string(section, key)
        .ok_or_else(|| WfoError::missing(section, key))?;
    parse_trade_date(&raw).ok_or_else(|| {
        WfoError::invalid(
            section,
            key,
            format!("'{}' is not a date, expected YYYY-MM-DD or YYYYMMDD", raw),
        )
    })
}

fn read_f64(
    config: &dyn ConfigPort,
    section: &str,
    key: &str,
    default: f64,
) -> Result<f64, WfoError> {
    let value = config
        .get_double(section, key)
        .map_err(|reason| WfoError::invalid(section, key, reason))?
        .unwrap_or(default);
    if !value.is_finite() {
        return Err(WfoError::invalid(section, key, "must be finite"));
    }
    Ok(value)
}

fn read_bool(
    config: &dyn ConfigPort,
    section: &str,
    key: &str,
    default: bool,
) -> Result<bool, WfoError> {
    Ok(config
        .get_bool(section, key)
        .map_err(|reason| WfoError::invalid(section, key, reason))?
        .unwrap_or(default))
}

fn read_int<T: TryFrom<i64>>(
    config: &dyn ConfigPort,
    section: &str,
    key: &str,
    default: T,
) -> Result<T, WfoError> {
    match config
        .get_int(section, key)
        .map_err(|reason| WfoError::invalid(section, key, reason))?
    {
        Some(value) => T::try_from(value)
            .map_err(|_| WfoError::invalid(section, key, format!("{} is out of range", value))),
        None => Ok(default),
    }
}

fn read_usize(
    config: &dyn ConfigPort,
    section: &str,
    key: &str,
    default: usize,
) -> Result<usize, WfoError> {
    read_int(config, section, key, default)
}

fn read_u64(
    config: &dyn ConfigPort,
    section: &str,
    key: &str,
    default: u64,
) -> Result<u64, WfoError> {
    read_int(config, section, key, default)
}

fn read_positive<T>(
    config: &dyn ConfigPort,
    section: &str,
    key: &str,
    default: T,
) -> Result<T, WfoError>
where
    T: TryFrom<i64> + PartialOrd + Default,
{
    let value = read_int(config, section, key, default)?;
    if value <= T::default() {
        return Err(WfoError::invalid(section, key, "must be positive"));
    }
    Ok(value)
}

fn validate_backtest(run: &RunConfig) -> Result<(), WfoError> {
    if run.simulation.initial_capital <= 0.0 {
        return Err(WfoError::invalid("backtest", "initial_capital", "must be positive"));
    }
    if run.simulation.execution.lot_size == 0 {
        return Err(WfoError::invalid("backtest", "lot_size", "must be at least 1"));
    }
    let friction = run.simulation.execution.friction_pct;
    if !(0.0..100.0).contains(&friction) {
        return Err(WfoError::invalid("backtest", "friction_pct", "must be in [0, 100)"));
    }
    if run.metrics.trading_days_per_year <= 0.0 {
        return Err(WfoError::invalid("backtest", "trading_days_per_year", "must be positive"));
    }
    if !(0.0..1.0).contains(&run.metrics.risk_free_rate) {
        return Err(WfoError::invalid("backtest", "risk_free_rate", "must be in [0, 1)"));
    }
    Ok(())
}

fn validate_window(window: &WindowConfig) -> Result<(), WfoError> {
    if window.start >= window.end {
        return Err(WfoError::invalid(
            "backtest",
            "start_date",
            "start_date must be before end_date",
        ));
    }
    if window.min_trading_days == 0 {
        return Err(WfoError::invalid("walk_forward", "min_trading_days", "must be at least 1"));
    }
    Ok(())
}

fn validate_signal(signal: &SignalConfig) -> Result<(), WfoError> {
    if signal.regime_ma_window == 0 {
        return Err(WfoError::invalid("signal", "regime_ma_window", "must be at least 1"));
    }
    if signal.min_price < 0.0 {
        return Err(WfoError::invalid("signal", "min_price", "must be non-negative"));
    }
    Ok(())
}

fn validate_search(run: &RunConfig) -> Result<(), WfoError> {
    run.space.validate()?;

    match run.search.mode {
        SearchMode::Grid if run.space.grid_size().is_none() => {
            return Err(WfoError::invalid(
                "search",
                "mode",
                "grid search needs explicit values on every axis, not ranges",
            ));
        }
        SearchMode::Random { samples: 0 } => {
            return Err(WfoError::invalid("search", "samples", "must be at least 1"));
        }
        _ => {}
    }
    if run.search.budget.max_candidates == Some(0) {
        return Err(WfoError::invalid("search", "max_candidates", "must be at least 1"));
    }
    if run.search.downside_penalty < 0.0 {
        return Err(WfoError::invalid("search", "downside_penalty", "must be non-negative"));
    }
    if run.drawdown_penalty < 0.0 {
        return Err(WfoError::invalid("search", "drawdown_penalty", "must be non-negative"));
    }
    Ok(())
}
