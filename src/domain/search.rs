//! Parameter search over a training range.
//!
//! Candidates are generated up front, in a fixed order, then scored in
//! parallel. The reduction walks the scores in candidate order so the winner
//! does not depend on thread scheduling.

use crate::domain::error::WfoError;
use crate::domain::parameters::{ParameterSet, ParameterSpace};
use crate::domain::simulator::PortfolioSimulator;
use chrono::NaiveDate;
use log::info;
use rand::SeedableRng;
use rand::rngs::StdRng;
use rayon::prelude::*;
use serde::Serialize;
use std::time::{Duration, Instant};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "mode", rename_all = "snake_case")]
pub enum SearchMode {
    Grid,
    Random { samples: usize },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct SearchBudget {
    pub max_candidates: Option<usize>,
    pub time_limit: Option<Duration>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct SearchConfig {
    pub mode: SearchMode,
    pub budget: SearchBudget,
    pub seed: u64,
    pub downside_penalty: f64,
}

impl Default for SearchConfig {
    fn default() -> Self {
        SearchConfig {
            mode: SearchMode::Grid,
            budget: SearchBudget::default(),
            seed: 42,
            downside_penalty: 0.5,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CandidateScore {
    pub index: usize,
    pub score: f64,
    pub total_return: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SearchOutcome {
    pub best: ParameterSet,
    pub best_index: usize,
    pub best_score: f64,
    pub evaluated: usize,
    /// Some candidates were never scored because a budget ran out.
    pub budget_exhausted: bool,
    /// Scores of every evaluated candidate, in candidate order.
    pub trace: Vec<CandidateScore>,
}

/// mean(returns) - downside_penalty * (losing periods / periods).
pub fn score_returns(returns: &[f64], downside_penalty: f64) -> f64 {
    if returns.is_empty() {
        return 0.0;
    }
    let n = returns.len() as f64;
    let mean = returns.iter().sum::<f64>() / n;
    let losing = returns.iter().filter(|r| **r < 0.0).count() as f64;
    mean - downside_penalty * losing / n
}

/// Candidates for window `window_index`, truncated to `max_candidates`.
///
/// Returns the list and whether truncation cut it short. Random mode seeds
/// its generator with `seed + window_index`.
pub fn generate_candidates(
    space: &ParameterSpace,
    config: &SearchConfig,
    window_index: usize,
) -> Result<(Vec<ParameterSet>, bool), WfoError> {
    let limit = config.budget.max_candidates.unwrap_or(usize::MAX);

    let (candidates, full) = match config.mode {
        SearchMode::Grid => {
            let full = space.grid_size().unwrap_or(usize::MAX);
            (space.grid()?.take(limit).collect::<Vec<_>>(), full)
        }
        SearchMode::Random { samples } => {
            let mut rng = StdRng::seed_from_u64(config.seed.wrapping_add(window_index as u64));
            let mut candidates = Vec::with_capacity(samples.min(limit));
            for _ in 0..samples.min(limit) {
                match space.sample(&mut rng) {
                    Some(candidate) => candidates.push(candidate),
                    None => break,
                }
            }
            (candidates, samples)
        }
    };

    let truncated = candidates.len() < full;
    Ok((candidates, truncated))
}

/// Score every candidate on `[start, end]` and keep the best.
///
/// Returns `None` only for an empty candidate list. With a time limit,
/// candidates that start after the deadline are skipped; the first one is
/// always evaluated.
pub fn search(
    simulator: &PortfolioSimulator<'_>,
    candidates: &[ParameterSet],
    start: NaiveDate,
    end: NaiveDate,
    config: &SearchConfig,
) -> Option<SearchOutcome> {
    let started = Instant::now();
    let deadline = config.budget.time_limit.map(|limit| started + limit);

    let scores: Vec<Option<CandidateScore>> = candidates
        .par_iter()
        .enumerate()
        .map(|(index, params)| {
            if index > 0 && deadline.is_some_and(|d| Instant::now() >= d) {
                return None;
            }
            let result = simulator.run(params, start, end);
            Some(CandidateScore {
                index,
                score: score_returns(&result.period_returns(), config.downside_penalty),
                total_return: result.total_return(),
            })
        })
        .collect();

    let trace: Vec<CandidateScore> = scores.into_iter().flatten().collect();
    let mut best: Option<&CandidateScore> = None;
    for candidate in &trace {
        // Strictly greater, so ties keep the earliest candidate.
        if best.is_none_or(|b| candidate.score > b.score) {
            best = Some(candidate);
        }
    }
    let best = best?;

    let evaluated = trace.len();
    if evaluated < candidates.len() {
        info!(
            "time limit reached after {} of {} candidates",
            evaluated,
            candidates.len()
        );
    }

    Some(SearchOutcome {
        best: candidates[best.index].clone(),
        best_index: best.index,
        best_score: best.score,
        evaluated,
        budget_exhausted: evaluated < candidates.len(),
        trace,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::factor::FactorSnapshot;
    use crate::domain::market_data::MarketDataStore;
    use crate::domain::parameters::Axis;
    use crate::domain::price_bar::PriceBar;
    use crate::domain::signal::{SignalConfig, SignalEngine};
    use crate::domain::simulator::SimulationConfig;
    use std::collections::BTreeMap;

    fn d(day: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 3, day).unwrap()
    }

    fn sample_space() -> ParameterSpace {
        let mut factor_weights = BTreeMap::new();
        factor_weights.insert("ret_20".to_string(), Axis::Values(vec![1.0, -1.0]));
        ParameterSpace {
            position_fraction: Axis::Values(vec![0.5, 1.0]),
            stop_loss_fraction: Axis::Values(vec![0.1]),
            holding_count: Axis::Values(vec![1]),
            rebalance_interval_days: Axis::Values(vec![1]),
            factor_weights,
        }
    }

    /// "UP" rises every day, "DN" falls; `ret_20` says so.
    fn trending_store() -> MarketDataStore {
        let mut bars = Vec::new();
        let mut factors = Vec::new();
        for i in 0..10u32 {
            let up = 10.0 + i as f64 * 0.1;
            let dn = 10.0 - i as f64 * 0.05;
            for (code, close, ret) in [("UP", up, 0.05), ("DN", dn, -0.05)] {
                bars.push(PriceBar {
                    code: code.to_string(),
                    date: d(1 + i),
                    open: close,
                    high: close,
                    low: close,
                    close,
                    volume: 1.0,
                });
                factors.push(FactorSnapshot::new(code, d(1 + i)).with("ret_20", ret));
            }
        }
        MarketDataStore::new(bars, factors, 5)
    }

    #[test]
    fn score_penalizes_losing_periods() {
        assert!(score_returns(&[], 0.5).abs() < f64::EPSILON);
        let s = score_returns(&[0.02, -0.01, 0.02, 0.01], 0.5);
        assert!((s - (0.01 - 0.5 * 0.25)).abs() < 1e-12);
        let no_penalty = score_returns(&[0.02, -0.01], 0.0);
        assert!((no_penalty - 0.005).abs() < 1e-12);
    }

    #[test]
    fn grid_candidates_respect_max_candidates() {
        let space = sample_space();
        let config = SearchConfig {
            budget: SearchBudget {
                max_candidates: Some(3),
                time_limit: None,
            },
            ..SearchConfig::default()
        };
        let (candidates, truncated) = generate_candidates(&space, &config, 0).unwrap();
        assert_eq!(candidates.len(), 3);
        assert!(truncated);

        let (all, truncated) = generate_candidates(&space, &SearchConfig::default(), 0).unwrap();
        assert_eq!(all.len(), 4);
        assert!(!truncated);
        assert_eq!(&all[..3], &candidates[..]);
    }

    #[test]
    fn random_candidates_depend_on_seed_and_window() {
        let mut space = sample_space();
        space.position_fraction = Axis::Range { min: 0.2, max: 1.0 };
        let config = SearchConfig {
            mode: SearchMode::Random { samples: 8 },
            ..SearchConfig::default()
        };
        let (a, _) = generate_candidates(&space, &config, 0).unwrap();
        let (b, _) = generate_candidates(&space, &config, 0).unwrap();
        let (c, _) = generate_candidates(&space, &config, 1).unwrap();
        assert_eq!(a.len(), 8);
        assert_eq!(a, b);
        assert_ne!(a, c);
    }

    #[test]
    fn grid_mode_rejects_range_axes() {
        let mut space = sample_space();
        space.position_fraction = Axis::Range { min: 0.2, max: 1.0 };
        assert!(generate_candidates(&space, &SearchConfig::default(), 0).is_err());
    }

    #[test]
    fn search_prefers_the_rising_instrument() {
        let store = trending_store();
        let signals = SignalEngine::new(
            &store,
            SignalConfig {
                regime_filter: false,
                ..SignalConfig::default()
            },
        );
        let sim_config = SimulationConfig::default();
        let simulator = PortfolioSimulator::new(&signals, &sim_config);
        let config = SearchConfig::default();
        let (candidates, _) = generate_candidates(&sample_space(), &config, 0).unwrap();

        let outcome = search(&simulator, &candidates, d(1), d(10), &config).unwrap();
        assert_eq!(outcome.evaluated, 4);
        assert!(!outcome.budget_exhausted);
        assert!((outcome.best.factor_weights["ret_20"] - 1.0).abs() < f64::EPSILON);
        assert!((outcome.best.position_fraction - 1.0).abs() < f64::EPSILON);
        assert_eq!(outcome.trace.len(), 4);
        for (i, entry) in outcome.trace.iter().enumerate() {
            assert_eq!(entry.index, i);
        }
    }

    #[test]
    fn ties_keep_the_earliest_candidate() {
        let store = trending_store();
        let signals = SignalEngine::new(&store, SignalConfig::default());
        let sim_config = SimulationConfig::default();
        let simulator = PortfolioSimulator::new(&signals, &sim_config);
        let config = SearchConfig::default();
        let (mut candidates, _) = generate_candidates(&sample_space(), &config, 0).unwrap();
        let first = candidates[0].clone();
        candidates.truncate(1);
        candidates.push(first);

        let outcome = search(&simulator, &candidates, d(1), d(10), &config).unwrap();
        assert_eq!(outcome.best_index, 0);
    }

    #[test]
    fn search_empty_candidates() {
        let store = trending_store();
        let signals = SignalEngine::new(&store, SignalConfig::default());
        let sim_config = SimulationConfig::default();
        let simulator = PortfolioSimulator::new(&signals, &sim_config);
        assert!(search(&simulator, &[], d(1), d(10), &SearchConfig::default()).is_none());
    }

    #[test]
    fn zero_time_limit_still_evaluates_first_candidate() {
        let store = trending_store();
        let signals = SignalEngine::new(&store, SignalConfig::default());
        let sim_config = SimulationConfig::default();
        let simulator = PortfolioSimulator::new(&signals, &sim_config);
        let config = SearchConfig {
            budget: SearchBudget {
                max_candidates: None,
                time_limit: Some(Duration::ZERO),
            },
            ..SearchConfig::default()
        };
        let (candidates, _) = generate_candidates(&sample_space(), &config, 0).unwrap();
        let outcome = search(&simulator, &candidates, d(1), d(10), &config).unwrap();
        assert!(outcome.evaluated >= 1);
        assert_eq!(outcome.trace[0].index, 0);
    }
}
