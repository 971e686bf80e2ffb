//! Strategy parameters and the space they are searched over.

use crate::domain::error::WfoError;
use rand::Rng;
use rand::distributions::uniform::SampleUniform;
use serde::Serialize;
use std::collections::BTreeMap;
use std::fmt::Display;
use std::str::FromStr;

/// One candidate strategy configuration.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ParameterSet {
    pub position_fraction: f64,
    pub stop_loss_fraction: f64,
    pub holding_count: usize,
    pub rebalance_interval_days: usize,
    pub factor_weights: BTreeMap<String, f64>,
}

impl ParameterSet {
    pub fn validate(&self) -> Result<(), WfoError> {
        check_position_fraction(self.position_fraction)?;
        check_stop_loss_fraction(self.stop_loss_fraction)?;
        check_at_least_one(self.holding_count, "holding_count")?;
        check_at_least_one(self.rebalance_interval_days, "rebalance_interval_days")?;
        if self.factor_weights.is_empty() {
            return Err(WfoError::invalid("weights", "*", "at least one factor weight is required"));
        }
        for (name, weight) in &self.factor_weights {
            check_weight(name, *weight)?;
        }
        Ok(())
    }
}

/// Either an explicit list of values or an inclusive range.
///
/// Ranges can only be sampled; an exhaustive grid needs explicit values.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Axis<T> {
    Values(Vec<T>),
    Range { min: T, max: T },
}

impl<T> Axis<T>
where
    T: Copy + PartialOrd + FromStr + SampleUniform,
{
    /// Parses `"a, b, c"` or `"min..max"`.
    pub fn parse(raw: &str) -> Result<Self, String>
    where
        T::Err: Display,
    {
        let raw = raw.trim();
        if let Some((lo, hi)) = raw.split_once("..") {
            let min = parse_value::<T>(lo)?;
            let max = parse_value::<T>(hi)?;
            if min > max {
                return Err(format!("range minimum exceeds maximum in '{}'", raw));
            }
            return Ok(Axis::Range { min, max });
        }

        let values = raw
            .split(',')
            .map(parse_value::<T>)
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Axis::Values(values))
    }

    /// Number of discrete values, `None` for a range.
    pub fn len(&self) -> Option<usize> {
        match self {
            Axis::Values(values) => Some(values.len()),
            Axis::Range { .. } => None,
        }
    }

    pub fn is_empty(&self) -> bool {
        matches!(self, Axis::Values(values) if values.is_empty())
    }

    pub fn value_at(&self, index: usize) -> Option<T> {
        match self {
            Axis::Values(values) => values.get(index).copied(),
            Axis::Range { .. } => None,
        }
    }

    pub fn sample<R: Rng + ?Sized>(&self, rng: &mut R) -> Option<T> {
        match self {
            Axis::Values(values) if values.is_empty() => None,
            Axis::Values(values) => Some(values[rng.gen_range(0..values.len())]),
            Axis::Range { min, max } => Some(rng.gen_range(*min..=*max)),
        }
    }

    /// Values a check must hold for: every listed value, or both range ends.
    fn bounds(&self) -> Vec<T> {
        match self {
            Axis::Values(values) => values.clone(),
            Axis::Range { min, max } => vec![*min, *max],
        }
    }
}

fn parse_value<T: FromStr>(raw: &str) -> Result<T, String>
where
    T::Err: Display,
{
    let raw = raw.trim();
    raw.parse::<T>()
        .map_err(|e| format!("'{}' is not a valid value: {}", raw, e))
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ParameterSpace {
    pub position_fraction: Axis<f64>,
    pub stop_loss_fraction: Axis<f64>,
    pub holding_count: Axis<usize>,
    pub rebalance_interval_days: Axis<usize>,
    pub factor_weights: BTreeMap<String, Axis<f64>>,
}

impl ParameterSpace {
    /// Every value a candidate could take must itself be a valid parameter.
    pub fn validate(&self) -> Result<(), WfoError> {
        check_axis(&self.position_fraction, "parameters", "position_fraction")?;
        check_axis(&self.stop_loss_fraction, "parameters", "stop_loss_fraction")?;
        check_axis(&self.holding_count, "parameters", "holding_count")?;
        check_axis(&self.rebalance_interval_days, "parameters", "rebalance_interval_days")?;

        for v in self.position_fraction.bounds() {
            check_position_fraction(v)?;
        }
        for v in self.stop_loss_fraction.bounds() {
            check_stop_loss_fraction(v)?;
        }
        for v in self.holding_count.bounds() {
            check_at_least_one(v, "holding_count")?;
        }
        for v in self.rebalance_interval_days.bounds() {
            check_at_least_one(v, "rebalance_interval_days")?;
        }

        if self.factor_weights.is_empty() {
            return Err(WfoError::invalid("weights", "*", "at least one factor weight is required"));
        }
        for (name, axis) in &self.factor_weights {
            check_axis(axis, "weights", name)?;
            for v in axis.bounds() {
                check_weight(name, v)?;
            }
        }
        Ok(())
    }

    /// Grid size, `None` when an axis is a range or the product overflows.
    pub fn grid_size(&self) -> Option<usize> {
        self.radices()?
            .into_iter()
            .try_fold(1usize, |acc, n| acc.checked_mul(n))
    }

    /// Lexicographic walk over every combination, last weight varying fastest.
    pub fn grid(&self) -> Result<GridIter<'_>, WfoError> {
        let radices = self.radices().ok_or_else(|| {
            WfoError::invalid(
                "search",
                "mode",
                "grid search needs explicit values on every axis, not ranges",
            )
        })?;
        let exhausted = radices.iter().any(|&n| n == 0);
        Ok(GridIter {
            space: self,
            counters: vec![0; radices.len()],
            radices,
            exhausted,
        })
    }

    /// One independent draw per axis.
    pub fn sample<R: Rng + ?Sized>(&self, rng: &mut R) -> Option<ParameterSet> {
        let position_fraction = self.position_fraction.sample(rng)?;
        let stop_loss_fraction = self.stop_loss_fraction.sample(rng)?;
        let holding_count = self.holding_count.sample(rng)?;
        let rebalance_interval_days = self.rebalance_interval_days.sample(rng)?;
        let mut factor_weights = BTreeMap::new();
        for (name, axis) in &self.factor_weights {
            factor_weights.insert(name.clone(), axis.sample(rng)?);
        }
        Some(ParameterSet {
            position_fraction,
            stop_loss_fraction,
            holding_count,
            rebalance_interval_days,
            factor_weights,
        })
    }

    fn radices(&self) -> Option<Vec<usize>> {
        let mut radices = vec![
            self.position_fraction.len()?,
            self.stop_loss_fraction.len()?,
            self.holding_count.len()?,
            self.rebalance_interval_days.len()?,
        ];
        for axis in self.factor_weights.values() {
            radices.push(axis.len()?);
        }
        Some(radices)
    }

    fn at(&self, counters: &[usize]) -> Option<ParameterSet> {
        let mut factor_weights = BTreeMap::new();
        for (i, (name, axis)) in self.factor_weights.iter().enumerate() {
            factor_weights.insert(name.clone(), axis.value_at(counters[4 + i])?);
        }
        Some(ParameterSet {
            position_fraction: self.position_fraction.value_at(counters[0])?,
            stop_loss_fraction: self.stop_loss_fraction.value_at(counters[1])?,
            holding_count: self.holding_count.value_at(counters[2])?,
            rebalance_interval_days: self.rebalance_interval_days.value_at(counters[3])?,
            factor_weights,
        })
    }
}

pub struct GridIter<'a> {
    space: &'a ParameterSpace,
    counters: Vec<usize>,
    radices: Vec<usize>,
    exhausted: bool,
}

impl Iterator for GridIter<'_> {
    type Item = ParameterSet;

    fn next(&mut self) -> Option<ParameterSet> {
        if self.exhausted {
            return None;
        }
        let current = self.space.at(&self.counters);

        // Odometer step.
        self.exhausted = true;
        for i in (0..self.counters.len()).rev() {
            self.counters[i] += 1;
            if self.counters[i] < self.radices[i] {
                self.exhausted = false;
                break;
            }
            self.counters[i] = 0;
        }

        current
    }
}

fn check_axis<T>(axis: &Axis<T>, section: &str, key: &str) -> Result<(), WfoError>
where
    T: Copy + PartialOrd + FromStr + SampleUniform,
{
    if axis.is_empty() {
        return Err(WfoError::invalid(section, key, "no values given"));
    }
    Ok(())
}

fn check_position_fraction(v: f64) -> Result<(), WfoError> {
    if !(v > 0.0 && v <= 1.0) {
        return Err(WfoError::invalid(
            "parameters",
            "position_fraction",
            format!("{} is outside (0, 1]", v),
        ));
    }
    Ok(())
}

fn check_stop_loss_fraction(v: f64) -> Result<(), WfoError> {
    if !(v > 0.0 && v < 1.0) {
        return Err(WfoError::invalid(
            "parameters",
            "stop_loss_fraction",
            format!("{} is outside (0, 1)", v),
        ));
    }
    Ok(())
}

fn check_at_least_one(v: usize, key: &str) -> Result<(), WfoError> {
    if v < 1 {
        return Err(WfoError::invalid("parameters", key, "must be at least 1"));
    }
    Ok(())
}

fn check_weight(name: &str, v: f64) -> Result<(), WfoError> {
    if !v.is_finite() {
        return Err(WfoError::invalid("weights", name, "weight must be finite"));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::SeedableRng;
    use rand::rngs::StdRng;

    fn sample_space() -> ParameterSpace {
        let mut factor_weights = BTreeMap::new();
        factor_weights.insert("ret_20".to_string(), Axis::Values(vec![0.5, 1.0]));
        factor_weights.insert("vol_20".to_string(), Axis::Values(vec![1.0]));
        ParameterSpace {
            position_fraction: Axis::Values(vec![0.5, 1.0]),
            stop_loss_fraction: Axis::Values(vec![0.1]),
            holding_count: Axis::Values(vec![5, 10, 20]),
            rebalance_interval_days: Axis::Values(vec![5]),
            factor_weights,
        }
    }

    #[test]
    fn parse_values_and_ranges() {
        assert_eq!(
            Axis::<f64>::parse("0.5, 0.8").unwrap(),
            Axis::Values(vec![0.5, 0.8])
        );
        assert_eq!(
            Axis::<f64>::parse("0.3..0.9").unwrap(),
            Axis::Range { min: 0.3, max: 0.9 }
        );
        assert_eq!(
            Axis::<f64>::parse("-1.0..-0.5").unwrap(),
            Axis::Range {
                min: -1.0,
                max: -0.5
            }
        );
        assert_eq!(Axis::<usize>::parse("10").unwrap(), Axis::Values(vec![10]));
    }

    #[test]
    fn parse_rejects_malformed_values() {
        assert!(Axis::<usize>::parse("ten").is_err());
        assert!(Axis::<f64>::parse("0.5,").is_err());
        assert!(Axis::<f64>::parse("0.9..0.3").is_err());
        assert!(Axis::<usize>::parse("1.5").is_err());
    }

    #[test]
    fn grid_visits_every_combination_once() {
        let space = sample_space();
        assert_eq!(space.grid_size(), Some(12));
        let all: Vec<ParameterSet> = space.grid().unwrap().collect();
        assert_eq!(all.len(), 12);
        for (i, a) in all.iter().enumerate() {
            for b in &all[i + 1..] {
                assert_ne!(a, b);
            }
        }
    }

    #[test]
    fn grid_order_is_lexicographic() {
        let space = sample_space();
        let all: Vec<ParameterSet> = space.grid().unwrap().collect();
        assert!((all[0].position_fraction - 0.5).abs() < f64::EPSILON);
        assert_eq!(all[0].holding_count, 5);
        assert!((all[0].factor_weights["ret_20"] - 0.5).abs() < f64::EPSILON);
        // Last axis turns first.
        assert!((all[1].factor_weights["ret_20"] - 1.0).abs() < f64::EPSILON);
        assert_eq!(all[2].holding_count, 10);
        assert!((all[11].position_fraction - 1.0).abs() < f64::EPSILON);
        assert_eq!(all[11].holding_count, 20);
    }

    #[test]
    fn grid_requires_discrete_axes() {
        let mut space = sample_space();
        space.position_fraction = Axis::Range { min: 0.3, max: 0.9 };
        assert_eq!(space.grid_size(), None);
        assert!(space.grid().is_err());
    }

    #[test]
    fn sampling_is_seeded_and_in_bounds() {
        let mut space = sample_space();
        space.position_fraction = Axis::Range { min: 0.3, max: 0.9 };
        space.holding_count = Axis::Range { min: 2, max: 4 };

        let draw = |seed| {
            let mut rng = StdRng::seed_from_u64(seed);
            (0..20)
                .map(|_| space.sample(&mut rng).unwrap())
                .collect::<Vec<_>>()
        };
        let first = draw(7);
        assert_eq!(first, draw(7));
        for p in &first {
            assert!(p.position_fraction >= 0.3 && p.position_fraction <= 0.9);
            assert!((2..=4).contains(&p.holding_count));
            p.validate().unwrap();
        }
    }

    #[test]
    fn validate_rejects_out_of_range_values() {
        let mut space = sample_space();
        space.position_fraction = Axis::Values(vec![0.5, 1.5]);
        assert!(space.validate().is_err());

        let mut space = sample_space();
        space.stop_loss_fraction = Axis::Range { min: 0.0, max: 0.2 };
        assert!(space.validate().is_err());

        let mut space = sample_space();
        space.holding_count = Axis::Values(vec![0]);
        assert!(space.validate().is_err());

        let mut space = sample_space();
        space.factor_weights.clear();
        assert!(space.validate().is_err());

        assert!(sample_space().validate().is_ok());
    }
}
