//! Point-in-time market data store.
//!
//! Holds the immutable dataset for a run: per-instrument price bars and sparse
//! factor snapshots, plus the unified trading calendar. Every lookup resolves
//! against records dated on or before the query date, never after it.

use crate::domain::error::WfoError;
use crate::domain::factor::FactorSnapshot;
use crate::domain::price_bar::PriceBar;
use crate::ports::data_port::DataPort;
use chrono::NaiveDate;
use log::{debug, info, warn};
use std::collections::{BTreeMap, BTreeSet, HashMap};

#[derive(Debug, Clone)]
pub struct InstrumentSeries {
    pub code: String,
    bars: Vec<PriceBar>,
    date_index: HashMap<NaiveDate, usize>,
    factors: Vec<FactorSnapshot>,
}

impl InstrumentSeries {
    fn new(code: String, bars: Vec<PriceBar>, factors: Vec<FactorSnapshot>) -> Self {
        let date_index = bars
            .iter()
            .enumerate()
            .map(|(i, bar)| (bar.date, i))
            .collect();
        Self {
            code,
            bars,
            date_index,
            factors,
        }
    }

    pub fn bar_count(&self) -> usize {
        self.bars.len()
    }

    pub fn snapshot_count(&self) -> usize {
        self.factors.len()
    }

    pub fn get_bar(&self, date: NaiveDate) -> Option<&PriceBar> {
        self.date_index.get(&date).map(|&i| &self.bars[i])
    }

    pub fn last_bar_on_or_before(&self, date: NaiveDate) -> Option<&PriceBar> {
        let idx = self.bars.partition_point(|bar| bar.date <= date);
        idx.checked_sub(1).map(|i| &self.bars[i])
    }

    pub fn snapshot_on_or_before(&self, date: NaiveDate) -> Option<&FactorSnapshot> {
        let idx = self.factors.partition_point(|snap| snap.date <= date);
        idx.checked_sub(1).map(|i| &self.factors[i])
    }
}

/// Read-only, shareable view over one run's dataset.
#[derive(Debug, Clone)]
pub struct MarketDataStore {
    calendar: Vec<NaiveDate>,
    series: BTreeMap<String, InstrumentSeries>,
    max_factor_staleness: usize,
}

impl MarketDataStore {
    /// Build a store from unordered bars and snapshots.
    ///
    /// Bars without a valid close are discarded, duplicates on the same
    /// (instrument, date) keep the first occurrence, and snapshots for
    /// instruments that never trade are ignored.
    pub fn new(
        bars: Vec<PriceBar>,
        factors: Vec<FactorSnapshot>,
        max_factor_staleness: usize,
    ) -> Self {
        let mut bars_by_code: BTreeMap<String, Vec<PriceBar>> = BTreeMap::new();
        let mut invalid = 0usize;
        for bar in bars {
            if !bar.has_valid_close() {
                invalid += 1;
                continue;
            }
            bars_by_code.entry(bar.code.clone()).or_default().push(bar);
        }
        if invalid > 0 {
            warn!("discarded {} bars without a valid close", invalid);
        }

        let mut factors_by_code: HashMap<String, Vec<FactorSnapshot>> = HashMap::new();
        for snap in factors {
            factors_by_code.entry(snap.code.clone()).or_default().push(snap);
        }

        let mut calendar = BTreeSet::new();
        let mut series = BTreeMap::new();
        for (code, mut code_bars) in bars_by_code {
            code_bars.sort_by_key(|b| b.date);
            let before = code_bars.len();
            code_bars.dedup_by_key(|b| b.date);
            if code_bars.len() != before {
                warn!(
                    "{}: dropped {} duplicate bars",
                    code,
                    before - code_bars.len()
                );
            }
            calendar.extend(code_bars.iter().map(|b| b.date));

            let mut snaps = factors_by_code.remove(&code).unwrap_or_default();
            snaps.sort_by_key(|s| s.date);
            snaps.dedup_by_key(|s| s.date);

            series.insert(code.clone(), InstrumentSeries::new(code, code_bars, snaps));
        }

        if !factors_by_code.is_empty() {
            debug!(
                "ignored factor snapshots for {} instruments without price bars",
                factors_by_code.len()
            );
        }

        Self {
            calendar: calendar.into_iter().collect(),
            series,
            max_factor_staleness,
        }
    }

    /// Populate a store through a data port.
    pub fn load(
        port: &dyn DataPort,
        start: NaiveDate,
        end: NaiveDate,
        max_factor_staleness: usize,
    ) -> Result<Self, WfoError> {
        let bars = port.fetch_bars(start, end)?;
        if bars.is_empty() {
            return Err(WfoError::NoData { start, end });
        }
        let factors = port.fetch_factors(start, end)?;
        let (bar_count, snapshot_count) = (bars.len(), factors.len());
        let store = Self::new(bars, factors, max_factor_staleness);
        info!(
            "loaded {} bars and {} factor snapshots for {} instruments over {} trading days",
            bar_count,
            snapshot_count,
            store.instrument_count(),
            store.calendar.len()
        );
        Ok(store)
    }

    pub fn calendar(&self) -> &[NaiveDate] {
        &self.calendar
    }

    pub fn first_date(&self) -> Option<NaiveDate> {
        self.calendar.first().copied()
    }

    pub fn last_date(&self) -> Option<NaiveDate> {
        self.calendar.last().copied()
    }

    pub fn max_factor_staleness(&self) -> usize {
        self.max_factor_staleness
    }

    pub fn instrument_count(&self) -> usize {
        self.series.len()
    }

    pub fn instruments(&self) -> impl Iterator<Item = &InstrumentSeries> {
        self.series.values()
    }

    pub fn series(&self, code: &str) -> Option<&InstrumentSeries> {
        self.series.get(code)
    }

    /// Trading dates in `[start, end]`, ascending.
    pub fn trading_dates(&self, start: NaiveDate, end: NaiveDate) -> &[NaiveDate] {
        if start > end {
            return &[];
        }
        let lo = self.calendar.partition_point(|d| *d < start);
        let hi = self.calendar.partition_point(|d| *d <= end);
        &self.calendar[lo..hi]
    }

    /// Number of calendar trading dates on or before `date`.
    pub fn trading_days_through(&self, date: NaiveDate) -> usize {
        self.calendar.partition_point(|d| *d <= date)
    }

    /// Close on exactly `date`, if the instrument traded that day.
    pub fn price(&self, code: &str, date: NaiveDate) -> Option<f64> {
        self.series
            .get(code)
            .and_then(|s| s.get_bar(date))
            .map(|bar| bar.close)
    }

    /// Most recent close on or before `date` with the date it was observed.
    pub fn last_close(&self, code: &str, date: NaiveDate) -> Option<(NaiveDate, f64)> {
        self.series
            .get(code)
            .and_then(|s| s.last_bar_on_or_before(date))
            .map(|bar| (bar.date, bar.close))
    }

    /// Latest snapshot dated on or before `date`, unless it is older than the
    /// staleness limit measured in trading days.
    pub fn factors_as_of(&self, code: &str, date: NaiveDate) -> Option<&FactorSnapshot> {
        let snap = self.series.get(code)?.snapshot_on_or_before(date)?;
        let staleness = self
            .trading_days_through(date)
            .saturating_sub(self.trading_days_through(snap.date));
        if staleness > self.max_factor_staleness {
            None
        } else {
            Some(snap)
        }
    }

    /// Instruments with a valid price on `date`, in code order.
    pub fn universe(&self, date: NaiveDate) -> Vec<&str> {
        self.series
            .values()
            .filter(|s| s.get_bar(date).is_some())
            .map(|s| s.code.as_str())
            .collect()
    }

    /// Cross-sectional median close across the universe on `date`.
    pub fn median_close(&self, date: NaiveDate) -> Option<f64> {
        let mut closes: Vec<f64> = self
            .series
            .values()
            .filter_map(|s| s.get_bar(date))
            .map(|bar| bar.close)
            .collect();
        if closes.is_empty() {
            return None;
        }
        closes.sort_by(|a, b| a.total_cmp(b));
        let mid = closes.len() / 2;
        if closes.len() % 2 == 0 {
            Some((closes[mid - 1] + closes[mid]) / 2.0)
        } else {
            Some(closes[mid])
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn d(s: &str) -> NaiveDate {
        NaiveDate::parse_from_str(s, "%Y-%m-%d").unwrap()
    }

    fn make_bar(code: &str, date: &str, close: f64) -> PriceBar {
        PriceBar {
            code: code.to_string(),
            date: d(date),
            open: close,
            high: close + 1.0,
            low: close - 1.0,
            close,
            volume: 1000.0,
        }
    }

    fn sample_store(staleness: usize) -> MarketDataStore {
        let bars = vec![
            make_bar("B", "2024-01-03", 20.0),
            make_bar("A", "2024-01-02", 10.0),
            make_bar("A", "2024-01-03", 11.0),
            make_bar("A", "2024-01-05", 12.0),
            make_bar("B", "2024-01-04", 21.0),
            make_bar("C", "2024-01-03", 30.0),
        ];
        let factors = vec![
            FactorSnapshot::new("A", d("2024-01-02")).with("ret_20", 0.1),
            FactorSnapshot::new("A", d("2024-01-04")).with("ret_20", 0.2),
            FactorSnapshot::new("B", d("2024-01-02")).with("ret_20", 0.3),
        ];
        MarketDataStore::new(bars, factors, staleness)
    }

    #[test]
    fn calendar_is_union_of_bar_dates() {
        let store = sample_store(5);
        assert_eq!(
            store.calendar(),
            &[d("2024-01-02"), d("2024-01-03"), d("2024-01-04"), d("2024-01-05")]
        );
        assert_eq!(store.instrument_count(), 3);
    }

    #[test]
    fn trading_dates_inclusive_range() {
        let store = sample_store(5);
        assert_eq!(
            store.trading_dates(d("2024-01-03"), d("2024-01-04")),
            &[d("2024-01-03"), d("2024-01-04")]
        );
        assert!(store.trading_dates(d("2024-02-01"), d("2024-02-05")).is_empty());
        assert!(store.trading_dates(d("2024-01-05"), d("2024-01-02")).is_empty());
    }

    #[test]
    fn price_is_exact_date_only() {
        let store = sample_store(5);
        assert_eq!(store.price("A", d("2024-01-03")), Some(11.0));
        assert_eq!(store.price("A", d("2024-01-04")), None);
        assert_eq!(store.price("Z", d("2024-01-03")), None);
    }

    #[test]
    fn last_close_carries_forward_but_never_back() {
        let store = sample_store(5);
        assert_eq!(
            store.last_close("A", d("2024-01-04")),
            Some((d("2024-01-03"), 11.0))
        );
        assert_eq!(store.last_close("A", d("2024-01-01")), None);
    }

    #[test]
    fn factors_as_of_uses_latest_not_future() {
        let store = sample_store(5);
        let snap = store.factors_as_of("A", d("2024-01-03")).unwrap();
        assert_eq!(snap.date, d("2024-01-02"));
        let snap = store.factors_as_of("A", d("2024-01-05")).unwrap();
        assert_eq!(snap.date, d("2024-01-04"));
        assert!(store.factors_as_of("A", d("2024-01-01")).is_none());
        assert!(store.factors_as_of("C", d("2024-01-05")).is_none());
    }

    #[test]
    fn factors_as_of_respects_staleness() {
        let store = sample_store(1);
        // B's snapshot is two trading days old on 2024-01-04.
        assert!(store.factors_as_of("B", d("2024-01-03")).is_some());
        assert!(store.factors_as_of("B", d("2024-01-04")).is_none());
    }

    #[test]
    fn universe_lists_quoted_instruments_in_code_order() {
        let store = sample_store(5);
        assert_eq!(store.universe(d("2024-01-03")), vec!["A", "B", "C"]);
        assert_eq!(store.universe(d("2024-01-04")), vec!["B"]);
    }

    #[test]
    fn median_close_odd_and_even() {
        let store = sample_store(5);
        assert_eq!(store.median_close(d("2024-01-03")), Some(20.0));
        assert_eq!(store.median_close(d("2024-01-02")), Some(10.0));
        assert_eq!(store.median_close(d("2024-01-01")), None);

        let bars = vec![
            make_bar("A", "2024-01-02", 10.0),
            make_bar("B", "2024-01-02", 20.0),
        ];
        let store = MarketDataStore::new(bars, vec![], 5);
        assert_eq!(store.median_close(d("2024-01-02")), Some(15.0));
    }

    #[test]
    fn invalid_and_duplicate_bars_are_dropped() {
        let bars = vec![
            make_bar("A", "2024-01-02", 10.0),
            make_bar("A", "2024-01-02", 99.0),
            make_bar("A", "2024-01-03", 0.0),
            make_bar("A", "2024-01-04", f64::NAN),
        ];
        let store = MarketDataStore::new(bars, vec![], 5);
        assert_eq!(store.series("A").unwrap().bar_count(), 1);
        assert_eq!(store.price("A", d("2024-01-02")), Some(10.0));
        assert_eq!(store.calendar(), &[d("2024-01-02")]);
    }

    #[test]
    fn trading_days_through_counts_calendar_prefix() {
        let store = sample_store(5);
        assert_eq!(store.trading_days_through(d("2024-01-01")), 0);
        assert_eq!(store.trading_days_through(d("2024-01-03")), 2);
        assert_eq!(store.trading_days_through(d("2024-12-31")), 4);
    }
}
