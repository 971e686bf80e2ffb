//! CSV file data adapter.
//!
//! `prices.csv` is long format, one bar per row:
//! `code,date,open,high,low,close,volume`. The optional factors file is wide:
//! `code,date,<factor>...`, with an empty cell for a missing value. Dates are
//! `YYYY-MM-DD` or `YYYYMMDD`.

use crate::domain::error::WfoError;
use crate::domain::factor::FactorSnapshot;
use crate::domain::price_bar::{PriceBar, parse_trade_date};
use crate::ports::data_port::DataPort;
use chrono::NaiveDate;
use csv::StringRecord;
use std::collections::BTreeSet;
use std::fs::File;
use std::path::{Path, PathBuf};

const PRICE_COLUMNS: [&str; 7] = ["code", "date", "open", "high", "low", "close", "volume"];

pub struct CsvAdapter {
    prices_path: PathBuf,
    factors_path: Option<PathBuf>,
}

impl CsvAdapter {
    pub fn new(prices_path: PathBuf, factors_path: Option<PathBuf>) -> Self {
        Self {
            prices_path,
            factors_path,
        }
    }

    fn open(path: &Path) -> Result<csv::Reader<File>, WfoError> {
        csv::ReaderBuilder::new()
            .trim(csv::Trim::All)
            .from_path(path)
            .map_err(|e| WfoError::Data {
                reason: format!("failed to read {}: {}", path.display(), e),
            })
    }
}

fn column_index(headers: &StringRecord, name: &str, path: &Path) -> Result<usize, WfoError> {
    headers
        .iter()
        .position(|h| h.eq_ignore_ascii_case(name))
        .ok_or_else(|| WfoError::Data {
            reason: format!("{}: missing {} column", path.display(), name),
        })
}

fn field<'r>(record: &'r StringRecord, index: usize, line: u64) -> Result<&'r str, WfoError> {
    record.get(index).ok_or_else(|| WfoError::Data {
        reason: format!("line {}: missing field {}", line, index + 1),
    })
}

fn parse_date(raw: &str, line: u64) -> Result<NaiveDate, WfoError> {
    parse_trade_date(raw).ok_or_else(|| WfoError::Data {
        reason: format!("line {}: invalid date '{}'", line, raw),
    })
}

/// Empty cells read as NaN so the store can discard or skip them.
fn parse_number(raw: &str, name: &str, line: u64) -> Result<f64, WfoError> {
    if raw.is_empty() {
        return Ok(f64::NAN);
    }
    raw.parse().map_err(|_| WfoError::Data {
        reason: format!("line {}: invalid {} value '{}'", line, name, raw),
    })
}

impl DataPort for CsvAdapter {
    fn fetch_bars(
        &self,
        start_date: NaiveDate,
        end_date: NaiveDate,
    ) -> Result<Vec<PriceBar>, WfoError> {
        let path = &self.prices_path;
        let mut rdr = Self::open(path)?;
        let headers = rdr.headers().map_err(|e| WfoError::Data {
            reason: format!("{}: {}", path.display(), e),
        })?;
        let idx = PRICE_COLUMNS
            .iter()
            .map(|name| column_index(headers, name, path))
            .collect::<Result<Vec<_>, _>>()?;

        let mut bars = Vec::new();
        for result in rdr.records() {
            let record = result.map_err(|e| WfoError::Data {
                reason: format!("CSV parse error in {}: {}", path.display(), e),
            })?;
            let line = record.position().map_or(0, |p| p.line());

            let date = parse_date(field(&record, idx[1], line)?, line)?;
            if date < start_date || date > end_date {
                continue;
            }

            let volume = parse_number(field(&record, idx[6], line)?, "volume", line)?;
            bars.push(PriceBar {
                code: field(&record, idx[0], line)?.to_string(),
                date,
                open: parse_number(field(&record, idx[2], line)?, "open", line)?,
                high: parse_number(field(&record, idx[3], line)?, "high", line)?,
                low: parse_number(field(&record, idx[4], line)?, "low", line)?,
                close: parse_number(field(&record, idx[5], line)?, "close", line)?,
                volume: if volume.is_nan() { 0.0 } else { volume },
            });
        }

        Ok(bars)
    }

    fn fetch_factors(
        &self,
        start_date: NaiveDate,
        end_date: NaiveDate,
    ) -> Result<Vec<FactorSnapshot>, WfoError> {
        let Some(path) = &self.factors_path else {
            return Ok(Vec::new());
        };
        let mut rdr = Self::open(path)?;
        let headers = rdr
            .headers()
            .map_err(|e| WfoError::Data {
                reason: format!("{}: {}", path.display(), e),
            })?
            .clone();
        let code_idx = column_index(&headers, "code", path)?;
        let date_idx = column_index(&headers, "date", path)?;
        let factor_columns: Vec<(usize, &str)> = headers
            .iter()
            .enumerate()
            .filter(|(i, _)| *i != code_idx && *i != date_idx)
            .collect();

        let mut snapshots = Vec::new();
        for result in rdr.records() {
            let record = result.map_err(|e| WfoError::Data {
                reason: format!("CSV parse error in {}: {}", path.display(), e),
            })?;
            let line = record.position().map_or(0, |p| p.line());

            let date = parse_date(field(&record, date_idx, line)?, line)?;
            if date < start_date || date > end_date {
                continue;
            }

            let mut snapshot = FactorSnapshot::new(field(&record, code_idx, line)?, date);
            for &(i, name) in &factor_columns {
                let value = parse_number(record.get(i).unwrap_or(""), name, line)?;
                if !value.is_nan() {
                    snapshot = snapshot.with(name, value);
                }
            }
            snapshots.push(snapshot);
        }

        Ok(snapshots)
    }

    fn list_instruments(&self) -> Result<Vec<String>, WfoError> {
        let path = &self.prices_path;
        let mut rdr = Self::open(path)?;
        let headers = rdr.headers().map_err(|e| WfoError::Data {
            reason: format!("{}: {}", path.display(), e),
        })?;
        let code_idx = column_index(headers, "code", path)?;

        let mut codes = BTreeSet::new();
        for result in rdr.records() {
            let record = result.map_err(|e| WfoError::Data {
                reason: format!("CSV parse error in {}: {}", path.display(), e),
            })?;
            if let Some(code) = record.get(code_idx) {
                codes.insert(code.to_string());
            }
        }
        Ok(codes.into_iter().collect())
    }
}
