//! Error taxonomy.
//!
//! [`WfoError`] is fatal and aborts a run. [`DataIssue`] and
//! [`WindowTooShort`] are recoverable: they are absorbed by the engine and
//! reported alongside the results they affected.

use chrono::NaiveDate;
use serde::Serialize;

/// Top-level error type for wfotrader.
#[derive(Debug, thiserror::Error)]
pub enum WfoError {
    #[error("config parse error in {file}: {reason}")]
    ConfigParse { file: String, reason: String },

    #[error("missing config key [{section}] {key}")]
    ConfigMissing { section: String, key: String },

    #[error("invalid config value [{section}] {key}: {reason}")]
    ConfigInvalid {
        section: String,
        key: String,
        reason: String,
    },

    #[error("data source error: {reason}")]
    Data { reason: String },

    #[error("data query error: {reason}")]
    DataQuery { reason: String },

    #[error("no price data between {start} and {end}")]
    NoData { start: NaiveDate, end: NaiveDate },

    #[error("report error: {reason}")]
    Report { reason: String },

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl WfoError {
    pub fn invalid(section: &str, key: &str, reason: impl Into<String>) -> Self {
        WfoError::ConfigInvalid {
            section: section.to_string(),
            key: key.to_string(),
            reason: reason.into(),
        }
    }

    pub fn missing(section: &str, key: &str) -> Self {
        WfoError::ConfigMissing {
            section: section.to_string(),
            key: key.to_string(),
        }
    }
}

impl From<&WfoError> for std::process::ExitCode {
    fn from(err: &WfoError) -> Self {
        let code: u8 = match err {
            WfoError::Io(_) => 1,
            WfoError::ConfigParse { .. }
            | WfoError::ConfigMissing { .. }
            | WfoError::ConfigInvalid { .. } => 2,
            WfoError::Data { .. } | WfoError::DataQuery { .. } => 3,
            WfoError::NoData { .. } => 5,
            WfoError::Report { .. } => 6,
        };
        std::process::ExitCode::from(code)
    }
}

/// A recoverable data problem met during a simulation.
#[derive(Debug, Clone, PartialEq, Serialize, thiserror::Error)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum DataIssue {
    /// A held instrument had no quote on a rebalance date. It is valued at its
    /// last known close and any sale waits for the next quoted rebalance.
    #[error("{code} held without a price on {date}; valued at {carried_close} from {carried_from}")]
    HeldPriceGap {
        code: String,
        date: NaiveDate,
        carried_from: NaiveDate,
        carried_close: f64,
    },

    /// Instruments quoted on `date` that were left out of selection because
    /// no usable factor snapshot resolved as of that date.
    #[error("{count} candidates on {date} excluded for missing factors")]
    CandidateGap { date: NaiveDate, count: usize },

    /// Selection found nothing eligible; the rebalance held cash.
    #[error("no eligible instruments on {date}")]
    EmptyUniverse { date: NaiveDate },
}

impl DataIssue {
    /// Gaps in the dataset, as opposed to an empty selection.
    pub fn is_missing_data(&self) -> bool {
        matches!(
            self,
            DataIssue::HeldPriceGap { .. } | DataIssue::CandidateGap { .. }
        )
    }
}

/// A scheduled window rejected for lacking trading days.
#[derive(Debug, Clone, PartialEq, Serialize, thiserror::Error)]
#[error(
    "window {index} too short: {train_days} train / {test_days} test trading days, minimum {minimum}"
)]
pub struct WindowTooShort {
    pub index: usize,
    pub train_days: usize,
    pub test_days: usize,
    pub minimum: usize,
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::process::ExitCode;

    #[test]
    fn config_errors_map_to_exit_code_two() {
        let err = WfoError::invalid("parameters", "holding_count", "must be at least 1");
        assert_eq!(ExitCode::from(&err), ExitCode::from(2));
        let err = WfoError::missing("backtest", "start_date");
        assert_eq!(ExitCode::from(&err), ExitCode::from(2));
    }

    #[test]
    fn data_errors_map_to_exit_code_three() {
        let err = WfoError::Data {
            reason: "boom".into(),
        };
        assert_eq!(ExitCode::from(&err), ExitCode::from(3));
    }

    #[test]
    fn invalid_message_names_section_and_key() {
        let err = WfoError::invalid("search", "mode", "unknown mode");
        assert_eq!(
            err.to_string(),
            "invalid config value [search] mode: unknown mode"
        );
    }

    #[test]
    fn window_too_short_display() {
        let issue = WindowTooShort {
            index: 3,
            train_days: 80,
            test_days: 120,
            minimum: 100,
        };
        assert_eq!(
            issue.to_string(),
            "window 3 too short: 80 train / 120 test trading days, minimum 100"
        );
    }

    #[test]
    fn data_issue_serializes_with_kind_tag() {
        let issue = DataIssue::EmptyUniverse {
            date: NaiveDate::from_ymd_opt(2024, 1, 2).unwrap(),
        };
        let json = serde_json::to_string(&issue).unwrap();
        assert_eq!(json, r#"{"kind":"empty_universe","date":"2024-01-02"}"#);
    }

    #[test]
    fn only_gaps_count_as_missing_data() {
        let date = NaiveDate::from_ymd_opt(2024, 1, 2).unwrap();
        assert!(!DataIssue::EmptyUniverse { date }.is_missing_data());
        assert!(DataIssue::CandidateGap { date, count: 2 }.is_missing_data());
        assert!(
            DataIssue::HeldPriceGap {
                code: "600000.SH".to_string(),
                date,
                carried_from: date,
                carried_close: 10.0,
            }
            .is_missing_data()
        );
    }
}
