//! INI file configuration adapter.
//!
//! Section and key names are case-sensitive so factor names in `[weights]`
//! match dataset columns exactly.

use crate::ports::config_port::ConfigPort;
use configparser::ini::Ini;
use std::path::Path;

pub struct FileConfigAdapter {
    config: Ini,
}

impl FileConfigAdapter {
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, String> {
        let mut config = Ini::new_cs();
        config.load(path)?;
        Ok(Self { config })
    }

    pub fn from_string(content: &str) -> Result<Self, String> {
        let mut config = Ini::new_cs();
        config.read(content.to_string())?;
        Ok(Self { config })
    }

    fn parse_bool(value: &str) -> Option<bool> {
        match value.trim().to_lowercase().as_str() {
            "true" | "yes" | "1" => Some(true),
            "false" | "no" | "0" => Some(false),
            _ => None,
        }
    }

    /// Present and non-blank value.
    fn value(&self, section: &str, key: &str) -> Option<String> {
        self.config
            .get(section, key)
            .filter(|v| !v.trim().is_empty())
    }
}

impl ConfigPort for FileConfigAdapter {
    fn get_string(&self, section: &str, key: &str) -> Option<String> {
        self.value(section, key).map(|v| v.trim().to_string())
    }

    fn get_int(&self, section: &str, key: &str) -> Result<Option<i64>, String> {
        self.value(section, key)
            .map(|v| {
                v.trim()
                    .parse::<i64>()
                    .map_err(|_| format!("'{}' is not an integer", v.trim()))
            })
            .transpose()
    }

    fn get_double(&self, section: &str, key: &str) -> Result<Option<f64>, String> {
        self.value(section, key)
            .map(|v| {
                v.trim()
                    .parse::<f64>()
                    .map_err(|_| format!("'{}' is not a number", v.trim()))
            })
            .transpose()
    }

    fn get_bool(&self, section: &str, key: &str) -> Result<Option<bool>, String> {
        self.value(section, key)
            .map(|v| {
                Self::parse_bool(&v).ok_or_else(|| format!("'{}' is not a boolean", v.trim()))
            })
            .transpose()
    }

    fn keys(&self, section: &str) -> Vec<String> {
        let mut keys: Vec<String> = self
            .config
            .get_map_ref()
            .get(section)
            .map(|entries| entries.keys().cloned().collect())
            .unwrap_or_default();
        keys.sort();
        keys
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    fn create_temp_config(content: &str) -> NamedTempFile {
        let mut file = NamedTempFile::new().unwrap();
        write!(file, "{}", content).unwrap();
        file
    }

    #[test]
    fn from_string_parses_config() {
        let content = r#"
[data]
prices_csv = data/prices.csv

[backtest]
initial_capital = 1000000
lot_size = 100
"#;
        let adapter = FileConfigAdapter::from_string(content).unwrap();
        assert_eq!(
            adapter.get_string("data", "prices_csv"),
            Some("data/prices.csv".to_string())
        );
        assert_eq!(adapter.get_int("backtest", "lot_size"), Ok(Some(100)));
    }

    #[test]
    fn get_string_returns_none_for_missing_or_blank() {
        let adapter = FileConfigAdapter::from_string("[backtest]\nstart_date =\n").unwrap();
        assert_eq!(adapter.get_string("backtest", "start_date"), None);
        assert_eq!(adapter.get_string("backtest", "missing"), None);
        assert_eq!(adapter.get_string("missing_section", "key"), None);
    }

    #[test]
    fn get_int_missing_is_none() {
        let adapter = FileConfigAdapter::from_string("[backtest]\n").unwrap();
        assert_eq!(adapter.get_int("backtest", "lot_size"), Ok(None));
    }

    #[test]
    fn get_int_rejects_non_numeric() {
        let adapter = FileConfigAdapter::from_string("[backtest]\nlot_size = abc\n").unwrap();
        assert!(adapter.get_int("backtest", "lot_size").is_err());
    }

    #[test]
    fn get_double_parses_and_rejects() {
        let adapter = FileConfigAdapter::from_string(
            "[backtest]\ninitial_capital = 100000.5\nfriction_pct = cheap\n",
        )
        .unwrap();
        assert_eq!(
            adapter.get_double("backtest", "initial_capital"),
            Ok(Some(100000.5))
        );
        assert!(adapter.get_double("backtest", "friction_pct").is_err());
        assert_eq!(adapter.get_double("backtest", "missing"), Ok(None));
    }

    #[test]
    fn get_bool_values() {
        let adapter = FileConfigAdapter::from_string(
            "[signal]\na = true\nb = yes\nc = 1\nd = false\ne = no\nf = 0\ng = maybe\n",
        )
        .unwrap();
        for key in ["a", "b", "c"] {
            assert_eq!(adapter.get_bool("signal", key), Ok(Some(true)));
        }
        for key in ["d", "e", "f"] {
            assert_eq!(adapter.get_bool("signal", key), Ok(Some(false)));
        }
        assert!(adapter.get_bool("signal", "g").is_err());
        assert_eq!(adapter.get_bool("signal", "missing"), Ok(None));
    }

    #[test]
    fn keys_are_sorted_and_case_preserved() {
        let adapter = FileConfigAdapter::from_string(
            "[weights]\nvol_20 = 1\nMOM_accel = 0.5\nret_20 = 1, 2\n",
        )
        .unwrap();
        assert_eq!(adapter.keys("weights"), vec!["MOM_accel", "ret_20", "vol_20"]);
        assert!(adapter.keys("missing").is_empty());
    }

    #[test]
    fn from_file_reads_config() {
        let file = create_temp_config("[sqlite]\npath = /data/history.db\n");
        let adapter = FileConfigAdapter::from_file(file.path()).unwrap();
        assert_eq!(
            adapter.get_string("sqlite", "path"),
            Some("/data/history.db".to_string())
        );
    }

    #[test]
    fn from_file_returns_error_for_missing_file() {
        assert!(FileConfigAdapter::from_file("/nonexistent/path/config.ini").is_err());
    }
}
