//! SQLite data adapter.
//!
//! Bars come from `daily_price(ts_code, trade_date, open, high, low, close,
//! volume, ...)` with `trade_date` stored as `YYYYMMDD` text. Factors come from
//! one or more wide tables keyed on `(ts_code, trade_date)`; every other column
//! is a factor and NULL means missing. Rows for the same key across tables are
//! merged into one snapshot.

use crate::domain::error::WfoError;
use crate::domain::factor::FactorSnapshot;
use crate::domain::price_bar::{PriceBar, parse_trade_date};
use crate::ports::data_port::DataPort;
use chrono::NaiveDate;
use r2d2::{Pool, PooledConnection};
use r2d2_sqlite::SqliteConnectionManager;
use rusqlite::{Connection, params};
use std::collections::BTreeMap;
use std::path::Path;

const KEY_COLUMNS: [&str; 2] = ["ts_code", "trade_date"];

pub struct SqliteAdapter {
    pool: Pool<SqliteConnectionManager>,
    factor_tables: Vec<String>,
}

fn pool_error(e: r2d2::Error) -> WfoError {
    WfoError::Data {
        reason: e.to_string(),
    }
}

fn query_error(e: rusqlite::Error) -> WfoError {
    WfoError::DataQuery {
        reason: e.to_string(),
    }
}

fn date_key(date: NaiveDate) -> String {
    date.format("%Y%m%d").to_string()
}

/// Table names are interpolated into SQL, so only plain identifiers pass.
fn check_identifier(name: &str) -> Result<(), WfoError> {
    let valid = !name.is_empty()
        && !name.starts_with(|c: char| c.is_ascii_digit())
        && name.chars().all(|c| c.is_ascii_alphanumeric() || c == '_');
    if valid {
        Ok(())
    } else {
        Err(WfoError::Data {
            reason: format!("invalid table name '{}'", name),
        })
    }
}

fn parse_row_date(raw: &str) -> Result<NaiveDate, WfoError> {
    parse_trade_date(raw).ok_or_else(|| WfoError::Data {
        reason: format!("invalid trade_date '{}'", raw),
    })
}

impl SqliteAdapter {
    pub fn new(path: &Path, pool_size: u32, factor_tables: Vec<String>) -> Result<Self, WfoError> {
        for table in &factor_tables {
            check_identifier(table)?;
        }
        let manager = SqliteConnectionManager::file(path);
        let pool = Pool::builder()
            .max_size(pool_size)
            .build(manager)
            .map_err(pool_error)?;

        Ok(Self {
            pool,
            factor_tables,
        })
    }

    /// Single-connection pool so every caller sees the same in-memory database.
    pub fn in_memory(factor_tables: Vec<String>) -> Result<Self, WfoError> {
        for table in &factor_tables {
            check_identifier(table)?;
        }
        let manager = SqliteConnectionManager::memory();
        let pool = Pool::builder()
            .max_size(1)
            .build(manager)
            .map_err(pool_error)?;

        Ok(Self {
            pool,
            factor_tables,
        })
    }

    fn conn(&self) -> Result<PooledConnection<SqliteConnectionManager>, WfoError> {
        self.pool.get().map_err(pool_error)
    }

    /// Create `daily_price` and an empty `stock_factors` table.
    pub fn initialize_schema(&self) -> Result<(), WfoError> {
        let conn = self.conn()?;
        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS daily_price (
                ts_code TEXT NOT NULL,
                trade_date TEXT NOT NULL,
                open REAL,
                high REAL,
                low REAL,
                close REAL,
                volume REAL,
                amount REAL,
                change_pct REAL,
                PRIMARY KEY (ts_code, trade_date)
            );
            CREATE INDEX IF NOT EXISTS idx_daily_price_date ON daily_price(trade_date);",
        )
        .map_err(query_error)
    }

    /// Create a wide factor table with one REAL column per factor.
    pub fn create_factor_table(&self, table: &str, factors: &[&str]) -> Result<(), WfoError> {
        check_identifier(table)?;
        for factor in factors {
            check_identifier(factor)?;
        }
        let columns: String = factors.iter().map(|f| format!(", {} REAL", f)).collect();
        let sql = format!(
            "CREATE TABLE IF NOT EXISTS {} (ts_code TEXT NOT NULL, trade_date TEXT NOT NULL{}, \
             PRIMARY KEY (ts_code, trade_date))",
            table, columns
        );
        self.conn()?.execute_batch(&sql).map_err(query_error)
    }

    pub fn insert_bars(&self, bars: &[PriceBar]) -> Result<(), WfoError> {
        let mut conn = self.conn()?;
        let tx = conn.transaction().map_err(query_error)?;
        {
            let mut stmt = tx
                .prepare(
                    "INSERT OR REPLACE INTO daily_price \
                     (ts_code, trade_date, open, high, low, close, volume) \
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
                )
                .map_err(query_error)?;
            for bar in bars {
                stmt.execute(params![
                    bar.code,
                    date_key(bar.date),
                    bar.open,
                    bar.high,
                    bar.low,
                    bar.close.is_finite().then_some(bar.close),
                    bar.volume,
                ])
                .map_err(query_error)?;
            }
        }
        tx.commit().map_err(query_error)
    }

    /// Insert snapshots into `table`. Factors the table has no column for are
    /// ignored; factors a snapshot lacks are stored as NULL.
    pub fn insert_factors(
        &self,
        table: &str,
        snapshots: &[FactorSnapshot],
    ) -> Result<(), WfoError> {
        check_identifier(table)?;
        let mut conn = self.conn()?;
        let columns = factor_columns(&conn, table)?;
        let placeholders: String = (0..columns.len()).map(|i| format!(", ?{}", i + 3)).collect();
        let names: String = columns.iter().map(|c| format!(", {}", c)).collect();
        let sql = format!(
            "INSERT OR REPLACE INTO {} (ts_code, trade_date{}) VALUES (?1, ?2{})",
            table, names, placeholders
        );

        let tx = conn.transaction().map_err(query_error)?;
        {
            let mut stmt = tx.prepare(&sql).map_err(query_error)?;
            for snapshot in snapshots {
                let mut values: Vec<rusqlite::types::Value> = vec![
                    snapshot.code.clone().into(),
                    date_key(snapshot.date).into(),
                ];
                for column in &columns {
                    values.push(match snapshot.get(column) {
                        Some(v) => v.into(),
                        None => rusqlite::types::Value::Null,
                    });
                }
                stmt.execute(rusqlite::params_from_iter(values))
                    .map_err(query_error)?;
            }
        }
        tx.commit().map_err(query_error)
    }
}

/// Non-key columns of `table`, in declaration order.
fn factor_columns(conn: &Connection, table: &str) -> Result<Vec<String>, WfoError> {
    let mut stmt = conn
        .prepare(&format!("PRAGMA table_info({})", table))
        .map_err(query_error)?;
    let rows = stmt
        .query_map([], |row| row.get::<_, String>(1))
        .map_err(query_error)?;

    let mut columns = Vec::new();
    for row in rows {
        let name = row.map_err(query_error)?;
        if !KEY_COLUMNS.contains(&name.as_str()) {
            columns.push(name);
        }
    }
    if columns.is_empty() {
        return Err(WfoError::Data {
            reason: format!("factor table '{}' is missing or has no factor columns", table),
        });
    }
    Ok(columns)
}

impl DataPort for SqliteAdapter {
    fn fetch_bars(
        &self,
        start_date: NaiveDate,
        end_date: NaiveDate,
    ) -> Result<Vec<PriceBar>, WfoError> {
        let conn = self.conn()?;
        let mut stmt = conn
            .prepare(
                "SELECT ts_code, trade_date, open, high, low, close, volume \
                 FROM daily_price \
                 WHERE trade_date >= ?1 AND trade_date <= ?2 \
                 ORDER BY trade_date, ts_code",
            )
            .map_err(query_error)?;

        let rows = stmt
            .query_map(params![date_key(start_date), date_key(end_date)], |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, Option<f64>>(2)?,
                    row.get::<_, Option<f64>>(3)?,
                    row.get::<_, Option<f64>>(4)?,
                    row.get::<_, Option<f64>>(5)?,
                    row.get::<_, Option<f64>>(6)?,
                ))
            })
            .map_err(query_error)?;

        let mut bars = Vec::new();
        for row in rows {
            let (code, raw_date, open, high, low, close, volume) = row.map_err(query_error)?;
            bars.push(PriceBar {
                code,
                date: parse_row_date(&raw_date)?,
                open: open.unwrap_or(f64::NAN),
                high: high.unwrap_or(f64::NAN),
                low: low.unwrap_or(f64::NAN),
                close: close.unwrap_or(f64::NAN),
                volume: volume.unwrap_or(0.0),
            });
        }

        Ok(bars)
    }

    fn fetch_factors(
        &self,
        start_date: NaiveDate,
        end_date: NaiveDate,
    ) -> Result<Vec<FactorSnapshot>, WfoError> {
        let conn = self.conn()?;
        let mut merged: BTreeMap<(String, NaiveDate), FactorSnapshot> = BTreeMap::new();

        for table in &self.factor_tables {
            let columns = factor_columns(&conn, table)?;
            let select: Vec<&str> = KEY_COLUMNS
                .iter()
                .copied()
                .chain(columns.iter().map(String::as_str))
                .collect();
            let sql = format!(
                "SELECT {} FROM {} WHERE trade_date >= ?1 AND trade_date <= ?2",
                select.join(", "),
                table
            );
            let mut stmt = conn.prepare(&sql).map_err(query_error)?;
            let rows = stmt
                .query_map(params![date_key(start_date), date_key(end_date)], |row| {
                    let code: String = row.get(0)?;
                    let date: String = row.get(1)?;
                    let mut values = Vec::with_capacity(columns.len());
                    for i in 0..columns.len() {
                        values.push(row.get::<_, Option<f64>>(i + 2)?);
                    }
                    Ok((code, date, values))
                })
                .map_err(query_error)?;

            for row in rows {
                let (code, raw_date, values) = row.map_err(query_error)?;
                let date = parse_row_date(&raw_date)?;
                let entry = merged
                    .entry((code.clone(), date))
                    .or_insert_with(|| FactorSnapshot::new(&code, date));
                for (name, value) in columns.iter().zip(values) {
                    if let Some(v) = value {
                        entry.values.insert(name.clone(), v);
                    }
                }
            }
        }

        Ok(merged.into_values().collect())
    }

    fn list_instruments(&self) -> Result<Vec<String>, WfoError> {
        let conn = self.conn()?;
        let mut stmt = conn
            .prepare("SELECT DISTINCT ts_code FROM daily_price ORDER BY ts_code")
            .map_err(query_error)?;
        let rows = stmt.query_map([], |row| row.get(0)).map_err(query_error)?;

        let mut codes = Vec::new();
        for row in rows {
            codes.push(row.map_err(query_error)?);
        }
        Ok(codes)
    }
}
