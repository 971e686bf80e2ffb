//! Data access port trait.
//!
//! Populates the dataset a run works on. Implementations return everything in
//! `[start_date, end_date]`; ordering and de-duplication are the store's job.

use crate::domain::error::WfoError;
use crate::domain::factor::FactorSnapshot;
use crate::domain::price_bar::PriceBar;
use chrono::NaiveDate;

pub trait DataPort {
    fn fetch_bars(
        &self,
        start_date: NaiveDate,
        end_date: NaiveDate,
    ) -> Result<Vec<PriceBar>, WfoError>;

    fn fetch_factors(
        &self,
        start_date: NaiveDate,
        end_date: NaiveDate,
    ) -> Result<Vec<FactorSnapshot>, WfoError>;

    fn list_instruments(&self) -> Result<Vec<String>, WfoError>;
}
