//! Core domain types and logic.

pub mod error;
pub mod price_bar;
pub mod factor;
pub mod market_data;
pub mod position;
pub mod portfolio;
pub mod execution;
pub mod signal;
pub mod parameters;
pub mod simulator;
pub mod metrics;
pub mod schedule;
pub mod search;
pub mod aggregate;
pub mod config;
pub mod walk_forward;
