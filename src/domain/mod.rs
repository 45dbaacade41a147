//! Core domain types and logic.

pub mod bar;
pub mod condition;
pub mod position;
pub mod scope;
pub mod price_series;
pub mod indicator;
pub mod policy;
pub mod mean_reversion;
pub mod backtest;
pub mod performance;
pub mod config_validation;
pub mod error;
