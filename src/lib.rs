//! Signal Lab Library
//!
//! Rolling gradient-boosting predictions and trade-signal grid search for 1m klines

pub mod backtesting;
pub mod config;
pub mod error;
pub mod ml_engine;
pub mod persistence;
pub mod pipeline;
pub mod types;

pub use error::{BacktestError, Result};
