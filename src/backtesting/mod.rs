//! Backtesting Module
//!
//! Provides tools for testing trade-signal rules on predicted scores:
//! - Flat/holding trade simulation with limit and timeout exits
//! - Performance metrics with time-weighted profit
//! - Grid search over signal thresholds, price targets and timeouts

pub mod grid;
pub mod performance;
pub mod simulator;

pub use grid::{
    parameter_key, rank_results, GridResult, GridResultRow, GridSearch, ResultStatus, SignalGrid,
    RESULT_COLUMNS,
};
pub use performance::{PerformanceRecord, MONTH_STEP_COUNT};
pub use simulator::{
    simulate_trades, simulation_range, transaction_weight, OpenPosition, SignalModelConfig,
    SimulationInput, TradeLedger, TradeState, Transaction, ANNUAL_STEP_COUNT,
};
