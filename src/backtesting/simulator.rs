//! Trade Simulator
//!
//! Single forward pass over predicted scores with a two-state position machine:
//! - `Flat`: buy at the close when both scores clear their thresholds
//! - `Holding`: sell at the target when the high reaches it, or at the close once
//!   the position is older than `timeout_steps`
//!
//! A position still open at the end of the pass is not part of the ledger.

use crate::error::{BacktestError, Result};
use crate::types::TimeSeries;
use serde::{Deserialize, Serialize};
use std::ops::Range;

pub const CLOSE_COLUMN: &str = "close";
pub const HIGH_COLUMN: &str = "high";

/// Rows in one year of 1m klines; a transaction this far in weighs `performance_weight`
pub const ANNUAL_STEP_COUNT: f64 = 525_600.0;

/// One point of the signal grid
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SignalModelConfig {
    pub threshold_buy_primary: f64,
    pub threshold_buy_secondary: f64,
    pub target_price_multiplier: f64,
    pub timeout_steps: usize,
}

impl SignalModelConfig {
    pub fn is_buy_signal(&self, primary: f64, secondary: f64) -> bool {
        primary >= self.threshold_buy_primary && secondary >= self.threshold_buy_secondary
    }
}

/// Price and score columns of the simulated rows
#[derive(Debug, Clone, Copy)]
pub struct SimulationInput<'a> {
    close: &'a [f64],
    high: &'a [f64],
    primary: &'a [f64],
    secondary: &'a [f64],
}

impl<'a> SimulationInput<'a> {
    pub fn new(
        close: &'a [f64],
        high: &'a [f64],
        primary: &'a [f64],
        secondary: &'a [f64],
    ) -> Result<Self> {
        let n = close.len();
        if high.len() != n || primary.len() != n || secondary.len() != n {
            return Err(BacktestError::InvalidParameter(format!(
                "simulation columns differ in length: close {}, high {}, primary {}, secondary {}",
                n,
                high.len(),
                primary.len(),
                secondary.len()
            )));
        }
        Ok(Self {
            close,
            high,
            primary,
            secondary,
        })
    }

    /// Borrow `close`, `high` and the two score columns over `range`
    pub fn from_series(
        series: &'a TimeSeries,
        range: Range<usize>,
        score_primary: &str,
        score_secondary: &str,
    ) -> Result<Self> {
        if range.start > range.end || range.end > series.len() {
            return Err(BacktestError::DataUnavailable(format!(
                "simulation rows {}..{} outside series of length {}",
                range.start,
                range.end,
                series.len()
            )));
        }
        Self::new(
            &series.column(CLOSE_COLUMN)?[range.clone()],
            &series.column(HIGH_COLUMN)?[range.clone()],
            &series.column(score_primary)?[range.clone()],
            &series.column(score_secondary)?[range],
        )
    }

    pub fn len(&self) -> usize {
        self.close.len()
    }

    pub fn is_empty(&self) -> bool {
        self.close.is_empty()
    }
}

/// Resolve `[start, end)` where a negative `end` counts back from `total_rows`
/// and 0 means `total_rows`
pub fn simulation_range(total_rows: usize, start: usize, end: i64) -> Result<Range<usize>> {
    let resolved = if end == 0 {
        Some(total_rows)
    } else if end < 0 {
        total_rows.checked_sub(end.unsigned_abs() as usize)
    } else {
        Some(end as usize).filter(|&e| e <= total_rows)
    };

    match resolved {
        Some(end) if start < end => Ok(start..end),
        _ => Err(BacktestError::DataUnavailable(format!(
            "simulation range start={} end={} is empty for {} rows",
            start, end, total_rows
        ))),
    }
}

/// Completed round trip
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct Transaction {
    pub entry_index: usize,
    pub entry_price: f64,
    pub target_price: f64,
    pub exit_index: usize,
    pub exit_price: f64,
    /// Closed at the timeout instead of the target
    pub is_timeout: bool,
    pub profit: f64,
    pub has_profit: bool,
    pub weight: f64,
}

impl Transaction {
    /// Rows between entry and exit
    pub fn fill_time(&self) -> usize {
        self.exit_index - self.entry_index
    }
}

/// Position waiting for its exit
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct OpenPosition {
    pub entry_index: usize,
    pub entry_price: f64,
    pub target_price: f64,
    pub weight: f64,
}

impl OpenPosition {
    fn fill(self, index: usize) -> Transaction {
        Transaction {
            entry_index: self.entry_index,
            entry_price: self.entry_price,
            target_price: self.target_price,
            exit_index: index,
            exit_price: self.target_price,
            is_timeout: false,
            profit: self.target_price - self.entry_price,
            has_profit: true,
            weight: self.weight,
        }
    }

    fn time_out(self, index: usize, close: f64) -> Transaction {
        let profit = close - self.entry_price;
        Transaction {
            entry_index: self.entry_index,
            entry_price: self.entry_price,
            target_price: self.target_price,
            exit_index: index,
            exit_price: close,
            is_timeout: true,
            profit,
            has_profit: profit > 0.0,
            weight: self.weight,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum TradeState {
    Flat,
    Holding(OpenPosition),
}

/// Output of one simulation pass
#[derive(Debug, Clone, Default, Serialize)]
pub struct TradeLedger {
    pub transactions: Vec<Transaction>,
    /// Rows meeting the buy condition, whether or not a position was opened
    pub total_buy_signal_count: usize,
    /// Rows replayed
    pub total_rows: usize,
    /// Position dropped because the pass ended first
    pub unfilled: Option<OpenPosition>,
}

/// Weight of a transaction opened on the `step`-th simulated row (the first row is step 1)
pub fn transaction_weight(step: usize, performance_weight: f64) -> f64 {
    1.0 + step as f64 * (performance_weight - 1.0) / ANNUAL_STEP_COUNT
}

/// Replay `input` for one config
pub fn simulate_trades(
    input: &SimulationInput<'_>,
    config: &SignalModelConfig,
    performance_weight: f64,
) -> TradeLedger {
    let mut ledger = TradeLedger {
        total_rows: input.len(),
        ..TradeLedger::default()
    };
    let mut state = TradeState::Flat;

    for index in 0..input.len() {
        let is_buy_signal = config.is_buy_signal(input.primary[index], input.secondary[index]);
        if is_buy_signal {
            ledger.total_buy_signal_count += 1;
        }

        state = match state {
            TradeState::Flat if is_buy_signal => {
                let entry_price = input.close[index];
                TradeState::Holding(OpenPosition {
                    entry_index: index,
                    entry_price,
                    target_price: entry_price * config.target_price_multiplier,
                    weight: transaction_weight(index + 1, performance_weight),
                })
            }
            TradeState::Flat => TradeState::Flat,
            TradeState::Holding(position) => {
                if input.high[index] >= position.target_price {
                    ledger.transactions.push(position.fill(index));
                    TradeState::Flat
                } else if index - position.entry_index > config.timeout_steps {
                    ledger.transactions.push(position.time_out(index, input.close[index]));
                    TradeState::Flat
                } else {
                    TradeState::Holding(position)
                }
            }
        };
    }

    if let TradeState::Holding(position) = state {
        ledger.unfilled = Some(position);
    }
    ledger
}
