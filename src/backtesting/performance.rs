//! Performance metrics calculated from a trade ledger

use crate::backtesting::simulator::TradeLedger;
use serde::{Deserialize, Serialize};

/// Rows in one month of 1m klines (30.5 days)
pub const MONTH_STEP_COUNT: f64 = 43_920.0;

/// Aggregate statistics of one simulated config
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PerformanceRecord {
    pub transaction_count: usize,
    pub transactions_per_month: f64,
    /// Mean profit per transaction
    pub profit_per_transaction: f64,
    pub profit_per_month: f64,
    /// Weight-averaged profit per transaction
    pub weighted_profit_per_transaction: f64,
    /// Weighted profit per transaction times the unweighted monthly frequency
    pub weighted_profit_per_month: f64,
    /// Share of transactions closed at the target, in percent
    pub limit_percentage: f64,
    /// Mean rows to fill, limit exits only
    pub limit_fill_time: f64,
    /// Population standard deviation of `limit_fill_time`
    pub limit_fill_time_std: f64,
    pub timeout_percentage: f64,
    /// Share of transactions without profit, in percent
    pub loss_percentage: f64,
    /// Summed losses over all transactions
    pub loss_per_transaction: f64,
    pub loss_per_month: f64,
}

impl PerformanceRecord {
    /// Reduce a ledger; `None` when it holds no transaction
    pub fn from_ledger(ledger: &TradeLedger) -> Option<Self> {
        let transactions = &ledger.transactions;
        if transactions.is_empty() {
            return None;
        }

        let count = transactions.len() as f64;
        let transactions_per_month = count / (ledger.total_rows as f64 / MONTH_STEP_COUNT);

        let profit_per_transaction = transactions.iter().map(|t| t.profit).sum::<f64>() / count;

        let weight_sum: f64 = transactions.iter().map(|t| t.weight).sum();
        let weighted_profit_per_transaction = if weight_sum > 0.0 {
            transactions.iter().map(|t| t.weight * t.profit).sum::<f64>() / weight_sum
        } else {
            profit_per_transaction
        };

        let fill_times: Vec<f64> = transactions
            .iter()
            .filter(|t| !t.is_timeout)
            .map(|t| t.fill_time() as f64)
            .collect();
        let (limit_fill_time, limit_fill_time_std) = mean_and_std(&fill_times);
        let limit_percentage = fill_times.len() as f64 / count * 100.0;

        let timeouts = transactions.iter().filter(|t| t.is_timeout).count() as f64;

        let losses: Vec<f64> = transactions
            .iter()
            .filter(|t| !t.has_profit)
            .map(|t| t.profit)
            .collect();
        let loss_per_transaction = losses.iter().sum::<f64>() / count;

        Some(Self {
            transaction_count: transactions.len(),
            transactions_per_month,
            profit_per_transaction,
            profit_per_month: profit_per_transaction * transactions_per_month,
            weighted_profit_per_transaction,
            weighted_profit_per_month: weighted_profit_per_transaction * transactions_per_month,
            limit_percentage,
            limit_fill_time,
            limit_fill_time_std,
            timeout_percentage: timeouts / count * 100.0,
            loss_percentage: losses.len() as f64 / count * 100.0,
            loss_per_transaction,
            loss_per_month: loss_per_transaction * transactions_per_month,
        })
    }
}

/// Mean and population std; both 0.0 for an empty slice
fn mean_and_std(values: &[f64]) -> (f64, f64) {
    if values.is_empty() {
        return (0.0, 0.0);
    }
    let n = values.len() as f64;
    let mean = values.iter().sum::<f64>() / n;
    let variance = values.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / n;
    (mean, variance.sqrt())
}
