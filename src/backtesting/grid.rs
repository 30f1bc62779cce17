//! Grid Search Driver
//!
//! Enumerates every combination of the signal grid, simulates each one over the
//! same read-only rows and ranks the outcomes by weighted monthly profit.

use crate::backtesting::performance::PerformanceRecord;
use crate::backtesting::simulator::{simulate_trades, SignalModelConfig, SimulationInput};
use crate::error::{BacktestError, Result};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::collections::HashSet;
use std::fs;
use std::path::Path;
use tracing::info;

/// Decimals kept for grid parameters in result rows
pub const PARAMETER_DECIMALS: i32 = 3;
const PARAMETER_SCALE: f64 = 1_000.0;

/// Candidate values for each [`SignalModelConfig`] field
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SignalGrid {
    pub threshold_buy_primary: Vec<f64>,
    pub threshold_buy_secondary: Vec<f64>,
    pub target_price_multiplier: Vec<f64>,
    pub timeout_steps: Vec<usize>,
}

impl Default for SignalGrid {
    fn default() -> Self {
        Self {
            threshold_buy_primary: (20..=35).map(|v| v as f64 / 100.0).collect(),
            threshold_buy_secondary: vec![0.06, 0.065, 0.07, 0.075, 0.08],
            target_price_multiplier: vec![1.016, 1.017, 1.018, 1.019],
            timeout_steps: vec![65, 70, 75],
        }
    }
}

impl SignalGrid {
    /// Read a grid from YAML; every field is required
    pub fn from_yaml_file(path: &Path) -> Result<Self> {
        let text = fs::read_to_string(path).map_err(|e| {
            BacktestError::DataUnavailable(format!("grid file {}: {}", path.display(), e))
        })?;
        let grid: SignalGrid = serde_yaml::from_str(&text).map_err(|e| {
            BacktestError::InvalidParameterGrid(format!("{}: {}", path.display(), e))
        })?;
        grid.validate()?;
        Ok(grid)
    }

    pub fn validate(&self) -> Result<()> {
        let float_fields = [
            ("threshold_buy_primary", &self.threshold_buy_primary),
            ("threshold_buy_secondary", &self.threshold_buy_secondary),
            ("target_price_multiplier", &self.target_price_multiplier),
        ];
        for (name, values) in float_fields {
            if values.is_empty() {
                return Err(BacktestError::InvalidParameterGrid(format!("{} is empty", name)));
            }
            if values.iter().any(|v| !v.is_finite()) {
                return Err(BacktestError::InvalidParameterGrid(format!(
                    "{} contains a non-finite value",
                    name
                )));
            }
            // distinct at the precision of result rows and resume keys
            let mut seen = HashSet::new();
            for &value in values.iter() {
                if !seen.insert((value * PARAMETER_SCALE).round() as i64) {
                    return Err(BacktestError::InvalidParameterGrid(format!(
                        "{} value {} duplicates another value at {} decimals",
                        name, value, PARAMETER_DECIMALS
                    )));
                }
            }
        }
        if self.timeout_steps.is_empty() {
            return Err(BacktestError::InvalidParameterGrid("timeout_steps is empty".into()));
        }
        let mut seen = HashSet::new();
        if let Some(t) = self.timeout_steps.iter().find(|&&t| !seen.insert(t)) {
            return Err(BacktestError::InvalidParameterGrid(format!(
                "timeout_steps value {} is listed twice",
                t
            )));
        }
        if self.target_price_multiplier.iter().any(|&m| m <= 0.0) {
            return Err(BacktestError::InvalidParameterGrid(
                "target_price_multiplier must be positive".into(),
            ));
        }
        Ok(())
    }

    /// Number of grid points
    pub fn len(&self) -> usize {
        self.threshold_buy_primary.len()
            * self.threshold_buy_secondary.len()
            * self.target_price_multiplier.len()
            * self.timeout_steps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Cartesian product, `threshold_buy_primary` slowest and `timeout_steps` fastest
    pub fn configs(&self) -> Result<Vec<SignalModelConfig>> {
        self.validate()?;

        let mut configs = Vec::with_capacity(self.len());
        for &threshold_buy_primary in &self.threshold_buy_primary {
            for &threshold_buy_secondary in &self.threshold_buy_secondary {
                for &target_price_multiplier in &self.target_price_multiplier {
                    for &timeout_steps in &self.timeout_steps {
                        configs.push(SignalModelConfig {
                            threshold_buy_primary,
                            threshold_buy_secondary,
                            target_price_multiplier,
                            timeout_steps,
                        });
                    }
                }
            }
        }
        Ok(configs)
    }
}

/// Outcome of one grid point
#[derive(Debug, Clone, PartialEq)]
pub struct GridResult {
    pub config: SignalModelConfig,
    /// `None` when the config produced no completed transaction
    pub performance: Option<PerformanceRecord>,
    pub total_buy_signal_count: usize,
}

impl GridResult {
    fn sort_key(&self) -> Option<f64> {
        self.performance.map(|p| p.weighted_profit_per_month)
    }
}

/// Simulates configs over one [`SimulationInput`]
pub struct GridSearch<'a> {
    input: SimulationInput<'a>,
    performance_weight: f64,
    parallel: bool,
}

impl<'a> GridSearch<'a> {
    pub fn new(input: SimulationInput<'a>, performance_weight: f64) -> Self {
        Self {
            input,
            performance_weight,
            parallel: true,
        }
    }

    pub fn with_parallel(mut self, parallel: bool) -> Self {
        self.parallel = parallel;
        self
    }

    pub fn evaluate(&self, config: &SignalModelConfig) -> GridResult {
        let ledger = simulate_trades(&self.input, config, self.performance_weight);
        GridResult {
            config: *config,
            performance: PerformanceRecord::from_ledger(&ledger),
            total_buy_signal_count: ledger.total_buy_signal_count,
        }
    }

    /// One result per config, in config order
    pub fn run(&self, configs: &[SignalModelConfig]) -> Vec<GridResult> {
        info!(
            "🔍 Grid search: {} configs over {} rows ({})",
            configs.len(),
            self.input.len(),
            if self.parallel { "parallel" } else { "sequential" }
        );

        let results: Vec<GridResult> = if self.parallel {
            configs.par_iter().map(|c| self.evaluate(c)).collect()
        } else {
            configs.iter().map(|c| self.evaluate(c)).collect()
        };

        let empty = results.iter().filter(|r| r.performance.is_none()).count();
        info!("✅ Grid search finished: {} results, {} without transactions", results.len(), empty);
        results
    }
}

/// Best `weighted_profit_per_month` first; empty results last, ties keep input order
pub fn rank_results(results: &mut [GridResult]) {
    results.sort_by(|a, b| match (a.sort_key(), b.sort_key()) {
        (Some(x), Some(y)) => y.total_cmp(&x),
        (Some(_), None) => Ordering::Less,
        (None, Some(_)) => Ordering::Greater,
        (None, None) => Ordering::Equal,
    });
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ResultStatus {
    Ok,
    Empty,
}

/// Header of the results table, in column order
pub const RESULT_COLUMNS: [&str; 18] = [
    "threshold_buy_primary",
    "threshold_buy_secondary",
    "target_price_multiplier",
    "timeout_steps",
    "status",
    "transaction_count",
    "transactions_per_month",
    "profit_per_transaction",
    "profit_per_month",
    "weighted_profit_per_transaction",
    "weighted_profit_per_month",
    "limit_percentage",
    "limit_fill_time",
    "limit_fill_time_std",
    "timeout_percentage",
    "loss_percentage",
    "loss_per_transaction",
    "loss_per_month",
];

/// One line of the results table: rounded parameters, status, rounded metrics
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GridResultRow {
    pub threshold_buy_primary: f64,
    pub threshold_buy_secondary: f64,
    pub target_price_multiplier: f64,
    pub timeout_steps: usize,
    pub status: ResultStatus,
    pub transaction_count: Option<usize>,
    pub transactions_per_month: Option<f64>,
    pub profit_per_transaction: Option<f64>,
    pub profit_per_month: Option<f64>,
    pub weighted_profit_per_transaction: Option<f64>,
    pub weighted_profit_per_month: Option<f64>,
    pub limit_percentage: Option<f64>,
    pub limit_fill_time: Option<f64>,
    pub limit_fill_time_std: Option<f64>,
    pub timeout_percentage: Option<f64>,
    pub loss_percentage: Option<f64>,
    pub loss_per_transaction: Option<f64>,
    pub loss_per_month: Option<f64>,
}

fn round_to(value: f64, decimals: i32) -> f64 {
    let scale = 10f64.powi(decimals);
    (value * scale).round() / scale
}

fn metric(value: f64) -> Option<f64> {
    Some(round_to(value, 2))
}

impl From<&GridResult> for GridResultRow {
    fn from(result: &GridResult) -> Self {
        let c = &result.config;
        let p = result.performance.as_ref();
        Self {
            threshold_buy_primary: round_to(c.threshold_buy_primary, PARAMETER_DECIMALS),
            threshold_buy_secondary: round_to(c.threshold_buy_secondary, PARAMETER_DECIMALS),
            target_price_multiplier: round_to(c.target_price_multiplier, PARAMETER_DECIMALS),
            timeout_steps: c.timeout_steps,
            status: if p.is_some() {
                ResultStatus::Ok
            } else {
                ResultStatus::Empty
            },
            transaction_count: p.map(|p| p.transaction_count),
            transactions_per_month: p.and_then(|p| metric(p.transactions_per_month)),
            profit_per_transaction: p.and_then(|p| metric(p.profit_per_transaction)),
            profit_per_month: p.and_then(|p| metric(p.profit_per_month)),
            weighted_profit_per_transaction: p
                .and_then(|p| metric(p.weighted_profit_per_transaction)),
            weighted_profit_per_month: p.and_then(|p| metric(p.weighted_profit_per_month)),
            limit_percentage: p.and_then(|p| metric(p.limit_percentage)),
            limit_fill_time: p.and_then(|p| metric(p.limit_fill_time)),
            limit_fill_time_std: p.and_then(|p| metric(p.limit_fill_time_std)),
            timeout_percentage: p.and_then(|p| metric(p.timeout_percentage)),
            loss_percentage: p.and_then(|p| metric(p.loss_percentage)),
            loss_per_transaction: p.and_then(|p| metric(p.loss_per_transaction)),
            loss_per_month: p.and_then(|p| metric(p.loss_per_month)),
        }
    }
}

impl GridResultRow {
    pub fn parameter_key(&self) -> String {
        parameter_key_of(
            self.threshold_buy_primary,
            self.threshold_buy_secondary,
            self.target_price_multiplier,
            self.timeout_steps,
        )
    }
}

/// Identity of a grid point at the precision written to the results table
pub fn parameter_key(config: &SignalModelConfig) -> String {
    parameter_key_of(
        config.threshold_buy_primary,
        config.threshold_buy_secondary,
        config.target_price_multiplier,
        config.timeout_steps,
    )
}

fn parameter_key_of(primary: f64, secondary: f64, multiplier: f64, timeout: usize) -> String {
    format!(
        "{:.3}|{:.3}|{:.3}|{}",
        round_to(primary, PARAMETER_DECIMALS),
        round_to(secondary, PARAMETER_DECIMALS),
        round_to(multiplier, PARAMETER_DECIMALS),
        timeout
    )
}
