//! Tests para Backtesting: simulador, métricas y grid search

mod common;

use common::{flat_predictions, test_config};
use signal_lab::backtesting::{
    simulate_trades, GridSearch, PerformanceRecord, ResultStatus, SignalGrid, SignalModelConfig,
    SimulationInput, TradeLedger, RESULT_COLUMNS,
};
use signal_lab::error::BacktestError;
use signal_lab::persistence::{write_table, ResultsTable};
use signal_lab::pipeline::{run_signals, SignalsOptions};
use signal_lab::types::TimeSeries;
use std::fs;

fn config(timeout_steps: usize) -> SignalModelConfig {
    SignalModelConfig {
        threshold_buy_primary: 0.5,
        threshold_buy_secondary: 0.4,
        target_price_multiplier: 1.02,
        timeout_steps,
    }
}

fn simulate(series: &TimeSeries, config: &SignalModelConfig) -> TradeLedger {
    let input = SimulationInput::from_series(series, 0..series.len(), "score_a", "score_b").unwrap();
    simulate_trades(&input, config, 12.0)
}

fn set(series: &mut TimeSeries, column: &str, row: usize, value: f64) {
    let mut values = series.column(column).unwrap().to_vec();
    values[row] = value;
    series.push_column(column, values).unwrap();
}

fn signal_at(series: &mut TimeSeries, row: usize) {
    set(series, "score_a", row, 0.9);
    set(series, "score_b", row, 0.9);
}

// ============================================================================
// Tests de Simulador
// ============================================================================

#[test]
fn test_signal_then_crossing_fills_once() {
    let mut series = flat_predictions(200);
    signal_at(&mut series, 50);
    set(&mut series, "high", 80, 102.5);

    let ledger = simulate(&series, &config(100));
    assert_eq!(ledger.transactions.len(), 1);

    let t = ledger.transactions[0];
    assert!(!t.is_timeout);
    assert!(t.has_profit);
    assert_eq!(t.entry_index, 50);
    assert_eq!(t.exit_index, 80);
    assert!((t.profit - 2.0).abs() < 1e-9);
}

#[test]
fn test_signal_without_crossing_times_out() {
    let mut series = flat_predictions(200);
    signal_at(&mut series, 50);
    set(&mut series, "close", 61, 99.0);

    let ledger = simulate(&series, &config(10));
    assert_eq!(ledger.transactions.len(), 1);

    let t = ledger.transactions[0];
    assert!(t.is_timeout);
    assert_eq!(t.exit_index, 50 + 10 + 1);
    assert_eq!(t.exit_price, 99.0);
    assert!(!t.has_profit);
}

#[test]
fn test_trailing_open_transaction_excluded() {
    let mut series = flat_predictions(200);
    signal_at(&mut series, 195);

    let ledger = simulate(&series, &config(50));
    assert!(ledger.transactions.is_empty());
    assert_eq!(ledger.unfilled.map(|p| p.entry_index), Some(195));
    assert!(PerformanceRecord::from_ledger(&ledger).is_none());
}

#[test]
fn test_simulation_is_deterministic() {
    let series = common::synthetic_klines(2_000, 42)
        .with_column("score_a", (0..2_000).map(|i| ((i * 37) % 100) as f64 / 100.0).collect())
        .unwrap()
        .with_column("score_b", (0..2_000).map(|i| ((i * 11) % 100) as f64 / 100.0).collect())
        .unwrap();
    let cfg = SignalModelConfig {
        threshold_buy_primary: 0.6,
        threshold_buy_secondary: 0.3,
        target_price_multiplier: 1.002,
        timeout_steps: 30,
    };

    let first = simulate(&series, &cfg);
    let second = simulate(&series, &cfg);
    assert_eq!(first.transactions, second.transactions);
    assert!(!first.transactions.is_empty());

    let mut open_until = None;
    for t in &first.transactions {
        assert!(t.exit_index > t.entry_index);
        if let Some(previous_exit) = open_until {
            assert!(t.entry_index > previous_exit);
        }
        open_until = Some(t.exit_index);
    }
}

// ============================================================================
// Tests de Grid Search
// ============================================================================

fn grid() -> SignalGrid {
    SignalGrid {
        threshold_buy_primary: vec![0.5, 0.95],
        threshold_buy_secondary: vec![0.4],
        target_price_multiplier: vec![1.02, 1.05],
        timeout_steps: vec![10, 100],
    }
}

#[test]
fn test_grid_returns_one_result_per_point() {
    let mut series = flat_predictions(200);
    signal_at(&mut series, 50);
    set(&mut series, "high", 80, 102.5);

    let configs = grid().configs().unwrap();
    let input = SimulationInput::from_series(&series, 0..200, "score_a", "score_b").unwrap();
    let parallel = GridSearch::new(input, 12.0).run(&configs);
    let sequential = GridSearch::new(input, 12.0).with_parallel(false).run(&configs);

    assert_eq!(parallel.len(), 8);
    assert_eq!(parallel, sequential);
    // primary threshold 0.95 never triggers
    assert!(parallel[4..].iter().all(|r| r.performance.is_none()));
    assert!(parallel[..4].iter().all(|r| r.performance.is_some()));
}

fn write_predictions(dir: &std::path::Path) {
    let mut series = flat_predictions(400);
    signal_at(&mut series, 150);
    set(&mut series, "high", 170, 102.5);
    write_table(&series, &dir.join("predictions.csv")).unwrap();
}

#[test]
fn test_signals_command_writes_ranked_rows() {
    let dir = tempfile::tempdir().unwrap();
    write_predictions(dir.path());

    let mut config = test_config(dir.path());
    config.signals.in_file = "predictions.csv".into();
    config.signals.grid = grid();

    let summary = run_signals(&config, &SignalsOptions::default()).unwrap();
    assert_eq!(summary.evaluated, 8);
    assert_eq!(summary.rows.len(), 8);
    assert_eq!(summary.rows[0].status, ResultStatus::Ok);
    assert_eq!(summary.rows[7].status, ResultStatus::Empty);

    let text = fs::read_to_string(&summary.results_path).unwrap();
    let mut lines = text.lines();
    assert_eq!(lines.next().unwrap(), RESULT_COLUMNS.join(","));
    assert_eq!(lines.count(), 8);

    let empty_line = text.lines().last().unwrap();
    assert!(empty_line.contains(",empty,"));
    assert!(empty_line.ends_with(",,,"));
}

#[test]
fn test_signals_resume_skips_completed_points() {
    let dir = tempfile::tempdir().unwrap();
    write_predictions(dir.path());

    let mut config = test_config(dir.path());
    config.signals.in_file = "predictions.csv".into();
    config.signals.grid = SignalGrid {
        timeout_steps: vec![10],
        ..grid()
    };
    run_signals(&config, &SignalsOptions::default()).unwrap();

    config.signals.grid = grid();
    let summary = run_signals(
        &config,
        &SignalsOptions {
            resume: true,
            ..SignalsOptions::default()
        },
    )
    .unwrap();
    assert_eq!(summary.skipped, 4);
    assert_eq!(summary.evaluated, 4);

    let rows = ResultsTable::open(&summary.results_path).unwrap().read_rows().unwrap();
    assert_eq!(rows.len(), 8);
}

#[test]
fn test_signals_resume_rejects_values_sharing_a_row_key() {
    let dir = tempfile::tempdir().unwrap();
    write_predictions(dir.path());

    let mut config = test_config(dir.path());
    config.signals.in_file = "predictions.csv".into();
    config.signals.grid = SignalGrid {
        threshold_buy_primary: vec![0.2501],
        threshold_buy_secondary: vec![0.4],
        target_price_multiplier: vec![1.02],
        timeout_steps: vec![10],
    };
    let first = run_signals(&config, &SignalsOptions::default()).unwrap();
    assert_eq!(first.evaluated, 1);

    // 0.2504 would be written as 0.25 and mistaken for the stored row
    config.signals.grid.threshold_buy_primary = vec![0.2501, 0.2504];
    let err = run_signals(
        &config,
        &SignalsOptions {
            resume: true,
            ..SignalsOptions::default()
        },
    )
    .unwrap_err();
    assert!(matches!(
        err.downcast_ref::<BacktestError>(),
        Some(BacktestError::InvalidParameterGrid(_))
    ));

    let rows = ResultsTable::open(&first.results_path).unwrap().read_rows().unwrap();
    assert_eq!(rows.len(), 1);
}

#[test]
fn test_signals_yaml_grid_override() {
    let dir = tempfile::tempdir().unwrap();
    write_predictions(dir.path());
    let grid_path = dir.path().join("grid.yaml");
    fs::write(
        &grid_path,
        "threshold_buy_primary: [0.5]\n\
         threshold_buy_secondary: [0.4]\n\
         target_price_multiplier: [1.02]\n\
         timeout_steps: [5, 10, 20]\n",
    )
    .unwrap();

    let mut config = test_config(dir.path());
    config.signals.in_file = "predictions.csv".into();
    let summary = run_signals(
        &config,
        &SignalsOptions {
            grid: Some(grid_path),
            sequential: true,
            ..SignalsOptions::default()
        },
    )
    .unwrap();
    assert_eq!(summary.evaluated, 3);
}

#[test]
fn test_signals_empty_grid_is_fatal() {
    let dir = tempfile::tempdir().unwrap();
    write_predictions(dir.path());

    let mut config = test_config(dir.path());
    config.signals.in_file = "predictions.csv".into();
    config.signals.grid.threshold_buy_secondary.clear();

    let err = run_signals(&config, &SignalsOptions::default()).unwrap_err();
    assert!(matches!(
        err.downcast_ref::<BacktestError>(),
        Some(BacktestError::InvalidParameterGrid(_))
    ));
}

#[test]
fn test_signals_missing_score_column() {
    let dir = tempfile::tempdir().unwrap();
    write_predictions(dir.path());

    let mut config = test_config(dir.path());
    config.signals.in_file = "predictions.csv".into();
    config.signals.score_primary = "high_60_10_gb_12".into();

    let err = run_signals(&config, &SignalsOptions::default()).unwrap_err();
    assert!(matches!(
        err.downcast_ref::<BacktestError>(),
        Some(BacktestError::DataUnavailable(_))
    ));
}
