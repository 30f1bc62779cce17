//! Tests para ML Engine

mod common;

use common::{synthetic_klines, test_config, MINUTE_MS, START_MS};
use ndarray::{Array1, Array2};
use signal_lab::error::{BacktestError, Result};
use signal_lab::ml_engine::{
    evaluate_predictions, GbParams, GradientBoostingModel, GradientBoostingTrainer, HistorySpec,
    LabelModel, LabelTrainer, ModelArtifact, PredictionKey, RollingPlan, RollingPredictor,
};
use signal_lab::persistence::{load_table, write_table};
use signal_lab::pipeline::{run_predict, run_train, PredictOptions, TrainOptions};
use signal_lab::types::{format_timestamp, TimeSeries};
use std::collections::BTreeMap;
use std::fs;
use std::sync::Mutex;

/// Records the rows it was trained on and scores each row with its own index
#[derive(Default)]
struct RowSpy {
    trained_rows: Mutex<Vec<Vec<usize>>>,
}

struct RowEcho;

impl LabelModel for RowEcho {
    fn predict_scores(&self, x: &Array2<f64>) -> Result<Vec<f64>> {
        Ok(x.column(0).to_vec())
    }
}

impl LabelTrainer for RowSpy {
    type Model = RowEcho;

    fn fit(&self, x: &Array2<f64>, _y: &Array1<f64>) -> Result<RowEcho> {
        let rows = x.column(0).iter().map(|&r| r as usize).collect();
        self.trained_rows.lock().unwrap().push(rows);
        Ok(RowEcho)
    }

    fn describe(&self) -> String {
        "spy".into()
    }
}

fn indexed_series(rows: usize) -> TimeSeries {
    TimeSeries::new((0..rows as i64).collect())
        .with_column("row", (0..rows).map(|r| r as f64).collect())
        .unwrap()
        .with_column("label", (0..rows).map(|r| (r % 2) as f64).collect())
        .unwrap()
}

fn spy_plan(prediction_start: usize, iterations: Option<usize>) -> RollingPlan {
    RollingPlan {
        prediction_start,
        step: 7,
        iterations,
        labels_horizon: 5,
        labels: vec!["label".into()],
        features: vec!["row".into()],
        histories: vec![HistorySpec::new("03", 12), HistorySpec::new("12", 1000)],
    }
}

fn fast_params() -> GbParams {
    GbParams {
        max_depth: Some(3),
        learning_rate: 0.3,
        num_boost_round: 8,
        min_samples_leaf: 5,
    }
}

// ============================================================================
// Tests de Rolling Predictor
// ============================================================================

#[test]
fn test_no_training_row_reaches_prediction_start() {
    let predictor = RollingPredictor::new(RowSpy::default(), spy_plan(40, None)).unwrap();
    let output = predictor.run(&indexed_series(100)).unwrap();

    let trained = predictor.trainer().trained_rows.lock().unwrap().clone();
    assert_eq!(trained.len(), output.windows.len() * 2);

    let mut fits = trained.iter();
    for window in &output.windows {
        assert_eq!(window.train_end, window.prediction.start - 5 - 1);
        for training in &window.training {
            let rows = fits.next().unwrap();
            assert_eq!(rows.len(), training.rows.len());
            // a row's label looks 5 rows ahead; it must end before the segment
            assert!(rows.iter().all(|&r| r + 5 < window.prediction.start));
        }
    }
}

#[test]
fn test_segments_tile_the_predicted_range() {
    let predictor = RollingPredictor::new(RowSpy::default(), spy_plan(40, None)).unwrap();
    let output = predictor.run(&indexed_series(100)).unwrap();

    // floor((100 - 40) / 7)
    assert_eq!(output.windows.len(), 8);
    assert_eq!(output.table.rows(), 40..96);
    for pair in output.windows.windows(2) {
        assert_eq!(pair[0].prediction.end, pair[1].prediction.start);
    }

    // RowEcho scores every row with its own index, so alignment is exact
    for history in ["03", "12"] {
        let scores = output.table.scores(&PredictionKey::new("label", history)).unwrap();
        let expected: Vec<f64> = (40..96).map(|r| r as f64).collect();
        assert_eq!(scores, expected.as_slice());
    }
}

#[test]
fn test_short_history_clamps_and_long_history_starts_at_zero() {
    let predictor = RollingPredictor::new(RowSpy::default(), spy_plan(40, Some(2))).unwrap();
    let output = predictor.run(&indexed_series(100)).unwrap();

    let first = &output.windows[0];
    assert_eq!(first.training[0].rows, 22..34);
    assert_eq!(first.training[1].rows, 0..34);
    assert_eq!(output.table.rows(), 40..54);
}

#[test]
fn test_explicit_count_past_end_is_data_unavailable() {
    let predictor = RollingPredictor::new(RowSpy::default(), spy_plan(40, Some(9))).unwrap();
    let err = predictor.run(&indexed_series(100)).unwrap_err();
    assert!(matches!(err, BacktestError::DataUnavailable(_)));
}

#[test]
fn test_missing_feature_column() {
    let mut plan = spy_plan(40, None);
    plan.features = vec!["row".into(), "volume".into()];
    let predictor = RollingPredictor::new(RowSpy::default(), plan).unwrap();
    let err = predictor.run(&indexed_series(100)).unwrap_err();
    assert!(err.to_string().contains("volume"));
}

#[test]
fn test_start_before_horizon_predicts_prior() {
    let series = synthetic_klines(120, 3);
    let plan = RollingPlan {
        prediction_start: 3,
        step: 10,
        iterations: Some(1),
        labels_horizon: 10,
        labels: vec!["label_up".into()],
        features: vec!["f1".into()],
        histories: vec![HistorySpec::new("12", 500)],
    };
    let predictor = RollingPredictor::new(GradientBoostingTrainer::new(fast_params()), plan).unwrap();
    let output = predictor.run(&series).unwrap();

    assert_eq!(output.windows[0].train_end, 0);
    let scores = output.table.scores(&PredictionKey::new("label_up", "12")).unwrap();
    assert!(scores.iter().all(|&s| s == 0.5));
}

#[test]
fn test_gradient_boosting_learns_rolling_label() {
    let series = synthetic_klines(600, 11);
    let plan = RollingPlan {
        prediction_start: 300,
        step: 100,
        iterations: None,
        labels_horizon: 10,
        labels: vec!["label_up".into(), "label_noise".into()],
        features: vec!["f1".into(), "f2".into()],
        histories: vec![HistorySpec::new("12", 250)],
    };
    let keys = plan.keys();
    let predictor = RollingPredictor::new(GradientBoostingTrainer::new(fast_params()), plan).unwrap();
    let output = predictor.run(&series).unwrap();

    let report = evaluate_predictions(&output.table, &series, &keys).unwrap();
    assert!(report.scores["label_up_gb_12"] > 0.9);
    assert!(report.scores["label_noise_gb_12"] < 0.8);
    assert!(report.mean > 0.0);
}

// ============================================================================
// Tests de Accuracy
// ============================================================================

#[test]
fn test_single_class_label_gets_sentinel() {
    let mut series = synthetic_klines(200, 5);
    series.push_column("label_noise", vec![1.0; 200]).unwrap();

    let plan = RollingPlan {
        prediction_start: 100,
        step: 50,
        iterations: None,
        labels_horizon: 10,
        labels: vec!["label_up".into(), "label_noise".into()],
        features: vec!["f1".into()],
        histories: vec![HistorySpec::new("12", 1000)],
    };
    let keys = plan.keys();
    let predictor = RollingPredictor::new(GradientBoostingTrainer::new(fast_params()), plan).unwrap();
    let output = predictor.run(&series).unwrap();

    let report = evaluate_predictions(&output.table, &series, &keys).unwrap();
    assert_eq!(report.scores["label_noise_gb_12"], 0.0);
    assert!(report.scores["label_up_gb_12"] > 0.5);
}

// ============================================================================
// Tests de Pipeline (predict / train)
// ============================================================================

#[test]
fn test_predict_command_writes_table_and_log() {
    let dir = tempfile::tempdir().unwrap();
    let input = dir.path().join("klines.csv");
    write_table(&synthetic_klines(400, 7), &input).unwrap();

    let mut config = test_config(dir.path());
    config.rolling.in_file = "klines.csv".into();
    config.rolling.out_file = "predictions".into();
    config.rolling.prediction_start = format_timestamp(START_MS + 200 * MINUTE_MS);
    config.rolling.prediction_length = 50;
    config.rolling.label_histories = BTreeMap::from([("12".to_string(), 150)]);

    let summary = run_predict(&config, &PredictOptions::default()).unwrap();
    assert_eq!(summary.iterations, 4);
    assert_eq!(summary.rows, 200);
    assert!(summary.table_path.ends_with("predictions.csv"));

    let table = load_table(&summary.table_path, None).unwrap();
    assert_eq!(table.len(), 200);
    assert_eq!(table.timestamps()[0], START_MS + 200 * MINUTE_MS);
    assert!(table.has_column("label_up_gb_12"));
    assert!(table.has_column("label_noise_gb_12"));
    assert!(table.has_column("close"));

    run_predict(&config, &PredictOptions::default()).unwrap();
    let log = fs::read_to_string(&summary.log_path).unwrap();
    assert_eq!(log.lines().count(), 2);
    assert!(log.starts_with("None, 0.1, 100, Mean AUC "));
}

#[test]
fn test_predict_parquet_output() {
    let dir = tempfile::tempdir().unwrap();
    let input = dir.path().join("klines.parquet");
    write_table(&synthetic_klines(300, 9), &input).unwrap();

    let mut config = test_config(dir.path());
    config.rolling.in_file = "klines.parquet".into();
    config.rolling.out_format = "parquet".into();
    config.rolling.prediction_start = format_timestamp(START_MS + 200 * MINUTE_MS);
    config.rolling.prediction_length = 25;
    config.rolling.prediction_count = Some(2);

    let summary = run_predict(&config, &PredictOptions::default()).unwrap();
    assert_eq!(summary.table_path.extension().unwrap(), "parquet");
    assert_eq!(load_table(&summary.table_path, None).unwrap().len(), 50);
}

#[test]
fn test_predict_start_after_last_row() {
    let dir = tempfile::tempdir().unwrap();
    write_table(&synthetic_klines(50, 1), &dir.path().join("klines.csv")).unwrap();

    let mut config = test_config(dir.path());
    config.rolling.in_file = "klines.csv".into();
    config.rolling.prediction_start = "2030-01-01 00:00:00".into();

    let err = run_predict(&config, &PredictOptions::default()).unwrap_err();
    assert!(matches!(
        err.downcast_ref::<BacktestError>(),
        Some(BacktestError::DataUnavailable(_))
    ));
}

#[test]
fn test_predict_unsupported_input_format() {
    let dir = tempfile::tempdir().unwrap();
    let mut config = test_config(dir.path());
    config.rolling.in_file = "klines.xlsx".into();

    let err = run_predict(&config, &PredictOptions::default()).unwrap_err();
    assert!(matches!(
        err.downcast_ref::<BacktestError>(),
        Some(BacktestError::UnsupportedFormat(_))
    ));
}

#[test]
fn test_train_command_saves_artifacts() {
    let dir = tempfile::tempdir().unwrap();
    write_table(&synthetic_klines(300, 21), &dir.path().join("klines.csv")).unwrap();

    let mut config = test_config(dir.path());
    config.training.in_file = "klines.csv".into();
    config.training.models_dir = dir.path().join("models").display().to_string();
    config.training.label_histories =
        BTreeMap::from([("03".to_string(), 100), ("06".to_string(), 200)]);

    let summary = run_train(&config, &TrainOptions::default()).unwrap();
    assert_eq!(summary.artifacts.len(), 4);
    assert!(summary.models.iter().any(|m| m.key == "label_up_gb_06" && m.train_rows == 200));

    let key = PredictionKey::new("label_up", "03");
    let artifact =
        ModelArtifact::<GradientBoostingModel>::load(&dir.path().join("models"), &key).unwrap();
    assert_eq!(artifact.features, vec!["f1", "f2"]);
    assert!(artifact.train_auc > 0.9);
    assert!(dir.path().join("models").join("training.txt").exists());
}
