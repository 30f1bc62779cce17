//! Command pipelines: load inputs, run a stage, persist its outputs
//!
//! Each function takes the immutable [`AppConfig`] plus command-line overrides.

use crate::backtesting::{
    parameter_key, rank_results, simulation_range, GridResultRow, GridSearch, SignalGrid,
    SimulationInput,
};
use crate::config::AppConfig;
use crate::error::BacktestError;
use crate::ml_engine::{
    evaluate_predictions, AccuracyReport, FullHistoryTrainer, GbParams, GradientBoostingTrainer,
    HistorySpec, LabelTrainer, ModelArtifact, RollingPlan, RollingPredictor, TrainingSummary,
};
use crate::persistence::{append_line, load_table, write_table, ResultsTable, TableFormat};
use crate::types::{format_timestamp, parse_timestamp};
use anyhow::{Context, Result};
use std::path::{Path, PathBuf};
use tracing::info;

#[derive(Debug, Clone, Default)]
pub struct PredictOptions {
    pub input: Option<PathBuf>,
    /// Output stem; the extension follows `rolling.out_format`
    pub output: Option<PathBuf>,
}

#[derive(Debug, Clone)]
pub struct PredictSummary {
    pub table_path: PathBuf,
    pub log_path: PathBuf,
    pub rows: usize,
    pub iterations: usize,
    pub report: AccuracyReport,
}

fn with_extension(stem: &Path, ext: &str) -> PathBuf {
    PathBuf::from(format!("{}.{}", stem.display(), ext))
}

/// Rolling predictions over the configured input, with accuracy log
pub fn run_predict(config: &AppConfig, options: &PredictOptions) -> Result<PredictSummary> {
    let input = options
        .input
        .clone()
        .unwrap_or_else(|| config.in_path(&config.rolling.in_file));
    let series = load_table(&input, config.data.nrows)
        .with_context(|| format!("Failed to load {}", input.display()))?;

    let start_ts = parse_timestamp(&config.rolling.prediction_start).ok_or_else(|| {
        BacktestError::InvalidParameter(format!(
            "rolling.prediction_start '{}' is not a timestamp",
            config.rolling.prediction_start
        ))
    })?;
    let prediction_start = series.find_index(start_ts).ok_or_else(|| {
        BacktestError::DataUnavailable(format!(
            "no row at or after {}",
            config.rolling.prediction_start
        ))
    })?;
    info!(
        "📅 Prediction start {} is row {}",
        format_timestamp(series.timestamps()[prediction_start]),
        prediction_start
    );

    let params = GbParams::from_env()?;
    let plan = RollingPlan::from_config(&config.model, &config.rolling, prediction_start);
    let keys = plan.keys();
    let predictor = RollingPredictor::new(GradientBoostingTrainer::new(params), plan)?;
    let output = predictor.run(&series)?;

    let report = evaluate_predictions(&output.table, &series, &keys)?;
    info!("🎯 {}", report.summary_line());

    let stem = options
        .output
        .clone()
        .unwrap_or_else(|| config.out_path(&config.rolling.out_file));
    let format = TableFormat::from_name(&config.rolling.out_format)?;
    let table_path = with_extension(&stem, format.extension());
    let table = output.table.to_output(&series, &keys)?;
    write_table(&table, &table_path)
        .with_context(|| format!("Failed to write {}", table_path.display()))?;

    let log_path = with_extension(&stem, "txt");
    let line = format!("{}, {}", predictor.trainer().describe(), report.summary_line());
    append_line(&log_path, &line)?;

    Ok(PredictSummary {
        table_path,
        log_path,
        rows: table.len(),
        iterations: output.windows.len(),
        report,
    })
}

#[derive(Debug, Clone, Default)]
pub struct TrainOptions {
    pub input: Option<PathBuf>,
    pub models_dir: Option<PathBuf>,
}

#[derive(Debug, Clone)]
pub struct TrainSummary {
    pub artifacts: Vec<PathBuf>,
    pub models: Vec<TrainingSummary>,
}

/// One model per (label, history) on the latest rows, saved as JSON artifacts
pub fn run_train(config: &AppConfig, options: &TrainOptions) -> Result<TrainSummary> {
    let input = options
        .input
        .clone()
        .unwrap_or_else(|| config.in_path(&config.training.in_file));
    let models_dir = options
        .models_dir
        .clone()
        .unwrap_or_else(|| PathBuf::from(&config.training.models_dir));

    let series = load_table(&input, config.data.nrows)
        .with_context(|| format!("Failed to load {}", input.display()))?;

    let params = GbParams::from_env()?;
    let trainer = FullHistoryTrainer::new(
        GradientBoostingTrainer::new(params),
        config.model.labels.clone(),
        config.model.features.clone(),
        HistorySpec::from_map(&config.training.label_histories),
    );
    let trained = trainer.train(&series)?;

    let mut artifacts = Vec::with_capacity(trained.len());
    let mut models = Vec::with_capacity(trained.len());
    for entry in trained {
        let summary = entry.summary();
        info!(
            "🧠 {}: {} rows, train AUC {:.2}",
            summary.key, summary.train_rows, summary.train_auc
        );
        let artifact = ModelArtifact::new(
            &entry.key,
            trainer.features().to_vec(),
            params,
            entry.train_rows,
            entry.train_auc,
            entry.model,
        );
        artifacts.push(artifact.save(&models_dir)?);
        models.push(summary);
    }

    let line = format!(
        "{}, train {}",
        trainer.trainer().describe(),
        AccuracyReport::from_scores(
            models
                .iter()
                .map(|m| (m.key.clone(), m.train_auc))
                .collect()
        )
        .summary_line()
    );
    append_line(&models_dir.join("training.txt"), &line)?;

    Ok(TrainSummary { artifacts, models })
}

#[derive(Debug, Clone, Default)]
pub struct SignalsOptions {
    pub input: Option<PathBuf>,
    pub output: Option<PathBuf>,
    /// YAML grid replacing `signals.grid`
    pub grid: Option<PathBuf>,
    pub resume: bool,
    pub sequential: bool,
}

#[derive(Debug, Clone)]
pub struct SignalsSummary {
    pub results_path: PathBuf,
    pub evaluated: usize,
    pub skipped: usize,
    /// Appended rows, best first
    pub rows: Vec<GridResultRow>,
}

/// Grid search over the signal parameters, appending ranked rows to the results table
pub fn run_signals(config: &AppConfig, options: &SignalsOptions) -> Result<SignalsSummary> {
    let signals = &config.signals;
    let input = options
        .input
        .clone()
        .unwrap_or_else(|| config.in_path(&signals.in_file));
    let results_path = options
        .output
        .clone()
        .unwrap_or_else(|| config.out_path(&signals.out_file));

    let grid = match &options.grid {
        Some(path) => SignalGrid::from_yaml_file(path)?,
        None => signals.grid.clone(),
    };
    let mut configs = grid.configs()?;

    let series = load_table(&input, config.data.nrows)
        .with_context(|| format!("Failed to load {}", input.display()))?;
    let range = simulation_range(series.len(), signals.simulation_start, signals.simulation_end)?;
    info!(
        "📊 Simulating rows {}..{} ({} to {})",
        range.start,
        range.end,
        format_timestamp(series.timestamps()[range.start]),
        format_timestamp(series.timestamps()[range.end - 1])
    );
    let sim_input = SimulationInput::from_series(
        &series,
        range,
        &signals.score_primary,
        &signals.score_secondary,
    )?;

    let table = ResultsTable::open(&results_path)?;
    let mut skipped = 0;
    if signals.resume || options.resume {
        let done = table.completed_keys()?;
        let before = configs.len();
        configs.retain(|c| !done.contains(&parameter_key(c)));
        skipped = before - configs.len();
        info!("⏭️ Resume: {} of {} configs already in {}", skipped, before, table.path().display());
    }

    let parallel = signals.parallel && !options.sequential;
    let mut results = GridSearch::new(sim_input, signals.performance_weight)
        .with_parallel(parallel)
        .run(&configs);
    rank_results(&mut results);

    let rows: Vec<GridResultRow> = results.iter().map(GridResultRow::from).collect();
    table.append(&rows)?;

    for (rank, row) in rows.iter().take(signals.top_n).enumerate() {
        info!(
            "🏆 #{} primary={} secondary={} multiplier={} timeout={} -> {:?} weighted/month, {:?} tx",
            rank + 1,
            row.threshold_buy_primary,
            row.threshold_buy_secondary,
            row.target_price_multiplier,
            row.timeout_steps,
            row.weighted_profit_per_month,
            row.transaction_count
        );
    }

    Ok(SignalsSummary {
        results_path,
        evaluated: results.len(),
        skipped,
        rows,
    })
}
