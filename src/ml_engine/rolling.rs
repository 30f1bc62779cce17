//! Rolling Predictor - Walk-forward de entrenamiento y predicción
//!
//! Every iteration retrains one classifier per (history, label) on a trailing
//! window that ends `labels_horizon + 1` rows before the predicted segment, then
//! scores the next `step` rows. Segments advance without gaps or overlap.

use crate::config::{ModelConfig, RollingConfig};
use crate::error::{BacktestError, Result};
use crate::ml_engine::dataset::LabeledSlice;
use crate::ml_engine::models::{LabelModel, LabelTrainer};
use crate::ml_engine::PredictionKey;
use crate::types::TimeSeries;
use serde::Serialize;
use std::collections::BTreeMap;
use std::ops::Range;
use tracing::{debug, info};

/// Named trailing-history length
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct HistorySpec {
    pub id: String,
    pub length: usize,
}

impl HistorySpec {
    pub fn new(id: impl Into<String>, length: usize) -> Self {
        Self {
            id: id.into(),
            length,
        }
    }

    /// One spec per config entry, ordered by id
    pub fn from_map(histories: &BTreeMap<String, usize>) -> Vec<Self> {
        histories
            .iter()
            .map(|(id, &length)| Self::new(id.clone(), length))
            .collect()
    }
}

/// Parameters of one walk-forward run
#[derive(Debug, Clone)]
pub struct RollingPlan {
    /// First predicted row
    pub prediction_start: usize,
    /// Rows predicted per iteration
    pub step: usize,
    /// Iterations to run; all remaining rows when `None` or 0
    pub iterations: Option<usize>,
    pub labels_horizon: usize,
    pub labels: Vec<String>,
    pub features: Vec<String>,
    pub histories: Vec<HistorySpec>,
}

impl RollingPlan {
    pub fn from_config(model: &ModelConfig, rolling: &RollingConfig, prediction_start: usize) -> Self {
        Self {
            prediction_start,
            step: rolling.prediction_length,
            iterations: rolling.prediction_count,
            labels_horizon: model.labels_horizon,
            labels: model.labels.clone(),
            features: model.features.clone(),
            histories: HistorySpec::from_map(&rolling.label_histories),
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.step == 0 {
            return Err(BacktestError::InvalidParameter(
                "prediction step length must be positive".into(),
            ));
        }
        if self.histories.is_empty() {
            return Err(BacktestError::InvalidParameter("no label histories configured".into()));
        }
        if self.labels.is_empty() {
            return Err(BacktestError::InvalidParameter("no labels configured".into()));
        }
        Ok(())
    }

    /// Output keys, histories outer and labels inner
    pub fn keys(&self) -> Vec<PredictionKey> {
        self.histories
            .iter()
            .flat_map(|h| self.labels.iter().map(|l| PredictionKey::new(l.clone(), h.id.clone())))
            .collect()
    }

    /// Last row (exclusive) whose label is known at `prediction_start`
    ///
    /// Clamps to 0 when the start is within `labels_horizon + 1` rows of the series start.
    pub fn train_end(&self, prediction_start: usize) -> usize {
        prediction_start.saturating_sub(self.labels_horizon + 1)
    }

    /// Number of iterations for a series of `total_rows` rows
    pub fn iteration_count(&self, total_rows: usize) -> Result<usize> {
        self.validate()?;
        if self.prediction_start >= total_rows {
            return Err(BacktestError::DataUnavailable(format!(
                "prediction start {} outside series of length {}",
                self.prediction_start, total_rows
            )));
        }

        let available = (total_rows - self.prediction_start) / self.step;
        match self.iterations {
            None | Some(0) => {
                if available == 0 {
                    return Err(BacktestError::DataUnavailable(format!(
                        "fewer than {} rows after prediction start {}",
                        self.step, self.prediction_start
                    )));
                }
                Ok(available)
            }
            Some(count) if count > available => Err(BacktestError::DataUnavailable(format!(
                "{} iterations of {} rows from {} exceed series of length {}",
                count, self.step, self.prediction_start, total_rows
            ))),
            Some(count) => Ok(count),
        }
    }

    /// Training and prediction windows of every iteration
    pub fn windows(&self, total_rows: usize) -> Result<Vec<IterationWindow>> {
        let count = self.iteration_count(total_rows)?;

        Ok((0..count)
            .map(|iteration| {
                let start = self.prediction_start + iteration * self.step;
                let train_end = self.train_end(start);
                let training = self
                    .histories
                    .iter()
                    .map(|h| TrainingWindow {
                        history: h.id.clone(),
                        rows: train_end.saturating_sub(h.length)..train_end,
                    })
                    .collect();

                IterationWindow {
                    iteration,
                    prediction: start..start + self.step,
                    train_end,
                    training,
                }
            })
            .collect())
    }
}

/// Rows used to fit the models of one history
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TrainingWindow {
    pub history: String,
    pub rows: Range<usize>,
}

/// Windows of one walk-forward iteration
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct IterationWindow {
    pub iteration: usize,
    pub prediction: Range<usize>,
    pub train_end: usize,
    pub training: Vec<TrainingWindow>,
}

/// Out-of-sample scores per key, all columns covering the same contiguous rows
#[derive(Debug, Clone, Default)]
pub struct PredictionTable {
    start: usize,
    columns: BTreeMap<PredictionKey, Vec<f64>>,
}

impl PredictionTable {
    pub fn new(start: usize) -> Self {
        Self {
            start,
            columns: BTreeMap::new(),
        }
    }

    /// Append `scores` for rows `segment_start..` of `key`
    ///
    /// The segment must begin exactly where the key's previous segment ended.
    pub fn append(&mut self, key: &PredictionKey, segment_start: usize, scores: Vec<f64>) -> Result<()> {
        let column = self.columns.entry(key.clone()).or_default();
        let expected = self.start + column.len();
        if segment_start != expected {
            return Err(BacktestError::InvalidParameter(format!(
                "segment for {} starts at row {}, expected {}",
                key, segment_start, expected
            )));
        }
        column.extend(scores);
        Ok(())
    }

    pub fn start(&self) -> usize {
        self.start
    }

    /// Covered rows (longest column)
    pub fn rows(&self) -> Range<usize> {
        let len = self.columns.values().map(Vec::len).max().unwrap_or(0);
        self.start..self.start + len
    }

    pub fn scores(&self, key: &PredictionKey) -> Option<&[f64]> {
        self.columns.get(key).map(Vec::as_slice)
    }

    pub fn keys(&self) -> impl Iterator<Item = &PredictionKey> {
        self.columns.keys()
    }

    /// Every column covers exactly [`PredictionTable::rows`]
    pub fn is_complete(&self) -> bool {
        let len = self.rows().len();
        self.columns.values().all(|c| c.len() == len)
    }

    /// Input rows of the covered range plus one `<label>_gb_<history>` column per key
    pub fn to_output(&self, series: &TimeSeries, keys: &[PredictionKey]) -> Result<TimeSeries> {
        if !self.is_complete() {
            return Err(BacktestError::InvalidParameter(
                "prediction columns cover different row ranges".into(),
            ));
        }

        let mut output = series.slice(self.rows())?;
        for key in keys {
            let scores = self.scores(key).ok_or_else(|| {
                BacktestError::DataUnavailable(format!("no predictions for {}", key))
            })?;
            output.push_column(key.column_name(), scores.to_vec())?;
        }
        Ok(output)
    }
}

/// Result of a walk-forward run
#[derive(Debug, Clone)]
pub struct RollingOutput {
    pub table: PredictionTable,
    pub windows: Vec<IterationWindow>,
}

/// Walk-forward driver over any [`LabelTrainer`]
pub struct RollingPredictor<T: LabelTrainer> {
    trainer: T,
    plan: RollingPlan,
}

impl<T: LabelTrainer> RollingPredictor<T> {
    pub fn new(trainer: T, plan: RollingPlan) -> Result<Self> {
        plan.validate()?;
        Ok(Self { trainer, plan })
    }

    pub fn plan(&self) -> &RollingPlan {
        &self.plan
    }

    pub fn trainer(&self) -> &T {
        &self.trainer
    }

    pub fn run(&self, series: &TimeSeries) -> Result<RollingOutput> {
        let plan = &self.plan;
        let mut required = plan.features.clone();
        required.extend(plan.labels.iter().cloned());
        series.require_columns(&required)?;

        let windows = plan.windows(series.len())?;
        let mut table = PredictionTable::new(plan.prediction_start);

        info!(
            "🔄 Rolling predictions: {} iterations of {} rows from row {} ({} labels x {} histories)",
            windows.len(),
            plan.step,
            plan.prediction_start,
            plan.labels.len(),
            plan.histories.len()
        );

        for window in &windows {
            info!(
                "---> Iteration {}/{}: predicting rows {}..{}",
                window.iteration + 1,
                windows.len(),
                window.prediction.start,
                window.prediction.end
            );

            let x_predict = series.feature_matrix(window.prediction.clone(), &plan.features)?;

            for training in &window.training {
                let x_train = series.feature_matrix(training.rows.clone(), &plan.features)?;

                for label in &plan.labels {
                    let y_train = series.label_vector(training.rows.clone(), label)?;
                    let slice = LabeledSlice::new(x_train.clone(), y_train);
                    let stats = slice.statistics();
                    debug!(
                        "Train label '{}' history {} on rows {}..{} ({} samples, {:.1}% positive)",
                        label,
                        training.history,
                        training.rows.start,
                        training.rows.end,
                        stats.total_samples,
                        stats.class_balance * 100.0
                    );

                    let model = self.trainer.fit(&slice.x, &slice.y)?;
                    let scores = model.predict_scores(&x_predict)?;
                    let key = PredictionKey::new(label.clone(), training.history.clone());
                    table.append(&key, window.prediction.start, scores)?;
                }
            }
        }

        info!("✅ Rolling predictions finished: rows {:?}", table.rows());
        Ok(RollingOutput { table, windows })
    }
}
