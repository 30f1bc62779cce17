//! Training Pipeline - Entrenamiento con todo el histórico reciente
//!
//! Fits one model per `(label, history)` on the latest `history` complete rows
//! and reports the AUC on that same slice.

use crate::error::Result;
use crate::ml_engine::dataset::LabeledSlice;
use crate::ml_engine::evaluation::auc_or_sentinel;
use crate::ml_engine::models::{LabelModel, LabelTrainer};
use crate::ml_engine::rolling::HistorySpec;
use crate::ml_engine::PredictionKey;
use crate::types::TimeSeries;
use serde::Serialize;
use tracing::{debug, info};

/// One fitted model with its in-sample metrics
#[derive(Debug)]
pub struct TrainedModel<M> {
    pub key: PredictionKey,
    pub model: M,
    pub train_rows: usize,
    pub train_auc: f64,
}

/// Métricas de entrenamiento por modelo
#[derive(Debug, Clone, Serialize)]
pub struct TrainingSummary {
    pub key: String,
    pub train_rows: usize,
    pub train_auc: f64,
}

pub struct FullHistoryTrainer<T: LabelTrainer> {
    trainer: T,
    labels: Vec<String>,
    features: Vec<String>,
    histories: Vec<HistorySpec>,
}

impl<T: LabelTrainer> FullHistoryTrainer<T> {
    pub fn new(
        trainer: T,
        labels: Vec<String>,
        features: Vec<String>,
        histories: Vec<HistorySpec>,
    ) -> Self {
        Self {
            trainer,
            labels,
            features,
            histories,
        }
    }

    pub fn trainer(&self) -> &T {
        &self.trainer
    }

    pub fn features(&self) -> &[String] {
        &self.features
    }

    /// Entrenar un modelo por (label, history)
    pub fn train(&self, series: &TimeSeries) -> Result<Vec<TrainedModel<T::Model>>> {
        let mut required = self.features.clone();
        required.extend(self.labels.iter().cloned());
        series.require_columns(&required)?;

        // rows with any missing feature or label are not used for training
        let complete = series.complete_rows(&required)?;
        let clean = series.take_rows(&complete);
        info!(
            "🧠 Full-history training: {} of {} rows complete, {} labels x {} histories",
            clean.len(),
            series.len(),
            self.labels.len(),
            self.histories.len()
        );

        let mut trained = Vec::with_capacity(self.labels.len() * self.histories.len());
        for history in &self.histories {
            let rows = clean.len().saturating_sub(history.length)..clean.len();
            let x = clean.feature_matrix(rows.clone(), &self.features)?;

            for label in &self.labels {
                let y = clean.label_vector(rows.clone(), label)?;
                let slice = LabeledSlice::new(x.clone(), y);
                let stats = slice.statistics();
                let key = PredictionKey::new(label.clone(), history.id.clone());

                let model = self.trainer.fit(&slice.x, &slice.y)?;
                let fitted = model.predict_scores(&slice.x)?;
                let labels = slice.y.to_vec();
                let train_auc = auc_or_sentinel(&labels, &fitted, &key.column_name())?;
                debug!(
                    "Trained {} on {} rows ({} positive, {} negative), train AUC {:.3}",
                    key, stats.total_samples, stats.positive_samples, stats.negative_samples, train_auc
                );

                trained.push(TrainedModel {
                    key,
                    model,
                    train_rows: stats.total_samples,
                    train_auc,
                });
            }
        }

        Ok(trained)
    }
}

impl<M> TrainedModel<M> {
    pub fn summary(&self) -> TrainingSummary {
        TrainingSummary {
            key: self.key.column_name(),
            train_rows: self.train_rows,
            train_auc: self.train_auc,
        }
    }
}
