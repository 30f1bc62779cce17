//! ML Engine - Predicciones rolling para Signal Lab
//!
//! Este módulo implementa:
//! - Gradient boosting binario sobre árboles de regresión (SmartCore)
//! - Walk-forward: reentrenar y predecir segmento a segmento
//! - AUC por (label, history)
//! - Entrenamiento con el histórico completo y persistencia de modelos

pub mod dataset;
pub mod evaluation;
pub mod models;
pub mod persistence;
pub mod rolling;
pub mod training;

pub use dataset::{LabeledSlice, SliceStats};
pub use evaluation::{evaluate_predictions, roc_auc, AccuracyReport, DEGENERATE_AUC};
pub use models::{GbParams, GradientBoostingModel, GradientBoostingTrainer, LabelModel, LabelTrainer};
pub use persistence::ModelArtifact;
pub use rolling::{
    HistorySpec, IterationWindow, PredictionTable, RollingOutput, RollingPlan, RollingPredictor,
    TrainingWindow,
};
pub use training::{FullHistoryTrainer, TrainedModel, TrainingSummary};

use serde::{Deserialize, Serialize};
use std::fmt;

/// Identifies one predicted column: a label trained on a named history
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct PredictionKey {
    pub label: String,
    pub history: String,
}

impl PredictionKey {
    pub fn new(label: impl Into<String>, history: impl Into<String>) -> Self {
        Self {
            label: label.into(),
            history: history.into(),
        }
    }

    /// `<label>_gb_<history>`
    pub fn column_name(&self) -> String {
        format!("{}_gb_{}", self.label, self.history)
    }
}

impl fmt::Display for PredictionKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.column_name())
    }
}
