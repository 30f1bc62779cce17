//! Accuracy of predicted scores against true labels (ROC AUC)

use crate::error::{BacktestError, Result};
use crate::ml_engine::rolling::PredictionTable;
use crate::ml_engine::PredictionKey;
use crate::types::TimeSeries;
use serde::Serialize;
use std::collections::BTreeMap;
use tracing::warn;

/// Score recorded when a label has a single class over the evaluated rows
pub const DEGENERATE_AUC: f64 = 0.0;

/// Area under the ROC curve via the Mann-Whitney rank sum
///
/// Labels `>= 0.5` are positive. Pairs with a NaN label or score are skipped.
/// Tied scores share their average rank.
pub fn roc_auc(labels: &[f64], scores: &[f64]) -> Result<f64> {
    if labels.len() != scores.len() {
        return Err(BacktestError::InvalidParameter(format!(
            "{} labels but {} scores",
            labels.len(),
            scores.len()
        )));
    }

    let mut pairs: Vec<(f64, bool)> = labels
        .iter()
        .zip(scores)
        .filter(|(l, s)| !l.is_nan() && !s.is_nan())
        .map(|(&l, &s)| (s, l >= 0.5))
        .collect();

    let n_pos = pairs.iter().filter(|(_, p)| *p).count();
    let n_neg = pairs.len() - n_pos;
    if n_pos == 0 || n_neg == 0 {
        return Err(BacktestError::DegenerateTrainingSet(format!(
            "{} positive and {} negative rows",
            n_pos, n_neg
        )));
    }

    pairs.sort_by(|a, b| a.0.total_cmp(&b.0));

    let mut positive_rank_sum = 0.0;
    let mut i = 0;
    while i < pairs.len() {
        let mut j = i;
        while j + 1 < pairs.len() && pairs[j + 1].0 == pairs[i].0 {
            j += 1;
        }
        // ranks are 1-based; rows i..=j share the mean of ranks i+1..=j+1
        let rank = (i + j) as f64 / 2.0 + 1.0;
        let tied_positives = pairs[i..=j].iter().filter(|(_, p)| *p).count();
        positive_rank_sum += rank * tied_positives as f64;
        i = j + 1;
    }

    let n_pos = n_pos as f64;
    let n_neg = n_neg as f64;
    Ok((positive_rank_sum - n_pos * (n_pos + 1.0) / 2.0) / (n_pos * n_neg))
}

/// AUC, or [`DEGENERATE_AUC`] when only one class is present
pub fn auc_or_sentinel(labels: &[f64], scores: &[f64], context: &str) -> Result<f64> {
    match roc_auc(labels, scores) {
        Ok(auc) => Ok(auc),
        Err(e) if e.is_recoverable() => {
            warn!("⚠️ AUC for {} undefined ({}), recording {}", context, e, DEGENERATE_AUC);
            Ok(DEGENERATE_AUC)
        }
        Err(e) => Err(e),
    }
}

/// Per-column AUC with the mean over all columns
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct AccuracyReport {
    /// Output column name -> AUC
    pub scores: BTreeMap<String, f64>,
    pub mean: f64,
}

impl AccuracyReport {
    pub fn from_scores(scores: BTreeMap<String, f64>) -> Self {
        let mean = if scores.is_empty() {
            0.0
        } else {
            scores.values().sum::<f64>() / scores.len() as f64
        };
        Self { scores, mean }
    }

    /// `Mean AUC 0.55: {high_60_10_gb_12: 0.56, ...}` with two decimals
    pub fn summary_line(&self) -> String {
        let parts: Vec<String> = self
            .scores
            .iter()
            .map(|(name, auc)| format!("{}: {:.2}", name, auc))
            .collect();
        format!("Mean AUC {:.2}: {{{}}}", self.mean, parts.join(", "))
    }
}

/// Compare every predicted column of `table` with the true labels in `series`
pub fn evaluate_predictions(
    table: &PredictionTable,
    series: &TimeSeries,
    keys: &[PredictionKey],
) -> Result<AccuracyReport> {
    let rows = table.rows();
    let mut scores = BTreeMap::new();

    for key in keys {
        let predicted = table.scores(key).ok_or_else(|| {
            BacktestError::DataUnavailable(format!("no predictions for {}", key))
        })?;
        let truth = &series.column(&key.label)?[rows.clone()];
        let auc = auc_or_sentinel(truth, predicted, &key.column_name())?;
        scores.insert(key.column_name(), auc);
    }

    Ok(AccuracyReport::from_scores(scores))
}
