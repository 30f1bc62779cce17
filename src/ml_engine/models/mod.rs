//! ML Models - Gradient boosting built on SmartCore regression trees
//!
//! Binary log-loss boosting: start from the log-odds of the positive rate, then
//! fit one regression tree per round to the residuals `y - sigmoid(F)`.

use crate::error::{BacktestError, Result};
use ndarray::{Array1, Array2};
use serde::{Deserialize, Serialize};
use smartcore::linalg::basic::matrix::DenseMatrix;
use smartcore::tree::decision_tree_regressor::{
    DecisionTreeRegressor, DecisionTreeRegressorParameters,
};
use tracing::{debug, warn};

type RegressionTree = DecisionTreeRegressor<f64, f64, DenseMatrix<f64>, Vec<f64>>;

/// Positive-class rate is clamped away from 0 and 1 before taking log-odds
const PRIOR_EPS: f64 = 1e-6;

/// Fitted classifier producing a score in [0, 1] per row
pub trait LabelModel: Send {
    fn predict_scores(&self, x: &Array2<f64>) -> Result<Vec<f64>>;
}

/// Stateless fitter: one call per (training slice, label)
pub trait LabelTrainer: Sync {
    type Model: LabelModel;

    fn fit(&self, x: &Array2<f64>, y: &Array1<f64>) -> Result<Self::Model>;

    /// Hyperparameters as written to the accuracy log
    fn describe(&self) -> String;
}

/// Boosting hyperparameters
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GbParams {
    /// Tree depth limit; `None` grows until leaves hit `min_samples_leaf`
    pub max_depth: Option<u16>,
    pub learning_rate: f64,
    pub num_boost_round: usize,
    pub min_samples_leaf: usize,
}

impl Default for GbParams {
    fn default() -> Self {
        Self {
            max_depth: None,
            learning_rate: 0.1,
            num_boost_round: 100,
            min_samples_leaf: 20,
        }
    }
}

impl GbParams {
    /// Read `max_depth`, `learning_rate` and `num_boost_round` from the process environment
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Same as [`GbParams::from_env`] with an injectable variable source
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let mut params = Self::default();

        if let Some(raw) = lookup("max_depth") {
            let depth: i64 = parse_env("max_depth", &raw)?;
            // LightGBM convention: non-positive depth means unlimited
            params.max_depth = if depth <= 0 {
                None
            } else {
                Some(u16::try_from(depth).map_err(|_| {
                    BacktestError::InvalidParameter(format!("max_depth {} too large", depth))
                })?)
            };
        }
        if let Some(raw) = lookup("learning_rate") {
            params.learning_rate = parse_env("learning_rate", &raw)?;
        }
        if let Some(raw) = lookup("num_boost_round") {
            params.num_boost_round = parse_env("num_boost_round", &raw)?;
        }

        params.validate()?;
        Ok(params)
    }

    pub fn validate(&self) -> Result<()> {
        if !(self.learning_rate.is_finite() && self.learning_rate > 0.0) {
            return Err(BacktestError::InvalidParameter(format!(
                "learning_rate must be positive, got {}",
                self.learning_rate
            )));
        }
        if self.min_samples_leaf == 0 {
            return Err(BacktestError::InvalidParameter(
                "min_samples_leaf must be positive".into(),
            ));
        }
        Ok(())
    }

    fn tree_parameters(&self) -> DecisionTreeRegressorParameters {
        let params = DecisionTreeRegressorParameters::default()
            .with_min_samples_leaf(self.min_samples_leaf)
            .with_min_samples_split(2 * self.min_samples_leaf);

        match self.max_depth {
            Some(depth) => params.with_max_depth(depth),
            None => params,
        }
    }
}

fn parse_env<T: std::str::FromStr>(key: &str, raw: &str) -> Result<T> {
    raw.trim().parse().map_err(|_| {
        BacktestError::InvalidParameter(format!("environment variable {}='{}' is invalid", key, raw))
    })
}

fn sigmoid(x: f64) -> f64 {
    1.0 / (1.0 + (-x).exp())
}

/// Row-major copy for SmartCore; NaN and infinite cells become 0.0
fn to_dense(x: &Array2<f64>) -> Result<DenseMatrix<f64>> {
    let (rows, cols) = x.dim();
    let values: Vec<f64> = x
        .iter()
        .map(|&v| if v.is_finite() { v } else { 0.0 })
        .collect();

    DenseMatrix::new(rows, cols, values, false)
        .map_err(|e| BacktestError::Model(format!("feature matrix {}x{}: {:?}", rows, cols, e)))
}

/// Boosted ensemble of regression trees over log-odds
#[derive(Debug, Serialize, Deserialize)]
pub struct GradientBoostingModel {
    /// Log-odds of the positive rate in the training slice
    base_score: f64,
    learning_rate: f64,
    n_features: usize,
    trees: Vec<RegressionTree>,
}

impl GradientBoostingModel {
    /// Model that returns `sigmoid(base_score)` for every row
    fn constant(base_score: f64, n_features: usize) -> Self {
        Self {
            base_score,
            learning_rate: 0.0,
            n_features,
            trees: Vec::new(),
        }
    }

    pub fn n_trees(&self) -> usize {
        self.trees.len()
    }

    /// Score assigned to every row when no tree was fitted
    pub fn prior_score(&self) -> f64 {
        sigmoid(self.base_score)
    }
}

impl LabelModel for GradientBoostingModel {
    fn predict_scores(&self, x: &Array2<f64>) -> Result<Vec<f64>> {
        let (rows, cols) = x.dim();
        if rows == 0 {
            return Ok(Vec::new());
        }
        if self.trees.is_empty() {
            return Ok(vec![self.prior_score(); rows]);
        }
        if cols != self.n_features {
            return Err(BacktestError::Model(format!(
                "model trained on {} features, got {}",
                self.n_features, cols
            )));
        }

        let dense = to_dense(x)?;
        let mut raw = vec![self.base_score; rows];
        for tree in &self.trees {
            let update = tree
                .predict(&dense)
                .map_err(|e| BacktestError::Model(format!("tree prediction failed: {:?}", e)))?;
            for (f, u) in raw.iter_mut().zip(update) {
                *f += self.learning_rate * u;
            }
        }

        Ok(raw.into_iter().map(sigmoid).collect())
    }
}

/// Trainer for [`GradientBoostingModel`]
#[derive(Debug, Clone, Default)]
pub struct GradientBoostingTrainer {
    params: GbParams,
}

impl GradientBoostingTrainer {
    pub fn new(params: GbParams) -> Self {
        Self { params }
    }

    pub fn params(&self) -> &GbParams {
        &self.params
    }
}

impl LabelTrainer for GradientBoostingTrainer {
    type Model = GradientBoostingModel;

    fn fit(&self, x: &Array2<f64>, y: &Array1<f64>) -> Result<GradientBoostingModel> {
        let (rows, cols) = x.dim();
        if rows != y.len() {
            return Err(BacktestError::Model(format!(
                "{} feature rows but {} labels",
                rows,
                y.len()
            )));
        }
        if rows == 0 {
            warn!("Empty training slice, falling back to prior score 0.5");
            return Ok(GradientBoostingModel::constant(0.0, cols));
        }

        let targets: Vec<f64> = y.iter().map(|&v| if v >= 0.5 { 1.0 } else { 0.0 }).collect();
        let positives = targets.iter().filter(|&&t| t > 0.0).count();
        let rate = (positives as f64 / rows as f64).clamp(PRIOR_EPS, 1.0 - PRIOR_EPS);
        let base_score = (rate / (1.0 - rate)).ln();

        if positives == 0 || positives == rows {
            debug!("Single-class training slice ({} rows), no trees fitted", rows);
            return Ok(GradientBoostingModel::constant(base_score, cols));
        }

        let dense = to_dense(x)?;
        let tree_params = self.params.tree_parameters();
        let mut raw = vec![base_score; rows];
        let mut trees = Vec::with_capacity(self.params.num_boost_round);

        for round in 0..self.params.num_boost_round {
            let residuals: Vec<f64> = targets
                .iter()
                .zip(&raw)
                .map(|(t, f)| t - sigmoid(*f))
                .collect();

            let tree = RegressionTree::fit(&dense, &residuals, tree_params.clone()).map_err(|e| {
                BacktestError::Model(format!("boosting round {} failed: {:?}", round, e))
            })?;
            let update = tree
                .predict(&dense)
                .map_err(|e| BacktestError::Model(format!("boosting round {} failed: {:?}", round, e)))?;

            for (f, u) in raw.iter_mut().zip(update) {
                *f += self.params.learning_rate * u;
            }
            trees.push(tree);
        }

        Ok(GradientBoostingModel {
            base_score,
            learning_rate: self.params.learning_rate,
            n_features: cols,
            trees,
        })
    }

    fn describe(&self) -> String {
        let depth = self
            .params
            .max_depth
            .map(|d| d.to_string())
            .unwrap_or_else(|| "None".to_string());
        format!(
            "{}, {}, {}",
            depth, self.params.learning_rate, self.params.num_boost_round
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn separable() -> (Array2<f64>, Array1<f64>) {
        let x = Array2::from_shape_fn((80, 2), |(i, j)| if j == 0 { i as f64 } else { 1.0 });
        let y = Array1::from_iter((0..80).map(|i| if i >= 40 { 1.0 } else { 0.0 }));
        (x, y)
    }

    fn small_params() -> GbParams {
        GbParams {
            max_depth: Some(3),
            learning_rate: 0.3,
            num_boost_round: 10,
            min_samples_leaf: 5,
        }
    }

    #[test]
    fn test_from_lookup_defaults() {
        let params = GbParams::from_lookup(|_| None).unwrap();
        assert_eq!(params, GbParams::default());
    }

    #[test]
    fn test_from_lookup_reads_values() {
        let env: HashMap<&str, &str> = HashMap::from([
            ("max_depth", "4"),
            ("learning_rate", "0.05"),
            ("num_boost_round", "250"),
        ]);
        let params = GbParams::from_lookup(|k| env.get(k).map(|v| v.to_string())).unwrap();
        assert_eq!(params.max_depth, Some(4));
        assert_eq!(params.learning_rate, 0.05);
        assert_eq!(params.num_boost_round, 250);
    }

    #[test]
    fn test_from_lookup_negative_depth_is_unlimited() {
        let params =
            GbParams::from_lookup(|k| (k == "max_depth").then(|| "-1".to_string())).unwrap();
        assert_eq!(params.max_depth, None);
    }

    #[test]
    fn test_from_lookup_rejects_garbage() {
        let err = GbParams::from_lookup(|k| (k == "learning_rate").then(|| "fast".to_string()))
            .unwrap_err();
        assert!(matches!(err, BacktestError::InvalidParameter(_)));
    }

    #[test]
    fn test_fit_separable_ranks_positives_higher() {
        let (x, y) = separable();
        let model = GradientBoostingTrainer::new(small_params()).fit(&x, &y).unwrap();
        assert_eq!(model.n_trees(), 10);

        let scores = model.predict_scores(&x).unwrap();
        assert_eq!(scores.len(), 80);
        assert!(scores.iter().all(|s| (0.0..=1.0).contains(s)));
        assert!(scores[79] > 0.5);
        assert!(scores[0] < 0.5);
    }

    #[test]
    fn test_single_class_gives_constant_prior() {
        let (x, _) = separable();
        let y = Array1::from_elem(80, 1.0);
        let model = GradientBoostingTrainer::new(small_params()).fit(&x, &y).unwrap();
        assert_eq!(model.n_trees(), 0);

        let scores = model.predict_scores(&x).unwrap();
        assert!(scores.iter().all(|&s| (s - model.prior_score()).abs() < 1e-12));
        assert!(model.prior_score() > 0.99);
    }

    #[test]
    fn test_empty_slice_scores_half() {
        let x = Array2::<f64>::zeros((0, 3));
        let y = Array1::<f64>::zeros(0);
        let model = GradientBoostingTrainer::default().fit(&x, &y).unwrap();

        let scores = model.predict_scores(&Array2::zeros((4, 3))).unwrap();
        assert_eq!(scores, vec![0.5; 4]);
    }

    #[test]
    fn test_nan_features_do_not_fail() {
        let (mut x, y) = separable();
        x[[3, 0]] = f64::NAN;
        x[[50, 1]] = f64::INFINITY;
        let model = GradientBoostingTrainer::new(small_params()).fit(&x, &y).unwrap();
        assert!(model.predict_scores(&x).unwrap().iter().all(|s| s.is_finite()));
    }

    #[test]
    fn test_feature_count_mismatch() {
        let (x, y) = separable();
        let model = GradientBoostingTrainer::new(small_params()).fit(&x, &y).unwrap();
        assert!(model.predict_scores(&Array2::zeros((2, 5))).is_err());
    }

    #[test]
    fn test_describe_matches_log_layout() {
        let trainer = GradientBoostingTrainer::new(GbParams::default());
        assert_eq!(trainer.describe(), "None, 0.1, 100");
    }
}
