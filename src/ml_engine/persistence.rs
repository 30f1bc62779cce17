//! ML Persistence - Artefactos de modelos entrenados
//!
//! One pretty-printed JSON file per `(label, history)`: `<label>_gb_<history>.json`.

use crate::error::Result;
use crate::ml_engine::models::GbParams;
use crate::ml_engine::PredictionKey;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::info;

pub const ARTIFACT_VERSION: &str = "1.0";

/// Trained model plus what is needed to score new rows with it
#[derive(Debug, Serialize, Deserialize)]
pub struct ModelArtifact<M> {
    pub version: String,
    pub label: String,
    pub history: String,
    /// Feature columns in the order the model expects them
    pub features: Vec<String>,
    pub params: GbParams,
    /// Rows in the training slice
    pub train_rows: usize,
    /// AUC on the training slice (0.0 when single-class)
    pub train_auc: f64,
    pub trained_at: i64,
    pub model: M,
}

impl<M> ModelArtifact<M> {
    pub fn new(
        key: &PredictionKey,
        features: Vec<String>,
        params: GbParams,
        train_rows: usize,
        train_auc: f64,
        model: M,
    ) -> Self {
        Self {
            version: ARTIFACT_VERSION.to_string(),
            label: key.label.clone(),
            history: key.history.clone(),
            features,
            params,
            train_rows,
            train_auc,
            trained_at: chrono::Utc::now().timestamp_millis(),
            model,
        }
    }

    pub fn key(&self) -> PredictionKey {
        PredictionKey::new(self.label.clone(), self.history.clone())
    }

    /// `<dir>/<label>_gb_<history>.json`
    pub fn path_in(dir: &Path, key: &PredictionKey) -> PathBuf {
        dir.join(format!("{}.json", key.column_name()))
    }

    pub fn exists(dir: &Path, key: &PredictionKey) -> bool {
        Self::path_in(dir, key).exists()
    }
}

impl<M: Serialize> ModelArtifact<M> {
    /// Write into `dir` (created if missing), returning the file path
    pub fn save(&self, dir: &Path) -> Result<PathBuf> {
        fs::create_dir_all(dir)?;
        let path = Self::path_in(dir, &self.key());
        let json = serde_json::to_string_pretty(self)?;
        fs::write(&path, json)?;
        info!("💾 Model {} saved to {}", self.key(), path.display());
        Ok(path)
    }
}

impl<M: DeserializeOwned> ModelArtifact<M> {
    pub fn load(dir: &Path, key: &PredictionKey) -> Result<Self> {
        let path = Self::path_in(dir, key);
        let json = fs::read_to_string(&path)?;
        let artifact: Self = serde_json::from_str(&json)?;
        info!(
            "📂 Model {} loaded from {} (version {})",
            key,
            path.display(),
            artifact.version
        );
        Ok(artifact)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ml_engine::models::{GradientBoostingModel, GradientBoostingTrainer, LabelModel, LabelTrainer};
    use ndarray::{Array1, Array2};

    #[test]
    fn test_save_and_load_scores_identically() {
        let dir = tempfile::tempdir().unwrap();
        let x = Array2::from_shape_fn((60, 1), |(i, _)| i as f64);
        let y = Array1::from_iter((0..60).map(|i| if i % 3 == 0 { 1.0 } else { 0.0 }));
        let params = GbParams {
            num_boost_round: 3,
            min_samples_leaf: 5,
            ..GbParams::default()
        };
        let model = GradientBoostingTrainer::new(params).fit(&x, &y).unwrap();
        let expected = model.predict_scores(&x).unwrap();

        let key = PredictionKey::new("high_60_10", "03");
        let artifact = ModelArtifact::new(&key, vec!["f".into()], params, 60, 0.7, model);
        let path = artifact.save(dir.path()).unwrap();
        assert!(path.ends_with("high_60_10_gb_03.json"));
        assert!(ModelArtifact::<GradientBoostingModel>::exists(dir.path(), &key));

        let loaded = ModelArtifact::<GradientBoostingModel>::load(dir.path(), &key).unwrap();
        assert_eq!(loaded.key(), key);
        assert_eq!(loaded.train_rows, 60);
        assert_eq!(loaded.model.predict_scores(&x).unwrap(), expected);
    }

    #[test]
    fn test_load_missing_is_io_error() {
        let dir = tempfile::tempdir().unwrap();
        let key = PredictionKey::new("x", "1");
        assert!(ModelArtifact::<GradientBoostingModel>::load(dir.path(), &key).is_err());
    }
}
