//! Configuration management for Signal Lab
//!
//! Loads from YAML/TOML files + environment variables via .env.
//! The resulting `AppConfig` is immutable; each stage receives the section it needs.

use crate::backtesting::SignalGrid;
use anyhow::{bail, Context, Result};
use config::{Config, Environment, File};
use serde::Deserialize;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

/// Main application configuration
#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    pub data: DataConfig,
    pub model: ModelConfig,
    pub rolling: RollingConfig,
    pub training: TrainingConfig,
    pub signals: SignalsConfig,
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct DataConfig {
    /// Directory holding input tables
    pub in_dir: String,
    /// Directory receiving predictions, results and logs
    pub out_dir: String,
    /// Load at most this many rows
    #[serde(default)]
    pub nrows: Option<usize>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ModelConfig {
    /// Label columns with true values to be predicted
    pub labels: Vec<String>,
    /// Feature columns fed to every classifier
    pub features: Vec<String>,
    /// Steps ahead used when the labels were generated
    pub labels_horizon: usize,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RollingConfig {
    pub in_file: String,
    /// Output file stem (extension chosen by `out_format`)
    pub out_file: String,
    /// "csv" or "parquet"
    pub out_format: String,
    /// Timestamp of the first predicted row
    pub prediction_start: String,
    /// Rows predicted per iteration
    pub prediction_length: usize,
    /// Iterations to run; all remaining rows when absent or 0
    #[serde(default)]
    pub prediction_count: Option<usize>,
    /// History id -> trailing rows used for training
    #[serde(default = "default_rolling_histories")]
    pub label_histories: BTreeMap<String, usize>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct TrainingConfig {
    pub in_file: String,
    /// Directory receiving one artifact per (label, history)
    pub models_dir: String,
    #[serde(default = "default_training_histories")]
    pub label_histories: BTreeMap<String, usize>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SignalsConfig {
    pub in_file: String,
    pub out_file: String,
    /// First simulated row
    pub simulation_start: usize,
    /// End of simulated rows; negative counts from the end, 0 means the end
    pub simulation_end: i64,
    /// Weight of a transaction one year after the start (first one weighs 1.0)
    pub performance_weight: f64,
    /// Score column compared against `threshold_buy_primary`
    pub score_primary: String,
    /// Score column compared against `threshold_buy_secondary`
    pub score_secondary: String,
    pub parallel: bool,
    /// Skip grid points already present in the results file
    pub resume: bool,
    /// Rows echoed to the log after ranking
    pub top_n: usize,
    #[serde(default)]
    pub grid: SignalGrid,
}

#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    /// Emit JSON lines instead of human-readable output
    pub json: bool,
}

fn default_rolling_histories() -> BTreeMap<String, usize> {
    BTreeMap::from([("12".to_string(), 525_600)])
}

fn default_training_histories() -> BTreeMap<String, usize> {
    BTreeMap::from([
        ("03".to_string(), 131_400),
        ("06".to_string(), 262_800),
        ("12".to_string(), 525_600),
    ])
}

const DEFAULT_LABELS: [&str; 6] = [
    "high_60_10",
    "high_60_15",
    "high_60_20",
    "low_60_10",
    "low_60_15",
    "low_60_20",
];

const DEFAULT_FEATURES: [&str; 36] = [
    "close_1", "close_2", "close_5", "close_20", "close_60", "close_180",
    "close_std_1", "close_std_2", "close_std_5", "close_std_20", "close_std_60", "close_std_180",
    "volume_1", "volume_2", "volume_5", "volume_20", "volume_60", "volume_180",
    "trades_1", "trades_2", "trades_5", "trades_20", "trades_60", "trades_180",
    "tb_base_1", "tb_base_2", "tb_base_5", "tb_base_20", "tb_base_60", "tb_base_180",
    "tb_quote_1", "tb_quote_2", "tb_quote_5", "tb_quote_20", "tb_quote_60", "tb_quote_180",
];

impl AppConfig {
    /// Load configuration from defaults, optional files and environment
    pub fn load(extra_file: Option<&Path>) -> Result<Self> {
        // Load .env file first
        dotenvy::dotenv().ok();

        let grid = SignalGrid::default();

        let mut builder = Config::builder()
            // Data defaults
            .set_default("data.in_dir", "./data")?
            .set_default("data.out_dir", "./data/out")?
            // Model defaults
            .set_default("model.labels", DEFAULT_LABELS.to_vec())?
            .set_default("model.features", DEFAULT_FEATURES.to_vec())?
            .set_default("model.labels_horizon", 60)?
            // Rolling defaults
            .set_default("rolling.in_file", "BTCUSDT-1m-features.csv")?
            .set_default("rolling.out_file", "BTCUSDT-1m-rolling-predictions")?
            .set_default("rolling.out_format", "csv")?
            .set_default("rolling.prediction_start", "2020-02-01 00:00:00")?
            .set_default("rolling.prediction_length", 1_440)?
            // Training defaults
            .set_default("training.in_file", "BTCUSDT-1m-features.csv")?
            .set_default("training.models_dir", "./data/models")?
            // Signals defaults
            .set_default("signals.in_file", "BTCUSDT-1m-rolling-predictions.csv")?
            .set_default("signals.out_file", "BTCUSDT-1m-signal-models.csv")?
            .set_default("signals.simulation_start", 100)?
            .set_default("signals.simulation_end", -100)?
            .set_default("signals.performance_weight", 12.0)?
            .set_default("signals.score_primary", "high_60_10_gb_12")?
            .set_default("signals.score_secondary", "high_60_20_gb_12")?
            .set_default("signals.parallel", true)?
            .set_default("signals.resume", false)?
            .set_default("signals.top_n", 10)?
            .set_default("signals.grid.threshold_buy_primary", grid.threshold_buy_primary)?
            .set_default(
                "signals.grid.threshold_buy_secondary",
                grid.threshold_buy_secondary,
            )?
            .set_default(
                "signals.grid.target_price_multiplier",
                grid.target_price_multiplier,
            )?
            .set_default(
                "signals.grid.timeout_steps",
                grid.timeout_steps
                    .into_iter()
                    .map(|t| t as u64)
                    .collect::<Vec<_>>(),
            )?
            // Logging defaults
            .set_default("logging.json", false)?
            // Load config files if they exist
            .add_source(File::with_name("config/default").required(false))
            .add_source(File::with_name("config/local").required(false));

        if let Some(path) = extra_file {
            builder = builder.add_source(File::from(path).required(true));
        }

        let config = builder
            // Override with environment variables (SIGNAL_LAB__ROLLING__PREDICTION_LENGTH=60)
            .add_source(Environment::with_prefix("SIGNAL_LAB").separator("__"))
            .build()
            .context("Failed to build configuration")?;

        let app_config: AppConfig = config
            .try_deserialize()
            .context("Failed to deserialize configuration")?;

        app_config.validate()?;
        Ok(app_config)
    }

    /// Reject configurations no command can run with
    pub fn validate(&self) -> Result<()> {
        if self.model.labels.is_empty() {
            bail!("model.labels must not be empty");
        }
        if self.model.features.is_empty() {
            bail!("model.features must not be empty");
        }
        if self.rolling.prediction_length == 0 {
            bail!("rolling.prediction_length must be positive");
        }
        if self.rolling.label_histories.is_empty() || self.training.label_histories.is_empty() {
            bail!("label_histories must name at least one history");
        }
        if !matches!(self.rolling.out_format.as_str(), "csv" | "parquet") {
            bail!(
                "rolling.out_format must be 'csv' or 'parquet', got '{}'",
                self.rolling.out_format
            );
        }
        let weight = self.signals.performance_weight;
        if !weight.is_finite() || weight < 1.0 {
            bail!(
                "signals.performance_weight must be a finite value >= 1.0, got {}",
                weight
            );
        }
        Ok(())
    }

    pub fn in_path(&self, file: &str) -> PathBuf {
        Path::new(&self.data.in_dir).join(file)
    }

    pub fn out_path(&self, file: &str) -> PathBuf {
        Path::new(&self.data.out_dir).join(file)
    }

    /// Generate a digest of the config for logging
    pub fn digest(&self) -> String {
        format!(
            "in_dir={} out_dir={} labels={:?} features={} horizon={} step={} histories={:?}",
            self.data.in_dir,
            self.data.out_dir,
            self.model.labels,
            self.model.features.len(),
            self.model.labels_horizon,
            self.rolling.prediction_length,
            self.rolling.label_histories
        )
    }
}

impl std::fmt::Display for AppConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.digest())
    }
}
