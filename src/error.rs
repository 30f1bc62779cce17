//! Error taxonomy for the backtest pipeline
//!
//! File and format errors abort a run. `DegenerateTrainingSet` is raised by
//! metric code and recovered by callers with a sentinel score.

use thiserror::Error;

pub type Result<T> = std::result::Result<T, BacktestError>;

#[derive(Debug, Error)]
pub enum BacktestError {
    /// Input file missing/unreadable, or a requested row range outside the series
    #[error("data unavailable: {0}")]
    DataUnavailable(String),

    /// Storage extension is neither CSV nor Parquet
    #[error("unsupported format: {0} (expected .csv, .parquet or .parq)")]
    UnsupportedFormat(String),

    /// Only one class present where a discrimination score was requested
    #[error("degenerate training set: {0}")]
    DegenerateTrainingSet(String),

    /// Empty grid or missing grid keys
    #[error("invalid parameter grid: {0}")]
    InvalidParameterGrid(String),

    #[error("invalid parameter: {0}")]
    InvalidParameter(String),

    /// Existing results file written with a different header
    #[error("results table mismatch: {0}")]
    ResultsMismatch(String),

    #[error("model error: {0}")]
    Model(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Csv(#[from] csv::Error),

    #[error(transparent)]
    Arrow(#[from] arrow::error::ArrowError),

    #[error(transparent)]
    Parquet(#[from] parquet::errors::ParquetError),

    #[error(transparent)]
    Json(#[from] serde_json::Error),
}

impl BacktestError {
    /// Recoverable errors are defaulted locally instead of aborting the run
    pub fn is_recoverable(&self) -> bool {
        matches!(self, BacktestError::DegenerateTrainingSet(_))
    }
}
