//! Core types used throughout Signal Lab
//!
//! `TimeSeries` is the column-oriented kline table that every stage reads.
//! Row position is the only ordering primitive: row `i` is older than row `i + 1`.

use crate::error::{BacktestError, Result};
use chrono::{DateTime, NaiveDate, NaiveDateTime, TimeZone, Utc};
use ndarray::{Array1, Array2};
use std::collections::HashMap;
use std::ops::Range;

/// Name of the timestamp column in input and output tables
pub const TIMESTAMP_COLUMN: &str = "timestamp";

/// Text layouts accepted for timestamp cells (besides integers and RFC 3339)
const TIMESTAMP_FORMATS: [&str; 4] = [
    "%Y-%m-%d %H:%M:%S",
    "%Y-%m-%d %H:%M:%S%.f",
    "%Y-%m-%dT%H:%M:%S",
    "%Y-%m-%dT%H:%M:%S%.f",
];

/// Ordered market rows with named numeric columns
#[derive(Debug, Clone, Default)]
pub struct TimeSeries {
    /// Epoch milliseconds, one per row
    timestamps: Vec<i64>,
    /// Column names in input order
    names: Vec<String>,
    /// Column values, parallel to `names`
    columns: Vec<Vec<f64>>,
    /// name -> position in `names`
    index: HashMap<String, usize>,
}

impl TimeSeries {
    pub fn new(timestamps: Vec<i64>) -> Self {
        Self {
            timestamps,
            names: Vec::new(),
            columns: Vec::new(),
            index: HashMap::new(),
        }
    }

    /// Builder form of [`TimeSeries::push_column`]
    pub fn with_column(mut self, name: impl Into<String>, values: Vec<f64>) -> Result<Self> {
        self.push_column(name, values)?;
        Ok(self)
    }

    /// Add a column, replacing any existing column with the same name
    pub fn push_column(&mut self, name: impl Into<String>, values: Vec<f64>) -> Result<()> {
        let name = name.into();
        if values.len() != self.timestamps.len() {
            return Err(BacktestError::InvalidParameter(format!(
                "column '{}' has {} rows, series has {}",
                name,
                values.len(),
                self.timestamps.len()
            )));
        }

        if let Some(&pos) = self.index.get(&name) {
            self.columns[pos] = values;
        } else {
            self.index.insert(name.clone(), self.names.len());
            self.names.push(name);
            self.columns.push(values);
        }
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.timestamps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.timestamps.is_empty()
    }

    pub fn timestamps(&self) -> &[i64] {
        &self.timestamps
    }

    pub fn column_names(&self) -> &[String] {
        &self.names
    }

    pub fn has_column(&self, name: &str) -> bool {
        self.index.contains_key(name)
    }

    pub fn column(&self, name: &str) -> Result<&[f64]> {
        self.index
            .get(name)
            .map(|&pos| self.columns[pos].as_slice())
            .ok_or_else(|| BacktestError::DataUnavailable(format!("column '{}' not found", name)))
    }

    /// Fail with `DataUnavailable` naming every missing column
    pub fn require_columns(&self, names: &[String]) -> Result<()> {
        let missing: Vec<&str> = names
            .iter()
            .filter(|n| !self.has_column(n))
            .map(|n| n.as_str())
            .collect();

        if missing.is_empty() {
            Ok(())
        } else {
            Err(BacktestError::DataUnavailable(format!(
                "missing columns: {}",
                missing.join(", ")
            )))
        }
    }

    /// First row whose timestamp is at or after `timestamp_ms`
    pub fn find_index(&self, timestamp_ms: i64) -> Option<usize> {
        let pos = self.timestamps.partition_point(|&ts| ts < timestamp_ms);
        (pos < self.timestamps.len()).then_some(pos)
    }

    fn check_range(&self, range: &Range<usize>) -> Result<()> {
        if range.start > range.end || range.end > self.len() {
            return Err(BacktestError::DataUnavailable(format!(
                "rows {}..{} outside series of length {}",
                range.start,
                range.end,
                self.len()
            )));
        }
        Ok(())
    }

    /// Copy of the rows in `range`, all columns kept
    pub fn slice(&self, range: Range<usize>) -> Result<TimeSeries> {
        self.check_range(&range)?;
        Ok(TimeSeries {
            timestamps: self.timestamps[range.clone()].to_vec(),
            names: self.names.clone(),
            columns: self
                .columns
                .iter()
                .map(|c| c[range.clone()].to_vec())
                .collect(),
            index: self.index.clone(),
        })
    }

    /// Copy of the given row positions, in the order given
    pub fn take_rows(&self, rows: &[usize]) -> TimeSeries {
        TimeSeries {
            timestamps: rows.iter().map(|&r| self.timestamps[r]).collect(),
            names: self.names.clone(),
            columns: self
                .columns
                .iter()
                .map(|c| rows.iter().map(|&r| c[r]).collect())
                .collect(),
            index: self.index.clone(),
        }
    }

    /// Row-major feature matrix for `range` (rows) x `features` (columns)
    pub fn feature_matrix(&self, range: Range<usize>, features: &[String]) -> Result<Array2<f64>> {
        self.check_range(&range)?;
        let cols: Vec<&[f64]> = features
            .iter()
            .map(|f| self.column(f))
            .collect::<Result<_>>()?;

        let start = range.start;
        Ok(Array2::from_shape_fn(
            (range.len(), cols.len()),
            |(i, j)| cols[j][start + i],
        ))
    }

    pub fn label_vector(&self, range: Range<usize>, label: &str) -> Result<Array1<f64>> {
        self.check_range(&range)?;
        let col = self.column(label)?;
        Ok(Array1::from(col[range].to_vec()))
    }

    /// Row positions where none of `names` is NaN or infinite
    pub fn complete_rows(&self, names: &[String]) -> Result<Vec<usize>> {
        let cols: Vec<&[f64]> = names
            .iter()
            .map(|n| self.column(n))
            .collect::<Result<_>>()?;

        Ok((0..self.len())
            .filter(|&i| cols.iter().all(|c| c[i].is_finite()))
            .collect())
    }
}

/// Parse a timestamp cell into epoch milliseconds
///
/// Integers are taken as milliseconds already.
pub fn parse_timestamp(raw: &str) -> Option<i64> {
    let s = raw.trim();
    if s.is_empty() {
        return None;
    }
    if let Ok(ms) = s.parse::<i64>() {
        return Some(ms);
    }
    if let Ok(ms) = s.parse::<f64>() {
        return ms.is_finite().then_some(ms as i64);
    }

    for fmt in TIMESTAMP_FORMATS {
        if let Ok(naive) = NaiveDateTime::parse_from_str(s, fmt) {
            return Some(Utc.from_utc_datetime(&naive).timestamp_millis());
        }
    }

    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return Some(dt.timestamp_millis());
    }

    NaiveDate::parse_from_str(s, "%Y-%m-%d")
        .ok()
        .and_then(|d| d.and_hms_opt(0, 0, 0))
        .map(|naive| Utc.from_utc_datetime(&naive).timestamp_millis())
}

/// Format epoch milliseconds as `YYYY-MM-DD HH:MM:SS` (UTC)
pub fn format_timestamp(ms: i64) -> String {
    Utc.timestamp_millis_opt(ms)
        .single()
        .map(|dt| dt.format("%Y-%m-%d %H:%M:%S").to_string())
        .unwrap_or_else(|| ms.to_string())
}
