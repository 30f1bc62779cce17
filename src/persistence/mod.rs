//! Persistence Module
//!
//! Table I/O at the pipeline boundaries:
//! - `TimeSeries` load/write as CSV or Parquet (chosen by file extension)
//! - Grid results appended to a CSV with a single header
//! - Plain-text accuracy log

mod parquet_io;
mod results;

pub use results::ResultsTable;

use crate::error::{BacktestError, Result};
use crate::types::{format_timestamp, parse_timestamp, TimeSeries, TIMESTAMP_COLUMN};
use csv::{ReaderBuilder, WriterBuilder};
use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::Path;
use tracing::{debug, info, warn};

/// On-disk table layouts
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TableFormat {
    Csv,
    Parquet,
}

impl TableFormat {
    /// `.csv`, `.parquet` or `.parq` (case-insensitive)
    pub fn from_path(path: &Path) -> Result<Self> {
        let ext = path
            .extension()
            .and_then(|e| e.to_str())
            .map(|e| e.to_ascii_lowercase());

        match ext.as_deref() {
            Some("csv") => Ok(TableFormat::Csv),
            Some("parquet") | Some("parq") => Ok(TableFormat::Parquet),
            _ => Err(BacktestError::UnsupportedFormat(path.display().to_string())),
        }
    }

    /// Parse the configured `out_format` value
    pub fn from_name(name: &str) -> Result<Self> {
        match name.to_ascii_lowercase().as_str() {
            "csv" => Ok(TableFormat::Csv),
            "parquet" | "parq" => Ok(TableFormat::Parquet),
            other => Err(BacktestError::UnsupportedFormat(other.to_string())),
        }
    }

    pub fn extension(&self) -> &'static str {
        match self {
            TableFormat::Csv => "csv",
            TableFormat::Parquet => "parquet",
        }
    }
}

/// Load a table, keeping at most `nrows` rows
pub fn load_table(path: &Path, nrows: Option<usize>) -> Result<TimeSeries> {
    let format = TableFormat::from_path(path)?;
    if !path.exists() {
        return Err(BacktestError::DataUnavailable(format!(
            "input file {} not found",
            path.display()
        )));
    }

    info!("📂 Loading {} ...", path.display());
    let series = match format {
        TableFormat::Csv => load_csv(path, nrows)?,
        TableFormat::Parquet => parquet_io::load_parquet(path, nrows)?,
    };

    if series.timestamps().windows(2).any(|w| w[1] < w[0]) {
        warn!("⚠️ Timestamps in {} are not in ascending order", path.display());
    }
    info!(
        "📂 Loaded {} rows, {} columns from {}",
        series.len(),
        series.column_names().len(),
        path.display()
    );
    Ok(series)
}

/// Write a table in the format given by the path extension
pub fn write_table(series: &TimeSeries, path: &Path) -> Result<()> {
    let format = TableFormat::from_path(path)?;
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent)?;
    }

    match format {
        TableFormat::Csv => write_csv(series, path)?,
        TableFormat::Parquet => parquet_io::write_parquet(series, path)?,
    }
    info!("💾 Wrote {} rows to {}", series.len(), path.display());
    Ok(())
}

/// Append one line to a text log, creating it if needed
pub fn append_line(path: &Path, line: &str) -> Result<()> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent)?;
    }
    let mut file = OpenOptions::new().create(true).append(true).open(path)?;
    writeln!(file, "{}", line)?;
    Ok(())
}

fn parse_cell(cell: &str) -> Option<f64> {
    match cell {
        "true" | "True" | "TRUE" => Some(1.0),
        "false" | "False" | "FALSE" => Some(0.0),
        _ => cell.parse().ok(),
    }
}

fn load_csv(path: &Path, nrows: Option<usize>) -> Result<TimeSeries> {
    let mut reader = ReaderBuilder::new().has_headers(true).from_path(path)?;
    let headers = reader.headers()?.clone();
    let ts_pos = headers
        .iter()
        .position(|h| h.trim() == TIMESTAMP_COLUMN)
        .ok_or_else(|| {
            BacktestError::DataUnavailable(format!(
                "{} has no '{}' column",
                path.display(),
                TIMESTAMP_COLUMN
            ))
        })?;

    let width = headers.len();
    let mut timestamps = Vec::new();
    let mut columns: Vec<Vec<f64>> = vec![Vec::new(); width];
    let mut non_empty = vec![0usize; width];
    let mut unparsed = vec![0usize; width];

    for (row, record) in reader.records().enumerate() {
        if nrows.is_some_and(|n| row >= n) {
            break;
        }
        let record = record?;

        let raw_ts = record.get(ts_pos).unwrap_or("");
        let ts = parse_timestamp(raw_ts).ok_or_else(|| {
            BacktestError::DataUnavailable(format!(
                "{} row {}: invalid timestamp '{}'",
                path.display(),
                row + 1,
                raw_ts
            ))
        })?;
        timestamps.push(ts);

        for (j, cell) in record.iter().enumerate() {
            if j == ts_pos {
                continue;
            }
            let cell = cell.trim();
            let value = if cell.is_empty() {
                f64::NAN
            } else {
                non_empty[j] += 1;
                parse_cell(cell).unwrap_or_else(|| {
                    unparsed[j] += 1;
                    f64::NAN
                })
            };
            columns[j].push(value);
        }
    }

    let mut series = TimeSeries::new(timestamps);
    for (j, (name, values)) in headers.iter().zip(columns).enumerate() {
        if j == ts_pos {
            continue;
        }
        if non_empty[j] > 0 && unparsed[j] == non_empty[j] {
            debug!("Dropping non-numeric column '{}'", name);
            continue;
        }
        series.push_column(name.trim(), values)?;
    }
    Ok(series)
}

fn format_value(value: f64) -> String {
    if value.is_nan() {
        String::new()
    } else {
        format!("{:.4}", value)
    }
}

fn write_csv(series: &TimeSeries, path: &Path) -> Result<()> {
    let mut writer = WriterBuilder::new().has_headers(false).from_path(path)?;

    let mut header = vec![TIMESTAMP_COLUMN.to_string()];
    header.extend(series.column_names().iter().cloned());
    writer.write_record(&header)?;

    let columns: Vec<&[f64]> = series
        .column_names()
        .iter()
        .map(|n| series.column(n))
        .collect::<Result<_>>()?;

    for (row, &ts) in series.timestamps().iter().enumerate() {
        let mut record = Vec::with_capacity(columns.len() + 1);
        record.push(format_timestamp(ts));
        record.extend(columns.iter().map(|c| format_value(c[row])));
        writer.write_record(&record)?;
    }
    writer.flush()?;
    Ok(())
}
