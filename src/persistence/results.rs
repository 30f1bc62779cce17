//! Append-only grid results table

use crate::backtesting::{GridResultRow, RESULT_COLUMNS};
use crate::error::{BacktestError, Result};
use csv::{ReaderBuilder, WriterBuilder};
use std::collections::HashSet;
use std::fs::{self, File, OpenOptions};
use std::path::{Path, PathBuf};
use tracing::info;

/// Results CSV; the header is written only when the file is new or empty
pub struct ResultsTable {
    path: PathBuf,
}

impl ResultsTable {
    /// Open `path`, failing with `ResultsMismatch` if it holds another header
    pub fn open(path: &Path) -> Result<Self> {
        let table = Self {
            path: path.to_path_buf(),
        };
        if table.has_data() {
            table.check_header()?;
        }
        Ok(table)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn has_data(&self) -> bool {
        fs::metadata(&self.path).map(|m| m.len() > 0).unwrap_or(false)
    }

    fn check_header(&self) -> Result<()> {
        let mut reader = ReaderBuilder::new()
            .has_headers(true)
            .from_reader(File::open(&self.path)?);
        let found: Vec<String> = reader.headers()?.iter().map(|h| h.to_string()).collect();

        if found != RESULT_COLUMNS {
            return Err(BacktestError::ResultsMismatch(format!(
                "{} has header [{}], expected [{}]",
                self.path.display(),
                found.join(","),
                RESULT_COLUMNS.join(",")
            )));
        }
        Ok(())
    }

    /// Rows already stored
    pub fn read_rows(&self) -> Result<Vec<GridResultRow>> {
        if !self.has_data() {
            return Ok(Vec::new());
        }
        let mut reader = ReaderBuilder::new()
            .has_headers(true)
            .from_reader(File::open(&self.path)?);

        let mut rows = Vec::new();
        for record in reader.deserialize() {
            rows.push(record?);
        }
        Ok(rows)
    }

    /// Parameter keys of the stored rows
    pub fn completed_keys(&self) -> Result<HashSet<String>> {
        Ok(self
            .read_rows()?
            .iter()
            .map(GridResultRow::parameter_key)
            .collect())
    }

    pub fn append(&self, rows: &[GridResultRow]) -> Result<()> {
        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)?;
        }
        let file_has_data = self.has_data();

        let file = OpenOptions::new()
            .write(true)
            .create(true)
            .append(true)
            .open(&self.path)?;
        let mut writer = WriterBuilder::new()
            .has_headers(!file_has_data)
            .from_writer(file);

        for row in rows {
            writer.serialize(row)?;
        }
        writer.flush()?;

        info!("💾 Appended {} result rows to {}", rows.len(), self.path.display());
        Ok(())
    }
}
