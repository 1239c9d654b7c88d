//! Tabular record buffer and work unit types
//!
//! A [`RecordTable`] is the in-memory form of the CSV being transformed. Short
//! rows are padded and over-wide rows are rejected. Cells are optional: an
//! empty CSV cell reads as `None` and `None` is written back as an empty
//! cell, so "absent" and "empty" are the same thing on disk.

use serde::{Deserialize, Serialize};
use std::io::{Read, Write};
use std::path::Path;

use crate::error::{IngestError, Result};

/// Ordered headers plus rows of optional string cells
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct RecordTable {
    headers: Vec<String>,
    rows: Vec<Vec<Option<String>>>,
}

impl RecordTable {
    /// Create an empty table with the given columns
    pub fn new(headers: Vec<String>) -> Self {
        Self {
            headers,
            rows: Vec::new(),
        }
    }

    /// Load a table from a CSV file with a header row
    pub fn from_csv_path(path: impl AsRef<Path>) -> Result<Self> {
        let file = std::fs::File::open(path)?;
        Self::from_reader(file)
    }

    /// Load a table from any CSV source with a header row
    pub fn from_reader<R: Read>(reader: R) -> Result<Self> {
        let mut csv_reader = csv::ReaderBuilder::new()
            .has_headers(true)
            .flexible(true)
            .from_reader(reader);

        let headers: Vec<String> = csv_reader.headers()?.iter().map(str::to_string).collect();
        let mut table = Self::new(headers);

        for record in csv_reader.records() {
            let record = record?;
            table.push_row(
                record
                    .iter()
                    .map(|cell| (!cell.is_empty()).then(|| cell.to_string()))
                    .collect(),
            )?;
        }

        Ok(table)
    }

    /// Write the table as CSV
    pub fn write_csv<W: Write>(&self, writer: W) -> Result<()> {
        self.write_records(writer)?;
        Ok(())
    }

    /// Replace `path` with this table, atomically
    pub fn save_csv(&self, path: &Path) -> Result<()> {
        hopper_common::atomic::write_with(path, |file| {
            self.write_records(file).map_err(std::io::Error::from)?;
            Ok(())
        })?;
        Ok(())
    }

    fn write_records<W: Write>(&self, writer: W) -> csv::Result<()> {
        let mut csv_writer = csv::Writer::from_writer(writer);
        csv_writer.write_record(&self.headers)?;
        for row in &self.rows {
            csv_writer.write_record(row.iter().map(|cell| cell.as_deref().unwrap_or("")))?;
        }
        csv_writer.flush()?;
        Ok(())
    }

    pub fn headers(&self) -> &[String] {
        &self.headers
    }

    /// Number of rows
    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn column_index(&self, name: &str) -> Option<usize> {
        self.headers.iter().position(|h| h == name)
    }

    /// Index of `name`, appending an all-empty column when it does not exist
    pub fn ensure_column(&mut self, name: &str) -> usize {
        if let Some(idx) = self.column_index(name) {
            return idx;
        }
        self.headers.push(name.to_string());
        for row in &mut self.rows {
            row.push(None);
        }
        self.headers.len() - 1
    }

    /// Requested columns that the table does not have, in request order
    pub fn missing_columns(&self, names: &[String]) -> Vec<String> {
        names
            .iter()
            .filter(|name| self.column_index(name).is_none())
            .cloned()
            .collect()
    }

    /// Append a row, padding a short one to the header width.
    ///
    /// A row wider than the header is rejected so no cell is lost on write.
    pub fn push_row(&mut self, mut cells: Vec<Option<String>>) -> Result<()> {
        let columns = self.headers.len();
        if cells.len() > columns {
            return Err(IngestError::RowTooWide {
                row: self.rows.len(),
                cells: cells.len(),
                columns,
            });
        }
        cells.resize(columns, None);
        self.rows.push(cells);
        Ok(())
    }

    pub fn get(&self, row: usize, col: usize) -> Option<&str> {
        self.rows.get(row)?.get(col)?.as_deref()
    }

    /// Overwrite one cell; out-of-range coordinates are ignored
    pub fn set(&mut self, row: usize, col: usize, value: Option<String>) {
        if let Some(cell) = self.rows.get_mut(row).and_then(|r| r.get_mut(col)) {
            *cell = value;
        }
    }
}

/// Lifecycle of a single work unit
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UnitStatus {
    Pending,
    Done,
    SoftFailed,
}

impl UnitStatus {
    pub fn as_str(&self) -> &str {
        match self {
            UnitStatus::Pending => "pending",
            UnitStatus::Done => "done",
            UnitStatus::SoftFailed => "soft_failed",
        }
    }
}

/// One field of one record awaiting transformation.
///
/// Identity is `(row, field)`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkUnit {
    /// 0-based row index in the record table
    pub row: usize,
    pub field: String,
    pub raw_value: String,
    pub transformed_value: Option<String>,
    pub status: UnitStatus,
}

impl WorkUnit {
    pub fn pending(row: usize, field: impl Into<String>, raw_value: impl Into<String>) -> Self {
        Self {
            row,
            field: field.into(),
            raw_value: raw_value.into(),
            transformed_value: None,
            status: UnitStatus::Pending,
        }
    }

    /// Record a successful transformation
    pub fn complete(mut self, value: String) -> Self {
        self.transformed_value = Some(value);
        self.status = UnitStatus::Done;
        self
    }

    /// Record a soft failure: the output keeps the untransformed input
    pub fn soft_fail(mut self) -> Self {
        self.transformed_value = Some(self.raw_value.clone());
        self.status = UnitStatus::SoftFailed;
        self
    }
}
