//! Flat CSV table backend
//!
//! Values are kept as the strings read from disk so that fields this crate
//! does not own are written back unchanged.

use super::TableError;
use std::fs::File;
use std::io;
use std::path::Path;

/// Header-driven CSV table
#[derive(Debug, Clone, PartialEq)]
pub struct CsvTable {
    headers: Vec<String>,
    rows: Vec<Vec<String>>,
}

impl CsvTable {
    pub fn new(headers: Vec<String>, rows: Vec<Vec<String>>) -> Self {
        Self { headers, rows }
    }

    pub fn load(path: &Path) -> Result<Self, TableError> {
        Self::from_reader(File::open(path)?)
    }

    pub fn from_reader<R: io::Read>(source: R) -> Result<Self, TableError> {
        let mut reader = csv::ReaderBuilder::new().has_headers(true).from_reader(source);
        let headers = reader.headers()?.iter().map(str::to_string).collect();

        let mut rows = Vec::new();
        for record in reader.records() {
            rows.push(record?.iter().map(str::to_string).collect());
        }

        Ok(Self { headers, rows })
    }

    pub fn save(&self, path: &Path) -> Result<(), TableError> {
        let mut writer = csv::Writer::from_path(path)?;
        writer.write_record(&self.headers)?;
        for row in &self.rows {
            writer.write_record(row)?;
        }
        writer.flush()?;
        Ok(())
    }

    pub fn headers(&self) -> &[String] {
        &self.headers
    }

    pub fn rows(&self) -> &[Vec<String>] {
        &self.rows
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn column(&self, name: &str) -> Option<usize> {
        self.headers.iter().position(|h| h == name)
    }

    /// Raw string value of one cell
    pub fn value(&self, row: usize, field: &str) -> Option<&str> {
        let col = self.column(field)?;
        self.rows.get(row).and_then(|r| r.get(col)).map(String::as_str)
    }

    pub fn ensure_field(&mut self, name: &str, sentinel: f64) -> bool {
        if self.column(name).is_some() {
            return false;
        }
        self.headers.push(name.to_string());
        let sentinel = format_number(sentinel);
        for row in &mut self.rows {
            row.push(sentinel.clone());
        }
        true
    }

    pub fn set_number(&mut self, row: usize, field: &str, value: f64) -> Result<(), TableError> {
        let col = self
            .column(field)
            .ok_or_else(|| TableError::UnknownField(field.to_string()))?;
        let len = self.rows.len();
        let record = self
            .rows
            .get_mut(row)
            .ok_or(TableError::RowOutOfRange { row, len })?;
        let cell = record
            .get_mut(col)
            .ok_or_else(|| TableError::UnknownField(field.to_string()))?;
        *cell = format_number(value);
        Ok(())
    }

    pub fn number(&self, row: usize, field: &str) -> Option<f64> {
        self.value(row, field)?.trim().parse().ok()
    }

    pub fn position_of(&self, field: &str, value: u64) -> Option<usize> {
        let col = self.column(field)?;
        let target = value as f64;
        self.rows.iter().position(|r| {
            r.get(col)
                .and_then(|v| v.trim().parse::<f64>().ok())
                .is_some_and(|v| v == target)
        })
    }
}

/// Shortest string that parses back to the same value
fn format_number(value: f64) -> String {
    format!("{}", value)
}
