//! Persistent per-cell tables
//!
//! Two storage backends hold the same logical shape (one record per cell,
//! named fields):
//! - [`StructArrayTable`]: a struct array variable inside a MAT-file
//! - [`CsvTable`]: a header-driven CSV file
//!
//! [`OutputTable`] dispatches over both so the cache and the driver never
//! care which one they hold.

pub mod csv_table;
pub mod frames;
pub mod mat5;
pub mod struct_array;

pub use csv_table::CsvTable;
pub use frames::FramesTable;
pub use struct_array::StructArrayTable;

use std::path::{Path, PathBuf};
use thiserror::Error;

/// Field this crate is responsible for populating
pub const CONFIDENCE_FIELD: &str = "confidence";

/// Field holding synthesized cell ids
pub const CELL_ID_FIELD: &str = "cell_id";

/// Value marking a record as not yet annotated
pub const SENTINEL: f64 = -1.0;

/// Extension given to table paths that have none
pub const MAT_EXTENSION: &str = "mat";

/// Table storage errors
#[derive(Debug, Error)]
pub enum TableError {
    /// File could not be read or written
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// CSV parse or write failure
    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    /// Malformed MAT-file content
    #[error("Malformed MAT-file: {0}")]
    Mat(String),

    /// Valid file using a feature this crate does not handle
    #[error("Unsupported: {0}")]
    Unsupported(String),

    /// Table path extension maps to no backend
    #[error("Unsupported table format: {0}")]
    UnsupportedFormat(PathBuf),

    /// Expected top-level variable absent or not a struct array
    #[error("Variable '{variable}' missing or not a struct array in {path}")]
    MissingVariable { variable: String, path: PathBuf },

    /// Expected column absent
    #[error("Column '{column}' missing in {path}")]
    MissingColumn { column: String, path: PathBuf },

    /// Record index beyond the end of the table
    #[error("Row {row} out of range (table has {len} rows)")]
    RowOutOfRange { row: usize, len: usize },

    /// Field absent from the schema
    #[error("Unknown field '{0}'")]
    UnknownField(String),

    /// Cell content that cannot be interpreted
    #[error("Invalid value: {0}")]
    InvalidValue(String),
}

/// Storage backend of a table
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TableFormat {
    StructArray,
    Csv,
}

impl TableFormat {
    /// Backend for a table path, chosen by extension
    ///
    /// A path without extension is a struct-array table stored at `<path>.mat`.
    pub fn from_path(path: &Path) -> Result<Self, TableError> {
        let Some(ext) = path.extension() else {
            return Ok(TableFormat::StructArray);
        };
        match ext.to_string_lossy().to_lowercase().as_str() {
            MAT_EXTENSION => Ok(TableFormat::StructArray),
            "csv" => Ok(TableFormat::Csv),
            _ => Err(TableError::UnsupportedFormat(path.to_path_buf())),
        }
    }
}

/// File a table path is read from and written to
///
/// Appends `.mat` to a path without extension; any other path is unchanged.
pub fn storage_path(path: &Path) -> PathBuf {
    if path.extension().is_some() || path.file_name().is_none() {
        return path.to_path_buf();
    }
    let mut name = path.as_os_str().to_os_string();
    name.push(".");
    name.push(MAT_EXTENSION);
    PathBuf::from(name)
}

/// A loaded output table of either backend
#[derive(Debug, Clone)]
pub enum OutputTable {
    StructArray(StructArrayTable),
    Csv(CsvTable),
}

impl OutputTable {
    /// Load a table from disk; `variable` names the struct array in MAT-files
    pub fn load(path: &Path, variable: &str) -> Result<Self, TableError> {
        let format = TableFormat::from_path(path)?;
        let path = storage_path(path);
        match format {
            TableFormat::StructArray => Ok(OutputTable::StructArray(StructArrayTable::load(&path, variable)?)),
            TableFormat::Csv => Ok(OutputTable::Csv(CsvTable::load(&path)?)),
        }
    }

    pub fn format(&self) -> TableFormat {
        match self {
            OutputTable::StructArray(_) => TableFormat::StructArray,
            OutputTable::Csv(_) => TableFormat::Csv,
        }
    }

    pub fn field_names(&self) -> Vec<String> {
        match self {
            OutputTable::StructArray(t) => t.field_names(),
            OutputTable::Csv(t) => t.headers().to_vec(),
        }
    }

    pub fn has_field(&self, name: &str) -> bool {
        self.field_names().iter().any(|f| f == name)
    }

    /// Number of records
    pub fn len(&self) -> usize {
        match self {
            OutputTable::StructArray(t) => t.len(),
            OutputTable::Csv(t) => t.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Append `name` filled with `sentinel` unless the field already exists
    ///
    /// Returns true when the field was added. Existing values are never touched.
    pub fn ensure_field(&mut self, name: &str, sentinel: f64) -> bool {
        match self {
            OutputTable::StructArray(t) => t.ensure_field(name, sentinel),
            OutputTable::Csv(t) => t.ensure_field(name, sentinel),
        }
    }

    /// Overwrite one numeric field of one record (0-based)
    pub fn set_number(&mut self, row: usize, field: &str, value: f64) -> Result<(), TableError> {
        match self {
            OutputTable::StructArray(t) => t.set_number(row, field, value),
            OutputTable::Csv(t) => t.set_number(row, field, value),
        }
    }

    /// Numeric value of one field of one record (0-based)
    pub fn number(&self, row: usize, field: &str) -> Option<f64> {
        match self {
            OutputTable::StructArray(t) => t.number(row, field),
            OutputTable::Csv(t) => t.number(row, field),
        }
    }

    /// Index of the first record whose `field` equals `value`
    pub fn position_of(&self, field: &str, value: u64) -> Option<usize> {
        match self {
            OutputTable::StructArray(t) => t.position_of(field, value),
            OutputTable::Csv(t) => t.position_of(field, value),
        }
    }

    /// Persist in the table's original format
    pub fn save(&self, path: &Path) -> Result<(), TableError> {
        let path = storage_path(path);
        match self {
            OutputTable::StructArray(t) => t.save(&path),
            OutputTable::Csv(t) => t.save(&path),
        }
    }
}
