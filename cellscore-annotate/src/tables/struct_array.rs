//! Struct-array table backend
//!
//! The table is one struct array variable (by default `fullCellDataMod`)
//! inside a MAT-file. Every other variable in the file is carried along and
//! written back in its original position.

use super::mat5::{MatArray, MatFile, StructArray};
use super::TableError;
use std::path::{Path, PathBuf};

/// Struct array held in a MAT-file
#[derive(Debug, Clone)]
pub struct StructArrayTable {
    file: MatFile,
    variable: String,
    source: PathBuf,
}

impl StructArrayTable {
    pub fn load(path: &Path, variable: &str) -> Result<Self, TableError> {
        let file = MatFile::read(path)?;
        Self::from_file(file, variable, path)
    }

    /// Wrap an already decoded file
    pub fn from_file(file: MatFile, variable: &str, path: &Path) -> Result<Self, TableError> {
        let is_struct = file
            .variable(variable)
            .is_some_and(|v| v.array.as_struct().is_some());
        if !is_struct {
            return Err(TableError::MissingVariable {
                variable: variable.to_string(),
                path: path.to_path_buf(),
            });
        }
        Ok(Self {
            file,
            variable: variable.to_string(),
            source: path.to_path_buf(),
        })
    }

    pub fn save(&self, path: &Path) -> Result<(), TableError> {
        self.file.write(path)
    }

    pub fn file(&self) -> &MatFile {
        &self.file
    }

    fn records(&self) -> Result<&StructArray, TableError> {
        self.file
            .variable(&self.variable)
            .and_then(|v| v.array.as_struct())
            .ok_or_else(|| self.missing())
    }

    fn records_mut(&mut self) -> Result<&mut StructArray, TableError> {
        let missing = self.missing();
        self.file
            .variable_mut(&self.variable)
            .and_then(|v| v.array.as_struct_mut())
            .ok_or(missing)
    }

    fn missing(&self) -> TableError {
        TableError::MissingVariable {
            variable: self.variable.clone(),
            path: self.source.clone(),
        }
    }

    pub fn field_names(&self) -> Vec<String> {
        self.records()
            .map(|r| r.field_names.clone())
            .unwrap_or_default()
    }

    pub fn len(&self) -> usize {
        self.records().map(StructArray::len).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Field value of one record
    pub fn value(&self, row: usize, field: &str) -> Option<&MatArray> {
        self.records().ok()?.get(row, field)
    }

    pub fn ensure_field(&mut self, name: &str, sentinel: f64) -> bool {
        let Ok(records) = self.records_mut() else {
            return false;
        };
        if records.field_index(name).is_some() {
            return false;
        }
        records.field_names.push(name.to_string());
        for element in &mut records.elements {
            element.push(MatArray::scalar(sentinel));
        }
        true
    }

    pub fn set_number(&mut self, row: usize, field: &str, value: f64) -> Result<(), TableError> {
        let records = self.records_mut()?;
        let f = records
            .field_index(field)
            .ok_or_else(|| TableError::UnknownField(field.to_string()))?;
        let len = records.elements.len();
        let slot = records
            .elements
            .get_mut(row)
            .and_then(|element| element.get_mut(f))
            .ok_or(TableError::RowOutOfRange { row, len })?;
        *slot = MatArray::scalar(value);
        Ok(())
    }

    pub fn number(&self, row: usize, field: &str) -> Option<f64> {
        self.value(row, field)?.as_f64()
    }

    pub fn position_of(&self, field: &str, value: u64) -> Option<usize> {
        let records = self.records().ok()?;
        let f = records.field_index(field)?;
        let target = value as f64;
        records
            .elements
            .iter()
            .position(|element| element.get(f).and_then(MatArray::as_f64) == Some(target))
    }
}
