//! Output table cache and confidence merger
//!
//! Each table is loaded the first time an image resolves to it, gets a
//! `confidence` field (filled with the sentinel) if it has none, and stays in
//! memory until [`TableCache::flush_all`] writes every table back once.

use crate::error::AnnotateResult;
use crate::services::identity_resolver::{CellId, ResolveError};
use crate::tables::{OutputTable, TableError, CONFIDENCE_FIELD, SENTINEL};
use std::collections::hash_map::Entry;
use std::collections::HashMap;
use std::path::{Path, PathBuf};

pub struct TableCache {
    /// Struct array variable name for MAT-file tables
    variable: String,
    tables: HashMap<PathBuf, OutputTable>,
    /// First-reference order, used for flushing
    order: Vec<PathBuf>,
    loads: usize,
}

impl TableCache {
    pub fn new(variable: impl Into<String>) -> Self {
        Self {
            variable: variable.into(),
            tables: HashMap::new(),
            order: Vec::new(),
            loads: 0,
        }
    }

    /// Cached table for `path`, loading and evolving its schema on first use
    pub fn get_or_load(&mut self, path: &Path) -> Result<&mut OutputTable, TableError> {
        match self.tables.entry(path.to_path_buf()) {
            Entry::Occupied(entry) => {
                tracing::trace!(path = %path.display(), "Table cache hit");
                Ok(entry.into_mut())
            }
            Entry::Vacant(entry) => {
                let mut table = OutputTable::load(path, &self.variable)?;
                let added = table.ensure_field(CONFIDENCE_FIELD, SENTINEL);
                tracing::debug!(
                    path = %path.display(),
                    rows = table.len(),
                    added_field = added,
                    "Loaded output table"
                );
                self.order.push(path.to_path_buf());
                self.loads += 1;
                Ok(entry.insert(table))
            }
        }
    }

    pub fn get(&self, path: &Path) -> Option<&OutputTable> {
        self.tables.get(path)
    }

    /// Overwrite the confidence of one record; returns the 0-based row written
    pub fn set_confidence(&mut self, path: &Path, cell: CellId, value: f64) -> AnnotateResult<usize> {
        let table = self.get_or_load(path)?;
        let row = cell.locate(table).ok_or_else(|| ResolveError::CellNotFound {
            cell,
            table: path.to_path_buf(),
        })?;
        table.set_number(row, CONFIDENCE_FIELD, value)?;
        Ok(row)
    }

    /// Number of distinct tables held
    pub fn len(&self) -> usize {
        self.tables.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tables.is_empty()
    }

    pub fn contains(&self, path: &Path) -> bool {
        self.tables.contains_key(path)
    }

    /// Number of loads from disk
    pub fn loads(&self) -> usize {
        self.loads
    }

    /// Table paths in first-reference order
    pub fn paths(&self) -> &[PathBuf] {
        &self.order
    }

    /// Write every cached table back in its own format
    ///
    /// Stops at the first failure; tables already written stay written.
    pub fn flush_all(mut self) -> Result<Vec<PathBuf>, TableError> {
        let mut written = Vec::with_capacity(self.order.len());
        for path in std::mem::take(&mut self.order) {
            let Some(table) = self.tables.remove(&path) else {
                continue;
            };
            table.save(&path)?;
            tracing::info!(path = %path.display(), rows = table.len(), "Saved table");
            written.push(path);
        }
        Ok(written)
    }
}
