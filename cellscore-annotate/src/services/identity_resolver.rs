//! Image path to table record resolution
//!
//! The owning source directory picks the table (`{source}` substituted into
//! the output template). The record inside it comes from one of two schemes:
//! - [`IdStrategy::Direct`]: last run of digits in the path, a 1-based row
//! - [`IdStrategy::Pairing`]: stem `{frame_name}_{ordinal}`, frame number
//!   looked up in the sibling frames table, then [`pair`]ed into the value
//!   of the table's `cell_id` column

use crate::tables::frames::frames_path_for;
use crate::tables::{storage_path, FramesTable, OutputTable, TableError, TableFormat, CELL_ID_FIELD};
use cellscore_common::config::{ActivationConfig, IdStrategy};
use cellscore_common::templates::substitute_source;
use once_cell::sync::Lazy;
use regex::Regex;
use std::collections::hash_map::Entry;
use std::collections::HashMap;
use std::fmt;
use std::path::{Path, PathBuf};
use thiserror::Error;

static DIGIT_RUN: Lazy<Regex> = Lazy::new(|| Regex::new(r"\d+").expect("valid digit regex"));

/// Per-record identity errors
#[derive(Debug, Error)]
pub enum ResolveError {
    /// Path lies under none of the configured sources
    #[error("No configured source contains {0}")]
    NoMatchingSource(PathBuf),

    /// Direct strategy found no digits in the path
    #[error("No cell number in {0}")]
    NoDigits(PathBuf),

    /// Stem is not `{frame_name}_{ordinal}`
    #[error("File name of {0} is not <frame_name>_<ordinal>")]
    MalformedStem(PathBuf),

    /// Identifier does not fit in 64 bits
    #[error("Cell id out of range: {0}")]
    IdOverflow(String),

    /// Pairing ids need a CSV cell table with a sibling frames CSV
    #[error("Pairing strategy requires a CSV cell table, got {0}")]
    PairingNeedsCsv(PathBuf),

    /// Frames table could not be loaded
    #[error("Cannot load frames table {path}: {source}")]
    Frames {
        path: PathBuf,
        #[source]
        source: TableError,
    },

    /// Frame name absent from the frames table
    #[error("Frame '{frame}' not listed in {path}")]
    UnknownFrame { frame: String, path: PathBuf },

    /// No record carries the resolved identifier
    #[error("{cell} not found in {table}")]
    CellNotFound { cell: CellId, table: PathBuf },
}

/// Record identifier within one table
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CellId {
    /// 1-based record position
    Row(u64),
    /// Value of the `cell_id` column
    Synthesized(u64),
}

impl CellId {
    /// 0-based record index in `table`
    pub fn locate(&self, table: &OutputTable) -> Option<usize> {
        match *self {
            CellId::Row(id) => {
                let row = usize::try_from(id.checked_sub(1)?).ok()?;
                (row < table.len()).then_some(row)
            }
            CellId::Synthesized(id) => table.position_of(CELL_ID_FIELD, id),
        }
    }
}

impl fmt::Display for CellId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CellId::Row(id) => write!(f, "cell {}", id),
            CellId::Synthesized(id) => write!(f, "cell_id {}", id),
        }
    }
}

/// Where one image's confidence goes
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedCell {
    /// Output table path
    pub table: PathBuf,
    pub cell: CellId,
    /// Configured source that owns the image
    pub source: PathBuf,
}

/// Cantor pairing of a frame number and an intra-frame ordinal
///
/// None on overflow.
pub fn pair(frame: u64, ordinal: u64) -> Option<u64> {
    let sum = frame.checked_add(ordinal)?;
    let next = sum.checked_add(1)?;
    // One of sum and sum + 1 is even
    let triangle = if sum % 2 == 0 {
        (sum / 2).checked_mul(next)?
    } else {
        sum.checked_mul(next / 2)?
    };
    triangle.checked_add(frame)
}

/// Last run of decimal digits anywhere in the path
pub fn direct_id(path: &Path) -> Result<u64, ResolveError> {
    let text = path.to_string_lossy();
    let digits = DIGIT_RUN
        .find_iter(&text)
        .last()
        .ok_or_else(|| ResolveError::NoDigits(path.to_path_buf()))?;
    digits
        .as_str()
        .parse()
        .map_err(|_| ResolveError::IdOverflow(digits.as_str().to_string()))
}

/// Split a file stem on its last `_` into frame name and ordinal
pub fn split_stem(path: &Path) -> Result<(String, u64), ResolveError> {
    let malformed = || ResolveError::MalformedStem(path.to_path_buf());
    let stem = path.file_stem().map(|s| s.to_string_lossy()).ok_or_else(malformed)?;
    let (frame, ordinal) = stem.rsplit_once('_').ok_or_else(malformed)?;
    if frame.is_empty() {
        return Err(malformed());
    }
    let ordinal = ordinal.parse::<u64>().map_err(|_| malformed())?;
    Ok((frame.to_string(), ordinal))
}

/// Maps image paths to table records
pub struct IdentityResolver {
    sources: Vec<PathBuf>,
    out_template: String,
    strategy: IdStrategy,
    frames: HashMap<PathBuf, FramesTable>,
}

impl IdentityResolver {
    pub fn new(sources: Vec<PathBuf>, out_template: impl Into<String>, strategy: IdStrategy) -> Self {
        Self {
            sources: sources.iter().map(|s| super::source_indexer::absolute(s)).collect(),
            out_template: out_template.into(),
            strategy,
            frames: HashMap::new(),
        }
    }

    pub fn from_config(config: &ActivationConfig) -> Self {
        Self::new(config.sources.clone(), config.out_path.clone(), config.id_strategy)
    }

    pub fn strategy(&self) -> IdStrategy {
        self.strategy
    }

    /// First configured source that is an ancestor of `path`
    pub fn source_for(&self, path: &Path) -> Result<&Path, ResolveError> {
        self.sources
            .iter()
            .find(|source| path.starts_with(source))
            .map(PathBuf::as_path)
            .ok_or_else(|| ResolveError::NoMatchingSource(path.to_path_buf()))
    }

    /// Output table file for a source
    pub fn table_path(&self, source: &Path) -> PathBuf {
        storage_path(Path::new(&substitute_source(&self.out_template, &source.to_string_lossy())))
    }

    pub fn resolve(&mut self, path: &Path) -> Result<ResolvedCell, ResolveError> {
        let source = self.source_for(path)?.to_path_buf();
        let table = self.table_path(&source);

        let cell = match self.strategy {
            IdStrategy::Direct => CellId::Row(direct_id(path)?),
            IdStrategy::Pairing => {
                if !matches!(TableFormat::from_path(&table), Ok(TableFormat::Csv)) {
                    return Err(ResolveError::PairingNeedsCsv(table));
                }
                let (frame_name, ordinal) = split_stem(path)?;
                let frames_path = frames_path_for(&table);
                let frame = self
                    .frames_for(&frames_path)?
                    .frame_number(&frame_name)
                    .ok_or_else(|| ResolveError::UnknownFrame {
                        frame: frame_name.clone(),
                        path: frames_path.clone(),
                    })?;
                let id = pair(frame, ordinal).ok_or_else(|| {
                    ResolveError::IdOverflow(format!("frame {} ordinal {}", frame, ordinal))
                })?;
                CellId::Synthesized(id)
            }
        };

        Ok(ResolvedCell {
            table,
            cell,
            source,
        })
    }

    /// Frames table at `path`, loaded on first use
    fn frames_for(&mut self, path: &Path) -> Result<&FramesTable, ResolveError> {
        match self.frames.entry(path.to_path_buf()) {
            Entry::Occupied(entry) => Ok(entry.into_mut()),
            Entry::Vacant(entry) => {
                let frames = FramesTable::load(path).map_err(|source| ResolveError::Frames {
                    path: path.to_path_buf(),
                    source,
                })?;
                Ok(entry.insert(frames))
            }
        }
    }

    /// Frames tables loaded so far
    pub fn frames_loaded(&self) -> usize {
        self.frames.len()
    }
}
